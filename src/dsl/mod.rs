use serde::{Deserialize, Serialize};

pub mod parser;
pub mod validator;

pub use parser::SchemaParser;
pub use validator::SchemaValidator;

use crate::page::Locator;

/// Extraction schema: the rules applied to every visited page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionSchema {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub rules: Vec<ExtractionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationPolicy>,
}

/// Pagination configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
    /// Settle time after each page advance, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_between_pages: Option<u64>,
}

/// A single node of the extraction rule tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRule {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformKind>,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExtractionRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Text,
    Html,
    Value,
    Attribute,
    Href,
    Src,
    Table,
    List,
    Json,
    Links,
    Images,
    Metadata,
    Form,
    Screenshot,
}

/// Post-extraction transform. `Number`, `Date` and `Json` are accepted but
/// leave the value unchanged; callers needing coercion apply it themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    Trim,
    Lowercase,
    Uppercase,
    Number,
    Date,
    Json,
}

impl RuleType {
    /// Types that read from the page as a whole and need no locator
    pub fn is_page_level(self) -> bool {
        matches!(self, RuleType::Metadata | RuleType::Screenshot | RuleType::Links | RuleType::Images)
    }

    /// Locator used when a page-level collection rule omits one
    pub fn default_selector(self) -> Option<&'static str> {
        match self {
            RuleType::Links => Some("a[href]"),
            RuleType::Images => Some("img"),
            _ => None,
        }
    }

    /// Attribute read by the attribute-family types
    pub fn implied_attribute(self) -> Option<&'static str> {
        match self {
            RuleType::Href => Some("href"),
            RuleType::Src => Some("src"),
            _ => None,
        }
    }
}

impl ExtractionRule {
    pub fn new(name: impl Into<String>, rule_type: RuleType) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            rule_type,
            selector: None,
            xpath: None,
            attribute: None,
            regex: None,
            transform: None,
            multiple: false,
            optional: false,
            fallback_selector: None,
            children: Vec::new(),
        }
    }

    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn xpath(mut self, xpath: impl Into<String>) -> Self {
        self.xpath = Some(xpath.into());
        self
    }

    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn regex(mut self, pattern: impl Into<String>) -> Self {
        self.regex = Some(pattern.into());
        self
    }

    pub fn transform(mut self, transform: TransformKind) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn fallback(mut self, selector: impl Into<String>) -> Self {
        self.fallback_selector = Some(selector.into());
        self
    }

    pub fn child(mut self, child: ExtractionRule) -> Self {
        self.children.push(child);
        self
    }

    /// The authoritative locator: `selector` wins over `xpath`.
    pub fn locator(&self) -> Option<Locator> {
        let non_empty = |s: &Option<String>| s.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

        non_empty(&self.selector)
            .map(Locator::Css)
            .or_else(|| non_empty(&self.xpath).map(Locator::XPath))
    }

    pub fn fallback_locator(&self) -> Option<Locator> {
        self.fallback_selector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Locator::Css(s.to_string()))
    }
}

impl ExtractionSchema {
    pub fn new(id: impl Into<String>, rules: Vec<ExtractionRule>) -> Self {
        Self {
            id: id.into(),
            name: None,
            rules,
            pagination: None,
        }
    }

    pub fn with_pagination(mut self, pagination: PaginationPolicy) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Get rule by name
    pub fn get_rule(&self, name: &str) -> Option<&ExtractionRule> {
        self.rules.iter().find(|r| r.name == name)
    }
}

/// Schema examples for testing and documentation
pub struct SchemaExamples;

impl SchemaExamples {
    /// Product listing with a paginated catalogue
    pub fn product_listing() -> ExtractionSchema {
        ExtractionSchema {
            id: "products".to_string(),
            name: Some("Product listing".to_string()),
            rules: vec![
                ExtractionRule::new("heading", RuleType::Text)
                    .selector("h1")
                    .transform(TransformKind::Trim),
                ExtractionRule::new("products", RuleType::List)
                    .selector(".product")
                    .child(ExtractionRule::new("title", RuleType::Text).selector(".title"))
                    .child(
                        ExtractionRule::new("price", RuleType::Text)
                            .selector(".price")
                            .regex(r"([\d.]+)"),
                    )
                    .child(ExtractionRule::new("url", RuleType::Href).selector("a"))
                    .child(ExtractionRule::new("badge", RuleType::Text).selector(".badge").optional()),
                ExtractionRule::new("meta", RuleType::Metadata),
            ],
            pagination: Some(PaginationPolicy {
                next_selector: Some("a.next".to_string()),
                max_pages: Some(5),
                wait_between_pages: Some(2000),
            }),
        }
    }

    /// Single article page
    pub fn article() -> ExtractionSchema {
        ExtractionSchema::new(
            "article",
            vec![
                ExtractionRule::new("headline", RuleType::Text)
                    .selector("article h1")
                    .fallback("h1"),
                ExtractionRule::new("author", RuleType::Text)
                    .xpath("//span[@class='author']")
                    .optional(),
                ExtractionRule::new("published", RuleType::Attribute)
                    .selector("time")
                    .attribute("datetime"),
                ExtractionRule::new("paragraphs", RuleType::Text)
                    .selector("article p")
                    .multiple(),
            ],
        )
    }
}
