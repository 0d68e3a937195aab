//! Depth-tracked walk over an extraction rule tree.

use base64::Engine as _;
use futures::future::{try_join_all, FutureExt, LocalBoxFuture};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::dsl::{ExtractionRule, RuleType};
use crate::error::{FlowError, FlowResult};
use crate::page::{ElementHandle, Locator, PageCapability};
use super::postprocess;

/// Where a strategy reads from
enum Target {
    /// Elements matched by a locator, relative to the current scope
    Matches(Locator),
    /// The scope element itself (child rule without a locator)
    Scope(ElementHandle),
    /// The page as a whole
    Page,
}

pub(crate) struct RuleWalker<'p> {
    page: &'p dyn PageCapability,
    base_url: Option<Url>,
    max_depth: usize,
    absolutize_urls: bool,
    item_errors: Vec<String>,
}

impl<'p> RuleWalker<'p> {
    pub(crate) fn new(
        page: &'p dyn PageCapability,
        base_url: Option<Url>,
        max_depth: usize,
        absolutize_urls: bool,
    ) -> Self {
        Self {
            page,
            base_url,
            max_depth,
            absolutize_urls,
            item_errors: Vec::new(),
        }
    }

    /// Per-item failures recorded inside list rules since the last call
    pub(crate) fn take_item_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.item_errors)
    }

    pub(crate) fn walk<'a>(
        &'a mut self,
        rule: &'a ExtractionRule,
        scope: Option<ElementHandle>,
        depth: usize,
    ) -> LocalBoxFuture<'a, FlowResult<Value>> {
        async move {
            if depth > self.max_depth {
                return Err(FlowError::MaxDepthExceeded { depth: self.max_depth });
            }

            let target = target_for(rule, scope)?;
            let value = match self.run_strategy(rule, scope, target, depth).await {
                Ok(value) => value,
                Err(primary) => match rule.fallback_locator() {
                    Some(fallback) => {
                        debug!("Rule '{}' failed ({}), trying fallback selector {}", rule.name, primary, fallback);
                        self.run_strategy(rule, scope, Target::Matches(fallback), depth)
                            .await
                            .map_err(|_| primary)?
                    }
                    None => return Err(primary),
                },
            };

            Ok(postprocess::apply(rule, value))
        }
        .boxed_local()
    }

    async fn run_strategy(
        &mut self,
        rule: &ExtractionRule,
        scope: Option<ElementHandle>,
        target: Target,
        depth: usize,
    ) -> FlowResult<Value> {
        match rule.rule_type {
            RuleType::Metadata => {
                let metadata = self.page.metadata().await?;
                serde_json::to_value(metadata).map_err(|e| FlowError::extraction(e.to_string()))
            }
            RuleType::Screenshot => {
                let bytes = self.page.screenshot().await?;
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                Ok(Value::String(format!("data:image/png;base64,{}", encoded)))
            }
            RuleType::List => {
                let items = self.find(scope, &target).await?;
                self.extract_list(rule, items, depth).await
            }
            RuleType::Links => {
                let this = &*self;
                let anchors = this.find(scope, &target).await?;
                let links = try_join_all(anchors.into_iter().map(|a| this.read_link(a))).await?;
                Ok(Value::Array(links))
            }
            RuleType::Images => {
                let this = &*self;
                let images = this.find(scope, &target).await?;
                let images = try_join_all(images.into_iter().map(|i| this.read_image(i))).await?;
                Ok(Value::Array(images))
            }
            _ => {
                let this = &*self;
                let elements = this.find(scope, &target).await?;
                if rule.multiple {
                    let values = try_join_all(elements.into_iter().map(|e| this.read_element(rule, e))).await?;
                    Ok(Value::Array(values))
                } else {
                    let element = elements.into_iter().next().ok_or_else(|| not_found(&target))?;
                    this.read_element(rule, element).await
                }
            }
        }
    }

    async fn find(&self, scope: Option<ElementHandle>, target: &Target) -> FlowResult<Vec<ElementHandle>> {
        match target {
            Target::Matches(locator) => self.page.query_all(scope, locator).await,
            Target::Scope(element) => Ok(vec![*element]),
            Target::Page => Ok(Vec::new()),
        }
    }

    /// Single-element read for the scalar and fixed-shape types
    async fn read_element(&self, rule: &ExtractionRule, element: ElementHandle) -> FlowResult<Value> {
        match rule.rule_type {
            RuleType::Text => Ok(Value::String(self.page.text(element).await?.trim().to_string())),
            RuleType::Html => Ok(Value::String(self.page.inner_html(element).await?)),
            RuleType::Value => Ok(Value::String(self.page.input_value(element).await?)),
            RuleType::Attribute => {
                let name = rule
                    .attribute
                    .as_deref()
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| FlowError::extraction(format!("Rule '{}' names no attribute", rule.name)))?;
                Ok(self.page.attribute(element, name).await?.map_or(Value::Null, Value::String))
            }
            RuleType::Href | RuleType::Src => {
                let name = rule.rule_type.implied_attribute().unwrap_or("href");
                Ok(self
                    .page
                    .attribute(element, name)
                    .await?
                    .map_or(Value::Null, |raw| Value::String(self.absolutize(&raw))))
            }
            RuleType::Json => self.read_json(element).await,
            RuleType::Table => self.read_table(element).await,
            RuleType::Form => self.read_form(element).await,
            RuleType::Links => self.read_link(element).await,
            RuleType::Images => self.read_image(element).await,
            RuleType::List | RuleType::Metadata | RuleType::Screenshot => {
                Err(FlowError::internal(format!("{:?} is not an element strategy", rule.rule_type)))
            }
        }
    }

    async fn extract_list(
        &mut self,
        rule: &ExtractionRule,
        items: Vec<ElementHandle>,
        depth: usize,
    ) -> FlowResult<Value> {
        let mut values = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            if rule.children.is_empty() {
                values.push(Value::String(self.page.text(item).await?.trim().to_string()));
                continue;
            }

            let mut record = Map::new();
            for child in &rule.children {
                let recorded = self.item_errors.len();
                let outcome = self.walk(child, Some(item), depth + 1).await;
                if child.optional {
                    // Item errors of an optional nested list are not recorded
                    self.item_errors.truncate(recorded);
                }
                let value = match outcome {
                    Ok(value) => value,
                    Err(FlowError::MaxDepthExceeded { depth }) => return Err(FlowError::MaxDepthExceeded { depth }),
                    Err(e) if child.optional => {
                        debug!("Optional field {}[{}].{} skipped: {}", rule.name, index, child.name, e);
                        Value::Null
                    }
                    Err(e) => {
                        self.item_errors
                            .push(format!("{}[{}].{}: {}", rule.name, index, child.name, e));
                        Value::Null
                    }
                };
                record.insert(child.name.clone(), value);
            }
            values.push(Value::Object(record));
        }

        Ok(Value::Array(values))
    }

    async fn read_json(&self, element: ElementHandle) -> FlowResult<Value> {
        let text = self.page.text(element).await?;
        if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
            return Ok(value);
        }

        let embedded = match (text.find('{'), text.rfind('}')) {
            (Some(start), Some(end)) if start < end => serde_json::from_str::<Value>(&text[start..=end]).ok(),
            _ => None,
        };

        Ok(embedded.unwrap_or_else(|| {
            warn!("Element text is not valid JSON, value dropped");
            Value::Null
        }))
    }

    async fn read_table(&self, table: ElementHandle) -> FlowResult<Value> {
        let rows = self.page.query_all(Some(table), &Locator::css("tr")).await?;
        let mut rows = rows.into_iter();

        let headers: Vec<String> = match rows.next() {
            Some(header_row) => self
                .cell_texts(header_row)
                .await?
                .into_iter()
                .enumerate()
                .map(|(i, h)| if h.is_empty() { format!("col_{}", i) } else { h })
                .collect(),
            None => return Ok(Value::Array(Vec::new())),
        };

        let mut records = Vec::new();
        for row in rows {
            let mut record = Map::new();
            for (i, cell) in self.cell_texts(row).await?.into_iter().enumerate() {
                let key = headers.get(i).cloned().unwrap_or_else(|| format!("col_{}", i));
                record.insert(key, Value::String(cell));
            }
            records.push(Value::Object(record));
        }

        Ok(Value::Array(records))
    }

    async fn cell_texts(&self, row: ElementHandle) -> FlowResult<Vec<String>> {
        let cells = self.page.query_all(Some(row), &Locator::css("th, td")).await?;
        let texts = try_join_all(cells.into_iter().map(|c| self.page.text(c))).await?;
        Ok(texts.into_iter().map(|t| t.trim().to_string()).collect())
    }

    async fn read_form(&self, form: ElementHandle) -> FlowResult<Value> {
        let controls = self
            .page
            .query_all(Some(form), &Locator::css("input, select, textarea"))
            .await?;
        let mut fields = Map::new();

        for control in controls {
            let name = match self.page.attribute(control, "name").await? {
                Some(name) if !name.is_empty() => name,
                _ => match self.page.attribute(control, "id").await? {
                    Some(id) if !id.is_empty() => id,
                    _ => continue,
                },
            };

            let kind = self
                .page
                .attribute(control, "type")
                .await?
                .unwrap_or_default()
                .to_ascii_lowercase();

            match kind.as_str() {
                "submit" | "button" | "reset" | "image" => continue,
                "checkbox" => {
                    fields.insert(name, Value::Bool(self.page.is_checked(control).await?));
                }
                "radio" => {
                    let checked = self.page.is_checked(control).await?;
                    let previous = fields.get(&name).and_then(Value::as_bool).unwrap_or(false);
                    fields.insert(name, Value::Bool(previous || checked));
                }
                _ => {
                    fields.insert(name, Value::String(self.page.input_value(control).await?));
                }
            }
        }

        Ok(Value::Object(fields))
    }

    async fn read_link(&self, anchor: ElementHandle) -> FlowResult<Value> {
        let text = self.page.text(anchor).await?;
        let href = self.page.attribute(anchor, "href").await?.unwrap_or_default();
        Ok(json!({
            "text": text.trim(),
            "href": self.absolutize(&href),
        }))
    }

    async fn read_image(&self, image: ElementHandle) -> FlowResult<Value> {
        let alt = self.page.attribute(image, "alt").await?.unwrap_or_default();
        let src = self.page.attribute(image, "src").await?.unwrap_or_default();
        Ok(json!({
            "alt": alt,
            "src": self.absolutize(&src),
        }))
    }

    fn absolutize(&self, raw: &str) -> String {
        let raw = raw.trim();
        if !self.absolutize_urls || raw.is_empty() {
            return raw.to_string();
        }

        match &self.base_url {
            Some(base) => base.join(raw).map(|u| u.to_string()).unwrap_or_else(|_| raw.to_string()),
            None => raw.to_string(),
        }
    }
}

fn target_for(rule: &ExtractionRule, scope: Option<ElementHandle>) -> FlowResult<Target> {
    if let Some(locator) = rule.locator() {
        return Ok(Target::Matches(locator));
    }

    if let Some(default) = rule.rule_type.default_selector() {
        return Ok(Target::Matches(Locator::css(default)));
    }

    match (scope, rule.rule_type) {
        (_, RuleType::Metadata | RuleType::Screenshot) => Ok(Target::Page),
        (Some(item), _) => Ok(Target::Scope(item)),
        (None, _) => Err(FlowError::NoSelector { rule: rule.name.clone() }),
    }
}

/// Static check that a top-level rule can be located at all
pub(crate) fn ensure_locatable(rule: &ExtractionRule) -> FlowResult<()> {
    target_for(rule, None).map(|_| ())
}

fn not_found(target: &Target) -> FlowError {
    let selector = match target {
        Target::Matches(locator) => locator.to_string(),
        Target::Scope(_) => "<scope>".to_string(),
        Target::Page => "<page>".to_string(),
    };
    FlowError::SelectorNotFound { selector }
}
