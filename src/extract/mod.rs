use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

pub mod pagination;
pub mod postprocess;
mod walker;

pub use pagination::{ClickNextAdvancer, PageAdvancer, PaginationDriver};

use crate::config::ExtractionConfig;
use crate::dsl::{ExtractionRule, ExtractionSchema};
use crate::error::FlowResult;
use crate::export;
use crate::logging::{LogContext, PerformanceLogger};
use crate::page::PageCapability;
use walker::{ensure_locatable, RuleWalker};

/// Data extracted from one visited page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub schema_id: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub data: Map<String, Value>,
    pub errors: Vec<String>,
    pub page_number: u32,
}

/// Interprets extraction schemas against a page. One engine per run.
pub struct ExtractionEngine {
    config: ExtractionConfig,
    results: Vec<ExtractionResult>,
}

impl ExtractionEngine {
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            config,
            results: Vec::new(),
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract a single rule against the whole page.
    ///
    /// Per-item failures inside list rules are logged and left as `null`.
    pub async fn extract_rule(&self, rule: &ExtractionRule, page: &dyn PageCapability) -> FlowResult<Value> {
        ensure_locatable(rule)?;

        let mut walker = self.walker(page).await;
        let value = walker.walk(rule, None, 1).await?;
        for item_error in walker.take_item_errors() {
            warn!("{}", item_error);
        }
        Ok(value)
    }

    /// Apply every top-level rule of the schema to the current page.
    ///
    /// Fails only when a rule cannot be located at all; every other rule
    /// failure is recorded in the result.
    pub async fn extract_schema(
        &self,
        schema: &ExtractionSchema,
        page: &dyn PageCapability,
        page_number: u32,
    ) -> FlowResult<ExtractionResult> {
        for rule in &schema.rules {
            ensure_locatable(rule)?;
        }

        let url = page.url().await.unwrap_or_default();
        let perf = PerformanceLogger::new(
            LogContext::new("extract", "extract_schema")
                .with_schema_id(schema.id.clone())
                .with_url(url.clone()),
        );

        let mut walker = self.walker(page).await;
        let mut data = Map::new();
        let mut errors = Vec::new();

        for rule in &schema.rules {
            let value = match walker.walk(rule, None, 1).await {
                Ok(value) => value,
                Err(e) if rule.optional => {
                    debug!("Optional rule '{}' produced no value: {}", rule.name, e);
                    Value::Null
                }
                Err(e) => {
                    warn!("Rule '{}' failed on page {}: {}", rule.name, page_number, e);
                    errors.push(format!("{}: {}", rule.name, e));
                    Value::Null
                }
            };
            let item_errors = walker.take_item_errors();
            if rule.optional {
                for item_error in &item_errors {
                    debug!("Optional rule '{}' item skipped: {}", rule.name, item_error);
                }
            } else {
                errors.extend(item_errors);
            }
            data.insert(rule.name.clone(), value);
        }

        let status = if errors.is_empty() { "success" } else { "partial" };
        perf.finish_with_status(
            &format!("Extracted page {} with {} error(s)", page_number, errors.len()),
            status,
        );

        Ok(ExtractionResult {
            schema_id: schema.id.clone(),
            url,
            timestamp: Utc::now(),
            data,
            errors,
            page_number,
        })
    }

    /// Run a schema with pagination, replacing the session's results
    pub async fn extract(
        &mut self,
        schema: &ExtractionSchema,
        page: &dyn PageCapability,
        advancer: &dyn PageAdvancer,
    ) -> FlowResult<Vec<ExtractionResult>> {
        self.results.clear();

        let driver = PaginationDriver::new(self.config.default_max_pages);
        let results = driver.run(self, schema, page, advancer).await?;

        self.results = results.clone();
        Ok(results)
    }

    /// Results of the last `extract` call
    pub fn results(&self) -> &[ExtractionResult] {
        &self.results
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }

    /// Session results as a JSON array
    pub fn to_json(&self) -> FlowResult<String> {
        export::json_exporter::results_to_json(&self.results, true)
    }

    /// Session results as flat CSV
    pub fn to_csv(&self) -> FlowResult<String> {
        export::csv_exporter::results_to_csv(&self.results)
    }

    async fn walker<'p>(&self, page: &'p dyn PageCapability) -> RuleWalker<'p> {
        let base_url = match page.url().await {
            Ok(url) => Url::parse(&url).ok(),
            Err(e) => {
                debug!("Page URL unavailable, links stay relative: {}", e);
                None
            }
        };
        RuleWalker::new(page, base_url, self.config.max_rule_depth, self.config.absolutize_urls)
    }
}

impl Default for ExtractionEngine {
    fn default() -> Self {
        Self::new(ExtractionConfig::default())
    }
}

/// Error entries recorded for a rule, for callers inspecting results
pub fn errors_for<'a>(
    result: &'a ExtractionResult,
    rule_name: &'a str,
) -> impl Iterator<Item = &'a String> + 'a {
    result
        .errors
        .iter()
        .filter(move |e| e.starts_with(&format!("{}:", rule_name)) || e.starts_with(&format!("{}[", rule_name)))
}

impl ExtractionResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl std::fmt::Display for ExtractionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} page {} ({} fields, {} errors)",
            self.schema_id,
            self.page_number,
            self.data.len(),
            self.errors.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{RuleType, TransformKind};
    use crate::error::FlowError;
    use crate::page::HtmlPage;
    use serde_json::json;

    const SHOP: &str = r#"
        <html><head>
            <title>Shop</title>
            <meta name="author" content="Ada">
        </head><body>
            <h1>  Catalogue  </h1>
            <table id="specs">
                <tr><th>Name</th><th></th><th>Price</th></tr>
                <tr><td>Widget</td><td>blue</td><td>$5</td></tr>
                <tr><td>Gadget</td><td>red</td><td>$7</td><td>extra</td></tr>
            </table>
            <div class="product" data-sku="A1">
                <span class="title">Widget</span><span class="price">Now $5.00</span>
                <a href="/p/widget">details</a>
            </div>
            <div class="product" data-sku="B2">
                <span class="title">Gadget</span>
                <a href="/p/gadget">details</a>
            </div>
            <ul class="tags"><li>new</li><li>sale</li></ul>
            <script id="state" type="application/json">window.__STATE__ = {"count": 2};</script>
            <pre id="raw">{"ok": true}</pre>
            <form id="search">
                <input name="q" value="lamp">
                <input type="checkbox" name="instock" checked>
                <input type="radio" name="sort" value="asc">
                <input type="radio" name="sort" value="desc" checked>
                <input type="submit" name="go" value="Search">
                <select id="size"><option value="s">S</option></select>
            </form>
            <img src="/img/logo.png" alt="Logo">
        </body></html>
    "#;

    fn page() -> HtmlPage {
        HtmlPage::from_html("https://shop.test/catalogue", SHOP).unwrap()
    }

    async fn extract(rule: ExtractionRule) -> FlowResult<Value> {
        ExtractionEngine::default().extract_rule(&rule, &page()).await
    }

    #[tokio::test]
    async fn test_text_and_attributes() {
        let heading = extract(ExtractionRule::new("h", RuleType::Text).selector("h1")).await.unwrap();
        assert_eq!(heading, json!("Catalogue"));

        let skus = extract(
            ExtractionRule::new("sku", RuleType::Attribute)
                .selector(".product")
                .attribute("data-sku")
                .multiple(),
        )
        .await
        .unwrap();
        assert_eq!(skus, json!(["A1", "B2"]));

        let href = extract(ExtractionRule::new("link", RuleType::Href).selector(".product a")).await.unwrap();
        assert_eq!(href, json!("https://shop.test/p/widget"));

        let missing = extract(
            ExtractionRule::new("none", RuleType::Attribute)
                .selector("h1")
                .attribute("title"),
        )
        .await
        .unwrap();
        assert_eq!(missing, Value::Null);
    }

    #[tokio::test]
    async fn test_xpath_rule() {
        let titles = extract(
            ExtractionRule::new("titles", RuleType::Text)
                .xpath("//div[@class='product']/span[contains(@class, 'title')]")
                .multiple(),
        )
        .await
        .unwrap();
        assert_eq!(titles, json!(["Widget", "Gadget"]));
    }

    #[tokio::test]
    async fn test_multiple_with_no_matches_is_empty() {
        let none = extract(ExtractionRule::new("x", RuleType::Text).selector(".absent").multiple())
            .await
            .unwrap();
        assert_eq!(none, json!([]));

        let single = extract(ExtractionRule::new("x", RuleType::Text).selector(".absent")).await;
        assert!(matches!(single, Err(FlowError::SelectorNotFound { .. })));
    }

    #[tokio::test]
    async fn test_table_records() {
        let table = extract(ExtractionRule::new("specs", RuleType::Table).selector("#specs"))
            .await
            .unwrap();
        assert_eq!(
            table,
            json!([
                {"Name": "Widget", "col_1": "blue", "Price": "$5"},
                {"Name": "Gadget", "col_1": "red", "Price": "$7", "col_3": "extra"}
            ])
        );
    }

    #[tokio::test]
    async fn test_table_duplicate_headers_keep_last_cell() {
        let page = HtmlPage::from_html(
            "https://shop.test/prices",
            "<table><tr><th>Item</th><th>Price</th><th>Price</th></tr>\
             <tr><td>Lamp</td><td>$10</td><td>$8</td></tr></table>",
        )
        .unwrap();
        let rule = ExtractionRule::new("prices", RuleType::Table).selector("table");
        let table = ExtractionEngine::default().extract_rule(&rule, &page).await.unwrap();

        assert_eq!(table, json!([{"Item": "Lamp", "Price": "$8"}]));
        let keys: Vec<&String> = table[0].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["Item", "Price"]);
    }

    #[tokio::test]
    async fn test_list_with_children() {
        let rule = ExtractionRule::new("products", RuleType::List)
            .selector(".product")
            .child(ExtractionRule::new("title", RuleType::Text).selector(".title"))
            .child(ExtractionRule::new("price", RuleType::Text).selector(".price").regex(r"\$([\d.]+)"))
            .child(ExtractionRule::new("sku", RuleType::Attribute).attribute("data-sku"))
            .child(ExtractionRule::new("url", RuleType::Href).selector("a"));

        let schema = ExtractionSchema::new("shop", vec![rule]);
        let result = ExtractionEngine::default().extract_schema(&schema, &page(), 1).await.unwrap();

        assert_eq!(
            result.data["products"],
            json!([
                {"title": "Widget", "price": "5.00", "sku": "A1", "url": "https://shop.test/p/widget"},
                {"title": "Gadget", "price": null, "sku": "B2", "url": "https://shop.test/p/gadget"}
            ])
        );
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("products[1].price: "));
        assert_eq!(errors_for(&result, "products").count(), 1);
    }

    #[tokio::test]
    async fn test_optional_list_drops_item_errors() {
        let rule = ExtractionRule::new("products", RuleType::List)
            .selector(".product")
            .optional()
            .child(ExtractionRule::new("price", RuleType::Text).selector(".price"));

        let schema = ExtractionSchema::new("shop", vec![rule]);
        let result = ExtractionEngine::default().extract_schema(&schema, &page(), 1).await.unwrap();

        assert_eq!(result.data["products"], json!([{"price": "Now $5.00"}, {"price": null}]));
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_optional_nested_list_drops_item_errors() {
        let inner = ExtractionRule::new("spans", RuleType::List)
            .selector(".title")
            .optional()
            .child(ExtractionRule::new("bold", RuleType::Text).selector("b"));
        let rule = ExtractionRule::new("products", RuleType::List).selector(".product").child(inner);

        let schema = ExtractionSchema::new("shop", vec![rule]);
        let result = ExtractionEngine::default().extract_schema(&schema, &page(), 1).await.unwrap();

        assert_eq!(
            result.data["products"],
            json!([{"spans": [{"bold": null}]}, {"spans": [{"bold": null}]}])
        );
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_list_without_children_and_transform() {
        let tags = extract(
            ExtractionRule::new("tags", RuleType::List)
                .selector(".tags li")
                .transform(TransformKind::Uppercase),
        )
        .await
        .unwrap();
        assert_eq!(tags, json!(["NEW", "SALE"]));
    }

    #[tokio::test]
    async fn test_json_strategy() {
        let raw = extract(ExtractionRule::new("raw", RuleType::Json).selector("#raw")).await.unwrap();
        assert_eq!(raw, json!({"ok": true}));

        let embedded = extract(ExtractionRule::new("state", RuleType::Json).selector("#state")).await.unwrap();
        assert_eq!(embedded, json!({"count": 2}));

        let broken = extract(ExtractionRule::new("h", RuleType::Json).selector("h1")).await.unwrap();
        assert_eq!(broken, Value::Null);
    }

    #[tokio::test]
    async fn test_fixed_shape_extractors() {
        let links = extract(ExtractionRule::new("links", RuleType::Links)).await.unwrap();
        assert_eq!(links.as_array().unwrap().len(), 2);
        assert_eq!(links[0], json!({"text": "details", "href": "https://shop.test/p/widget"}));

        let images = extract(ExtractionRule::new("images", RuleType::Images)).await.unwrap();
        assert_eq!(images, json!([{"alt": "Logo", "src": "https://shop.test/img/logo.png"}]));

        let meta = extract(ExtractionRule::new("meta", RuleType::Metadata)).await.unwrap();
        assert_eq!(meta["title"], "Shop");
        assert_eq!(meta["author"], "Ada");
        assert!(meta["ogImage"].is_null());

        let form = extract(ExtractionRule::new("form", RuleType::Form).selector("#search")).await.unwrap();
        assert_eq!(form, json!({"q": "lamp", "instock": true, "sort": true, "size": "s"}));
    }

    #[tokio::test]
    async fn test_screenshot_unsupported_is_recorded() {
        let schema = ExtractionSchema::new("s", vec![ExtractionRule::new("shot", RuleType::Screenshot)]);
        let result = ExtractionEngine::default().extract_schema(&schema, &page(), 1).await.unwrap();
        assert_eq!(result.data["shot"], Value::Null);
        assert!(result.errors[0].starts_with("shot: "));
    }

    #[tokio::test]
    async fn test_fallback_selector() {
        let rule = ExtractionRule::new("heading", RuleType::Text)
            .selector("article h1")
            .fallback("h1");
        assert_eq!(extract(rule).await.unwrap(), json!("Catalogue"));

        let both_fail = ExtractionRule::new("heading", RuleType::Text)
            .selector(".nope")
            .fallback(".also-nope");
        let err = extract(both_fail).await.unwrap_err();
        assert!(err.to_string().contains(".nope"));
        assert!(!err.to_string().contains("also-nope"));
    }

    #[tokio::test]
    async fn test_optional_vs_required_failure() {
        let optional = ExtractionRule::new("subtitle", RuleType::Text).selector("h2").optional();
        let required = ExtractionRule::new("subtitle", RuleType::Text).selector("h2");

        let engine = ExtractionEngine::default();
        let page = page();

        let result = engine
            .extract_schema(&ExtractionSchema::new("s", vec![optional]), &page, 1)
            .await
            .unwrap();
        assert_eq!(result.data["subtitle"], Value::Null);
        assert!(result.errors.is_empty());

        let result = engine
            .extract_schema(&ExtractionSchema::new("s", vec![required]), &page, 1)
            .await
            .unwrap();
        assert_eq!(result.data["subtitle"], Value::Null);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("subtitle"));
    }

    #[tokio::test]
    async fn test_sibling_rules_survive_failures() {
        let schema = ExtractionSchema::new(
            "s",
            vec![
                ExtractionRule::new("broken", RuleType::Text).selector("li["),
                ExtractionRule::new("heading", RuleType::Text).selector("h1"),
            ],
        );
        let result = ExtractionEngine::default().extract_schema(&schema, &page(), 3).await.unwrap();

        assert_eq!(result.data["heading"], "Catalogue");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.page_number, 3);
        assert_eq!(result.url, "https://shop.test/catalogue");
        assert!(result.has_errors());
    }

    #[tokio::test]
    async fn test_no_selector_is_a_construction_error() {
        let schema = ExtractionSchema::new(
            "s",
            vec![
                ExtractionRule::new("heading", RuleType::Text).selector("h1"),
                ExtractionRule::new("orphan", RuleType::Text),
            ],
        );
        let err = ExtractionEngine::default().extract_schema(&schema, &page(), 1).await.unwrap_err();
        assert!(matches!(err, FlowError::NoSelector { rule } if rule == "orphan"));
    }

    #[tokio::test]
    async fn test_depth_limit() {
        // Inner lists have no locator, so each one re-enters the same item
        let mut rule = ExtractionRule::new("leaf", RuleType::Text);
        for _ in 0..3 {
            rule = ExtractionRule::new("level", RuleType::List).child(rule);
        }
        rule.selector = Some("div.product".to_string());

        let config = ExtractionConfig {
            max_rule_depth: 2,
            ..ExtractionConfig::default()
        };
        let result = ExtractionEngine::new(config).extract_rule(&rule, &page()).await;
        assert!(matches!(result, Err(FlowError::MaxDepthExceeded { depth: 2 })));
    }

    #[tokio::test]
    async fn test_session_json_roundtrip() {
        let page = HtmlPage::with_pages(
            "https://shop.test/catalogue",
            [
                (
                    "https://shop.test/catalogue".to_string(),
                    format!("{}<a class=\"next\" href=\"/catalogue/2\">next</a>", SHOP),
                ),
                ("https://shop.test/catalogue/2".to_string(), "<h1>Second</h1>".to_string()),
            ],
        )
        .unwrap();

        let schema = ExtractionSchema::new(
            "shop",
            vec![
                ExtractionRule::new("heading", RuleType::Text).selector("h1"),
                ExtractionRule::new("specs", RuleType::Table).selector("#specs").optional(),
            ],
        )
        .with_pagination(crate::dsl::PaginationPolicy {
            next_selector: Some("a.next".to_string()),
            max_pages: Some(5),
            wait_between_pages: Some(0),
        });

        let mut engine = ExtractionEngine::default();
        let results = engine.extract(&schema, &page, &ClickNextAdvancer::default()).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(engine.results(), results.as_slice());

        let parsed: Vec<ExtractionResult> = serde_json::from_str(&engine.to_json().unwrap()).unwrap();
        assert_eq!(parsed, results);

        let csv = engine.to_csv().unwrap();
        assert!(csv.starts_with("heading,specs\n"));

        engine.clear();
        assert!(engine.results().is_empty());
    }
}
