use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dsl::{ExtractionSchema, PaginationPolicy};
use crate::error::FlowResult;
use crate::logging::{LogContext, PerformanceLogger};
use crate::page::{Locator, PageCapability};
use super::{ExtractionEngine, ExtractionResult};

/// Moves a page to the next page of results
#[async_trait::async_trait(?Send)]
pub trait PageAdvancer {
    /// Returns `Ok(false)` when there is no further page
    async fn advance(&self, page: &dyn PageCapability, policy: &PaginationPolicy) -> FlowResult<bool>;
}

/// Clicks the policy's next-page element, then lets the page settle
pub struct ClickNextAdvancer {
    default_wait: Duration,
}

impl ClickNextAdvancer {
    pub fn new(default_wait: Duration) -> Self {
        Self { default_wait }
    }
}

impl Default for ClickNextAdvancer {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000))
    }
}

#[async_trait::async_trait(?Send)]
impl PageAdvancer for ClickNextAdvancer {
    async fn advance(&self, page: &dyn PageCapability, policy: &PaginationPolicy) -> FlowResult<bool> {
        let selector = match policy.next_selector.as_deref().map(str::trim) {
            Some(selector) if !selector.is_empty() => selector,
            _ => return Ok(false),
        };

        let next = match page.query(None, &Locator::css(selector)).await? {
            Some(next) => next,
            None => {
                debug!("Next page element '{}' not found", selector);
                return Ok(false);
            }
        };

        let disabled = page.attribute(next, "disabled").await?.is_some()
            || page.attribute(next, "aria-disabled").await?.as_deref() == Some("true")
            || page
                .attribute(next, "class")
                .await?
                .map_or(false, |class| class.split_whitespace().any(|c| c == "disabled"));
        if disabled {
            debug!("Next page element '{}' is disabled", selector);
            return Ok(false);
        }

        page.click(next).await?;
        page.wait_for_network_idle().await?;

        let wait = policy
            .wait_between_pages
            .map(Duration::from_millis)
            .unwrap_or(self.default_wait);
        if !wait.is_zero() {
            page.wait(wait).await?;
        }

        Ok(true)
    }
}

/// Runs a schema over successive pages up to the page cap
pub struct PaginationDriver {
    default_max_pages: u32,
}

impl PaginationDriver {
    pub fn new(default_max_pages: u32) -> Self {
        Self { default_max_pages }
    }

    /// A missing or disabled next element, or a failed advance, ends
    /// pagination and returns what was gathered so far.
    pub async fn run(
        &self,
        engine: &ExtractionEngine,
        schema: &ExtractionSchema,
        page: &dyn PageCapability,
        advancer: &dyn PageAdvancer,
    ) -> FlowResult<Vec<ExtractionResult>> {
        let policy = schema.pagination.clone().unwrap_or_default();
        let max_pages = policy.max_pages.unwrap_or(self.default_max_pages).max(1);
        let perf = PerformanceLogger::new(
            LogContext::new("pagination", "run")
                .with_schema_id(schema.id.clone())
                .with_field("max_pages", max_pages.into()),
        );

        let first = match engine.extract_schema(schema, page, 1).await {
            Ok(result) => result,
            Err(e) => {
                perf.finish_with_error("Extraction aborted on page 1", &e);
                return Err(e);
            }
        };
        let mut results = vec![first];

        if policy.next_selector.as_deref().map_or(true, |s| s.trim().is_empty()) {
            perf.finish_with_status("Single page extracted", "success");
            return Ok(results);
        }

        while (results.len() as u32) < max_pages {
            match advancer.advance(page, &policy).await {
                Ok(true) => {}
                Ok(false) => {
                    info!("No further pages after page {}", results.len());
                    break;
                }
                Err(e) => {
                    warn!("Pagination stopped after page {}: {}", results.len(), e);
                    break;
                }
            }

            let page_number = results.len() as u32 + 1;
            match engine.extract_schema(schema, page, page_number).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    perf.finish_with_error(&format!("Extraction aborted on page {}", page_number), &e);
                    return Err(e);
                }
            }
        }

        perf.finish_with_status(&format!("Visited {} page(s)", results.len()), "success");
        Ok(results)
    }
}

impl Default for PaginationDriver {
    fn default() -> Self {
        Self::new(1)
    }
}
