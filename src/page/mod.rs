//! Page capability consumed by the extraction engine and the pagination
//! driver. Browser-backed implementations live outside this crate; `HtmlPage`
//! serves static documents through the `scraper` crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::FlowResult;

pub mod html;
pub mod xpath;

pub use html::HtmlPage;

/// Element locator, either a CSS selector or an XPath expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn xpath(xpath: impl Into<String>) -> Self {
        Self::XPath(xpath.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Css(s) | Self::XPath(s) => s,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "{}", s),
            Self::XPath(s) => write!(f, "xpath={}", s),
        }
    }
}

/// Opaque reference to an element of the currently loaded document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(u64);

impl ElementHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Fixed key set read from the document head
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub author: Option<String>,
    pub og_title: Option<String>,
    pub og_description: Option<String>,
    pub og_image: Option<String>,
    pub og_url: Option<String>,
    pub og_type: Option<String>,
    pub canonical: Option<String>,
}

/// Query, read and (for pagination) mutate a live page.
///
/// `scope` restricts a query to the descendants of an element; `None`
/// searches the whole document. Handles are only valid for the document
/// they were obtained from.
#[async_trait::async_trait(?Send)]
pub trait PageCapability {
    async fn url(&self) -> FlowResult<String>;

    async fn query_all(&self, scope: Option<ElementHandle>, locator: &Locator) -> FlowResult<Vec<ElementHandle>>;

    async fn query(&self, scope: Option<ElementHandle>, locator: &Locator) -> FlowResult<Option<ElementHandle>> {
        Ok(self.query_all(scope, locator).await?.into_iter().next())
    }

    /// Text content of the element and its descendants
    async fn text(&self, element: ElementHandle) -> FlowResult<String>;

    async fn inner_html(&self, element: ElementHandle) -> FlowResult<String>;

    async fn attribute(&self, element: ElementHandle, name: &str) -> FlowResult<Option<String>>;

    /// Current value of a form control
    async fn input_value(&self, element: ElementHandle) -> FlowResult<String>;

    async fn is_checked(&self, element: ElementHandle) -> FlowResult<bool>;

    /// Lowercase tag name
    async fn tag_name(&self, element: ElementHandle) -> FlowResult<String>;

    async fn metadata(&self) -> FlowResult<PageMetadata>;

    /// PNG capture of the viewport
    async fn screenshot(&self) -> FlowResult<Vec<u8>>;

    async fn click(&self, element: ElementHandle) -> FlowResult<()>;

    async fn wait_for_network_idle(&self) -> FlowResult<()>;

    async fn wait(&self, duration: Duration) -> FlowResult<()>;
}
