use ego_tree::NodeId;
use scraper::{ElementRef, Html, Selector};
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{FlowError, FlowResult};
use super::xpath::xpath_to_css;
use super::{ElementHandle, Locator, PageCapability, PageMetadata};

/// In-memory page over static HTML documents.
///
/// Holds a small site keyed by URL; clicking a link whose target is part of
/// the site loads that document. Handles from a previous document are stale.
pub struct HtmlPage {
    site: HashMap<String, String>,
    current: RefCell<LoadedDocument>,
}

struct LoadedDocument {
    url: Url,
    html: Html,
    nodes: Vec<NodeId>,
    generation: u32,
}

impl LoadedDocument {
    fn parse(url: Url, source: &str, generation: u32) -> Self {
        Self {
            url,
            html: Html::parse_document(source),
            nodes: Vec::new(),
            generation,
        }
    }

    fn register(&mut self, node: NodeId) -> ElementHandle {
        let index = match self.nodes.iter().position(|n| *n == node) {
            Some(index) => index,
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        ElementHandle::new(((self.generation as u64) << 32) | index as u64)
    }

    fn element(&self, handle: ElementHandle) -> FlowResult<ElementRef<'_>> {
        let raw = handle.raw();
        let generation = (raw >> 32) as u32;
        let index = (raw & 0xFFFF_FFFF) as usize;

        if generation != self.generation {
            return Err(FlowError::page("Stale element handle: the page has navigated"));
        }

        self.nodes
            .get(index)
            .and_then(|id| self.html.tree.get(*id))
            .and_then(ElementRef::wrap)
            .ok_or_else(|| FlowError::page(format!("Unknown element handle {}", raw)))
    }
}

impl HtmlPage {
    /// Single-document page
    pub fn from_html(url: &str, html: &str) -> FlowResult<Self> {
        Self::with_pages(url, [(url.to_string(), html.to_string())])
    }

    /// Multi-document site, starting on `start_url`
    pub fn with_pages<I>(start_url: &str, pages: I) -> FlowResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut site = HashMap::new();
        for (url, html) in pages {
            site.insert(site_key(&parse_url(&url)?), html);
        }

        let start = parse_url(start_url)?;
        let source = site
            .get(&site_key(&start))
            .ok_or_else(|| FlowError::navigation(format!("No document registered for {}", start)))?;
        let current = LoadedDocument::parse(start, source, 0);

        Ok(Self {
            site,
            current: RefCell::new(current),
        })
    }

    /// Register another document of the site
    pub fn add_page(&mut self, url: &str, html: impl Into<String>) -> FlowResult<()> {
        self.site.insert(site_key(&parse_url(url)?), html.into());
        Ok(())
    }

    /// Load a registered document, invalidating every outstanding handle
    pub fn navigate(&self, url: &str) -> FlowResult<()> {
        let target = {
            let current = self.current.borrow();
            current
                .url
                .join(url)
                .map_err(|e| FlowError::navigation(format!("Invalid URL '{}': {}", url, e)))?
        };

        let source = self
            .site
            .get(&site_key(&target))
            .ok_or_else(|| FlowError::navigation(format!("No document registered for {}", target)))?;

        debug!("Navigating to {}", target);
        let mut current = self.current.borrow_mut();
        let generation = current.generation.wrapping_add(1);
        *current = LoadedDocument::parse(target, source, generation);
        Ok(())
    }

    fn with_element<T>(&self, handle: ElementHandle, read: impl FnOnce(ElementRef<'_>) -> T) -> FlowResult<T> {
        let current = self.current.borrow();
        let element = current.element(handle)?;
        Ok(read(element))
    }
}

#[async_trait::async_trait(?Send)]
impl PageCapability for HtmlPage {
    async fn url(&self) -> FlowResult<String> {
        Ok(self.current.borrow().url.to_string())
    }

    async fn query_all(&self, scope: Option<ElementHandle>, locator: &Locator) -> FlowResult<Vec<ElementHandle>> {
        let (css, document_wide) = match locator {
            Locator::Css(selector) => (selector.clone(), false),
            Locator::XPath(xpath) => {
                let css = xpath_to_css(xpath)?;
                (css, !xpath.trim_start().starts_with('.'))
            }
        };

        let selector = Selector::parse(&css).map_err(|e| FlowError::InvalidSelector {
            selector: locator.as_str().to_string(),
            reason: format!("{:?}", e),
        })?;

        let mut current = self.current.borrow_mut();
        let matched: Vec<NodeId> = match scope {
            Some(handle) if !document_wide => current.element(handle)?.select(&selector).map(|e| (*e).id()).collect(),
            Some(handle) => {
                current.element(handle)?;
                current.html.select(&selector).map(|e| (*e).id()).collect()
            }
            None => current.html.select(&selector).map(|e| (*e).id()).collect(),
        };

        Ok(matched.into_iter().map(|id| current.register(id)).collect())
    }

    async fn text(&self, element: ElementHandle) -> FlowResult<String> {
        self.with_element(element, |e| e.text().collect::<String>())
    }

    async fn inner_html(&self, element: ElementHandle) -> FlowResult<String> {
        self.with_element(element, |e| e.inner_html())
    }

    async fn attribute(&self, element: ElementHandle, name: &str) -> FlowResult<Option<String>> {
        self.with_element(element, |e| e.value().attr(name).map(str::to_string))
    }

    async fn input_value(&self, element: ElementHandle) -> FlowResult<String> {
        self.with_element(element, control_value)
    }

    async fn is_checked(&self, element: ElementHandle) -> FlowResult<bool> {
        self.with_element(element, |e| match e.value().name() {
            "option" => e.value().attr("selected").is_some(),
            _ => e.value().attr("checked").is_some(),
        })
    }

    async fn tag_name(&self, element: ElementHandle) -> FlowResult<String> {
        self.with_element(element, |e| e.value().name().to_ascii_lowercase())
    }

    async fn metadata(&self) -> FlowResult<PageMetadata> {
        let current = self.current.borrow();
        let html = &current.html;

        let title = first_match(html, "title").map(|e| e.text().collect::<String>().trim().to_string());
        let meta = |selector: &str| {
            first_match(html, selector).and_then(|e| e.value().attr("content").map(str::to_string))
        };

        Ok(PageMetadata {
            title,
            description: meta("meta[name=\"description\"]"),
            keywords: meta("meta[name=\"keywords\"]"),
            author: meta("meta[name=\"author\"]"),
            og_title: meta("meta[property=\"og:title\"]"),
            og_description: meta("meta[property=\"og:description\"]"),
            og_image: meta("meta[property=\"og:image\"]"),
            og_url: meta("meta[property=\"og:url\"]"),
            og_type: meta("meta[property=\"og:type\"]"),
            canonical: first_match(html, "link[rel=\"canonical\"]")
                .and_then(|e| e.value().attr("href").map(str::to_string)),
        })
    }

    async fn screenshot(&self) -> FlowResult<Vec<u8>> {
        Err(FlowError::Unsupported {
            operation: "screenshot".to_string(),
        })
    }

    async fn click(&self, element: ElementHandle) -> FlowResult<()> {
        let href = self.with_element(element, |e| e.value().attr("href").map(str::to_string))?;
        match href {
            Some(href) if !href.trim().is_empty() && !href.trim().starts_with('#') => self.navigate(href.trim()),
            _ => Err(FlowError::navigation("Clicked element does not link to another document")),
        }
    }

    async fn wait_for_network_idle(&self) -> FlowResult<()> {
        Ok(())
    }

    async fn wait(&self, duration: Duration) -> FlowResult<()> {
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

fn control_value(element: ElementRef<'_>) -> String {
    match element.value().name() {
        "textarea" => element.text().collect::<String>(),
        "select" => {
            let options = Selector::parse("option").ok();
            let options: Vec<ElementRef<'_>> = options
                .as_ref()
                .map(|s| element.select(s).collect())
                .unwrap_or_default();
            options
                .iter()
                .find(|o| o.value().attr("selected").is_some())
                .or_else(|| options.first())
                .map(|o| {
                    o.value()
                        .attr("value")
                        .map(str::to_string)
                        .unwrap_or_else(|| o.text().collect::<String>().trim().to_string())
                })
                .unwrap_or_default()
        }
        _ => element.value().attr("value").unwrap_or("").to_string(),
    }
}

fn first_match<'a>(html: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    html.select(&selector).next()
}

fn parse_url(url: &str) -> FlowResult<Url> {
    Url::parse(url).map_err(|e| FlowError::navigation(format!("Invalid URL '{}': {}", url, e)))
}

fn site_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOGUE: &str = r##"
        <html><head>
            <title> Catalogue </title>
            <meta name="description" content="All products">
            <meta property="og:type" content="website">
            <link rel="canonical" href="https://shop.test/catalogue">
        </head><body>
            <ul id="items">
                <li class="item">One</li>
                <li class="item">Two <b>bold</b></li>
            </ul>
            <form>
                <input name="q" value="rust">
                <input type="checkbox" name="fast" checked>
                <textarea name="note">hello</textarea>
                <select name="size"><option value="s">S</option><option value="m" selected>M</option></select>
            </form>
            <a class="next" href="/catalogue?page=2">Next</a>
            <a class="anchor" href="#top">Top</a>
        </body></html>
    "##;

    fn page() -> HtmlPage {
        HtmlPage::with_pages(
            "https://shop.test/catalogue",
            [
                ("https://shop.test/catalogue".to_string(), CATALOGUE.to_string()),
                (
                    "https://shop.test/catalogue?page=2".to_string(),
                    "<ul><li class='item'>Three</li></ul>".to_string(),
                ),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_query_and_read() {
        let page = page();
        let items = page.query_all(None, &Locator::css("li.item")).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(page.text(items[1]).await.unwrap(), "Two bold");
        assert_eq!(page.inner_html(items[1]).await.unwrap(), "Two <b>bold</b>");
        assert_eq!(page.tag_name(items[0]).await.unwrap(), "li");

        let list = page.query(None, &Locator::css("#items")).await.unwrap().unwrap();
        let scoped = page.query_all(Some(list), &Locator::xpath(".//li")).await.unwrap();
        assert_eq!(scoped, items);
    }

    #[tokio::test]
    async fn test_form_controls() {
        let page = page();
        let value_of = |selector: &'static str| {
            let page = &page;
            async move {
                let element = page.query(None, &Locator::css(selector)).await.unwrap().unwrap();
                page.input_value(element).await.unwrap()
            }
        };

        assert_eq!(value_of("input[name=q]").await, "rust");
        assert_eq!(value_of("textarea").await, "hello");
        assert_eq!(value_of("select").await, "m");

        let checkbox = page.query(None, &Locator::css("input[type=checkbox]")).await.unwrap().unwrap();
        assert!(page.is_checked(checkbox).await.unwrap());
    }

    #[tokio::test]
    async fn test_metadata() {
        let metadata = page().metadata().await.unwrap();
        assert_eq!(metadata.title.as_deref(), Some("Catalogue"));
        assert_eq!(metadata.description.as_deref(), Some("All products"));
        assert_eq!(metadata.og_type.as_deref(), Some("website"));
        assert_eq!(metadata.canonical.as_deref(), Some("https://shop.test/catalogue"));
        assert!(metadata.author.is_none());
    }

    #[tokio::test]
    async fn test_click_navigates_and_invalidates_handles() {
        let page = page();
        let next = page.query(None, &Locator::css("a.next")).await.unwrap().unwrap();
        let first = page.query(None, &Locator::css("li")).await.unwrap().unwrap();

        page.click(next).await.unwrap();
        assert_eq!(page.url().await.unwrap(), "https://shop.test/catalogue?page=2");
        assert!(page.text(first).await.is_err());

        let items = page.query_all(None, &Locator::css("li")).await.unwrap();
        assert_eq!(page.text(items[0]).await.unwrap(), "Three");
    }

    #[tokio::test]
    async fn test_click_failures() {
        let page = page();
        let anchor = page.query(None, &Locator::css("a.anchor")).await.unwrap().unwrap();
        assert!(page.click(anchor).await.is_err());

        let item = page.query(None, &Locator::css("li")).await.unwrap().unwrap();
        assert!(matches!(page.click(item).await, Err(FlowError::Navigation { .. })));

        assert!(page.navigate("/missing").is_err());
        assert!(matches!(page.screenshot().await, Err(FlowError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn test_invalid_locators() {
        let page = page();
        assert!(matches!(
            page.query_all(None, &Locator::css("li[")).await,
            Err(FlowError::InvalidSelector { .. })
        ));
        assert!(matches!(
            page.query_all(None, &Locator::xpath("//li/text()")).await,
            Err(FlowError::UnsupportedXPath { .. })
        ));
    }
}
