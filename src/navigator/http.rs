// src/navigator/http.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use scraper::{node::Node, ElementRef, Html, Selector};
use url::Url;

use crate::navigator::{ElementHandle, Navigator, Page};
use crate::utils::error::{NavigationError, PageError};
use crate::utils::text::collapse_whitespace;

const DESKTOP_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

// Text under these elements is never shown to a reader.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// Static-HTML navigator: one GET per page, parsed with scraper.
pub struct HttpNavigator {
    client: reqwest::Client,
}

impl HttpNavigator {
    pub fn new() -> Result<Self, NavigationError> {
        let client = reqwest::Client::builder()
            .user_agent(DESKTOP_USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    async fn fetch(&self, url: &Url) -> Result<String, NavigationError> {
        tracing::info!("Fetching {}", url);

        let response = self
            .client
            .get(url.as_str())
            .header(header::ACCEPT, "text/html,application/xhtml+xml,*/*;q=0.8")
            .header(header::ACCEPT_LANGUAGE, "it-IT,it;q=0.9,en;q=0.8")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!("HTTP error status: {} for URL: {}", status, url);
            if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
                tracing::warn!("Received {} - the site is refusing automated requests", status);
                return Err(NavigationError::Blocked(status));
            }
            return Err(NavigationError::Http(status));
        }

        let body = response.text().await?;
        tracing::debug!("Downloaded {} bytes from {}", body.len(), url);
        Ok(body)
    }
}

#[async_trait]
impl Navigator for HttpNavigator {
    async fn navigate(&self, url: &Url, timeout: Duration) -> Result<Box<dyn Page>, NavigationError> {
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(NavigationError::InvalidUrl(format!("unsupported scheme '{}'", other))),
        }

        let html = tokio::time::timeout(timeout, self.fetch(url))
            .await
            .map_err(|_| NavigationError::Timeout(timeout))??;

        Ok(Box::new(HtmlPage::new(html)))
    }
}

/// A fetched document. The markup is kept as a string and parsed per call so
/// the page can move between tasks.
pub struct HtmlPage {
    html: Option<String>,
}

impl HtmlPage {
    pub fn new(html: String) -> Self {
        Self { html: Some(html) }
    }

    fn markup(&self) -> Result<&str, PageError> {
        self.html.as_deref().ok_or(PageError::Closed)
    }
}

#[async_trait]
impl Page for HtmlPage {
    async fn text(&mut self) -> Result<String, PageError> {
        Ok(page_text(self.markup()?))
    }

    async fn query_all(&mut self, expression: &str) -> Result<Vec<ElementHandle>, PageError> {
        query(self.markup()?, expression)
    }

    async fn click(&mut self, expression: &str) -> Result<bool, PageError> {
        // Nothing to click on a static document, but a bad expression is still an error
        query(self.markup()?, expression)?;
        Ok(false)
    }

    async fn close(&mut self) {
        self.html = None;
    }
}

fn page_text(markup: &str) -> String {
    let document = Html::parse_document(markup);
    let root = Selector::parse("body")
        .ok()
        .and_then(|body| document.select(&body).next())
        .unwrap_or_else(|| document.root_element());

    let mut lines = Vec::new();
    collect_text(root, &mut lines);
    lines.join("\n")
}

fn query(markup: &str, expression: &str) -> Result<Vec<ElementHandle>, PageError> {
    let selector = Selector::parse(expression)
        .map_err(|e| PageError::InvalidExpression(format!("{}: {:?}", expression, e)))?;
    let document = Html::parse_document(markup);

    Ok(document
        .select(&selector)
        .map(|element| {
            let mut parts = Vec::new();
            collect_text(element, &mut parts);
            let text = collapse_whitespace(&parts.join(" "));
            if is_hidden(element) {
                ElementHandle::hidden(text)
            } else {
                ElementHandle::new(text)
            }
        })
        .collect())
}

/// Pushes every non-blank text node under `element`, skipping script-like subtrees.
fn collect_text(element: ElementRef, out: &mut Vec<String>) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
            }
            Node::Element(el) if SKIPPED_TAGS.contains(&el.name()) => {}
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}

fn is_hidden(element: ElementRef) -> bool {
    std::iter::once(element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .any(|el| {
            let value = el.value();
            value.attr("hidden").is_some()
                || value.attr("aria-hidden") == Some("true")
                || value
                    .attr("style")
                    .map(|style| style.replace(' ', "").contains("display:none"))
                    .unwrap_or(false)
        })
}
