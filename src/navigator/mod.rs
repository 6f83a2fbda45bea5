// src/navigator/mod.rs
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::utils::error::{NavigationError, PageError};

pub use http::HttpNavigator;

/// Loads pages. One call per session; the returned page is owned by the
/// session until it is closed.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, url: &Url, timeout: Duration) -> Result<Box<dyn Page>, NavigationError>;
}

/// A loaded document the extractor can read and poke at.
#[async_trait]
pub trait Page: Send {
    /// Visible text of the whole page.
    async fn text(&mut self) -> Result<String, PageError>;

    /// Elements matching `expression`, in document order.
    async fn query_all(&mut self, expression: &str) -> Result<Vec<ElementHandle>, PageError>;

    /// Best-effort click on the first visible match. `true` if something was clicked.
    async fn click(&mut self, expression: &str) -> Result<bool, PageError>;

    /// Releases the page. Calling it twice is harmless.
    async fn close(&mut self);
}

/// Snapshot of one matched element.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementHandle {
    inner_text: String,
    visible: bool,
}

impl ElementHandle {
    pub fn new(inner_text: impl Into<String>) -> Self {
        Self {
            inner_text: inner_text.into(),
            visible: true,
        }
    }

    pub fn hidden(inner_text: impl Into<String>) -> Self {
        Self {
            inner_text: inner_text.into(),
            visible: false,
        }
    }

    pub fn inner_text(&self) -> &str {
        &self.inner_text
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}
