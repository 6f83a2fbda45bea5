// src/machine/testing.rs
//! Scripted stand-ins for the navigator, page and oracle.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use crate::navigator::{ElementHandle, Navigator, Page};
use crate::oracle::{Oracle, RawProductRecord};
use crate::utils::error::{NavigationError, OracleError, PageError};

/// A page whose text and query results are fixed up front. Clones share
/// the click log and the closed flag.
#[derive(Debug, Clone)]
pub struct ScriptedPage {
    text: String,
    text_after_click: Option<String>,
    elements: HashMap<String, Vec<ElementHandle>>,
    clicks: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl ScriptedPage {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            text_after_click: None,
            elements: HashMap::new(),
            clicks: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_elements(mut self, expression: &str, elements: Vec<ElementHandle>) -> Self {
        self.elements.insert(expression.to_string(), elements);
        self
    }

    pub fn with_text_after_click(mut self, text: &str) -> Self {
        self.text_after_click = Some(text.to_string());
        self
    }

    pub fn clicks(&self) -> Vec<String> {
        self.clicks.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), PageError> {
        if self.is_closed() {
            Err(PageError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Page for ScriptedPage {
    async fn text(&mut self) -> Result<String, PageError> {
        self.ensure_open()?;
        Ok(self.text.clone())
    }

    async fn query_all(&mut self, expression: &str) -> Result<Vec<ElementHandle>, PageError> {
        self.ensure_open()?;
        Ok(self.elements.get(expression).cloned().unwrap_or_default())
    }

    async fn click(&mut self, expression: &str) -> Result<bool, PageError> {
        self.ensure_open()?;
        let visible = self
            .elements
            .get(expression)
            .map(|found| found.iter().any(|el| el.is_visible()))
            .unwrap_or(false);
        if !visible {
            return Ok(false);
        }
        self.clicks.lock().unwrap().push(expression.to_string());
        if let Some(text) = self.text_after_click.take() {
            self.text = text;
        }
        Ok(true)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Serves clones of one scripted page, or fails every navigation.
pub struct ScriptedNavigator {
    page: Option<ScriptedPage>,
    visits: Mutex<Vec<Url>>,
}

impl ScriptedNavigator {
    pub fn serving(page: ScriptedPage) -> Self {
        Self {
            page: Some(page),
            visits: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            page: None,
            visits: Mutex::new(Vec::new()),
        }
    }

    pub fn visits(&self) -> usize {
        self.visits.lock().unwrap().len()
    }
}

#[async_trait]
impl Navigator for ScriptedNavigator {
    async fn navigate(&self, url: &Url, _timeout: Duration) -> Result<Box<dyn Page>, NavigationError> {
        self.visits.lock().unwrap().push(url.clone());
        match &self.page {
            Some(page) => Ok(Box::new(page.clone())),
            None => Err(NavigationError::Http(StatusCode::NOT_FOUND)),
        }
    }
}

type OracleReply = Result<Option<Vec<RawProductRecord>>, OracleError>;

/// Answers each call with the next scripted reply, then `Ok(None)`.
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<OracleReply>>,
    calls: Mutex<Vec<String>>,
    delay: Duration,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<OracleReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn parse(&self, text: &str) -> Result<Option<Vec<RawProductRecord>>, OracleError> {
        self.calls.lock().unwrap().push(text.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = self.replies.lock().unwrap().pop_front();
        reply.unwrap_or(Ok(None))
    }
}
