//! Page resource for the browser-driven adapters. A page belongs to a single
//! fetch call and is handed out inside a `PageLease`, which releases it when
//! dropped.

use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use reqwest::{Client, Url};

use crate::adapters::http::{self, BROWSER_USER_AGENT};
use crate::error::Result;
use crate::model::Platform;

#[async_trait]
pub trait Page: Send {
    /// Navigate and keep the rendered document. Blocking pages surface as
    /// `RateLimited`.
    async fn goto(&mut self, url: &Url) -> Result<()>;

    fn content(&self) -> &str;

    /// Release the page. Called exactly once by the lease.
    fn close(&mut self);
}

#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn Page>>;

    async fn lease(&self) -> Result<PageLease> {
        Ok(PageLease::new(self.new_page().await?))
    }
}

pub struct PageLease {
    page: Option<Box<dyn Page>>,
}

impl PageLease {
    pub fn new(page: Box<dyn Page>) -> Self {
        Self { page: Some(page) }
    }
}

impl Deref for PageLease {
    type Target = dyn Page;

    fn deref(&self) -> &Self::Target {
        self.page.as_deref().expect("page present until drop")
    }
}

impl DerefMut for PageLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.page.as_deref_mut().expect("page present until drop")
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        if let Some(mut page) = self.page.take() {
            page.close();
        }
    }
}

/// Renders pages with a plain HTTP client that presents itself as a desktop
/// browser.
#[derive(Clone)]
pub struct HttpBrowser {
    http: Client,
    platform: Platform,
}

impl HttpBrowser {
    pub fn new(platform: Platform) -> anyhow::Result<Self> {
        Ok(Self {
            http: http::build_client(BROWSER_USER_AGENT)?,
            platform,
        })
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        Ok(Box::new(HttpPage {
            http: self.http.clone(),
            platform: self.platform,
            content: String::new(),
        }))
    }
}

struct HttpPage {
    http: Client,
    platform: Platform,
    content: String,
}

#[async_trait]
impl Page for HttpPage {
    async fn goto(&mut self, url: &Url) -> Result<()> {
        let fetched = http::fetch_checked(&self.http, self.platform, url.clone(), None, false).await?;
        self.content = fetched.body;
        Ok(())
    }

    fn content(&self) -> &str {
        &self.content
    }

    fn close(&mut self) {
        self.content.clear();
    }
}
