use flip_scout::adapters::{
    self, Browser, CraigslistAdapter, EbayAdapter, MercariAdapter, OfferUpAdapter, Page, SourceAdapter,
};
use flip_scout::error::DEFAULT_RETRY_AFTER_SECS;
use flip_scout::listing::SearchParams;
use flip_scout::model::Platform;
use flip_scout::{PipelineError, Result};
use reqwest::Url;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// Serves the given raw responses, one per connection, and records the
/// request lines it saw. Clients follow the environment's proxy settings,
/// so loopback is exempted before any adapter is built.
async fn serve(responses: Vec<String>) -> (Url, Arc<Mutex<Vec<String>>>) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    std::env::set_var("no_proxy", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();
    tokio::spawn(async move {
        for response in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let line = request.lines().next().unwrap_or_default().to_string();
            recorded.lock().await.push(line);
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    (Url::parse(&format!("http://{addr}/")).unwrap(), seen)
}

fn response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut out = format!("HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n", body.len());
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    out.push_str(body);
    out
}

const BLOCK_PAGE: &str = "<!DOCTYPE html><html><head><title>Just a moment</title></head><body>checking</body></html>";

fn params() -> SearchParams {
    SearchParams::new("iphone 13", 10)
}

#[tokio::test]
async fn mercari_html_body_is_rate_limited_with_retry_after() {
    let (base, _) = serve(vec![response(
        "200 OK",
        &[("Content-Type", "text/html"), ("Retry-After", "120")],
        BLOCK_PAGE,
    )])
    .await;
    let adapter = MercariAdapter::new(Some("token".into()), base).unwrap();

    let err = adapter.fetch_active(&params()).await.unwrap_err();
    match err {
        PipelineError::RateLimited {
            platform,
            message,
            retry_after_secs,
        } => {
            assert_eq!(platform, Platform::Mercari);
            assert!(message.contains("HTML returned where JSON was expected"), "{message}");
            assert_eq!(retry_after_secs, 120);
        }
        other => panic!("expected rate limited, got {other:?}"),
    }
}

#[tokio::test]
async fn ebay_429_without_header_uses_default_hint() {
    let (base, _) = serve(vec![response("429 Too Many Requests", &[], "{}")]).await;
    let adapter = EbayAdapter::new(Some("token".into()), base).unwrap();

    let err = adapter.fetch_active(&params()).await.unwrap_err();
    assert_eq!(err.retry_after_secs(), Some(DEFAULT_RETRY_AFTER_SECS));
}

#[tokio::test]
async fn server_error_is_transient_and_fallback_runs_once() {
    let items = r#"{"itemSummaries":[{"itemId":"v1|1|0","title":"Apple iPhone 13","price":{"value":"320.00","currency":"USD"}}]}"#;
    let (base, seen) = serve(vec![
        response("503 Service Unavailable", &[], "upstream down"),
        response("200 OK", &[("Content-Type", "application/json")], items),
    ])
    .await;
    let adapter = EbayAdapter::new(Some("token".into()), base).unwrap();

    let mut filtered = params();
    filtered.min_price = Some(100.0);
    filtered.max_price = Some(500.0);

    let listings = adapters::fetch_with_fallback(&adapter, &filtered).await.unwrap();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].id.as_deref(), Some("v1|1|0"));

    let seen = seen.lock().await;
    assert_eq!(seen.len(), 2);
    assert!(seen[0].contains("price"), "{}", seen[0]);
    assert!(!seen[1].contains("price"), "{}", seen[1]);
}

#[tokio::test]
async fn unauthorized_is_fatal() {
    let (base, _) = serve(vec![response("401 Unauthorized", &[], r#"{"error":"invalid token"}"#)]).await;
    let adapter = MercariAdapter::new(Some("token".into()), base).unwrap();

    let err = adapter.fetch_active(&params()).await.unwrap_err();
    assert!(matches!(err, PipelineError::FatalAdapter { .. }), "{err:?}");
}

#[tokio::test]
async fn missing_token_is_configuration_error() {
    let adapter = MercariAdapter::new(None, Url::parse("http://127.0.0.1:9/").unwrap()).unwrap();
    assert!(matches!(adapter.preflight(), Err(PipelineError::Configuration(_))));
}

/// Browser whose pages serve canned HTML and count how many were released.
#[derive(Clone, Default)]
struct CountingBrowser {
    html: String,
    fail: bool,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    visited: Arc<Mutex<Vec<String>>>,
}

struct CountingPage {
    browser: CountingBrowser,
    content: String,
}

#[async_trait::async_trait]
impl Browser for CountingBrowser {
    async fn new_page(&self) -> Result<Box<dyn Page>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingPage {
            browser: self.clone(),
            content: String::new(),
        }))
    }
}

#[async_trait::async_trait]
impl Page for CountingPage {
    async fn goto(&mut self, url: &Url) -> Result<()> {
        self.browser.visited.lock().await.push(url.to_string());
        if self.browser.fail {
            return Err(PipelineError::RateLimited {
                platform: Platform::Craigslist,
                message: "captcha page".into(),
                retry_after_secs: DEFAULT_RETRY_AFTER_SECS,
            });
        }
        self.content = self.browser.html.clone();
        Ok(())
    }

    fn content(&self) -> &str {
        &self.content
    }

    fn close(&mut self) {
        self.browser.closed.fetch_add(1, Ordering::SeqCst);
    }
}

const CRAIGSLIST_HTML: &str = r#"<html><body><ol>
<li class="cl-static-search-result" title="Oak desk">
  <a href="https://sfbay.craigslist.org/sfc/fuo/d/oak-desk/7712345678.html">
    <div class="title">Oak desk</div>
    <div class="details"><div class="price">$120</div><div class="location">Mission</div></div>
  </a>
</li>
<li class="cl-static-search-result" title="Herman Miller Aeron">
  <a href="https://sfbay.craigslist.org/sfc/fuo/d/aeron/7712345679.html">
    <div class="title">Herman Miller Aeron</div>
    <div class="details"><div class="price">$900</div></div>
  </a>
</li>
</ol></body></html>"#;

#[tokio::test]
async fn craigslist_page_is_released_after_success() {
    let browser = CountingBrowser {
        html: CRAIGSLIST_HTML.into(),
        ..Default::default()
    };
    let adapter = CraigslistAdapter::new(
        Arc::new(browser.clone()),
        Url::parse("https://sfbay.craigslist.org/").unwrap(),
    );

    let mut search = params();
    search.max_price = Some(500.0);
    let listings = adapter.fetch_active(&search).await.unwrap();
    assert_eq!(listings.len(), 2);
    assert_eq!(listings[0].id.as_deref(), Some("7712345678"));
    assert_eq!(listings[0].price, Some(120.0));

    let visited = browser.visited.lock().await.clone();
    assert!(visited[0].contains("max_price=500"), "{visited:?}");

    // fallback filters the price locally
    let fallback = adapter.fetch_active_fallback(&search).await.unwrap();
    assert_eq!(fallback.len(), 1);

    assert_eq!(browser.opened.load(Ordering::SeqCst), 2);
    assert_eq!(browser.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn offerup_page_is_released_after_failure() {
    let browser = CountingBrowser {
        fail: true,
        ..Default::default()
    };
    let adapter = OfferUpAdapter::new(Arc::new(browser.clone()), Url::parse("https://offerup.com/").unwrap());

    let err = adapter.fetch_active(&params()).await.unwrap_err();
    assert!(matches!(err, PipelineError::RateLimited { .. }));
    assert_eq!(browser.opened.load(Ordering::SeqCst), 1);
    assert_eq!(browser.closed.load(Ordering::SeqCst), 1);
}
