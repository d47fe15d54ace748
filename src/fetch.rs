use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressStyle};
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

/// One fetched page, or the reason it could not be fetched.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub html: Option<String>,
    pub status: Option<i32>,
    pub error: Option<String>,
    pub latency_ms: i64,
}

pub struct FetchStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub concurrency: usize,
    pub delay: Duration,
}

/// Fetch pages concurrently and hand each one to `on_page` as it arrives.
/// `on_page` runs on the caller's task, one page at a time.
pub async fn fetch_pages_streaming<F>(
    api_key: &str,
    urls: Vec<String>,
    opts: FetchOptions,
    mut on_page: F,
) -> Result<FetchStats>
where
    F: FnMut(FetchedPage),
{
    let spider = Arc::new(
        Spider::new(Some(api_key.to_string()))
            .map_err(|e| anyhow!("creating Spider client: {}", e))?,
    );
    let concurrency = opts.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let total = urls.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let (tx, mut rx) = tokio::sync::mpsc::channel::<FetchedPage>(concurrency * 2);

    for url in urls {
        let spider = Arc::clone(&spider);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let delay = opts.delay;

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let page = fetch_with_retry(&spider, &url).await;
            let _ = tx.send(page).await;
            tokio::time::sleep(delay).await;
        });
    }

    drop(tx);

    let mut ok = 0usize;
    let mut errors = 0usize;
    while let Some(page) = rx.recv().await {
        if page.error.is_some() {
            warn!(url = %page.url, error = page.error.as_deref().unwrap_or(""), "fetch failed");
            errors += 1;
        } else {
            ok += 1;
        }
        on_page(page);
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("Fetched {} pages ({} ok, {} errors)", total, ok, errors);

    Ok(FetchStats { total, ok, errors })
}

/// Rate limits and server errors are worth another try; anything else,
/// including a failure with no HTTP status, is final.
fn is_retryable(status: Option<i32>) -> bool {
    matches!(status, Some(429) | Some(500..=599))
}

async fn fetch_with_retry(spider: &Spider, url: &str) -> FetchedPage {
    let mut attempt = 0;
    loop {
        let page = fetch_one(spider, url).await;
        let retry = page.error.is_some() && is_retryable(page.status);
        if !retry || attempt == MAX_RETRIES {
            return page;
        }

        let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
        warn!(
            "HTTP {} on {} (attempt {}/{}), backing off {:.1}s",
            page.status.unwrap_or_default(),
            url,
            attempt + 1,
            MAX_RETRIES,
            backoff.as_secs_f64()
        );
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}

async fn fetch_one(spider: &Spider, url: &str) -> FetchedPage {
    let params = RequestParams {
        return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
        ..Default::default()
    };

    let start = Instant::now();
    let response = spider
        .scrape_url(url, Some(params), "application/json")
        .await;
    let latency_ms = start.elapsed().as_millis() as i64;

    match response {
        Ok(value) => {
            let (html, status) = read_response(value);
            debug!(url, status = ?status, latency_ms, "fetched");
            let error = match (&html, status) {
                (_, Some(s)) if s >= 400 => Some(format!("HTTP {}", s)),
                (None, _) => Some("empty response".to_string()),
                _ => None,
            };
            FetchedPage {
                url: url.to_string(),
                html: if error.is_none() { html } else { None },
                status,
                error,
                latency_ms,
            }
        }
        Err(e) => FetchedPage {
            url: url.to_string(),
            html: None,
            status: e.status().map(|s| i32::from(s.as_u16())),
            error: Some(e.to_string()),
            latency_ms,
        },
    }
}

/// Spider answers with a JSON array (sometimes as a string) whose first
/// object carries `content` and `status`.
fn read_response(value: serde_json::Value) -> (Option<String>, Option<i32>) {
    let parsed: serde_json::Value = match value.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(value.clone()),
        None => value,
    };
    let first = parsed.as_array().and_then(|arr| arr.first());

    let content = first
        .and_then(|obj| obj.get("content"))
        .and_then(|c| c.as_str())
        .filter(|c| !c.trim().is_empty())
        .map(str::to_string);
    let status = first
        .and_then(|obj| obj.get("status"))
        .and_then(|s| s.as_i64())
        .map(|s| s as i32);
    (content, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_array_and_string_responses() {
        let v = json!([{"content": "<html></html>", "status": 200}]);
        assert_eq!(read_response(v.clone()), (Some("<html></html>".into()), Some(200)));

        let s = serde_json::Value::String(v.to_string());
        assert_eq!(read_response(s), (Some("<html></html>".into()), Some(200)));
    }

    #[test]
    fn blank_content_is_missing() {
        let v = json!([{"content": "  ", "status": 200}]);
        assert_eq!(read_response(v), (None, Some(200)));
        assert_eq!(read_response(json!({})), (None, None));
    }

    #[test]
    fn retry_on_rate_limits_and_server_errors() {
        assert!(is_retryable(Some(429)));
        assert!(is_retryable(Some(500)));
        assert!(is_retryable(Some(503)));
        assert!(is_retryable(Some(599)));
        assert!(!is_retryable(Some(404)));
        assert!(!is_retryable(Some(200)));
        assert!(!is_retryable(Some(600)));
    }

    #[test]
    fn failures_without_a_status_are_final() {
        // Words and port numbers in the message do not count as status codes.
        let page = FetchedPage {
            url: "https://x.com/p/1".into(),
            html: None,
            status: None,
            error: Some("error sending request for url (http://127.0.0.1:5000/generate)".into()),
            latency_ms: 1,
        };
        assert!(!is_retryable(page.status));
    }
}
