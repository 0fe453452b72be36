//! Default fetch operation: HTTP GET via libcurl plus a pluggable extractor.
//!
//! Curl is blocking, so each request runs on tokio's blocking pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::retry::{classify_curl_error, FetchError};

use super::extract::Extractor;
use super::{FetchOutcome, Fetcher};

const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// GET `resource` (a URL) and hand the body to an extractor.
#[derive(Clone)]
pub struct CurlFetcher {
    extractor: Arc<dyn Extractor>,
    user_agent: Option<String>,
}

impl CurlFetcher {
    pub fn new(extractor: impl Extractor + 'static) -> Self {
        Self {
            extractor: Arc::new(extractor),
            user_agent: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }
}

impl Fetcher for CurlFetcher {
    async fn fetch(&self, resource: &str, timeout: Duration) -> FetchOutcome {
        let started = Instant::now();
        let url = resource.to_string();
        let user_agent = self.user_agent.clone();
        let res = tokio::task::spawn_blocking(move || get(&url, timeout, user_agent.as_deref()))
            .await;
        let duration = started.elapsed();
        match res {
            Err(e) => FetchOutcome::failed(
                FetchError::Transport(format!("fetch task join: {}", e)),
                0,
                duration,
            ),
            Ok(Err(e)) => FetchOutcome::failed(e, 0, duration),
            Ok(Ok((status, _))) if !(200..300).contains(&status) => {
                FetchOutcome::failed(FetchError::Http(status), status, duration)
            }
            Ok(Ok((status, body))) => {
                FetchOutcome::ok(self.extractor.extract(resource, &body), status, duration)
            }
        }
    }
}

/// Blocking GET. Returns status and body; curl failures are classified.
fn get(
    url: &str,
    timeout: Duration,
    user_agent: Option<&str>,
) -> Result<(u32, Vec<u8>), FetchError> {
    let transport = |e: curl::Error| classify_curl_error(&e, timeout);
    let mut body = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(transport)?;
    easy.follow_location(true).map_err(transport)?;
    easy.max_redirections(10).map_err(transport)?;
    easy.connect_timeout(timeout.min(MAX_CONNECT_TIMEOUT))
        .map_err(transport)?;
    easy.timeout(timeout).map_err(transport)?;
    if let Some(ua) = user_agent {
        easy.useragent(ua).map_err(transport)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(transport)?;
        transfer.perform().map_err(transport)?;
    }

    let code = easy.response_code().map_err(transport)?;
    Ok((code, body))
}
