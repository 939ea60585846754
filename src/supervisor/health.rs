//! HTTP health checks against the worker

use crate::config::ServerConfig;
use crate::error::Result;
use crate::supervisor::observer::{RuntimeEvent, RuntimeObserver};
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Body the worker returns from the ping endpoint
pub const PING_RESPONSE: &str = "PING";
/// Body the worker returns from the shutdown endpoint
pub const SHUTDOWN_RESPONSE: &str = "SHUTDOWN";

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REDIRECTS: usize = 10;

/// Polls the worker's ping endpoint and posts shutdown requests
#[derive(Debug, Clone)]
pub struct HealthChecker {
    client: Client,
    ping_path: String,
    shutdown_path: String,
    request_timeout: Duration,
    server_log: Option<PathBuf>,
}

impl HealthChecker {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        // Redirects are followed by hand so each hop keeps our timeout budget
        let client = Client::builder().redirect(Policy::none()).build()?;

        Ok(Self {
            client,
            ping_path: config.ping_path.clone(),
            shutdown_path: config.shutdown_path.clone(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            server_log: None,
        })
    }

    /// Upper bound for a single request
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Log file announced with [`RuntimeEvent::DiagnosticsAvailable`]
    pub fn with_server_log(mut self, path: PathBuf) -> Self {
        self.server_log = Some(path);
        self
    }

    /// True when the worker at `url` answers the ping endpoint
    ///
    /// Never fails: transport errors and unexpected bodies mean "not alive".
    pub async fn ping(&self, url: &str) -> bool {
        self.ping_within(url, self.request_timeout).await
    }

    /// Poll [`ping`](Self::ping) until it succeeds or `timeout_secs` elapse
    ///
    /// One last ping is made after the deadline.
    pub async fn wait_until_healthy(
        &self,
        url: &str,
        timeout_secs: u64,
        observer: &dyn RuntimeObserver,
    ) -> bool {
        let budget = Duration::from_secs(timeout_secs);
        let started = Instant::now();
        let deadline = started + budget;
        let mut slow_reported = false;
        let mut almost_reported = false;

        info!("Waiting up to {}s for the worker to answer", timeout_secs);

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let remaining = deadline - now;
            if self.ping_within(url, remaining.min(self.request_timeout)).await {
                info!("Worker answered after {:.1}s", started.elapsed().as_secs_f64());
                return true;
            }

            let elapsed = started.elapsed();
            if !slow_reported && elapsed >= budget / 3 {
                slow_reported = true;
                if let Some(ref log) = self.server_log {
                    observer.on_event(&RuntimeEvent::DiagnosticsAvailable {
                        server_log: log.clone(),
                    });
                }
                observer.on_event(&RuntimeEvent::SlowStartup { elapsed });
            }
            if !almost_reported && elapsed >= budget * 2 / 3 {
                almost_reported = true;
                observer.on_event(&RuntimeEvent::AlmostReady { elapsed });
            }

            tokio::time::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())))
                .await;
        }

        let alive = self.ping(url).await;
        if !alive {
            warn!("Worker did not answer within {}s", timeout_secs);
        }
        alive
    }

    /// Ask the worker to shut down; true when it acknowledged
    pub async fn request_shutdown(&self, url: &str) -> bool {
        match self.endpoint(url, &self.shutdown_path) {
            Some(endpoint) => match self.fetch(endpoint, self.request_timeout).await {
                Ok(body) if body == SHUTDOWN_RESPONSE => true,
                Ok(body) => {
                    warn!("Unexpected shutdown response: {:?}", body);
                    false
                }
                Err(e) => {
                    warn!("Shutdown request failed: {}", e);
                    false
                }
            },
            None => false,
        }
    }

    async fn ping_within(&self, url: &str, timeout: Duration) -> bool {
        let Some(endpoint) = self.endpoint(url, &self.ping_path) else {
            return false;
        };

        match self.fetch(endpoint, timeout).await {
            Ok(body) => {
                let alive = body == PING_RESPONSE;
                if !alive {
                    debug!("Ping answered with unexpected body: {:?}", body);
                }
                alive
            }
            Err(e) => {
                debug!("Ping failed: {}", e);
                false
            }
        }
    }

    /// `url` with its path replaced, query (the auth key) preserved
    fn endpoint(&self, url: &str, path: &str) -> Option<Url> {
        match Url::parse(url) {
            Ok(mut endpoint) => {
                endpoint.set_path(path);
                Some(endpoint)
            }
            Err(e) => {
                warn!("Invalid server URL {:?}: {}", url, e);
                None
            }
        }
    }

    /// GET `url`, following redirects, and return the final body
    async fn fetch(&self, mut url: Url, timeout: Duration) -> Result<String> {
        for _ in 0..=MAX_REDIRECTS {
            let response = self.client.get(url.clone()).timeout(timeout).send().await?;

            if response.status().is_redirection() {
                if let Some(location) = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                {
                    url = url.join(location)?;
                    debug!("Following redirect to {}", url);
                    continue;
                }
            }

            return Ok(response.text().await?);
        }

        Err(crate::error::RuntimeError::health_check(format!(
            "Too many redirects (>{})",
            MAX_REDIRECTS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_auth_key() {
        let checker = HealthChecker::new(&ServerConfig::default()).unwrap();
        let endpoint = checker
            .endpoint("http://127.0.0.1:5050/?key=abc123", "/misc/ping")
            .unwrap();
        assert_eq!(endpoint.as_str(), "http://127.0.0.1:5050/misc/ping?key=abc123");
        assert!(checker.endpoint("not a url", "/misc/ping").is_none());
    }
}
