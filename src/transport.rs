//! Outbound HTTP and proxy routing

use std::time::Duration;

use crate::error::{ViewerError, ViewerResult};

/// XMLTV dumps from large panels run past 100 MB.
const MAX_BODY_BYTES: u64 = 512 * 1024 * 1024;

/// What came back from one GET, whatever the status.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A single blocking GET. Non-2xx statuses are responses, not errors;
/// only transport failures (DNS, refused connection, bad URL) are `Err`.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> ViewerResult<FetchResponse>;
}

/// ureq-backed transport
pub struct HttpTransport {
    agent: ureq::Agent,
    user_agent: Option<String>,
}

impl HttpTransport {
    /// Plain agent: no extra headers and no timeouts beyond ureq's defaults.
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent, user_agent: None }
    }

    /// Plain agent that names itself with `user_agent` (when not empty).
    pub fn with_user_agent(user_agent: &str) -> Self {
        Self {
            user_agent: Some(user_agent.to_string()).filter(|ua| !ua.is_empty()),
            ..Self::new()
        }
    }

    /// Agent for the panel client, with the configured user agent and timeouts.
    pub fn for_client(user_agent: &str, timeout_secs: u64) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(Duration::from_secs(timeout_secs)))
            .timeout_connect(Some(Duration::from_secs(30)))
            .build()
            .new_agent();
        let user_agent = Some(user_agent.to_string()).filter(|ua| !ua.is_empty());
        Self { agent, user_agent }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> ViewerResult<FetchResponse> {
        let mut request = self.agent.get(url);
        if let Some(ref ua) = self.user_agent {
            request = request.header("User-Agent", ua);
        }

        let mut response = request.call().map_err(ViewerError::transport)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response
            .body_mut()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_vec()
            .map_err(ViewerError::transport)?;

        Ok(FetchResponse {
            status,
            content_type,
            body,
        })
    }
}

/// How upstream URLs reach the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gateway {
    /// Through the passthrough proxy at this endpoint (e.g. `http://127.0.0.1:8888/proxy`)
    Proxy(String),
    /// Straight to the panel
    Direct,
}

impl Gateway {
    /// The URL to actually request for `target`.
    pub fn route(&self, target: &str) -> String {
        match self {
            Gateway::Proxy(endpoint) => {
                format!("{}?url={}", endpoint, urlencoding::encode(target))
            }
            Gateway::Direct => target.to_string(),
        }
    }
}
