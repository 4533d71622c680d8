//! Xtream Codes panel API client

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ViewerError, ViewerResult};
use crate::models::{mask_password, Category, Channel, Credentials};
use crate::transport::{FetchResponse, Gateway, Transport};

const API_PATH: &str = "/player_api.php";
const XMLTV_PATH: &str = "/xmltv.php";

/// What panels print when the login is rejected, sometimes behind PHP warnings.
const AUTH_FAILED_MARKER: &str = r#"{"user_info":{"auth":0}}"#;

pub struct PanelClient {
    credentials: Credentials,
    gateway: Gateway,
    transport: Arc<dyn Transport>,
}

impl PanelClient {
    pub fn new(credentials: Credentials, gateway: Gateway, transport: Arc<dyn Transport>) -> Self {
        Self {
            credentials,
            gateway,
            transport,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    fn endpoint_url(&self, path: &str, params: &[(&str, &str)]) -> ViewerResult<String> {
        if !self.credentials.is_complete() {
            return Err(ViewerError::MissingCredentials);
        }

        let base = format!("{}{}", self.credentials.server_url, path);
        let mut url = url::Url::parse(&base)
            .map_err(|e| ViewerError::transport(format!("invalid server URL '{}': {}", base, e)))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("username", &self.credentials.username)
                .append_pair("password", &self.credentials.password);
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url.to_string())
    }

    /// `player_api.php` URL: username, password, action, then `extra` in order.
    pub fn api_url(&self, action: &str, extra: &[(&str, &str)]) -> ViewerResult<String> {
        let mut params = Vec::with_capacity(extra.len() + 1);
        params.push(("action", action));
        params.extend_from_slice(extra);
        self.endpoint_url(API_PATH, &params)
    }

    /// `xmltv.php` URL. This endpoint takes no action parameter.
    pub fn xmltv_url(&self) -> ViewerResult<String> {
        self.endpoint_url(XMLTV_PATH, &[])
    }

    /// HLS URL for a live stream. Played directly, never through the proxy.
    pub fn stream_url(&self, stream_id: &str) -> String {
        format!(
            "{}/live/{}/{}/{}.m3u8",
            self.credentials.server_url, self.credentials.username, self.credentials.password, stream_id
        )
    }

    /// GET `target` through the gateway. Non-2xx is an error here.
    pub fn fetch(&self, target: &str) -> ViewerResult<FetchResponse> {
        debug!("GET {}", mask_password(target));
        let response = self.transport.get(&self.gateway.route(target))?;
        if !response.is_success() {
            warn!("upstream answered {} for {}", response.status, mask_password(target));
            return Err(ViewerError::http(response.status));
        }
        Ok(response)
    }

    /// Run a panel action and return its JSON, whatever shape it has.
    pub fn call(&self, action: &str, extra: &[(&str, &str)]) -> ViewerResult<Value> {
        let target = self.api_url(action, extra)?;
        let text = self.fetch(&target)?.text();
        parse_panel_json(&text).inspect_err(|e| warn!("{} failed: {}", action, e))
    }

    /// Live categories. Doubles as the login check: a `null` answer or an
    /// `auth: 0` object means the credentials were rejected.
    pub fn authenticate(&self) -> ViewerResult<Vec<Category>> {
        let value = self.call("get_live_categories", &[])?;
        if value.is_null() {
            return Err(ViewerError::AuthenticationFailed);
        }
        reject_auth_failure(&value)?;
        Ok(decode_list(value))
    }

    pub fn live_streams(&self, category_id: &str) -> ViewerResult<Vec<Channel>> {
        let value = self.call("get_live_streams", &[("category_id", category_id)])?;
        reject_auth_failure(&value)?;
        Ok(decode_list(value))
    }
}

/// Parse a panel body. Unparseable text is an auth failure when it carries
/// the marker, otherwise a non-JSON response.
pub fn parse_panel_json(text: &str) -> ViewerResult<Value> {
    serde_json::from_str(text).map_err(|_| {
        if text.contains(AUTH_FAILED_MARKER) {
            ViewerError::AuthenticationFailed
        } else {
            ViewerError::NonJsonResponse
        }
    })
}

/// A well-formed `{"user_info": {"auth": 0}}` object is also a rejected login.
fn reject_auth_failure(value: &Value) -> ViewerResult<()> {
    let auth = value.get("user_info").and_then(|info| info.get("auth"));
    let denied = match auth {
        Some(Value::Number(n)) => n.as_i64() == Some(0),
        Some(Value::String(s)) => s == "0",
        Some(Value::Bool(b)) => !b,
        _ => false,
    };
    if denied {
        Err(ViewerError::AuthenticationFailed)
    } else {
        Ok(())
    }
}

/// Anything but an array reads as empty; entries that don't fit are skipped.
fn decode_list<T: DeserializeOwned>(value: Value) -> Vec<T> {
    let Value::Array(items) = value else {
        return Vec::new();
    };

    let total = items.len();
    let decoded: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();

    if decoded.len() < total {
        debug!("skipped {} malformed entries", total - decoded.len());
    }
    decoded
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
