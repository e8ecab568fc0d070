pub mod error;
pub mod models;
mod pairing;

use std::{sync::Arc, time::Duration};

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, AUTHORIZATION},
    Client, Method,
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::Config;

pub use self::{
    error::DeviceError,
    models::{
        Credentials, DeviceField, DeviceSnapshot, HeatMode, PatchResponse, PatchStyle,
        PushLinkStatus,
    },
    pairing::{
        PairingOutcome, PairingResult, PairingState, DEFAULT_PAIRING_TIMEOUT,
        DEFAULT_POLL_INTERVAL,
    },
};

const API_PATH: &str = "/api/poolsync";
const BODY_PREVIEW_LEN: usize = 300;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything needed to build a [`PoolSyncClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub credentials: Credentials,
    /// MAC remembered from an earlier pairing, if any.
    pub mac_address: Option<String>,
    pub request_timeout: Duration,
    pub patch_style: PatchStyle,
    /// Log secrets verbatim instead of their length.
    pub unmask_logs: bool,
}

impl ClientOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credentials: Credentials::default(),
            mac_address: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            patch_style: PatchStyle::default(),
            unmask_logs: false,
        }
    }
}

impl From<&Config> for ClientOptions {
    fn from(config: &Config) -> Self {
        Self {
            base_url: config.base_url.clone(),
            credentials: Credentials::new(config.token.clone(), config.user_id.clone()),
            mac_address: config.mac_address.clone(),
            request_timeout: config.request_timeout,
            patch_style: config.patch_style,
            unmask_logs: config.unmask_logs,
        }
    }
}

/// HTTP client for the hub's local REST API.
///
/// Clones share credentials and the learned MAC address.
#[derive(Debug, Clone)]
pub struct PoolSyncClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    base_url: String,
    request_timeout: Duration,
    patch_style: PatchStyle,
    unmask_logs: bool,
    credentials: RwLock<Credentials>,
    mac_address: RwLock<Option<String>>,
}

/// Uniform outcome of one HTTP exchange. Transport failures have `status == 0`
/// and the error text as `body`.
#[derive(Debug)]
pub(crate) struct RawResponse {
    pub status: u16,
    pub body: String,
    pub json: Option<Value>,
}

impl RawResponse {
    fn transport(message: String) -> Self {
        Self { status: 0, body: message, json: None }
    }

    fn ensure_ok(self) -> Result<Self, DeviceError> {
        match self.status {
            0 => Err(DeviceError::Transport { message: self.body }),
            200 => Ok(self),
            status => Err(DeviceError::HttpStatus { status, body: self.body }),
        }
    }
}

/// One request against `/api/poolsync`.
pub(crate) struct Call<'a> {
    pub method: Method,
    pub query: &'a str,
    /// Replaces the configured user id for this request only.
    pub user: Option<&'a str>,
    pub body: Option<&'a Value>,
    pub timeout: Duration,
}

impl PoolSyncClient {
    pub fn new(options: ClientOptions) -> Self {
        Self::with_http(options, Client::new())
    }

    /// Build on an existing, shared `reqwest::Client`.
    pub fn with_http(options: ClientOptions, http: Client) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                base_url: options.base_url.trim().trim_end_matches('/').to_owned(),
                request_timeout: options.request_timeout,
                patch_style: options.patch_style,
                unmask_logs: options.unmask_logs,
                credentials: RwLock::new(options.credentials),
                mac_address: RwLock::new(options.mac_address.filter(|m| !m.is_empty())),
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub async fn credentials(&self) -> Credentials {
        self.inner.credentials.read().await.clone()
    }

    pub async fn mac_address(&self) -> Option<String> {
        self.inner.mac_address.read().await.clone()
    }

    /// Fetch the full status/config snapshot.
    ///
    /// Learns the hub MAC address from the snapshot if none is known yet.
    pub async fn fetch_all(&self) -> Result<DeviceSnapshot, DeviceError> {
        let raw = self
            .request_json(Call {
                method: Method::GET,
                query: "cmd=poolSync&all",
                user: None,
                body: None,
                timeout: self.inner.request_timeout,
            })
            .await
            .ensure_ok()?;

        let RawResponse { status, body, json } = raw;
        let snapshot = json
            .and_then(DeviceSnapshot::from_value)
            .ok_or(DeviceError::MalformedResponse { status, body })?;

        if let Some(mac) = snapshot.mac_address() {
            self.learn_mac(mac).await;
        }

        Ok(snapshot)
    }

    /// PATCH a single field of device `device_index`.
    ///
    /// Does not refresh; callers request that themselves.
    pub async fn set_device_field(
        &self,
        device_index: u32,
        field: DeviceField,
    ) -> Result<PatchResponse, DeviceError> {
        let payload = field.payload(self.inner.patch_style);
        let query = format!("cmd=devices&device={device_index}");
        info!(
            device_index,
            field = field.name(),
            value = %field.value(),
            "Sending device setting"
        );

        let raw = self
            .request_json(Call {
                method: Method::PATCH,
                query: &query,
                user: None,
                body: Some(&payload),
                timeout: self.inner.request_timeout,
            })
            .await
            .ensure_ok()?;

        Ok(match raw.json {
            Some(v) => PatchResponse::Json(v),
            None => PatchResponse::Ack { raw: raw.body },
        })
    }

    /// Chlorinator output; `percent` is rounded and clamped to `0..=100`.
    pub async fn set_chlor_output(
        &self,
        device_index: u32,
        percent: f64,
    ) -> Result<PatchResponse, DeviceError> {
        self.set_device_field(device_index, DeviceField::chlor_output(percent))
            .await
    }

    pub async fn set_boost_mode(
        &self,
        device_index: u32,
        on: bool,
    ) -> Result<PatchResponse, DeviceError> {
        self.set_device_field(device_index, DeviceField::BoostMode(on))
            .await
    }

    pub async fn set_heat_setpoint(
        &self,
        device_index: u32,
        setpoint: f64,
    ) -> Result<PatchResponse, DeviceError> {
        self.set_device_field(device_index, DeviceField::HeatSetpoint(setpoint))
            .await
    }

    pub async fn set_heat_mode(
        &self,
        device_index: u32,
        mode: HeatMode,
    ) -> Result<PatchResponse, DeviceError> {
        self.set_device_field(device_index, DeviceField::HeatMode(mode))
            .await
    }

    /// Cache `mac` unless one is already known. Returns whether it was stored.
    pub(crate) async fn learn_mac(&self, mac: &str) -> bool {
        if mac.is_empty() {
            return false;
        }
        let mut guard = self.inner.mac_address.write().await;
        if guard.is_some() {
            return false;
        }
        info!(mac = %mac, "Learned PoolSync MAC address");
        *guard = Some(mac.to_owned());
        true
    }

    pub(crate) async fn adopt_credentials(&self, token: String, user_id: String) {
        *self.inner.credentials.write().await = Credentials::new(Some(token), Some(user_id));
    }

    /// Send one request and fold every outcome into a [`RawResponse`].
    pub(crate) async fn request_json(&self, call: Call<'_>) -> RawResponse {
        let url = format!("{}{}?{}", self.inner.base_url, API_PATH, call.query);

        let headers = {
            let creds = self.inner.credentials.read().await;
            let user = call.user.or(creds.user_id.as_deref());
            build_headers(creds.token.as_deref(), user)
        };
        let headers = match headers {
            Ok(h) => h,
            Err(e) => return RawResponse::transport(e.to_string()),
        };

        let mut request = self
            .inner
            .http
            .request(call.method.clone(), &url)
            .headers(headers)
            .timeout(call.timeout);
        if let Some(body) = call.body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(method = %call.method, url = %url, error = %e, "PoolSync request failed");
                return RawResponse::transport(e.to_string());
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                debug!(method = %call.method, url = %url, error = %e, "Failed to read PoolSync response body");
                return RawResponse::transport(e.to_string());
            }
        };

        if self.inner.unmask_logs {
            debug!(
                method = %call.method,
                url = %url,
                status,
                body_len = body.len(),
                body = %preview(&body),
                "PoolSync response"
            );
        } else {
            debug!(method = %call.method, url = %url, status, body_len = body.len(), "PoolSync response");
        }

        let json = if body.is_empty() {
            None
        } else {
            serde_json::from_str(&body).ok()
        };

        RawResponse { status, body, json }
    }
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(BODY_PREVIEW_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Fixed header set sent with every request.
///
/// The firmware only recognises the user id under a lower-case `user` header.
pub(crate) fn build_headers(
    token: Option<&str>,
    user_id: Option<&str>,
) -> Result<HeaderMap, DeviceError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));

    if let Some(token) = token.filter(|t| !t.is_empty()) {
        let mut value = HeaderValue::from_str(token).map_err(|_| DeviceError::Transport {
            message: "token is not a valid header value".to_owned(),
        })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    if let Some(user) = user_id.filter(|u| !u.is_empty()) {
        let value = HeaderValue::from_str(user).map_err(|_| DeviceError::Transport {
            message: format!("invalid user header value: {user:?}"),
        })?;
        headers.insert(HeaderName::from_static("user"), value);
    } else {
        debug!("No user id configured; sending request without 'user' header");
    }

    Ok(headers)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path, query_param},
        Mock, MockServer, Request, Respond, ResponseTemplate,
    };

    use super::*;

    async fn setup(credentials: Credentials) -> (MockServer, PoolSyncClient) {
        let server = MockServer::start().await;
        let mut options = ClientOptions::new(server.uri());
        options.credentials = credentials;
        options.request_timeout = Duration::from_secs(2);
        (server, PoolSyncClient::new(options))
    }

    fn creds() -> Credentials {
        Credentials::new(Some("tok-1".into()), Some("user-1".into()))
    }

    fn snapshot_json(mac: &str) -> Value {
        json!({
            "poolSync": { "system": { "macAddr": mac } },
            "devices": { "0": { "config": { "chlorOutput": 40 } } }
        })
    }

    #[test]
    fn build_headers_includes_auth_and_lowercase_user() {
        let h = build_headers(Some("abc"), Some("u-42")).unwrap();
        assert_eq!(h[ACCEPT], "application/json");
        assert_eq!(h[ACCEPT_ENCODING], "gzip, deflate");
        assert_eq!(h[AUTHORIZATION], "abc");
        assert!(h[AUTHORIZATION].is_sensitive());
        assert_eq!(h["user"], "u-42");
    }

    #[test]
    fn build_headers_omits_missing_credentials() {
        let h = build_headers(None, Some("")).unwrap();
        assert!(!h.contains_key(AUTHORIZATION));
        assert!(!h.contains_key("user"));
    }

    #[test]
    fn build_headers_rejects_control_characters() {
        let err = build_headers(Some("bad\ntoken"), None).unwrap_err();
        assert_eq!(err.status(), 0);
    }

    #[test]
    fn base_url_trailing_slash_is_stripped() {
        let client = PoolSyncClient::new(ClientOptions::new(" http://10.0.0.5/ "));
        assert_eq!(client.base_url(), "http://10.0.0.5");
    }

    #[tokio::test]
    async fn fetch_all_sends_headers_and_learns_mac() {
        let (server, client) = setup(creds()).await;

        Mock::given(method("GET"))
            .and(path("/api/poolsync"))
            .and(query_param("cmd", "poolSync"))
            .and(query_param("all", ""))
            .and(header("authorization", "tok-1"))
            .and(header("user", "user-1"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(snapshot_json("AA:BB")))
            .expect(1)
            .mount(&server)
            .await;

        let snap = client.fetch_all().await.unwrap();
        assert_eq!(snap.get_i64(&["devices", "0", "config", "chlorOutput"]), Some(40));
        assert_eq!(client.mac_address().await.as_deref(), Some("AA:BB"));
    }

    #[tokio::test]
    async fn fetch_all_mac_is_first_writer_wins() {
        let (server, client) = setup(creds()).await;

        Mock::given(method("GET"))
            .and(path("/api/poolsync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(snapshot_json("AA:BB")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/poolsync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(snapshot_json("CC:DD")))
            .mount(&server)
            .await;

        client.fetch_all().await.unwrap();
        client.fetch_all().await.unwrap();
        assert_eq!(client.mac_address().await.as_deref(), Some("AA:BB"));
    }

    #[tokio::test]
    async fn fetch_all_non_200_is_http_status_error() {
        let (server, client) = setup(creds()).await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let err = client.fetch_all().await.unwrap_err();
        assert_eq!(
            err,
            DeviceError::HttpStatus { status: 401, body: "unauthorized".into() }
        );
    }

    #[tokio::test]
    async fn fetch_all_non_object_body_is_malformed() {
        let (server, client) = setup(creds()).await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[1,2,3]"))
            .mount(&server)
            .await;

        let err = client.fetch_all().await.unwrap_err();
        assert!(matches!(err, DeviceError::MalformedResponse { status: 200, .. }));
        assert_eq!(err.body(), "[1,2,3]");
    }

    #[tokio::test]
    async fn fetch_all_connection_refused_is_transport_error() {
        // Nothing listens on the discard port.
        let mut options = ClientOptions::new("http://127.0.0.1:9");
        options.request_timeout = Duration::from_millis(500);
        let client = PoolSyncClient::new(options);

        let err = client.fetch_all().await.unwrap_err();
        assert!(matches!(err, DeviceError::Transport { .. }));
        assert_eq!(err.status(), 0);
    }

    #[tokio::test]
    async fn fetch_all_timeout_is_transport_error() {
        let server = MockServer::start().await;
        let mut options = ClientOptions::new(server.uri());
        options.request_timeout = Duration::from_millis(100);
        let client = PoolSyncClient::new(options);

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(snapshot_json("AA"))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = client.fetch_all().await.unwrap_err();
        assert_eq!(err.status(), 0);
    }

    #[tokio::test]
    async fn set_chlor_output_clamps_and_uses_nested_payload() {
        let (server, client) = setup(creds()).await;

        Mock::given(method("PATCH"))
            .and(path("/api/poolsync"))
            .and(query_param("cmd", "devices"))
            .and(query_param("device", "0"))
            .and(body_json(json!({"config": {"chlorOutput": 100}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let resp = client.set_chlor_output(0, 143.0).await.unwrap();
        assert_eq!(resp, PatchResponse::Json(json!({"ok": true})));
    }

    #[tokio::test]
    async fn set_boost_mode_flat_payload_and_empty_ack() {
        let server = MockServer::start().await;
        let mut options = ClientOptions::new(server.uri());
        options.patch_style = PatchStyle::Flat;
        let client = PoolSyncClient::new(options);

        Mock::given(method("PATCH"))
            .and(query_param("device", "2"))
            .and(body_json(json!({"boostMode": true})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let resp = client.set_boost_mode(2, true).await.unwrap();
        assert_eq!(resp, PatchResponse::Ack { raw: String::new() });
    }

    #[tokio::test]
    async fn set_device_field_propagates_failure() {
        let (server, client) = setup(creds()).await;

        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client
            .set_device_field(0, DeviceField::HeatMode(HeatMode::Heat))
            .await
            .unwrap_err();
        assert_eq!(err.status(), 500);
    }

    /// Stub hub that stores PATCHed `devices.{i}.config` fields and echoes
    /// them back on the next full fetch.
    struct EchoDevice {
        state: std::sync::Mutex<Value>,
    }

    impl Respond for EchoDevice {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let mut state = self.state.lock().unwrap();
            if request.method.as_str() == "PATCH" {
                let device = request
                    .url
                    .query_pairs()
                    .find(|(k, _)| k == "device")
                    .map(|(_, v)| v.into_owned())
                    .unwrap();
                let body: Value = serde_json::from_slice(&request.body).unwrap();
                let fields = body.get("config").cloned().unwrap_or(body);
                for (k, v) in fields.as_object().unwrap() {
                    state["devices"][&device]["config"][k] = v.clone();
                }
                return ResponseTemplate::new(200).set_body_json(json!({"ok": true}));
            }
            ResponseTemplate::new(200).set_body_json(state.clone())
        }
    }

    #[tokio::test]
    async fn set_then_fetch_round_trips_through_echo_device() {
        let (server, client) = setup(creds()).await;

        Mock::given(path("/api/poolsync"))
            .respond_with(EchoDevice {
                state: std::sync::Mutex::new(snapshot_json("AA")),
            })
            .mount(&server)
            .await;

        client
            .set_device_field(0, DeviceField::chlor_output(57.0))
            .await
            .unwrap();
        let snap = client.fetch_all().await.unwrap();
        assert_eq!(snap.get_i64(&["devices", "0", "config", "chlorOutput"]), Some(57));
    }
}
