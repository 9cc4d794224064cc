use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::{Value, json};

use dragoman_types::Challenge;

use crate::UpstreamError;

const DEFAULT_BASE_URL: &str = "https://chat.deepseek.com";

const LOGIN_PATH: &str = "/api/v0/users/login";
const CREATE_SESSION_PATH: &str = "/api/v0/chat_session/create";
const CREATE_POW_PATH: &str = "/api/v0/chat/create_pow_challenge";
const COMPLETION_PATH: &str = "/api/v0/chat/completion";

/// Path the PoW challenge must be requested for; also echoed back inside
/// the solved answer.
pub const POW_TARGET_PATH: &str = "/api/v0/chat/completion";

const CONNECT_TIMEOUT_SECS: u64 = 30;
const REQUEST_TIMEOUT_SECS: u64 = 30;

const COMPLETION_MAX_ATTEMPTS: u32 = 3;
const COMPLETION_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Body of a completion submission.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionPayload {
    pub chat_session_id: String,
    pub parent_message_id: Option<String>,
    pub prompt: String,
    pub ref_file_ids: Vec<String>,
    pub thinking_enabled: bool,
    pub search_enabled: bool,
}

/// Client for the upstream consumer chat backend.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new() -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .default_headers(base_headers())
            .build()
            .map_err(UpstreamError::ClientBuild)?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point the client at a different origin. Used by tests; production
    /// traffic always goes to the real backend.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    /// Log in with a credential's secrets and return the issued token.
    pub async fn login(
        &self,
        email: Option<&str>,
        mobile: Option<&str>,
        password: &str,
    ) -> Result<String, UpstreamError> {
        if password.is_empty() || (email.is_none() && mobile.is_none()) {
            return Err(UpstreamError::MissingCredentials);
        }

        let payload = if let Some(email) = email {
            json!({
                "email": email,
                "password": password,
                "device_id": "dragoman",
                "os": "android",
            })
        } else {
            json!({
                "mobile": mobile,
                "area_code": null,
                "password": password,
                "device_id": "dragoman",
                "os": "android",
            })
        };

        let response = self
            .http
            .post(self.url(LOGIN_PATH))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::LoginRejected {
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await?;
        body.pointer("/data/biz_data/user/token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or(UpstreamError::MalformedLogin)
    }

    /// Create a chat session. Any failure becomes `None`; the pipeline
    /// decides whether to rotate credentials and try again.
    pub async fn create_session(&self, token: &str) -> Option<String> {
        let body = self
            .post_json(CREATE_SESSION_PATH, token, &json!({"agent": "chat"}))
            .await?;
        body.pointer("/data/biz_data/id")
            .and_then(non_empty_string)
    }

    /// Fetch a PoW challenge for the completion endpoint. Any failure
    /// becomes `None`, same contract as `create_session`.
    pub async fn create_pow_challenge(&self, token: &str) -> Option<Challenge> {
        let body = self
            .post_json(
                CREATE_POW_PATH,
                token,
                &json!({"target_path": POW_TARGET_PATH}),
            )
            .await?;
        let challenge = body.pointer("/data/biz_data/challenge")?;
        match serde_json::from_value(challenge.clone()) {
            Ok(challenge) => Some(challenge),
            Err(e) => {
                tracing::warn!(%e, "PoW challenge had an unexpected shape");
                None
            }
        }
    }

    /// POST a JSON body and return the response body when the call
    /// succeeded both at HTTP level and at the envelope's `code` level.
    async fn post_json(&self, path: &str, token: &str, payload: &Value) -> Option<Value> {
        let result = self
            .http
            .post(self.url(path))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .bearer_auth(token)
            .json(payload)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(path, %e, "upstream request failed");
                return None;
            }
        };

        let status = response.status();
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(path, %e, "upstream response was not JSON");
                return None;
            }
        };

        if status.is_success() && body.get("code").and_then(Value::as_i64) == Some(0) {
            return Some(body);
        }

        tracing::warn!(
            path,
            status = status.as_u16(),
            code = ?body.get("code"),
            msg = ?body.get("msg"),
            "upstream call failed"
        );
        None
    }

    /// Submit a completion request and return the raw streaming response.
    ///
    /// Up to three attempts with a fixed one-second pause; a non-200 status
    /// or a transport error consumes an attempt. No credential rotation
    /// happens here.
    pub async fn submit_completion(
        &self,
        token: &str,
        pow_header: &str,
        payload: &CompletionPayload,
    ) -> Result<reqwest::Response, UpstreamError> {
        for attempt in 1..=COMPLETION_MAX_ATTEMPTS {
            let result = self
                .http
                .post(self.url(COMPLETION_PATH))
                .bearer_auth(token)
                .header("x-ds-pow-response", pow_header)
                .json(payload)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    tracing::warn!(
                        attempt,
                        status = response.status().as_u16(),
                        "completion request failed"
                    );
                }
                Err(e) => {
                    tracing::warn!(attempt, %e, "completion request errored");
                }
            }

            if attempt < COMPLETION_MAX_ATTEMPTS {
                tokio::time::sleep(COMPLETION_RETRY_PAUSE).await;
            }
        }

        Err(UpstreamError::CompletionExhausted {
            attempts: COMPLETION_MAX_ATTEMPTS,
        })
    }
}

fn non_empty_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        // Session ids have been observed as numbers on some app versions.
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Header set of the official mobile client. Authorization and the PoW
/// answer are attached per request.
fn base_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "user-agent",
        HeaderValue::from_static("DeepSeek/1.0.13 Android/35"),
    );
    headers.insert("accept", HeaderValue::from_static("application/json"));
    headers.insert("x-client-platform", HeaderValue::from_static("android"));
    headers.insert(
        "x-client-version",
        HeaderValue::from_static("1.3.0-auto-resume"),
    );
    headers.insert("x-client-locale", HeaderValue::from_static("zh_CN"));
    headers.insert("accept-charset", HeaderValue::from_static("UTF-8"));
    headers
}
