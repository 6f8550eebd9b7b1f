//! HTTP transport for the sync service.

use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{PushResponse, RemoteResult, RemoteSetting, RemoteSyncClient, SettingPush};
use crate::config::SyncConfig;
use crate::error::{Error, RemoteError, Result};
use crate::models::{ChatListDelta, Timestamp, UserId};
use crate::util::compact_text;

/// `RemoteSyncClient` speaking JSON over HTTP
#[derive(Clone)]
pub struct HttpRemoteSyncClient {
    base_url: Url,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteSyncClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteSyncClient")
            .field("base_url", &self.base_url.as_str())
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl HttpRemoteSyncClient {
    /// Build a client from configuration; requires `base_url`
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| Error::Config("base_url is required for remote sync".into()))?;
        let base_url = Url::parse(base_url)
            .map_err(|error| Error::Config(format!("invalid base_url: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config("base_url cannot be used as a base".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            base_url,
            auth_token: config.auth_token.clone(),
            client,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::Unknown("base URL cannot have path segments".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header(ACCEPT, "application/json");
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> RemoteResult<T> {
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &headers, &body));
        }

        response.json::<T>().await.map_err(map_transport_error)
    }
}

impl RemoteSyncClient for HttpRemoteSyncClient {
    async fn fetch_chat_deltas(&self, since: Option<Timestamp>) -> RemoteResult<ChatListDelta> {
        let mut url = self.endpoint(&["v1", "chats", "deltas"])?;
        if let Some(since) = since {
            url.query_pairs_mut()
                .append_pair("since", &since.as_millis().to_string());
        }
        self.get_json(url).await
    }

    async fn fetch_settings(&self, user_id: UserId) -> RemoteResult<Vec<RemoteSetting>> {
        let user_id = user_id.as_str();
        let url = self.endpoint(&["v1", "users", user_id.as_str(), "settings"])?;
        let body: SettingsBody = self.get_json(url).await?;
        Ok(body.settings)
    }

    async fn push_setting(&self, push: SettingPush) -> RemoteResult<PushResponse> {
        let user_id = push.user_id.as_str();
        let url = self.endpoint(&["v1", "users", user_id.as_str(), "settings", push.key.as_str()])?;
        let body = PushRequest {
            value: &push.value,
            client_version: push.client_version,
            last_known_server_version: push.last_known_server_version,
            modified_at: push.modified_at,
        };

        let response = self
            .authorize(self.client.put(url))
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            let conflict = response
                .json::<ConflictBody>()
                .await
                .map_err(map_transport_error)?;
            return Ok(PushResponse::Conflict {
                server_value: conflict.server_value,
                server_version: conflict.server_version,
                server_modified_at: conflict.server_modified_at,
            });
        }
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &headers, &body));
        }

        let accepted = response
            .json::<AcceptedBody>()
            .await
            .map_err(map_transport_error)?;
        Ok(PushResponse::Accepted {
            server_version: accepted.server_version,
        })
    }
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    value: &'a str,
    client_version: i64,
    last_known_server_version: i64,
    modified_at: Timestamp,
}

#[derive(Debug, Deserialize)]
struct SettingsBody {
    #[serde(default)]
    settings: Vec<RemoteSetting>,
}

#[derive(Debug, Deserialize)]
struct AcceptedBody {
    server_version: i64,
}

#[derive(Debug, Deserialize)]
struct ConflictBody {
    server_value: String,
    server_version: i64,
    server_modified_at: Timestamp,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn map_transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_connect() || error.is_timeout() {
        RemoteError::ServerUnreachable
    } else if error.is_decode() {
        tracing::warn!(%error, "Undecodable sync response");
        RemoteError::ServerError
    } else {
        RemoteError::Unknown(error.to_string())
    }
}

/// Map a non-success status onto the remote error taxonomy
fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimitExceeded(retry_after(headers)),
        status if status.is_server_error() => RemoteError::ServerError,
        status => RemoteError::Unknown(parse_api_error(status, body)),
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn client(base: &str) -> HttpRemoteSyncClient {
        HttpRemoteSyncClient::new(&SyncConfig::new(base).with_auth_token("secret")).unwrap()
    }

    #[test]
    fn new_requires_base_url() {
        assert!(matches!(
            HttpRemoteSyncClient::new(&SyncConfig::default()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn endpoint_appends_segments_and_escapes_keys() {
        let client = client("https://sync.example.com/api/");
        let url = client
            .endpoint(&["v1", "users", "u1", "settings", "ui language"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://sync.example.com/api/v1/users/u1/settings/ui%20language"
        );
    }

    #[test]
    fn status_codes_map_to_taxonomy() {
        let empty = HeaderMap::new();
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, &empty, ""),
            RemoteError::Unauthorized
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, &empty, ""),
            RemoteError::Unauthorized
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY, &empty, ""),
            RemoteError::ServerError
        );

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, &headers, ""),
            RemoteError::RateLimitExceeded(Some(Duration::from_secs(30)))
        );
        assert_eq!(
            classify_status(
                StatusCode::BAD_REQUEST,
                &empty,
                r#"{"message": "key too long"}"#
            ),
            RemoteError::Unknown("key too long (400)".into())
        );
    }

    #[test]
    fn debug_redacts_auth_token() {
        let debug = format!("{:?}", client("https://sync.example.com"));
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn settings_body_tolerates_missing_list() {
        let body: SettingsBody = serde_json::from_str("{}").unwrap();
        assert!(body.settings.is_empty());

        let body: SettingsBody = serde_json::from_str(
            r#"{"settings":[{"key":"ui_language","value":"German","server_version":4}]}"#,
        )
        .unwrap();
        assert_eq!(
            body.settings,
            vec![RemoteSetting {
                key: crate::models::SettingKey::ui_language(),
                value: "German".into(),
                server_version: 4,
            }]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_server_maps_to_server_unreachable() {
        // Port 9 (discard) on localhost is closed in test environments
        let client = client("http://127.0.0.1:9");
        let result = client.fetch_chat_deltas(None).await;
        assert_eq!(result, Err(RemoteError::ServerUnreachable));
    }
}
