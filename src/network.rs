//! Network collaborators: an HTTP client that fetches evaluation payloads and delivers event
//! batches.
//!
//! Both concerns sit behind traits so embedders can substitute their own plumbing (or a beacon
//! transport); [`HttpApi`] is the default implementation used when nothing is substituted.
use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::StatusCode;
use url::Url;

use crate::evaluations::DataAdapterResult;
use crate::events::Event;
use crate::sdk_metadata::{EventMetaData, SdkMetadata};
use crate::user::User;
use crate::{Error, Result};

/// Fetches the serialized evaluation payload for a user.
#[async_trait::async_trait]
pub trait EvaluationsApi: Send + Sync {
    /// Fetch evaluations for `user`, returning the raw response body.
    ///
    /// `current` carries the prior result (if any) so the service can answer with a cheap
    /// "no updates" body instead of a full payload.
    async fn fetch_evaluations(
        &self,
        user: &User,
        current: Option<&DataAdapterResult>,
    ) -> Result<String>;
}

/// Delivers event batches. The transport owns retries and timeouts for a single delivery
/// attempt; callers treat the outcome as binary.
#[async_trait::async_trait]
pub trait EventTransport: Send + Sync {
    /// Deliver a batch by HTTP POST. Returns the response status code.
    async fn post_events(&self, events: &[Event], metadata: &EventMetaData) -> Result<u16>;

    /// Whether a best-effort beacon path exists. Beacons survive page navigation where an
    /// in-flight POST may be cancelled.
    fn is_beacon_supported(&self) -> bool {
        false
    }

    /// Deliver a batch via the beacon path. The boolean is the transport's own success signal.
    async fn send_beacon(&self, events: &[Event], metadata: &EventMetaData) -> bool {
        let _ = (events, metadata);
        false
    }
}

/// Configuration for [`HttpApi`].
pub struct HttpApiConfig {
    pub base_url: String,
    pub sdk_key: String,
    pub sdk_metadata: SdkMetadata,
}

/// Default base URL for API calls.
pub const DEFAULT_BASE_URL: &str = "https://api.gatehouse.io/v1";

const EVALUATIONS_ENDPOINT: &str = "/evaluations";
const LOG_EVENT_ENDPOINT: &str = "/log_event";

/// Attempts per event-batch delivery. Failure past this count is handed back to the caller,
/// whose persistence + trigger-based retry is the real backoff mechanism.
const LOG_EVENT_ATTEMPTS: u32 = 3;

#[derive(serde::Serialize)]
struct LogEventBody<'a> {
    events: &'a [Event],
    #[serde(rename = "sdkMetadata")]
    sdk_metadata: &'a EventMetaData,
}

/// Only used to peek the prior payload's update time without a full decode.
#[derive(serde::Deserialize)]
struct PriorPayloadMarker {
    #[serde(default)]
    time: i64,
}

/// Default HTTP client for both network collaborators.
pub struct HttpApi {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    config: HttpApiConfig,
    /// If we receive a 401 Unauthorized error during a request, it means the SDK key is not
    /// valid. We cache this error so we don't issue additional requests to the server.
    unauthorized: AtomicBool,
}

impl HttpApi {
    pub fn new(config: HttpApiConfig) -> HttpApi {
        HttpApi {
            client: reqwest::Client::new(),
            config,
            unauthorized: AtomicBool::new(false),
        }
    }

    fn endpoint_url(&self, endpoint: &str, extra: &[(&str, String)]) -> Result<Url> {
        let metadata = EventMetaData::from(&self.config.sdk_metadata);
        let mut params = vec![
            ("sdkKey", self.config.sdk_key.clone()),
            ("sdkName", metadata.sdk_name.to_owned()),
            ("sdkVersion", metadata.sdk_version.to_owned()),
            ("coreVersion", metadata.core_version.to_owned()),
        ];
        params.extend(extra.iter().cloned());

        Url::parse_with_params(&format!("{}{}", self.config.base_url, endpoint), &params)
            .map_err(Error::InvalidBaseUrl)
    }
}

#[async_trait::async_trait]
impl EvaluationsApi for HttpApi {
    async fn fetch_evaluations(
        &self,
        user: &User,
        current: Option<&DataAdapterResult>,
    ) -> Result<String> {
        if self.unauthorized.load(Ordering::Acquire) {
            return Err(Error::Unauthorized);
        }

        let url = self.endpoint_url(EVALUATIONS_ENDPOINT, &[])?;

        let since_time = current
            .and_then(|result| serde_json::from_str::<PriorPayloadMarker>(&result.data).ok())
            .map(|marker| marker.time)
            .unwrap_or(0);

        log::debug!(target: "gatehouse", "fetching evaluations");
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "user": user, "sinceTime": since_time }))
            .send()
            .await?;

        let response = response.error_for_status().map_err(|err| {
            if err.status() == Some(StatusCode::UNAUTHORIZED) {
                log::warn!(target: "gatehouse", "client is not authorized. Check your SDK key");
                self.unauthorized.store(true, Ordering::Release);
                Error::Unauthorized
            } else {
                log::warn!(target: "gatehouse", "received non-200 response while fetching evaluations: {:?}", err);
                Error::from(err)
            }
        })?;

        let body = response.text().await?;

        log::debug!(target: "gatehouse", "successfully fetched evaluations");

        Ok(body)
    }
}

#[async_trait::async_trait]
impl EventTransport for HttpApi {
    async fn post_events(&self, events: &[Event], metadata: &EventMetaData) -> Result<u16> {
        let url = self.endpoint_url(
            LOG_EVENT_ENDPOINT,
            &[("k", events.len().to_string())],
        )?;

        let body = LogEventBody {
            events,
            sdk_metadata: metadata,
        };

        let mut last_error: Option<Error> = None;
        for attempt in 1..=LOG_EVENT_ATTEMPTS {
            match self.client.post(url.clone()).json(&body).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    // Server errors may be transient; client errors won't improve on retry.
                    if status < 500 {
                        return Ok(status);
                    }
                    log::debug!(target: "gatehouse", "event delivery attempt {} returned status {}", attempt, status);
                    last_error = Some(Error::DeliveryFailed(status));
                }
                Err(err) => {
                    log::debug!(target: "gatehouse", "event delivery attempt {} failed: {:?}", attempt, err);
                    last_error = Some(Error::from(err));
                }
            }
        }

        match last_error {
            Some(Error::DeliveryFailed(status)) => Ok(status),
            Some(err) => Err(err),
            // Unreachable with LOG_EVENT_ATTEMPTS >= 1.
            None => Err(Error::DeliveryFailed(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_carries_sdk_params() {
        let api = HttpApi::new(HttpApiConfig {
            base_url: DEFAULT_BASE_URL.to_owned(),
            sdk_key: "client-key".to_owned(),
            sdk_metadata: SdkMetadata {
                name: "rust",
                version: "0.1.0",
            },
        });

        let url = api
            .endpoint_url(LOG_EVENT_ENDPOINT, &[("k", "3".to_owned())])
            .unwrap();

        let query: Vec<_> = url.query_pairs().collect();
        assert!(query.iter().any(|(k, v)| k == "sdkKey" && v == "client-key"));
        assert!(query.iter().any(|(k, v)| k == "k" && v == "3"));
        assert!(url.path().ends_with("/log_event"));
    }

    #[test]
    fn invalid_base_url_is_reported() {
        let api = HttpApi::new(HttpApiConfig {
            base_url: "not a url".to_owned(),
            sdk_key: "client-key".to_owned(),
            sdk_metadata: SdkMetadata {
                name: "rust",
                version: "0.1.0",
            },
        });

        let result = api.endpoint_url(EVALUATIONS_ENDPOINT, &[]);

        assert!(matches!(result, Err(Error::InvalidBaseUrl(_))));
    }
}
