use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::{FlightsResponse, RouteQuery};

pub const DEFAULT_BASE_URL: &str = "https://api.aviationstack.com/v1/";

/// Status code the vendor documents for an invalid access key.
const VENDOR_INVALID_KEY_CODE: u16 = 101;

/// Non-blank API access key. The `Debug` impl never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessKey(String);

impl AccessKey {
    /// Returns `None` for blank keys, including a key consisting only of a
    /// pair of quotes, which is what an empty build-time property turns into.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "\"\"" {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessKey(***)")
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("API access key is not configured")]
    MissingCredential,
    #[error("API rate limit exceeded ({status})")]
    RateLimited { status: u16, body: String },
    #[error("invalid API access key ({status})")]
    InvalidCredential { status: u16, body: String },
    #[error("API error ({status}): {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("malformed API response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Maps an upstream failure onto an error kind using the status code and
    /// the vendor's error phrases.
    pub fn classify(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let lowered = body.to_lowercase();
        if status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            || lowered.contains("usage limit")
            || lowered.contains("usage_limit")
        {
            ApiError::RateLimited { status, body }
        } else if status == StatusCode::UNAUTHORIZED.as_u16()
            || status == VENDOR_INVALID_KEY_CODE
            || lowered.contains("invalid_access_key")
            || lowered.contains("invalid access key")
        {
            ApiError::InvalidCredential { status, body }
        } else {
            ApiError::Status { status, body }
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }
}

/// The aviation data source, as seen by the collector and the live tracker.
#[async_trait]
pub trait FlightApi: Send + Sync {
    /// Flights matching an IATA flight code, newest first.
    async fn flights_by_code(
        &self,
        key: &AccessKey,
        flight_iata: &str,
        limit: u32,
    ) -> Result<FlightsResponse, ApiError>;

    /// Landed flights for a route on a `YYYY-MM-DD` date.
    async fn landed_by_route(
        &self,
        key: &AccessKey,
        route: &RouteQuery,
        date: &str,
        limit: u32,
    ) -> Result<FlightsResponse, ApiError>;
}

pub struct AviationStackClient {
    client: Client,
    flights_url: String,
}

impl AviationStackClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        let flights_url = format!("{}/flights", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            flights_url,
        })
    }

    async fn get_flights(
        &self,
        key: &AccessKey,
        query: &[(&str, String)],
    ) -> Result<FlightsResponse, ApiError> {
        debug!("GET {} {:?}", self.flights_url, query);
        let res = self
            .client
            .get(&self.flights_url)
            .query(&[("access_key", key.expose())])
            .query(query)
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(ApiError::classify(status.as_u16(), body));
        }

        let response: FlightsResponse =
            serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))?;
        // The vendor occasionally reports failures inside a 200 body.
        if let Some(err) = &response.error {
            return Err(ApiError::classify(status.as_u16(), err.to_string()));
        }
        Ok(response)
    }
}

#[async_trait]
impl FlightApi for AviationStackClient {
    async fn flights_by_code(
        &self,
        key: &AccessKey,
        flight_iata: &str,
        limit: u32,
    ) -> Result<FlightsResponse, ApiError> {
        self.get_flights(
            key,
            &[
                ("flight_iata", flight_iata.to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn landed_by_route(
        &self,
        key: &AccessKey,
        route: &RouteQuery,
        date: &str,
        limit: u32,
    ) -> Result<FlightsResponse, ApiError> {
        self.get_flights(
            key,
            &[
                ("dep_iata", route.origin.clone()),
                ("arr_iata", route.destination.clone()),
                ("flight_status", "landed".to_string()),
                ("flight_date", date.to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_keys_are_absent() {
        assert!(AccessKey::parse("").is_none());
        assert!(AccessKey::parse("   ").is_none());
        assert!(AccessKey::parse("\"\"").is_none());
        assert_eq!(AccessKey::parse(" abc ").unwrap().expose(), "abc");
    }

    #[test]
    fn key_is_redacted_in_debug_output() {
        let key = AccessKey::parse("secret").unwrap();
        assert!(!format!("{key:?}").contains("secret"));
    }

    #[test]
    fn classifies_rate_limits() {
        assert!(ApiError::classify(429, "").is_rate_limited());
        assert!(ApiError::classify(
            403,
            r#"{"error":{"code":"usage_limit_reached","message":"Your monthly usage limit has been reached."}}"#
        )
        .is_rate_limited());
    }

    #[test]
    fn classifies_invalid_credentials() {
        assert!(matches!(
            ApiError::classify(401, ""),
            ApiError::InvalidCredential { status: 401, .. }
        ));
        assert!(matches!(
            ApiError::classify(101, ""),
            ApiError::InvalidCredential { .. }
        ));
        assert!(matches!(
            ApiError::classify(400, r#"{"error":{"code":"invalid_access_key"}}"#),
            ApiError::InvalidCredential { .. }
        ));
    }

    #[test]
    fn other_statuses_keep_their_body() {
        match ApiError::classify(503, "maintenance") {
            ApiError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn flights_url_joins_cleanly() {
        let client =
            AviationStackClient::new("https://api.aviationstack.com/v1/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.flights_url, "https://api.aviationstack.com/v1/flights");
    }
}
