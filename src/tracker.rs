//! Live position tracking for a single flight.
//!
//! [`LiveTracker::start`] spawns a polling session that asks the API for the
//! flight once per interval and publishes each result through a
//! [`tokio::sync::watch`] channel. Any failure, including a flight that is
//! found but carries no telemetry, ends the session. Stopping is idempotent
//! and no request is issued once cancellation has been observed.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{AccessKey, ApiError, FlightApi};
use crate::config::Config;
use crate::models::{FlightData, LiveInfo};

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("please enter a flight number")]
    BlankFlightCode,
    #[error("no flight data found for '{flight}'")]
    NotFound { flight: String },
    #[error("flight '{flight}' found (status: {status}), but no live data is currently available")]
    NoLiveData { flight: String, status: String },
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Coarse classification shown to whoever watches a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NotFound,
    NoLiveData,
    RateLimited,
    InvalidCredential,
    MissingCredential,
    Network,
    Other,
}

impl TrackError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TrackError::BlankFlightCode => FailureKind::Other,
            TrackError::NotFound { .. } => FailureKind::NotFound,
            TrackError::NoLiveData { .. } => FailureKind::NoLiveData,
            TrackError::Api(api) => match api {
                ApiError::MissingCredential => FailureKind::MissingCredential,
                ApiError::RateLimited { .. } => FailureKind::RateLimited,
                ApiError::InvalidCredential { .. } => FailureKind::InvalidCredential,
                ApiError::Network(_) => FailureKind::Network,
                ApiError::Status { .. } | ApiError::Decode(_) => FailureKind::Other,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerState {
    Loading,
    Live { flight: String, info: LiveInfo },
    Failed { kind: FailureKind, message: String },
}

/// Trims and upper-cases user input; `None` if nothing is left.
pub fn normalize_flight_code(input: &str) -> Option<String> {
    let code = input.trim().to_uppercase();
    (!code.is_empty()).then_some(code)
}

/// Prefers an active flight with telemetry, then any flight with telemetry.
pub fn select_live(flights: &[FlightData]) -> Option<&FlightData> {
    flights
        .iter()
        .find(|f| f.is_active() && f.live.is_some())
        .or_else(|| flights.iter().find(|f| f.live.is_some()))
}

#[derive(Clone)]
pub struct LiveTracker {
    api: Arc<dyn FlightApi>,
    access_key: Option<AccessKey>,
    poll_interval: Duration,
    lookup_limit: u32,
}

impl LiveTracker {
    pub fn new(
        api: Arc<dyn FlightApi>,
        access_key: Option<AccessKey>,
        poll_interval: Duration,
        lookup_limit: u32,
    ) -> Self {
        Self {
            api,
            access_key,
            poll_interval,
            lookup_limit,
        }
    }

    pub fn from_config(api: Arc<dyn FlightApi>, config: &Config) -> Self {
        Self::new(
            api,
            config.access_key(),
            Duration::from_secs(config.tracker.poll_interval_seconds),
            config.tracker.lookup_limit,
        )
    }

    /// One lookup: the live snapshot for `flight`, or why there is none.
    pub async fn fetch_live(&self, flight: &str) -> Result<LiveInfo, TrackError> {
        let key = self.access_key.as_ref().ok_or(ApiError::MissingCredential)?;
        let response = self
            .api
            .flights_by_code(key, flight, self.lookup_limit)
            .await?;
        let flights = response.flights();

        let Some(first) = flights.first() else {
            return Err(TrackError::NotFound {
                flight: flight.to_string(),
            });
        };

        match select_live(flights).and_then(|f| f.live.clone()) {
            Some(live) => Ok(live),
            None => Err(TrackError::NoLiveData {
                flight: flight.to_string(),
                status: first.status().to_string(),
            }),
        }
    }

    /// Starts polling `input` until a lookup fails or the session is stopped.
    pub fn start(&self, input: &str) -> Result<TrackingSession, TrackError> {
        let flight = normalize_flight_code(input).ok_or(TrackError::BlankFlightCode)?;
        let (state_tx, state_rx) = watch::channel(TrackerState::Loading);
        let cancel = CancellationToken::new();

        let tracker = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            tracker.poll(flight, state_tx, token).await;
        });

        Ok(TrackingSession {
            cancel,
            handle: Some(handle),
            state: state_rx,
        })
    }

    async fn poll(
        &self,
        flight: String,
        state: watch::Sender<TrackerState>,
        cancel: CancellationToken,
    ) {
        info!("Tracking {flight}");
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.fetch_live(&flight) => result,
            };

            match result {
                Ok(info) => {
                    debug!("Live update for {flight}: {info:?}");
                    state.send_replace(TrackerState::Live {
                        flight: flight.clone(),
                        info,
                    });
                }
                Err(e) => {
                    warn!("Tracking {flight} stopped: {e}");
                    state.send_replace(TrackerState::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    break;
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("Tracking {flight} finished");
    }
}

/// Handle to a running poll loop. Dropping it cancels the loop.
pub struct TrackingSession {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    state: watch::Receiver<TrackerState>,
}

impl TrackingSession {
    pub fn state(&self) -> TrackerState {
        self.state.borrow().clone()
    }

    /// Receiver that is notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<TrackerState> {
        self.state.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits until the loop has exited, either on its own or after `stop`.
    pub async fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Tracking task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlightsResponse, RouteQuery};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct QueuedApi {
        responses: Mutex<VecDeque<Result<FlightsResponse, ApiError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl QueuedApi {
        fn with(responses: Vec<Result<FlightsResponse, ApiError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::default(),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl FlightApi for QueuedApi {
        async fn flights_by_code(
            &self,
            _key: &AccessKey,
            flight_iata: &str,
            _limit: u32,
        ) -> Result<FlightsResponse, ApiError> {
            self.calls.lock().unwrap().push(flight_iata.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(FlightsResponse::default()))
        }

        async fn landed_by_route(
            &self,
            _key: &AccessKey,
            _route: &RouteQuery,
            _date: &str,
            _limit: u32,
        ) -> Result<FlightsResponse, ApiError> {
            unreachable!("tracker never queries routes")
        }
    }

    fn entry(status: &str, latitude: Option<f64>) -> FlightData {
        FlightData {
            flight_status: Some(status.to_string()),
            live: latitude.map(|lat| LiveInfo {
                latitude: Some(lat),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn response(entries: Vec<FlightData>) -> Result<FlightsResponse, ApiError> {
        Ok(FlightsResponse {
            data: Some(entries),
            ..Default::default()
        })
    }

    fn tracker(api: Arc<QueuedApi>) -> LiveTracker {
        LiveTracker::new(api, AccessKey::parse("k"), Duration::from_secs(60), 5)
    }

    #[test]
    fn prefers_active_entry_with_telemetry() {
        let flights = vec![entry("scheduled", None), entry("active", Some(28.5))];
        let chosen = select_live(&flights).unwrap();
        assert_eq!(chosen.status(), "active");
        assert_eq!(chosen.live.as_ref().unwrap().latitude, Some(28.5));
    }

    #[test]
    fn falls_back_to_any_entry_with_telemetry() {
        let flights = vec![
            entry("active", None),
            entry("landed", Some(19.0)),
            entry("scheduled", None),
        ];
        assert_eq!(select_live(&flights).unwrap().status(), "landed");
        assert!(select_live(&[entry("active", None)]).is_none());
    }

    #[test]
    fn normalizes_user_input() {
        assert_eq!(normalize_flight_code("  6e201 "), Some("6E201".to_string()));
        assert_eq!(normalize_flight_code("   "), None);
    }

    #[test_log::test(tokio::test)]
    async fn empty_response_is_not_found() {
        let api = QueuedApi::with(vec![response(vec![])]);
        let err = tracker(api).fetch_live("AI101").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotFound);
    }

    #[test_log::test(tokio::test)]
    async fn entries_without_telemetry_report_first_status() {
        let api = QueuedApi::with(vec![response(vec![
            entry("scheduled", None),
            entry("landed", None),
        ])]);
        match tracker(api).fetch_live("AI101").await {
            Err(TrackError::NoLiveData { status, .. }) => assert_eq!(status, "scheduled"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn missing_key_fails_before_calling() {
        let api = QueuedApi::with(vec![]);
        let tracker = LiveTracker::new(api.clone(), None, Duration::from_secs(60), 5);
        let err = tracker.fetch_live("AI101").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::MissingCredential);
        assert_eq!(api.call_count(), 0);
    }

    #[test]
    fn classifies_api_failures() {
        let rate = TrackError::from(ApiError::classify(429, ""));
        assert_eq!(rate.kind(), FailureKind::RateLimited);
        let key = TrackError::from(ApiError::classify(401, ""));
        assert_eq!(key.kind(), FailureKind::InvalidCredential);
        let other = TrackError::from(ApiError::classify(502, "bad gateway"));
        assert_eq!(other.kind(), FailureKind::Other);
    }

    #[test_log::test(tokio::test)]
    async fn blank_input_does_not_start_a_session() {
        let api = QueuedApi::with(vec![]);
        assert!(matches!(
            tracker(api.clone()).start("  "),
            Err(TrackError::BlankFlightCode)
        ));
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_interval_until_telemetry_disappears() {
        let api = QueuedApi::with(vec![
            response(vec![entry("active", Some(1.0))]),
            response(vec![entry("active", Some(2.0))]),
            response(vec![entry("landed", None)]),
        ]);
        let started = tokio::time::Instant::now();
        let mut session = tracker(api.clone()).start("ai101").unwrap();
        session.wait().await;

        assert_eq!(api.call_count(), 3);
        assert!(api.calls.lock().unwrap().iter().all(|c| c == "AI101"));
        assert!(started.elapsed() >= Duration::from_secs(120));
        match session.state() {
            TrackerState::Failed { kind, .. } => assert_eq!(kind, FailureKind::NoLiveData),
            other => panic!("unexpected {other:?}"),
        }
        assert!(session.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_halts_requests() {
        let api = QueuedApi::with(vec![
            response(vec![entry("active", Some(1.0))]),
            response(vec![entry("active", Some(2.0))]),
        ]);
        let mut session = tracker(api.clone()).start("AI101").unwrap();
        let mut updates = session.subscribe();
        updates.changed().await.unwrap();
        assert!(matches!(
            &*updates.borrow(),
            TrackerState::Live { info, .. } if info.latitude == Some(1.0)
        ));

        session.stop();
        session.stop();
        session.wait().await;
        session.stop();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(api.call_count(), 1);
        assert!(session.is_finished());
    }
}
