//! Scheduled collection of historical flights for one route.
//!
//! A run walks a trailing window of days ending yesterday, most recent first.
//! Dates that already hold enough records are skipped without calling the
//! API. Everything else is fetched, validated, and written as one batch per
//! date. A rate-limit response aborts the run so the scheduler can retry
//! later; any other API failure only costs that one date. Records captured
//! before the window are purged at the end.

use chrono::{Days, Local, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{AccessKey, ApiError, FlightApi};
use crate::config::Config;
use crate::db::{RecordStore, StorageError};
use crate::models::{NewFlightRecord, RouteQuery};

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct CollectionSettings {
    pub route: RouteQuery,
    pub days_to_fetch: u32,
    pub flights_per_day_target: usize,
    pub fetch_surplus: usize,
    pub pause_between_dates: Duration,
}

impl CollectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            route: config.route(),
            days_to_fetch: config.collection.days_to_fetch,
            flights_per_day_target: config.collection.flights_per_day_target,
            fetch_surplus: config.collection.fetch_surplus,
            pause_between_dates: Duration::from_millis(config.collection.pause_between_dates_ms),
        }
    }
}

/// What one run did, for logging and the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionReport {
    /// Dates that already met the target; no request was made for them.
    pub dates_complete: Vec<String>,
    pub dates_fetched: Vec<String>,
    /// Dates whose request failed with a non rate-limit error.
    pub dates_failed: Vec<String>,
    pub records_inserted: usize,
    pub records_rejected: usize,
    pub records_purged: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success(CollectionReport),
    /// Transient condition (rate limiting). Try again later.
    Retry { reason: String },
    /// Do not retry this invocation.
    Failure { reason: String },
    Cancelled,
}

enum DateOutcome {
    AlreadyComplete(usize),
    Fetched { inserted: usize, rejected: usize },
}

#[derive(Debug, thiserror::Error)]
enum DateError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct CollectionJob {
    store: RecordStore,
    api: Arc<dyn FlightApi>,
    access_key: Option<AccessKey>,
    settings: CollectionSettings,
}

impl CollectionJob {
    pub fn new(
        store: RecordStore,
        api: Arc<dyn FlightApi>,
        access_key: Option<AccessKey>,
        settings: CollectionSettings,
    ) -> Self {
        Self {
            store,
            api,
            access_key,
            settings,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> JobOutcome {
        let today = Local::now().date_naive();
        self.run_at(today, Utc::now().timestamp_millis(), cancel).await
    }

    /// Runs the collection as if the local date were `today` and the clock
    /// read `now_millis`. `now_millis` is used as the capture time of every
    /// record written by this run.
    pub async fn run_at(
        &self,
        today: NaiveDate,
        now_millis: i64,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let route = &self.settings.route;
        info!("Starting flight data collection for {route}");

        let Some(key) = &self.access_key else {
            error!("API access key missing, collection aborted");
            return JobOutcome::Failure {
                reason: ApiError::MissingCredential.to_string(),
            };
        };

        let mut report = CollectionReport::default();
        // A zero-day window would put the purge threshold at `now`.
        let days = self.settings.days_to_fetch.max(1);

        for offset in 1..=days {
            if cancel.is_cancelled() {
                info!("Collection cancelled before processing day -{offset}");
                return JobOutcome::Cancelled;
            }

            let Some(date) = today.checked_sub_days(Days::new(u64::from(offset))) else {
                break;
            };
            let date = date.format("%Y-%m-%d").to_string();

            match self.collect_date(key, &date, now_millis).await {
                Ok(DateOutcome::AlreadyComplete(existing)) => {
                    info!("Skipping {date}, already have {existing} records.");
                    report.dates_complete.push(date);
                    continue;
                }
                Ok(DateOutcome::Fetched { inserted, rejected }) => {
                    report.records_inserted += inserted;
                    report.records_rejected += rejected;
                    report.dates_fetched.push(date.clone());
                }
                Err(DateError::Api(e)) if e.is_rate_limited() => {
                    warn!("Rate limited while fetching {date}, stopping this run: {e}");
                    return JobOutcome::Retry {
                        reason: e.to_string(),
                    };
                }
                Err(DateError::Api(e)) => {
                    error!("API error fetching flights for {date}: {e}");
                    report.dates_failed.push(date.clone());
                }
                Err(DateError::Storage(e)) => {
                    error!("Storage failure while collecting {date}: {e}");
                    return JobOutcome::Failure {
                        reason: e.to_string(),
                    };
                }
            }

            if offset < days {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("Collection cancelled after {date}");
                        return JobOutcome::Cancelled;
                    }
                    _ = tokio::time::sleep(self.settings.pause_between_dates) => {}
                }
            }
        }

        let threshold = now_millis - i64::from(days) * DAY_MILLIS;
        match self
            .store
            .run_blocking(move |store| store.purge_older_than(threshold))
            .await
        {
            Ok(purged) => {
                if purged > 0 {
                    info!("Cleaned up {purged} old records.");
                }
                report.records_purged = purged;
            }
            Err(e) => {
                error!("Failed to purge old records: {e}");
                return JobOutcome::Failure {
                    reason: e.to_string(),
                };
            }
        }

        info!(
            "Flight data collection finished: {} inserted, {} rejected, {} dates failed",
            report.records_inserted,
            report.records_rejected,
            report.dates_failed.len()
        );
        JobOutcome::Success(report)
    }

    async fn collect_date(
        &self,
        key: &AccessKey,
        date: &str,
        now_millis: i64,
    ) -> Result<DateOutcome, DateError> {
        let route = &self.settings.route;
        let target = self.settings.flights_per_day_target;

        let existing = {
            let route = route.clone();
            let date = date.to_string();
            self.store
                .run_blocking(move |store| store.count_for_route_on_date(&route, &date))
                .await?
        };
        if existing >= target {
            return Ok(DateOutcome::AlreadyComplete(existing));
        }

        let limit = (target - existing + self.settings.fetch_surplus) as u32;
        info!("Fetching flights for {route} on {date} (limit {limit})");
        let response = self.api.landed_by_route(key, route, date, limit).await?;
        let flights = response.flights();
        info!("Found {} flights for {date}.", flights.len());

        let mut batch: Vec<NewFlightRecord> = Vec::new();
        let mut rejected = 0;
        for flight in flights {
            if existing + batch.len() >= target {
                break;
            }
            match flight.to_record(date, now_millis) {
                Ok(record) => batch.push(record),
                Err(reason) => {
                    debug!("Skipping flight on {date}: {reason}");
                    rejected += 1;
                }
            }
        }

        let inserted = self
            .store
            .run_blocking(move |store| store.insert_many(&batch))
            .await?;
        if inserted > 0 {
            info!("Inserted {inserted} records for {date}.");
        }
        Ok(DateOutcome::Fetched { inserted, rejected })
    }
}
