use std::fmt;
use tracing::info;

use crate::db::{RecordStore, StorageError};
use crate::models::RouteQuery;

const MILLIS_PER_MINUTE: f64 = 60_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AverageDuration {
    Minutes { average: f64, samples: usize },
    /// No record on the route has both actual times.
    InsufficientData,
}

impl AverageDuration {
    pub fn minutes(&self) -> Option<f64> {
        match self {
            AverageDuration::Minutes { average, .. } => Some(*average),
            AverageDuration::InsufficientData => None,
        }
    }
}

impl fmt::Display for AverageDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AverageDuration::Minutes { average, samples } => {
                write!(f, "{average:.2} minutes ({samples} flights)")
            }
            AverageDuration::InsufficientData => f.write_str("insufficient data"),
        }
    }
}

pub struct AggregationService {
    store: RecordStore,
}

impl AggregationService {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    /// Arithmetic mean of actual arrival minus actual departure across every
    /// valid record on the route.
    pub fn average_duration_minutes(
        &self,
        route: &RouteQuery,
    ) -> Result<AverageDuration, StorageError> {
        let records = self.store.valid_records_for_aggregation(route)?;
        let durations: Vec<i64> = records
            .iter()
            .filter_map(|r| r.actual_duration_millis())
            .collect();

        if durations.is_empty() {
            info!("No valid records for {route} to calculate average.");
            return Ok(AverageDuration::InsufficientData);
        }

        let total: i64 = durations.iter().sum();
        let average = total as f64 / durations.len() as f64 / MILLIS_PER_MINUTE;
        info!(
            "Average duration for {route}: {average:.2} minutes from {} records",
            durations.len()
        );
        Ok(AverageDuration::Minutes {
            average,
            samples: durations.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::record;

    fn route() -> RouteQuery {
        RouteQuery::new("DEL", "BOM")
    }

    fn minutes(m: i64) -> Option<(i64, i64)> {
        Some((1_000_000, 1_000_000 + m * 60_000))
    }

    #[test]
    fn empty_route_is_insufficient_data() {
        let store = RecordStore::open_in_memory().unwrap();
        let service = AggregationService::new(store.clone());
        let result = service.average_duration_minutes(&route()).unwrap();
        assert_eq!(result, AverageDuration::InsufficientData);
        assert_eq!(result.minutes(), None);
    }

    #[test]
    fn only_partial_records_is_insufficient_data() {
        let store = RecordStore::open_in_memory().unwrap();
        store.insert(&record("SG160", "2025-04-08", None, 0)).unwrap();
        let service = AggregationService::new(store);
        assert_eq!(
            service.average_duration_minutes(&route()).unwrap(),
            AverageDuration::InsufficientData
        );
    }

    #[test]
    fn straight_mean_ignores_incomplete_records() {
        let store = RecordStore::open_in_memory().unwrap();
        store
            .insert_many(&[
                record("6E201", "2025-04-08", minutes(105), 0),
                record("AI887", "2025-04-08", minutes(95), 0),
                record("UK951", "2025-04-08", minutes(110), 0),
            ])
            .unwrap();
        let service = AggregationService::new(store.clone());
        let before = service.average_duration_minutes(&route()).unwrap();

        let mut partial = record("SG160", "2025-04-08", minutes(120), 0);
        partial.actual_arrival_utc_millis = None;
        store.insert(&partial).unwrap();
        let after = service.average_duration_minutes(&route()).unwrap();

        let average = after.minutes().unwrap();
        assert!((average - 103.33).abs() < 0.01, "got {average}");
        assert_eq!(before, after);
        assert!(matches!(after, AverageDuration::Minutes { samples: 3, .. }));
    }

    #[test]
    fn other_routes_do_not_contribute() {
        let store = RecordStore::open_in_memory().unwrap();
        let mut elsewhere = record("XX1", "2025-04-08", minutes(500), 0);
        elsewhere.origin_iata = "BLR".into();
        store
            .insert_many(&[elsewhere, record("6E201", "2025-04-08", minutes(100), 0)])
            .unwrap();
        let service = AggregationService::new(store);
        assert_eq!(
            service.average_duration_minutes(&route()).unwrap().minutes(),
            Some(100.0)
        );
    }

    #[test]
    fn displays_two_decimals() {
        let value = AverageDuration::Minutes {
            average: 103.333,
            samples: 3,
        };
        assert_eq!(value.to_string(), "103.33 minutes (3 flights)");
        assert_eq!(AverageDuration::InsufficientData.to_string(), "insufficient data");
    }
}
