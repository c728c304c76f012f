use chrono::{Days, NaiveDate, TimeZone, Utc};
use tracing::info;

use crate::db::{RecordStore, StorageError};
use crate::models::{NewFlightRecord, RouteQuery};

/// Seeds `route` with a handful of known flights dated the day before
/// `today`, unless that date already has records.
/// Returns how many records were inserted.
pub fn seed_sample_data_if_needed(
    store: &RecordStore,
    route: &RouteQuery,
    today: NaiveDate,
    now_millis: i64,
) -> Result<usize, StorageError> {
    let Some(yesterday) = today.checked_sub_days(Days::new(1)) else {
        return Ok(0);
    };
    let date = yesterday.format("%Y-%m-%d").to_string();

    if store.count_for_route_on_date(route, &date)? > 0 {
        info!("Sample flight data already exists, skipping seed.");
        return Ok(0);
    }

    info!("Seeding database with sample {route} flight data...");
    let records = sample_records(route, &date, yesterday, now_millis);
    let inserted = store.insert_many(&records)?;
    info!("Sample flight data seeded.");
    Ok(inserted)
}

fn sample_records(
    route: &RouteQuery,
    date: &str,
    day: NaiveDate,
    now_millis: i64,
) -> Vec<NewFlightRecord> {
    let at = |hour: u32, minute: u32| -> i64 {
        day.and_hms_opt(hour, minute, 0)
            .map(|dt| Utc.from_utc_datetime(&dt).timestamp_millis())
            .unwrap_or_default()
    };
    let record = |flight: &str,
                  sched_dep: i64,
                  act_dep: i64,
                  sched_arr: i64,
                  act_arr: Option<i64>| NewFlightRecord {
        flight_iata: flight.to_string(),
        origin_iata: route.origin.clone(),
        destination_iata: route.destination.clone(),
        flight_date: date.to_string(),
        scheduled_departure_utc_millis: sched_dep,
        actual_departure_utc_millis: Some(act_dep),
        scheduled_arrival_utc_millis: sched_arr,
        actual_arrival_utc_millis: act_arr,
        recorded_at_millis: now_millis,
    };

    vec![
        // 105 min
        record("6E201", at(6, 0), at(6, 10), at(7, 45), Some(at(7, 55))),
        // 95 min
        record("AI887", at(8, 0), at(8, 5), at(9, 45), Some(at(9, 40))),
        // 110 min
        record("UK951", at(10, 0), at(10, 15), at(11, 50), Some(at(12, 5))),
        // still missing its arrival, so averages skip it
        record("SG160", at(14, 0), at(14, 5), at(15, 55), None),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::AggregationService;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 9).unwrap()
    }

    #[test]
    fn seeds_once() {
        let store = RecordStore::open_in_memory().unwrap();
        let route = RouteQuery::new("DEL", "BOM");

        assert_eq!(seed_sample_data_if_needed(&store, &route, today(), 0).unwrap(), 4);
        assert_eq!(seed_sample_data_if_needed(&store, &route, today(), 0).unwrap(), 0);
        assert_eq!(store.count_for_route_on_date(&route, "2025-04-08").unwrap(), 4);
    }

    #[test]
    fn seeded_route_averages_three_flights() {
        let store = RecordStore::open_in_memory().unwrap();
        let route = RouteQuery::new("DEL", "BOM");
        seed_sample_data_if_needed(&store, &route, today(), 0).unwrap();

        let average = AggregationService::new(store)
            .average_duration_minutes(&route)
            .unwrap()
            .minutes()
            .unwrap();
        assert!((average - 103.33).abs() < 0.01, "got {average}");
    }
}
