use serde::Serialize;
use std::io::Write;

use crate::models::FlightRecord;

#[derive(Serialize)]
struct Row<'a> {
    id: i64,
    flight_iata: &'a str,
    origin_iata: &'a str,
    destination_iata: &'a str,
    flight_date: &'a str,
    scheduled_departure_utc_millis: i64,
    actual_departure_utc_millis: Option<i64>,
    scheduled_arrival_utc_millis: i64,
    actual_arrival_utc_millis: Option<i64>,
    actual_duration_minutes: Option<i64>,
    recorded_at_millis: i64,
}

impl<'a> From<&'a FlightRecord> for Row<'a> {
    fn from(r: &'a FlightRecord) -> Self {
        Self {
            id: r.id,
            flight_iata: &r.flight_iata,
            origin_iata: &r.origin_iata,
            destination_iata: &r.destination_iata,
            flight_date: &r.flight_date,
            scheduled_departure_utc_millis: r.scheduled_departure_utc_millis,
            actual_departure_utc_millis: r.actual_departure_utc_millis,
            scheduled_arrival_utc_millis: r.scheduled_arrival_utc_millis,
            actual_arrival_utc_millis: r.actual_arrival_utc_millis,
            actual_duration_minutes: r.actual_duration_minutes(),
            recorded_at_millis: r.recorded_at_millis,
        }
    }
}

/// Writes records as CSV with a header row. Missing times are empty cells.
pub fn write_csv<W: Write>(writer: W, records: &[FlightRecord]) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(Row::from(record))?;
    }
    wtr.flush()?;
    Ok(())
}
