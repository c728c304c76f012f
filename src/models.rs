use serde::{Deserialize, Serialize};
use std::fmt;

use crate::timestamp;

// Wire types for the aviationstack `/flights` endpoint. The upstream omits
// fields freely, so every leaf is optional.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlightsResponse {
    pub pagination: Option<Pagination>,
    pub data: Option<Vec<FlightData>>,
    pub error: Option<UpstreamError>,
}

/// Error object the vendor may embed in an otherwise successful response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamError {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            self.code.as_deref().unwrap_or("unknown"),
            self.message.as_deref().unwrap_or("no details")
        )
    }
}

impl FlightsResponse {
    pub fn flights(&self) -> &[FlightData] {
        self.data.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub count: Option<u32>,
    pub total: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlightData {
    pub flight_date: Option<String>,
    /// e.g. "scheduled", "active", "landed"
    pub flight_status: Option<String>,
    pub departure: Option<Endpoint>,
    pub arrival: Option<Endpoint>,
    pub airline: Option<AirlineInfo>,
    pub flight: Option<FlightInfo>,
    pub aircraft: Option<AircraftInfo>,
    pub live: Option<LiveInfo>,
}

/// Departure or arrival side of a flight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Endpoint {
    pub airport: Option<String>,
    pub timezone: Option<String>,
    pub iata: Option<String>,
    pub icao: Option<String>,
    pub terminal: Option<String>,
    pub gate: Option<String>,
    /// Minutes.
    pub delay: Option<i64>,
    pub scheduled: Option<String>,
    pub estimated: Option<String>,
    pub actual: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AirlineInfo {
    pub name: Option<String>,
    pub iata: Option<String>,
    pub icao: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlightInfo {
    pub number: Option<String>,
    pub iata: Option<String>,
    pub icao: Option<String>,
    pub codeshared: Option<CodesharedInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodesharedInfo {
    pub airline_name: Option<String>,
    pub airline_iata: Option<String>,
    pub airline_icao: Option<String>,
    pub flight_number: Option<String>,
    pub flight_iata: Option<String>,
    pub flight_icao: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AircraftInfo {
    pub registration: Option<String>,
    pub iata: Option<String>,
    pub icao: Option<String>,
    pub icao24: Option<String>,
}

/// Live position snapshot. Any sensor field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveInfo {
    pub updated: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Feet.
    pub altitude: Option<f64>,
    /// Heading in degrees.
    pub direction: Option<f64>,
    /// km/h
    pub speed_horizontal: Option<f64>,
    /// km/h
    pub speed_vertical: Option<f64>,
    pub is_ground: Option<bool>,
}

impl FlightData {
    pub fn status(&self) -> &str {
        self.flight_status.as_deref().unwrap_or("unknown")
    }

    pub fn is_active(&self) -> bool {
        self.flight_status.as_deref() == Some("active")
    }

    /// Validates this upstream entry and converts it into a storable record.
    ///
    /// Flight code, both airport codes and both scheduled times must be
    /// present, and the scheduled times must parse. Actual times fall back to
    /// the estimate and then the schedule before parsing, and may still end up
    /// empty. `fallback_date` is used when the entry carries no date of its own.
    pub fn to_record(
        &self,
        fallback_date: &str,
        recorded_at_millis: i64,
    ) -> Result<NewFlightRecord, Rejection> {
        let flight_iata = self
            .flight
            .as_ref()
            .and_then(|f| f.iata.as_deref())
            .ok_or(Rejection::MissingField("flight.iata"))?;
        let departure = self
            .departure
            .as_ref()
            .ok_or(Rejection::MissingField("departure"))?;
        let arrival = self
            .arrival
            .as_ref()
            .ok_or(Rejection::MissingField("arrival"))?;
        let origin_iata = departure
            .iata
            .as_deref()
            .ok_or(Rejection::MissingField("departure.iata"))?;
        let destination_iata = arrival
            .iata
            .as_deref()
            .ok_or(Rejection::MissingField("arrival.iata"))?;
        let scheduled_departure = departure
            .scheduled
            .as_deref()
            .ok_or(Rejection::MissingField("departure.scheduled"))?;
        let scheduled_arrival = arrival
            .scheduled
            .as_deref()
            .ok_or(Rejection::MissingField("arrival.scheduled"))?;

        let unparseable = || Rejection::UnparseableSchedule {
            flight_iata: flight_iata.to_string(),
        };
        let scheduled_departure_utc_millis =
            timestamp::parse_utc_millis(scheduled_departure).map_err(|_| unparseable())?;
        let scheduled_arrival_utc_millis =
            timestamp::parse_utc_millis(scheduled_arrival).map_err(|_| unparseable())?;

        let actual_departure_utc_millis = timestamp::normalize(timestamp::actual_or_fallback(
            departure.actual.as_deref(),
            departure.estimated.as_deref(),
            Some(scheduled_departure),
        ));
        let actual_arrival_utc_millis = timestamp::normalize(timestamp::actual_or_fallback(
            arrival.actual.as_deref(),
            arrival.estimated.as_deref(),
            Some(scheduled_arrival),
        ));

        Ok(NewFlightRecord {
            flight_iata: flight_iata.to_string(),
            origin_iata: origin_iata.to_string(),
            destination_iata: destination_iata.to_string(),
            flight_date: self
                .flight_date
                .clone()
                .unwrap_or_else(|| fallback_date.to_string()),
            scheduled_departure_utc_millis,
            actual_departure_utc_millis,
            scheduled_arrival_utc_millis,
            actual_arrival_utc_millis,
            recorded_at_millis,
        })
    }
}

/// Why an upstream entry was not turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("unparseable scheduled time for {flight_iata}")]
    UnparseableSchedule { flight_iata: String },
}

/// Origin/destination pair a history is collected for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteQuery {
    pub origin: String,
    pub destination: String,
}

impl RouteQuery {
    pub fn new(origin: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            destination: destination.into(),
        }
    }
}

impl fmt::Display for RouteQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.origin, self.destination)
    }
}

/// A record that has passed validation but has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewFlightRecord {
    pub flight_iata: String,
    pub origin_iata: String,
    pub destination_iata: String,
    /// Date as reported by the source, `YYYY-MM-DD`.
    pub flight_date: String,
    pub scheduled_departure_utc_millis: i64,
    pub actual_departure_utc_millis: Option<i64>,
    pub scheduled_arrival_utc_millis: i64,
    pub actual_arrival_utc_millis: Option<i64>,
    /// When this system captured the record.
    pub recorded_at_millis: i64,
}

/// A stored historical observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlightRecord {
    pub id: i64,
    pub flight_iata: String,
    pub origin_iata: String,
    pub destination_iata: String,
    pub flight_date: String,
    pub scheduled_departure_utc_millis: i64,
    pub actual_departure_utc_millis: Option<i64>,
    pub scheduled_arrival_utc_millis: i64,
    pub actual_arrival_utc_millis: Option<i64>,
    pub recorded_at_millis: i64,
}

impl FlightRecord {
    pub fn actual_duration_millis(&self) -> Option<i64> {
        match (self.actual_departure_utc_millis, self.actual_arrival_utc_millis) {
            (Some(dep), Some(arr)) => Some(arr - dep),
            _ => None,
        }
    }

    pub fn actual_duration_minutes(&self) -> Option<i64> {
        self.actual_duration_millis().map(|ms| ms / 60_000)
    }
}
