//! Flight route history and live tracking on top of the aviationstack API.
//!
//! The core is the collection pipeline: [`collector::CollectionJob`] fetches
//! landed flights for a route over a trailing window, [`db::RecordStore`]
//! keeps them, and [`aggregation::AggregationService`] derives the average
//! flight duration. [`tracker::LiveTracker`] follows a single flight's live
//! position, and [`scheduler::Scheduler`] runs the collection daily.

pub mod aggregation;
pub mod api;
pub mod collector;
pub mod config;
pub mod db;
pub mod export;
pub mod logging;
pub mod models;
pub mod scheduler;
pub mod seed;
pub mod timestamp;
pub mod tracker;
