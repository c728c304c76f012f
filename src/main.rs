use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use route_tracker::{
    aggregation::AggregationService,
    api::{AviationStackClient, FlightApi},
    collector::{CollectionJob, CollectionSettings, JobOutcome},
    config::Config,
    db::RecordStore,
    export, logging,
    models::FlightRecord,
    scheduler::{PeriodicPolicy, Scheduler, TcpProbe, COLLECTION_TASK},
    seed,
    tracker::{LiveTracker, TrackerState},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "route-tracker", version, about = "Flight route history and live tracking")]
struct Cli {
    /// Path to the TOML config file; created with defaults if missing.
    #[arg(long, short, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one collection pass for the configured route.
    Collect,
    /// Print the average flight duration for the configured route.
    Average,
    /// List stored flights for the configured route.
    History {
        /// List every stored record, newest capture first, across all routes.
        #[arg(long)]
        all: bool,
    },
    /// Follow a flight's live position until it lands or Ctrl-C.
    Track { flight: String },
    /// Insert sample history if the route has none for yesterday.
    Seed,
    /// Write the route history to a CSV file.
    Export { path: PathBuf },
    /// Schedule the daily collection and keep running until Ctrl-C.
    Daemon,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    let _log_guard = logging::initialize_logging(&config.logging.directory);

    // Everything is constructed once here and handed to the components.
    let store = RecordStore::open(&config.storage.database_path)?;
    let api: Arc<dyn FlightApi> =
        Arc::new(AviationStackClient::new(&config.api.base_url, config.api_timeout())?);
    let route = config.route();

    match cli.command {
        Command::Collect => {
            let job = collection_job(&config, &store, api);
            let cancel = CancellationToken::new();
            let outcome = tokio::select! {
                outcome = job.run(&cancel) => outcome,
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    JobOutcome::Cancelled
                }
            };
            match outcome {
                JobOutcome::Success(report) => {
                    println!(
                        "Collected {} new records ({} rejected, {} dates failed, {} purged)",
                        report.records_inserted,
                        report.records_rejected,
                        report.dates_failed.len(),
                        report.records_purged
                    );
                }
                JobOutcome::Retry { reason } => return Err(eyre!("rate limited, retry later: {reason}")),
                JobOutcome::Failure { reason } => return Err(eyre!("collection failed: {reason}")),
                JobOutcome::Cancelled => println!("Collection cancelled"),
            }
        }
        Command::Average => {
            let average = AggregationService::new(store).average_duration_minutes(&route)?;
            println!("Average duration {route}: {average}");
        }
        Command::History { all } => {
            let records = if all {
                store.all_records()?
            } else {
                store.records_for_route(&route)?
            };
            for record in &records {
                print_record(record);
            }
        }
        Command::Track { flight } => {
            let tracker = LiveTracker::from_config(api, &config);
            let mut session = tracker.start(&flight)?;
            let mut updates = session.subscribe();
            print_state(&updates.borrow_and_update());
            loop {
                let changed = tokio::select! {
                    changed = updates.changed() => changed.is_ok(),
                    _ = tokio::signal::ctrl_c() => {
                        session.stop();
                        false
                    }
                };
                if !changed {
                    break;
                }
                print_state(&updates.borrow_and_update());
            }
            session.wait().await;
        }
        Command::Seed => {
            let inserted = seed::seed_sample_data_if_needed(
                &store,
                &route,
                Local::now().date_naive(),
                Utc::now().timestamp_millis(),
            )?;
            println!("Seeded {inserted} sample records");
        }
        Command::Export { path } => {
            let records = store.records_for_route(&route)?;
            let file = std::fs::File::create(&path)?;
            export::write_csv(file, &records)?;
            println!("Wrote {} records to {}", records.len(), path.display());
        }
        Command::Daemon => {
            let job = Arc::new(collection_job(&config, &store, api));
            let probe = Arc::new(TcpProbe::new(
                config.schedule.connectivity_probe.clone(),
                Duration::from_secs(5),
            ));
            let scheduler = Scheduler::new();
            scheduler.enqueue_unique_periodic(
                COLLECTION_TASK,
                PeriodicPolicy::from_config(&config.schedule),
                job,
                probe,
            );
            info!("Daemon running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            scheduler.shutdown().await;
        }
    }

    Ok(())
}

fn collection_job(config: &Config, store: &RecordStore, api: Arc<dyn FlightApi>) -> CollectionJob {
    CollectionJob::new(
        store.clone(),
        api,
        config.access_key(),
        CollectionSettings::from_config(config),
    )
}

fn print_record(record: &FlightRecord) {
    let duration = record
        .actual_duration_minutes()
        .map(|m| format!("{m} min"))
        .unwrap_or_else(|| "n/a".to_string());
    println!(
        "{}  {:<8} {} -> {}  {}",
        record.flight_date, record.flight_iata, record.origin_iata, record.destination_iata, duration
    );
}

fn print_state(state: &TrackerState) {
    match state {
        TrackerState::Loading => println!("Loading..."),
        TrackerState::Live { flight, info } => {
            let fmt = |v: Option<f64>| v.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".into());
            println!(
                "{flight}: lat {} lon {} alt {} hdg {} spd {} vs {} ground {} (updated {})",
                fmt(info.latitude),
                fmt(info.longitude),
                fmt(info.altitude),
                fmt(info.direction),
                fmt(info.speed_horizontal),
                fmt(info.speed_vertical),
                info.is_ground.map_or("-".to_string(), |g| g.to_string()),
                info.updated.as_deref().unwrap_or("-")
            );
        }
        TrackerState::Failed { kind, message } => println!("Stopped ({kind:?}): {message}"),
    }
}
