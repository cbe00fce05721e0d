use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use almoco::calendar::OfferedDates;
use almoco::cli::{self, Command};
use almoco::config::Config;
use almoco::store::{BookingStore, LocalStore};
use almoco::sync::{self, Confirmation, SyncError, SyncHandle};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    almoco::observability::init(config.metrics_port)?;

    let store = Arc::new(match &config.data_dir {
        Some(dir) => LocalStore::open(dir.clone(), config.compact_threshold)?,
        None => LocalStore::in_memory(),
    });
    info!("almoco starting");
    info!("  table: {}", config.table);
    info!(
        "  data_dir: {}",
        config
            .data_dir
            .as_ref()
            .map_or("memory".to_string(), |d| d.display().to_string())
    );
    info!("  offered dates: {}", config.dates.len());
    info!("  store timeout: {}ms", config.store_timeout.as_millis());

    let handle = sync::spawn(
        store.clone() as Arc<dyn BookingStore>,
        config.dates.clone(),
        config.sync_config(),
    )
    .await;

    // Every recomputed view set goes to stdout as one JSON line.
    let mut views = handle.views();
    let printer = tokio::spawn(async move {
        loop {
            let current = views.borrow_and_update().clone();
            print_json(&json!({ "views": &*current }));
            if views.changed().await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("stdin: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match cli::parse_line(&line) {
                    Ok(Command::Quit) => break,
                    Ok(cmd) => run_command(cmd, &handle, &store, &config.table, &config.dates).await,
                    Err(e) => print_json(&json!({ "error": e.to_string() })),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    handle.shutdown().await;
    drop(handle);
    printer.abort();
    info!("almoco stopped");
    Ok(())
}

async fn run_command(
    cmd: Command,
    handle: &SyncHandle,
    store: &LocalStore,
    table: &str,
    offered: &OfferedDates,
) {
    let reply = match cmd {
        Command::Book(request) => match handle.submit(request).await {
            Ok(outcome) => json!({
                "status": outcome.label(),
                "booking": outcome.booking().to_record(),
                "confirmation": Confirmation::for_booking(outcome.booking(), offered).lines(),
            }),
            Err(e) => error_reply(&e),
        },
        Command::Select(date) => match handle.focus(date).await {
            Ok(views) => json!({ "banner": views.banner }),
            Err(e) => error_reply(&e),
        },
        Command::Calendar(visible) => match handle.show_calendar(visible).await {
            Ok(views) => json!({ "calendar": views.calendar }),
            Err(e) => error_reply(&e),
        },
        Command::Dates => json!({ "views": &*handle.current_views() }),
        Command::Cancel(id) => match store.delete(table, id).await {
            Ok(()) => json!({ "status": "deleted", "id": id }),
            Err(e) => json!({ "error": e.to_string() }),
        },
        Command::Rename { id, name } => {
            let current = match handle.snapshot().await {
                Ok(snapshot) => snapshot.into_iter().find(|b| b.id == id),
                Err(e) => return print_json(&error_reply(&e)),
            };
            let Some(booking) = current else {
                return print_json(&json!({ "error": format!("booking not found: {id}") }));
            };
            let mut record = booking.to_record();
            record.name = name;
            match store.update(table, record).await {
                Ok(()) => json!({ "status": "updated", "id": id }),
                Err(e) => json!({ "error": e.to_string() }),
            }
        }
        Command::Reload => match handle.reload().await {
            Ok(count) => json!({ "status": "reloaded", "bookings": count }),
            Err(e) => error_reply(&e),
        },
        Command::Help => {
            println!("{}", cli::HELP);
            return;
        }
        Command::Quit => return,
    };
    print_json(&reply);
}

fn error_reply(e: &SyncError) -> serde_json::Value {
    let kind = match e {
        SyncError::Validation(_) => "invalid",
        SyncError::Store(almoco::store::StoreError::Unavailable { .. }) => "unavailable",
        SyncError::Store(_) => "store",
        SyncError::Closed => "closed",
    };
    json!({ "error": e.to_string(), "kind": kind })
}

fn print_json(value: &serde_json::Value) {
    println!("{value}");
}
