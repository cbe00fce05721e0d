use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::calendar::OfferedDates;
use crate::limits::COMMAND_QUEUE_CAPACITY;
use crate::model::*;
use crate::observability;
use crate::store::{bounded, BookingStore, ConnectionStatus, FeedItem, StoreError, Subscription};

use super::{SubmitOutcome, SyncError, Synchronizer, Views};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub table: String,
    /// Deadline for every store call.
    pub store_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            table: "lunch_bookings".into(),
            store_timeout: Duration::from_secs(10),
        }
    }
}

enum Command {
    Submit {
        request: SubmissionRequest,
        response: oneshot::Sender<Result<SubmitOutcome, SyncError>>,
    },
    Focus {
        date: Option<NaiveDate>,
        response: oneshot::Sender<Arc<Views>>,
    },
    ShowCalendar {
        visible: bool,
        response: oneshot::Sender<Arc<Views>>,
    },
    Reload {
        response: oneshot::Sender<usize>,
    },
    Snapshot {
        response: oneshot::Sender<Vec<Booking>>,
    },
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

/// Store calls finishing in the background, handed back to the actor.
enum Completion {
    Inserted {
        result: Result<BookingRecord, StoreError>,
        response: oneshot::Sender<Result<SubmitOutcome, SyncError>>,
    },
    Loaded {
        result: Result<Vec<BookingRecord>, StoreError>,
    },
}

/// Cloneable handle to a running synchronizer. The actor stops once every
/// handle is dropped, releasing its feed subscription.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<Command>,
    views: watch::Receiver<Arc<Views>>,
}

impl SyncHandle {
    /// Validate, insert and mirror a booking. Resolves once the store has
    /// confirmed (or refused) it.
    pub async fn submit(&self, request: SubmissionRequest) -> Result<SubmitOutcome, SyncError> {
        let (response, rx) = oneshot::channel();
        self.send(Command::Submit { request, response }).await?;
        rx.await.map_err(|_| SyncError::Closed)?
    }

    pub async fn focus(&self, date: Option<NaiveDate>) -> Result<Arc<Views>, SyncError> {
        let (response, rx) = oneshot::channel();
        self.send(Command::Focus { date, response }).await?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    pub async fn show_calendar(&self, visible: bool) -> Result<Arc<Views>, SyncError> {
        let (response, rx) = oneshot::channel();
        self.send(Command::ShowCalendar { visible, response }).await?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    /// Force a full load. Resolves with the number of mirrored bookings.
    pub async fn reload(&self) -> Result<usize, SyncError> {
        let (response, rx) = oneshot::channel();
        self.send(Command::Reload { response }).await?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    pub async fn snapshot(&self) -> Result<Vec<Booking>, SyncError> {
        let (response, rx) = oneshot::channel();
        self.send(Command::Snapshot { response }).await?;
        rx.await.map_err(|_| SyncError::Closed)
    }

    /// Stop the actor. Pending submissions still resolve, with `Closed`.
    pub async fn shutdown(&self) {
        let (response, rx) = oneshot::channel();
        if self.send(Command::Shutdown { response }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Receiver of every recomputed view set.
    pub fn views(&self) -> watch::Receiver<Arc<Views>> {
        self.views.clone()
    }

    pub fn current_views(&self) -> Arc<Views> {
        self.views.borrow().clone()
    }

    async fn send(&self, cmd: Command) -> Result<(), SyncError> {
        self.tx.send(cmd).await.map_err(|_| SyncError::Closed)
    }
}

/// Subscribe to the table's feed, perform the initial full load, and start
/// the actor. Returns once the first load has been applied.
pub async fn spawn(
    store: Arc<dyn BookingStore>,
    offered: OfferedDates,
    config: SyncConfig,
) -> SyncHandle {
    let mut sync = Synchronizer::new(offered);

    // Subscribe before loading so nothing committed in between is missed.
    let feed = match bounded("subscribe", config.store_timeout, store.subscribe(&config.table)).await {
        Ok(sub) => Some(sub),
        Err(e) => {
            warn!("no change feed for {}: {e}", config.table);
            None
        }
    };
    sync.full_load(timed_fetch(store.as_ref(), &config).await);

    let views = sync.subscribe_views();
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    tokio::spawn(run(sync, store, config, feed, rx));
    SyncHandle { tx, views }
}

async fn timed_fetch(
    store: &dyn BookingStore,
    config: &SyncConfig,
) -> Result<Vec<BookingRecord>, StoreError> {
    let started = Instant::now();
    let result = bounded("fetch_all", config.store_timeout, store.fetch_all(&config.table))
        .await
        .map_err(|e| match e {
            StoreError::Unavailable { .. } | StoreError::Load(_) => e,
            other => StoreError::Load(other.to_string()),
        });
    metrics::histogram!(observability::STORE_CALL_DURATION_SECONDS, "op" => "fetch_all")
        .record(started.elapsed().as_secs_f64());
    result
}

async fn next_feed_item(feed: &mut Option<Subscription>) -> Option<FeedItem> {
    match feed {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

/// The actor loop. Every handler runs to completion before the next message
/// is taken; store calls run in spawned tasks and come back as completions,
/// so feed events keep flowing while they are pending.
async fn run(
    mut sync: Synchronizer,
    store: Arc<dyn BookingStore>,
    config: SyncConfig,
    mut feed: Option<Subscription>,
    mut commands: mpsc::Receiver<Command>,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
    // Callers waiting for the reloads in flight.
    let mut reload_waiters: Vec<oneshot::Sender<usize>> = Vec::new();

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    None => break,
                    Some(Command::Shutdown { response }) => {
                        let _ = response.send(());
                        break;
                    }
                    Some(Command::Reload { response }) => {
                        reload_waiters.push(response);
                        start_reload(&mut sync, &store, &config, &done_tx);
                    }
                    Some(cmd) => handle_command(&mut sync, &store, &config, &done_tx, cmd),
                }
            }
            item = next_feed_item(&mut feed) => match item {
                Some(FeedItem::Change(msg)) => {
                    sync.apply(&msg);
                }
                Some(FeedItem::Status(ConnectionStatus::Connected)) => {
                    info!("change feed connected: {}", config.table);
                }
                Some(FeedItem::Status(ConnectionStatus::Lagged(n))) => {
                    warn!("change feed lagged, {n} notifications lost; reloading");
                    start_reload(&mut sync, &store, &config, &done_tx);
                }
                Some(FeedItem::Status(ConnectionStatus::Error(e))) => {
                    warn!("change feed error: {e}");
                }
                None => {
                    warn!("change feed closed: {}", config.table);
                    feed = None;
                }
            },
            Some(done) = done_rx.recv() => match done {
                Completion::Inserted { result, response } => {
                    let outcome = sync.finish_submission(result);
                    let status = match &outcome {
                        Ok(o) => o.label(),
                        Err(SyncError::Store(StoreError::Unavailable { .. })) => "unavailable",
                        Err(_) => "store_error",
                    };
                    metrics::counter!(observability::SUBMISSIONS_TOTAL, "status" => status).increment(1);
                    let _ = response.send(outcome);
                }
                Completion::Loaded { result } => {
                    sync.full_load(result);
                    if !sync.is_reloading() {
                        for waiter in reload_waiters.drain(..) {
                            let _ = waiter.send(sync.mirror().len());
                        }
                    }
                }
            },
        }
    }

    info!("synchronizer for {} stopped", config.table);
}

fn handle_command(
    sync: &mut Synchronizer,
    store: &Arc<dyn BookingStore>,
    config: &SyncConfig,
    done_tx: &mpsc::UnboundedSender<Completion>,
    cmd: Command,
) {
    match cmd {
        Command::Submit { request, response } => match sync.prepare_submission(&request) {
            Ok(booking) => {
                let store = store.clone();
                let config = config.clone();
                let done_tx = done_tx.clone();
                tokio::spawn(async move {
                    let started = Instant::now();
                    let result = bounded(
                        "insert",
                        config.store_timeout,
                        store.insert(&config.table, booking.to_new_record()),
                    )
                    .await;
                    metrics::histogram!(observability::STORE_CALL_DURATION_SECONDS, "op" => "insert")
                        .record(started.elapsed().as_secs_f64());
                    let _ = done_tx.send(Completion::Inserted { result, response });
                });
            }
            Err(e) => {
                metrics::counter!(observability::SUBMISSIONS_TOTAL, "status" => "rejected")
                    .increment(1);
                info!("submission rejected: {e}");
                let _ = response.send(Err(e));
            }
        },
        Command::Focus { date, response } => {
            let _ = response.send(sync.focus(date));
        }
        Command::ShowCalendar { visible, response } => {
            let _ = response.send(sync.show_calendar(visible));
        }
        Command::Snapshot { response } => {
            let _ = response.send(sync.mirror().snapshot().to_vec());
        }
        // Both are taken by the loop before dispatch.
        Command::Reload { .. } | Command::Shutdown { .. } => {}
    }
}

/// Fetch everything again. Fetches may overlap; reload callers are answered
/// once the last one has landed.
fn start_reload(
    sync: &mut Synchronizer,
    store: &Arc<dyn BookingStore>,
    config: &SyncConfig,
    done_tx: &mpsc::UnboundedSender<Completion>,
) {
    if sync.is_reloading() {
        debug!("reload requested while another is in flight");
    }
    sync.begin_reload();
    let store = store.clone();
    let config = config.clone();
    let done_tx = done_tx.clone();
    tokio::spawn(async move {
        let result = timed_fetch(store.as_ref(), &config).await;
        let _ = done_tx.send(Completion::Loaded { result });
    });
}
