//! The store of record, seen through the three calls the synchronizer needs:
//! bulk fetch, insert, and a change subscription.

mod local;

pub use local::LocalStore;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::model::*;

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Every row of `table`. No filtering, no pagination.
    async fn fetch_all(&self, table: &str) -> Result<Vec<BookingRecord>, StoreError>;

    /// Insert and return the row as stored, with `id` and `created_at` set.
    async fn insert(&self, table: &str, record: NewRecord) -> Result<BookingRecord, StoreError>;

    /// Change notifications for `table`, at least once and in no guaranteed order.
    async fn subscribe(&self, table: &str) -> Result<Subscription, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Load(String),
    Insert(String),
    NotFound(BookingId),
    /// The call did not finish within `after`.
    Unavailable { op: &'static str, after: Duration },
    Io(String),
    LimitExceeded(&'static str),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Load(e) => write!(f, "failed to load bookings: {e}"),
            StoreError::Insert(e) => write!(f, "failed to save booking: {e}"),
            StoreError::NotFound(id) => write!(f, "booking not found: {id}"),
            StoreError::Unavailable { op, after } => {
                write!(f, "store unavailable: {op} timed out after {}ms", after.as_millis())
            }
            StoreError::Io(e) => write!(f, "store I/O error: {e}"),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Run a store call with a deadline.
pub async fn bounded<T, F>(op: &'static str, after: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(after, call)
        .await
        .map_err(|_| StoreError::Unavailable { op, after })?
}

// ── Change feed ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A raw change notification: `new` row for inserts and updates, `old` row
/// (at least its `id`) for deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedMessage {
    pub kind: ChangeKind,
    pub new: Option<Value>,
    pub old: Option<Value>,
}

impl FeedMessage {
    pub fn inserted(record: &BookingRecord) -> Self {
        Self {
            kind: ChangeKind::Insert,
            new: serde_json::to_value(record).ok(),
            old: None,
        }
    }

    pub fn updated(record: &BookingRecord, previous: &BookingRecord) -> Self {
        Self {
            kind: ChangeKind::Update,
            new: serde_json::to_value(record).ok(),
            old: serde_json::to_value(previous).ok(),
        }
    }

    pub fn deleted(previous: &BookingRecord) -> Self {
        Self {
            kind: ChangeKind::Delete,
            new: None,
            old: serde_json::to_value(previous).ok(),
        }
    }

    /// Typed view of the payload.
    pub fn decode(&self) -> Result<ChangeEvent, DecodeError> {
        match self.kind {
            ChangeKind::Insert => Ok(ChangeEvent::Inserted(decode_row(self.new.as_ref(), "new")?)),
            ChangeKind::Update => Ok(ChangeEvent::Updated(decode_row(self.new.as_ref(), "new")?)),
            ChangeKind::Delete => {
                let id = self
                    .old
                    .as_ref()
                    .and_then(|old| old.get("id"))
                    .ok_or(DecodeError::MissingPayload("old.id"))?;
                let id: BookingId = serde_json::from_value(id.clone())
                    .map_err(|e| DecodeError::Json(e.to_string()))?;
                Ok(ChangeEvent::Deleted(id))
            }
        }
    }
}

fn decode_row(payload: Option<&Value>, side: &'static str) -> Result<Booking, DecodeError> {
    let value = payload.ok_or(DecodeError::MissingPayload(side))?;
    let record: BookingRecord =
        serde_json::from_value(value.clone()).map_err(|e| DecodeError::Json(e.to_string()))?;
    Booking::try_from(record)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    /// The subscriber fell behind and `n` notifications were dropped.
    Lagged(u64),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    Status(ConnectionStatus),
    Change(FeedMessage),
}

/// A live change subscription. Dropping it unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<FeedItem>,
    greeted: bool,
}

impl Subscription {
    pub fn new(rx: broadcast::Receiver<FeedItem>) -> Self {
        Self { rx, greeted: false }
    }

    /// `Connected` first, then changes and status updates. `None` once the
    /// feed is closed. Cancel safe.
    pub async fn next(&mut self) -> Option<FeedItem> {
        if !self.greeted {
            self.greeted = true;
            return Some(FeedItem::Status(ConnectionStatus::Connected));
        }
        match self.rx.recv().await {
            Ok(item) => Some(item),
            Err(RecvError::Lagged(n)) => Some(FeedItem::Status(ConnectionStatus::Lagged(n))),
            Err(RecvError::Closed) => None,
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = FeedItem> {
        futures::stream::unfold(self, |mut sub| async move {
            let item = sub.next().await?;
            Some((item, sub))
        })
    }
}
