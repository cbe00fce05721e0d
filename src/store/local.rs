use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::{Wal, WalEntry};

use super::{BookingStore, FeedItem, FeedMessage, StoreError, Subscription};

struct Table {
    rows: Vec<BookingRecord>,
    wal: Option<Wal>,
}

/// Reference store: tables held in memory, each optionally backed by its
/// own WAL file, with a broadcast change feed per table.
///
/// Rows are never validated against the booking rules; like any store of
/// record it keeps whatever it is given.
pub struct LocalStore {
    tables: DashMap<String, Arc<Mutex<Table>>>,
    data_dir: Option<PathBuf>,
    compact_threshold: u64,
    notify: NotifyHub,
}

impl LocalStore {
    /// Store with no persistence.
    pub fn in_memory() -> Self {
        Self {
            tables: DashMap::new(),
            data_dir: None,
            compact_threshold: u64::MAX,
            notify: NotifyHub::new(),
        }
    }

    /// Store persisting each table to `<data_dir>/<table>.wal`. Tables are
    /// opened (and their logs replayed) on first use.
    pub fn open(data_dir: PathBuf, compact_threshold: u64) -> std::io::Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            tables: DashMap::new(),
            data_dir: Some(data_dir),
            compact_threshold: compact_threshold.max(1),
            notify: NotifyHub::new(),
        })
    }

    fn table(&self, name: &str) -> Result<Arc<Mutex<Table>>, StoreError> {
        if let Some(table) = self.tables.get(name) {
            return Ok(table.value().clone());
        }
        if name.len() > MAX_TABLE_NAME_LEN {
            return Err(StoreError::LimitExceeded("table name too long"));
        }
        if self.tables.len() >= MAX_TABLES {
            return Err(StoreError::LimitExceeded("too many tables"));
        }

        // Table names become file names
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
            return Err(StoreError::LimitExceeded("invalid table name"));
        }

        let entry = self
            .tables
            .entry(name.to_string())
            .or_try_insert_with(|| self.open_table(name))?;
        Ok(entry.value().clone())
    }

    fn open_table(&self, name: &str) -> Result<Arc<Mutex<Table>>, StoreError> {
        let table = match &self.data_dir {
            Some(dir) => {
                let path = dir.join(format!("{name}.wal"));
                let (wal, rows) = Wal::recover(&path).map_err(|e| StoreError::Io(e.to_string()))?;
                info!("opened table {name}: {} rows from {}", rows.len(), path.display());
                Table {
                    rows,
                    wal: Some(wal),
                }
            }
            None => Table {
                rows: Vec::new(),
                wal: None,
            },
        };
        Ok(Arc::new(Mutex::new(table)))
    }

    /// Log the entry and apply it to the rows. Compacts once enough entries
    /// have piled up.
    fn commit(&self, name: &str, table: &mut Table, entry: &WalEntry) -> Result<(), StoreError> {
        let Some(wal) = table.wal.as_mut() else {
            entry.apply(&mut table.rows);
            return Ok(());
        };
        wal.append(entry).map_err(|e| StoreError::Io(e.to_string()))?;
        entry.apply(&mut table.rows);
        metrics::counter!(crate::observability::STORE_WAL_APPENDS_TOTAL).increment(1);

        if wal.appends_since_compact() >= self.compact_threshold {
            match wal.compact(&table.rows) {
                Ok(()) => info!("compacted {name}: {} rows", table.rows.len()),
                // The log is still complete; try again after the next append.
                Err(e) => tracing::warn!("compaction of {name} failed: {e}"),
            }
        }
        Ok(())
    }

    /// Replace a row, as any party with store access may.
    pub async fn update(&self, name: &str, record: BookingRecord) -> Result<(), StoreError> {
        let table = self.table(name)?;
        let mut guard = table.lock().await;
        let previous = guard
            .rows
            .iter()
            .find(|r| r.id == record.id)
            .cloned()
            .ok_or(StoreError::NotFound(record.id))?;
        self.commit(name, &mut guard, &WalEntry::Updated(record.clone()))?;
        debug!("updated {} in {name}", record.id);
        self.notify
            .send(name, FeedItem::Change(FeedMessage::updated(&record, &previous)));
        Ok(())
    }

    pub async fn delete(&self, name: &str, id: BookingId) -> Result<(), StoreError> {
        let table = self.table(name)?;
        let mut guard = table.lock().await;
        let previous = guard
            .rows
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))?;
        self.commit(name, &mut guard, &WalEntry::Deleted { id })?;
        debug!("deleted {id} from {name}");
        self.notify
            .send(name, FeedItem::Change(FeedMessage::deleted(&previous)));
        Ok(())
    }

    /// Push a raw item to a table's subscribers, bypassing the rows.
    pub fn broadcast(&self, name: &str, item: FeedItem) {
        self.notify.send(name, item);
    }

    /// Close a table's feed. Subscribers see the end of their stream.
    pub fn close_feed(&self, name: &str) {
        self.notify.remove(name);
    }

    pub fn subscriber_count(&self, name: &str) -> usize {
        self.notify.subscriber_count(name)
    }
}

#[async_trait]
impl BookingStore for LocalStore {
    async fn fetch_all(&self, name: &str) -> Result<Vec<BookingRecord>, StoreError> {
        let table = self.table(name).map_err(|e| StoreError::Load(e.to_string()))?;
        let guard = table.lock().await;
        Ok(guard.rows.clone())
    }

    async fn insert(&self, name: &str, record: NewRecord) -> Result<BookingRecord, StoreError> {
        let table = self.table(name).map_err(|e| StoreError::Insert(e.to_string()))?;
        let mut guard = table.lock().await;
        if guard.rows.len() >= MAX_ROWS_PER_TABLE {
            return Err(StoreError::LimitExceeded("too many rows in table"));
        }
        let record = record.into_record(Ulid::new(), Utc::now());
        self.commit(name, &mut guard, &WalEntry::Inserted(record.clone()))
            .map_err(|e| StoreError::Insert(e.to_string()))?;
        debug!("inserted {} into {name}", record.id);
        self.notify
            .send(name, FeedItem::Change(FeedMessage::inserted(&record)));
        Ok(record)
    }

    async fn subscribe(&self, name: &str) -> Result<Subscription, StoreError> {
        self.table(name)?;
        Ok(Subscription::new(self.notify.subscribe(name)))
    }
}
