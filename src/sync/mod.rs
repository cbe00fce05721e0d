//! The booking set synchronizer: owns the local mirror of the booking table,
//! patches it from the change feed, and pushes recomputed views after every
//! change.
//!
//! [`Synchronizer`] is the single-owner state machine; [`runtime`] runs it
//! as one actor task fed by callers, the store and the change feed.

mod error;
mod mirror;
pub mod runtime;
#[cfg(test)]
mod tests;
mod views;

pub use error::{SubmitOutcome, SyncError};
pub use mirror::{Mirror, Tombstones};
pub use runtime::{spawn, SyncConfig, SyncHandle};
pub use views::{Banner, Confirmation, DateOption, Guidance, Views};

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::calendar::OfferedDates;
use crate::engine::{rivals_of, validate_submission, ValidationError};
use crate::model::*;
use crate::observability::{self, change_label};
use crate::store::{FeedMessage, StoreError};

pub struct Synchronizer {
    mirror: Mirror,
    offered: OfferedDates,
    focus: Option<NaiveDate>,
    show_calendar: bool,
    revision: u64,
    loaded: bool,
    /// Ids seen deleted since the last full load. A late insert or
    /// confirmation for one of them is ignored.
    tombstones: Tombstones,
    /// Changes applied since the oldest outstanding reload began, replayed
    /// over every reload result until the last one lands.
    pending_reload: Option<Vec<ChangeEvent>>,
    reloads_in_flight: usize,
    views: watch::Sender<Arc<Views>>,
}

impl Synchronizer {
    pub fn new(offered: OfferedDates) -> Self {
        let initial = Views::compute(0, &[], &offered, None, false);
        let (views, _) = watch::channel(Arc::new(initial));
        Self {
            mirror: Mirror::new(),
            offered,
            focus: None,
            show_calendar: false,
            revision: 0,
            loaded: false,
            tombstones: Tombstones::new(),
            pending_reload: None,
            reloads_in_flight: 0,
            views,
        }
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn offered(&self) -> &OfferedDates {
        &self.offered
    }

    /// Latest published views.
    pub fn views(&self) -> Arc<Views> {
        self.views.borrow().clone()
    }

    pub fn subscribe_views(&self) -> watch::Receiver<Arc<Views>> {
        self.views.subscribe()
    }

    // ── Mirror maintenance ───────────────────────────────────

    /// Start buffering applied changes. Each call must be matched by one
    /// `full_load`; buffering lasts until the last of them.
    pub fn begin_reload(&mut self) {
        self.reloads_in_flight += 1;
        self.pending_reload.get_or_insert_with(Vec::new);
    }

    pub fn is_reloading(&self) -> bool {
        self.pending_reload.is_some()
    }

    /// Replace the mirror with a bulk fetch result.
    ///
    /// A failed first load leaves the mirror empty so the form stays usable.
    /// A failed reload keeps what is already mirrored.
    pub fn full_load(&mut self, result: Result<Vec<BookingRecord>, StoreError>) {
        self.reloads_in_flight = self.reloads_in_flight.saturating_sub(1);
        // An older fetch may land before a newer one; keep the buffer for it.
        let buffered = if self.reloads_in_flight == 0 {
            self.pending_reload.take().unwrap_or_default()
        } else {
            self.pending_reload.clone().unwrap_or_default()
        };
        match result {
            Ok(records) => {
                let total = records.len();
                let bookings: Vec<Booking> = records
                    .into_iter()
                    .filter_map(|record| {
                        let id = record.id;
                        Booking::try_from(record)
                            .map_err(|e| warn!("skipping stored booking {id}: {e}"))
                            .ok()
                    })
                    .collect();
                self.mirror.replace_all(bookings);
                self.tombstones.clear();
                for event in &buffered {
                    self.apply_to_mirror(event);
                }
                metrics::counter!(observability::FULL_LOADS_TOTAL, "status" => "ok").increment(1);
                info!(
                    "loaded {} bookings ({} stored, {} replayed)",
                    self.mirror.len(),
                    total,
                    buffered.len()
                );
            }
            Err(e) if !self.loaded => {
                self.mirror.replace_all(Vec::new());
                metrics::counter!(observability::FULL_LOADS_TOTAL, "status" => "degraded")
                    .increment(1);
                warn!("{e}; continuing with no bookings");
            }
            Err(e) => {
                metrics::counter!(observability::FULL_LOADS_TOTAL, "status" => "degraded")
                    .increment(1);
                warn!("{e}; keeping {} mirrored bookings", self.mirror.len());
            }
        }
        self.loaded = true;
        self.publish();
    }

    /// Apply one feed notification. Malformed payloads are logged and dropped.
    /// Returns whether the mirror changed.
    pub fn apply(&mut self, msg: &FeedMessage) -> bool {
        let kind = change_label(msg.kind);
        match msg.decode() {
            Ok(event) => self.apply_event(&event),
            Err(e) => {
                metrics::counter!(observability::FEED_EVENTS_TOTAL, "kind" => kind, "outcome" => "dropped")
                    .increment(1);
                warn!("dropping {kind} notification: {e}");
                false
            }
        }
    }

    pub fn apply_event(&mut self, event: &ChangeEvent) -> bool {
        if let Some(buffer) = self.pending_reload.as_mut() {
            buffer.push(event.clone());
        }
        let changed = self.apply_to_mirror(event);
        let (kind, id) = match event {
            ChangeEvent::Inserted(b) => ("insert", b.id),
            ChangeEvent::Updated(b) => ("update", b.id),
            ChangeEvent::Deleted(id) => ("delete", *id),
        };
        let outcome = if changed { "applied" } else { "noop" };
        metrics::counter!(observability::FEED_EVENTS_TOTAL, "kind" => kind, "outcome" => outcome)
            .increment(1);
        debug!("{kind} {id}: {outcome}");
        if changed {
            self.publish();
        }
        changed
    }

    fn apply_to_mirror(&mut self, event: &ChangeEvent) -> bool {
        match event {
            ChangeEvent::Inserted(b) if self.tombstones.contains(&b.id) => false,
            ChangeEvent::Deleted(id) => {
                self.tombstones.insert(*id);
                self.mirror.delete(id)
            }
            other => self.mirror.apply(other),
        }
    }

    // ── Submission ───────────────────────────────────────────

    /// Validate a candidate against the current mirror.
    pub fn prepare_submission(&self, request: &SubmissionRequest) -> Result<NewBooking, SyncError> {
        if let Some(date) = request.date
            && !self.offered.contains(date)
        {
            return Err(ValidationError::UnknownDate(date).into());
        }
        Ok(validate_submission(request, self.mirror.snapshot())?.booking)
    }

    /// Fold the store's answer to an insert into the mirror.
    ///
    /// Only the confirmed row is mirrored. Once it is in, the date is checked
    /// again: changes that arrived while the insert was in flight may have
    /// claimed the same group.
    pub fn finish_submission(
        &mut self,
        result: Result<BookingRecord, StoreError>,
    ) -> Result<SubmitOutcome, SyncError> {
        let record = result.inspect_err(|e| warn!("booking not saved: {e}"))?;
        let booking = Booking::try_from(record)
            .map_err(|e| StoreError::Insert(format!("store returned an unusable row: {e}")))?;

        if !self.tombstones.contains(&booking.id) {
            if let Some(buffer) = self.pending_reload.as_mut() {
                buffer.push(ChangeEvent::Inserted(booking.clone()));
            }
            if self.mirror.insert(booking.clone()) {
                self.publish();
            }
        }

        let rivals = rivals_of(self.mirror.snapshot(), &booking);
        let outcome = if rivals.is_empty() {
            info!("booking {} confirmed for {} ({:?})", booking.id, booking.date, booking.claim);
            SubmitOutcome::Confirmed(booking)
        } else {
            warn!(
                "booking {} for {} confirmed but contested by {:?}",
                booking.id, booking.date, rivals
            );
            SubmitOutcome::Contested { booking, rivals }
        };
        Ok(outcome)
    }

    // ── Caller view state ────────────────────────────────────

    /// Date currently picked in the form, or none.
    pub fn focus(&mut self, date: Option<NaiveDate>) -> Arc<Views> {
        self.focus = date;
        self.publish();
        self.views()
    }

    pub fn show_calendar(&mut self, visible: bool) -> Arc<Views> {
        self.show_calendar = visible;
        self.publish();
        self.views()
    }

    fn publish(&mut self) {
        self.revision += 1;
        let views = Views::compute(
            self.revision,
            self.mirror.snapshot(),
            &self.offered,
            self.focus,
            self.show_calendar,
        );
        metrics::gauge!(observability::MIRROR_BOOKINGS).set(self.mirror.len() as f64);
        metrics::counter!(observability::VIEWS_PUBLISHED_TOTAL).increment(1);
        self.views.send_replace(Arc::new(views));
    }
}
