use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};

use crate::limits::MAX_TOMBSTONES;
use crate::model::*;

/// Local copy of the booking table.
///
/// Kept sorted by `(created_at, id)` so the same set of bookings always has
/// the same layout, whatever order they arrived in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mirror {
    bookings: Vec<Booking>,
}

fn sort_key(booking: &Booking) -> (DateTime<Utc>, BookingId) {
    (booking.created_at, booking.id)
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &[Booking] {
        &self.bookings
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn get(&self, id: &BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    /// Replace everything. Later duplicates of an id are dropped.
    pub fn replace_all(&mut self, bookings: Vec<Booking>) {
        self.bookings.clear();
        for booking in bookings {
            self.insert(booking);
        }
    }

    /// Add unless the id is already present. Returns whether anything changed.
    pub fn insert(&mut self, booking: Booking) -> bool {
        if self.get(&booking.id).is_some() {
            return false;
        }
        let key = sort_key(&booking);
        let pos = self
            .bookings
            .binary_search_by_key(&key, sort_key)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
        true
    }

    /// Replace the booking with the same id. No-op if absent or unchanged.
    pub fn update(&mut self, booking: Booking) -> bool {
        let Some(pos) = self.bookings.iter().position(|b| b.id == booking.id) else {
            return false;
        };
        if self.bookings[pos] == booking {
            return false;
        }
        self.bookings.remove(pos);
        self.insert(booking)
    }

    pub fn delete(&mut self, id: &BookingId) -> bool {
        match self.bookings.iter().position(|b| b.id == *id) {
            Some(pos) => {
                self.bookings.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn apply(&mut self, event: &ChangeEvent) -> bool {
        match event {
            ChangeEvent::Inserted(booking) => self.insert(booking.clone()),
            ChangeEvent::Updated(booking) => self.update(booking.clone()),
            ChangeEvent::Deleted(id) => self.delete(id),
        }
    }
}

/// Recently deleted ids, oldest evicted first once `MAX_TOMBSTONES` is
/// reached.
#[derive(Debug, Clone, Default)]
pub struct Tombstones {
    ids: HashSet<BookingId>,
    order: VecDeque<BookingId>,
}

impl Tombstones {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: BookingId) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > MAX_TOMBSTONES
            && let Some(oldest) = self.order.pop_front()
        {
            self.ids.remove(&oldest);
        }
    }

    pub fn contains(&self, id: &BookingId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.order.clear();
    }
}
