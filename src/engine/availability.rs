use chrono::NaiveDate;
use serde::Serialize;

use crate::calendar::OfferedDates;
use crate::model::*;

/// How much of a date is still reservable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Occupancy {
    Free,
    /// One single-group booking exists; only `available` can still be booked.
    PartiallyBooked { available: Group },
    FullyBooked,
}

impl Occupancy {
    pub fn is_fully_booked(&self) -> bool {
        matches!(self, Occupancy::FullyBooked)
    }
}

// ── Occupancy ─────────────────────────────────────────────────────

/// Occupancy of `date` given every booking in `snapshot`.
///
/// A double booking, or two single bookings, fill the date. Two singles count
/// as full even when both name the same group.
pub fn occupancy_of(snapshot: &[Booking], date: NaiveDate) -> Occupancy {
    let mut singles = 0usize;
    let mut first_single: Option<Group> = None;

    for booking in snapshot.iter().filter(|b| b.date == date) {
        match booking.claim {
            Claim::Both => return Occupancy::FullyBooked,
            Claim::One(group) => {
                singles += 1;
                if first_single.is_none() {
                    first_single = Some(group);
                }
            }
        }
    }

    match (singles, first_single) {
        (0, _) => Occupancy::Free,
        (1, Some(booked)) => Occupancy::PartiallyBooked {
            available: booked.complement(),
        },
        _ => Occupancy::FullyBooked,
    }
}

/// Dates that can still take a booking, in the order given.
/// Fully booked dates are left out entirely.
pub fn selectable_dates(snapshot: &[Booking], all_dates: &[NaiveDate]) -> Vec<NaiveDate> {
    all_dates
        .iter()
        .copied()
        .filter(|date| !occupancy_of(snapshot, *date).is_fully_booked())
        .collect()
}

/// An offered date with its computed occupancy. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateSlot {
    pub date: NaiveDate,
    pub label: String,
    pub occupancy: Occupancy,
}

/// Occupancy for every offered date.
pub fn date_slots(snapshot: &[Booking], dates: &OfferedDates) -> Vec<DateSlot> {
    dates
        .iter()
        .map(|offered| DateSlot {
            date: offered.date,
            label: offered.label.clone(),
            occupancy: occupancy_of(snapshot, offered.date),
        })
        .collect()
}
