use chrono::NaiveDate;
use serde::Serialize;

use crate::calendar::OfferedDates;
use crate::engine::{group_calendars, occupancy_of, selectable_dates, GroupCalendar, Occupancy};
use crate::model::*;

/// An entry of the date picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateOption {
    pub date: NaiveDate,
    pub label: String,
}

/// What the form should do for the focused date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Guidance {
    /// Date is free: show both choices, clear any previous selection.
    ChooseFreely,
    /// Only one group is left: hide the choices and pre-select it.
    Prefilled {
        couples: GroupsRequested,
        which_couple: Group,
    },
    Unavailable,
}

/// Availability banner for the focused date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Banner {
    pub date: NaiveDate,
    pub occupancy: Occupancy,
    pub guidance: Guidance,
    pub message: Option<String>,
}

impl Banner {
    pub fn for_date(snapshot: &[Booking], date: NaiveDate) -> Self {
        let occupancy = occupancy_of(snapshot, date);
        let (guidance, message) = match occupancy {
            Occupancy::Free => (Guidance::ChooseFreely, None),
            Occupancy::PartiallyBooked { available } => (
                Guidance::Prefilled {
                    couples: GroupsRequested::One,
                    which_couple: available,
                },
                Some(format!(
                    "Essa data está disponível para almoço apenas com {available}"
                )),
            ),
            Occupancy::FullyBooked => (Guidance::Unavailable, None),
        };
        Self {
            date,
            occupancy,
            guidance,
            message,
        }
    }
}

/// What the host sees once a booking is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    pub name: String,
    pub date: NaiveDate,
    pub date_label: String,
    pub couples: String,
}

impl Confirmation {
    pub fn for_booking(booking: &Booking, offered: &OfferedDates) -> Self {
        let date_label = offered
            .get(booking.date)
            .map_or_else(|| booking.date.to_string(), |o| o.label.clone());
        let couples = match booking.claim {
            Claim::Both => "Ambas as duplas (Sisteres e Elderes)".to_string(),
            Claim::One(group) => group.display_name().to_string(),
        };
        Self {
            name: booking.name.clone(),
            date: booking.date,
            date_label,
            couples,
        }
    }

    /// The summary lines, in display order.
    pub fn lines(&self) -> [String; 3] {
        [
            format!("Nome: {}", self.name),
            format!("Data: {}", self.date_label),
            format!("Dupla(s): {}", self.couples),
        ]
    }
}

/// Everything the presentation layer renders, recomputed after every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Views {
    /// Bumped on every recomputation.
    pub revision: u64,
    pub bookings: usize,
    pub dates: Vec<DateOption>,
    pub banner: Option<Banner>,
    /// Only while the calendar screen is showing.
    pub calendar: Option<Vec<GroupCalendar>>,
}

impl Views {
    pub fn compute(
        revision: u64,
        snapshot: &[Booking],
        offered: &OfferedDates,
        focus: Option<NaiveDate>,
        show_calendar: bool,
    ) -> Self {
        let dates = selectable_dates(snapshot, &offered.dates())
            .into_iter()
            .filter_map(|date| offered.get(date))
            .map(|o| DateOption {
                date: o.date,
                label: o.label.clone(),
            })
            .collect();
        let banner = focus
            .filter(|date| offered.contains(*date))
            .map(|date| Banner::for_date(snapshot, date));
        let calendar = show_calendar.then(|| group_calendars(snapshot, offered));
        Self {
            revision,
            bookings: snapshot.len(),
            dates,
            banner,
            calendar,
        }
    }

    pub fn is_selectable(&self, date: NaiveDate) -> bool {
        self.dates.iter().any(|o| o.date == date)
    }
}
