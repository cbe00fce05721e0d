use chrono::NaiveDate;
use serde::Serialize;

use crate::calendar::OfferedDates;
use crate::model::*;

/// One day on a group's calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEntry {
    pub date: NaiveDate,
    pub label: String,
    /// Name of whoever is hosting this group, `None` when still available.
    pub booked_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCalendar {
    pub group: Group,
    pub entries: Vec<CalendarEntry>,
}

/// Per-group calendars over the offered dates. A double booking shows on
/// both. If the data holds more than one booking for a group on a date, the
/// earliest created wins.
pub fn group_calendars(snapshot: &[Booking], dates: &OfferedDates) -> Vec<GroupCalendar> {
    Group::ALL
        .iter()
        .map(|&group| GroupCalendar {
            group,
            entries: dates
                .iter()
                .map(|offered| CalendarEntry {
                    date: offered.date,
                    label: offered.short_label().to_string(),
                    booked_by: host_of(snapshot, offered.date, group).map(|b| b.name.clone()),
                })
                .collect(),
        })
        .collect()
}

fn host_of(snapshot: &[Booking], date: NaiveDate, group: Group) -> Option<&Booking> {
    snapshot
        .iter()
        .filter(|b| b.date == date && b.claim.covers(group))
        .min_by_key(|b| (b.created_at, b.id))
}
