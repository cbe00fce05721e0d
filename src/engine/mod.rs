//! Availability and conflict rules. Everything here is a pure function of a
//! booking snapshot; the synchronizer owns the snapshot and calls in.

mod availability;
mod conflict;
mod error;
mod queries;

pub use availability::{date_slots, occupancy_of, selectable_dates, DateSlot, Occupancy};
pub use conflict::{rivals_of, validate_submission, Accepted, Rejected};
pub use error::ValidationError;
pub use queries::{group_calendars, CalendarEntry, GroupCalendar};
