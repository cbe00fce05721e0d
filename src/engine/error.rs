use chrono::NaiveDate;

use crate::limits::MAX_NAME_LEN;
use crate::model::Claim;

use super::Occupancy;

/// A submission the caller can fix and resend. No store call was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingField(&'static str),
    NameTooLong(usize),
    UnknownDate(NaiveDate),
    OccupancyConflict {
        date: NaiveDate,
        occupancy: Occupancy,
        requested: Claim,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingField(field) => write!(f, "missing field: {field}"),
            ValidationError::NameTooLong(len) => {
                write!(f, "name too long: {len} bytes (max {MAX_NAME_LEN})")
            }
            ValidationError::UnknownDate(date) => write!(f, "date not offered: {date}"),
            ValidationError::OccupancyConflict {
                date,
                occupancy,
                requested,
            } => match occupancy {
                Occupancy::PartiallyBooked { available } => write!(
                    f,
                    "{date} is only available with {available}, requested {requested:?}"
                ),
                _ => write!(f, "{date} is fully booked"),
            },
        }
    }
}

impl std::error::Error for ValidationError {}
