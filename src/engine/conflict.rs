use crate::model::*;

use super::availability::{occupancy_of, Occupancy};
use super::ValidationError;

/// A submission that may be sent to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub booking: NewBooking,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub reason: ValidationError,
}

impl From<ValidationError> for Rejected {
    fn from(reason: ValidationError) -> Self {
        Self { reason }
    }
}

impl std::fmt::Display for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rejected: {}", self.reason)
    }
}

impl std::error::Error for Rejected {}

/// Check a candidate against the snapshot.
///
/// On a partially booked date only the remaining group may be requested;
/// a mismatched group is rejected, never rewritten. A `which_couple` sent with
/// a double request is dropped.
pub fn validate_submission(
    candidate: &SubmissionRequest,
    snapshot: &[Booking],
) -> Result<Accepted, Rejected> {
    let name = candidate
        .trimmed_name()
        .ok_or(ValidationError::MissingField("name"))?;
    let date = candidate.date.ok_or(ValidationError::MissingField("date"))?;
    let requested = candidate
        .couples
        .ok_or(ValidationError::MissingField("couples"))?;
    let claim = match requested {
        GroupsRequested::One => Claim::One(
            candidate
                .which_couple
                .ok_or(ValidationError::MissingField("which_couple"))?,
        ),
        GroupsRequested::Both => Claim::Both,
    };
    if candidate.name_too_long() {
        return Err(ValidationError::NameTooLong(name.len()).into());
    }

    let occupancy = occupancy_of(snapshot, date);
    let fits = match (occupancy, claim) {
        (Occupancy::Free, _) => true,
        (Occupancy::PartiallyBooked { available }, Claim::One(group)) => group == available,
        _ => false,
    };
    if !fits {
        return Err(ValidationError::OccupancyConflict {
            date,
            occupancy,
            requested: claim,
        }
        .into());
    }

    Ok(Accepted {
        booking: NewBooking {
            name: name.to_string(),
            date,
            claim,
        },
    })
}

/// Other bookings on the same date whose claim collides with `booking`'s.
pub fn rivals_of(snapshot: &[Booking], booking: &Booking) -> Vec<BookingId> {
    snapshot
        .iter()
        .filter(|other| {
            other.id != booking.id
                && other.date == booking.date
                && other.claim.collides_with(booking.claim)
        })
        .map(|other| other.id)
        .collect()
}
