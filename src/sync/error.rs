use crate::engine::{Rejected, ValidationError};
use crate::model::{Booking, BookingId};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Fix the submission and resend; nothing reached the store.
    Validation(ValidationError),
    /// The store failed or timed out; the mirror is unchanged.
    Store(StoreError),
    /// The synchronizer has shut down.
    Closed,
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Validation(e) => write!(f, "invalid booking: {e}"),
            SyncError::Store(e) => write!(f, "{e}"),
            SyncError::Closed => write!(f, "synchronizer closed"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<ValidationError> for SyncError {
    fn from(e: ValidationError) -> Self {
        SyncError::Validation(e)
    }
}

impl From<Rejected> for SyncError {
    fn from(r: Rejected) -> Self {
        SyncError::Validation(r.reason)
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::Store(e)
    }
}

/// A submission the store accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Confirmed(Booking),
    /// Stored, but by the time it was confirmed other bookings had claimed
    /// the same group on that date.
    Contested {
        booking: Booking,
        rivals: Vec<BookingId>,
    },
}

impl SubmitOutcome {
    pub fn booking(&self) -> &Booking {
        match self {
            SubmitOutcome::Confirmed(booking) | SubmitOutcome::Contested { booking, .. } => booking,
        }
    }

    pub fn is_contested(&self) -> bool {
        matches!(self, SubmitOutcome::Contested { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SubmitOutcome::Confirmed(_) => "confirmed",
            SubmitOutcome::Contested { .. } => "contested",
        }
    }
}
