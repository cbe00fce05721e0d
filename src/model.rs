use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::MAX_NAME_LEN;

/// Store-assigned booking identifier.
pub type BookingId = Ulid;

/// The two fixed groups a lunch can be offered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    Sisteres,
    Elderes,
}

impl Group {
    pub const ALL: [Group; 2] = [Group::Sisteres, Group::Elderes];

    pub fn complement(self) -> Group {
        match self {
            Group::Sisteres => Group::Elderes,
            Group::Elderes => Group::Sisteres,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Group::Sisteres => "Sisteres",
            Group::Elderes => "Elderes",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Wire-level "how many groups" field (`couples`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupsRequested {
    #[serde(rename = "uma")]
    One,
    #[serde(rename = "duas")]
    Both,
}

/// What a booking occupies on its date.
///
/// `(couples, which_couple)` on the wire; a single group always names the
/// group and a double booking never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Claim {
    One(Group),
    Both,
}

impl Claim {
    /// Strict conversion from the wire pair. `None` if the pair is incoherent.
    pub fn from_parts(requested: GroupsRequested, which: Option<Group>) -> Option<Claim> {
        match (requested, which) {
            (GroupsRequested::One, Some(group)) => Some(Claim::One(group)),
            (GroupsRequested::Both, None) => Some(Claim::Both),
            _ => None,
        }
    }

    pub fn groups_requested(self) -> GroupsRequested {
        match self {
            Claim::One(_) => GroupsRequested::One,
            Claim::Both => GroupsRequested::Both,
        }
    }

    pub fn which_group(self) -> Option<Group> {
        match self {
            Claim::One(group) => Some(group),
            Claim::Both => None,
        }
    }

    pub fn covers(self, group: Group) -> bool {
        match self {
            Claim::One(g) => g == group,
            Claim::Both => true,
        }
    }

    /// Two claims on the same date collide when they share a group.
    pub fn collides_with(self, other: Claim) -> bool {
        match (self, other) {
            (Claim::One(a), Claim::One(b)) => a == b,
            _ => true,
        }
    }
}

/// A confirmed booking, as mirrored from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: BookingId,
    pub name: String,
    pub date: NaiveDate,
    pub claim: Claim,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn groups_requested(&self) -> GroupsRequested {
        self.claim.groups_requested()
    }

    pub fn which_group(&self) -> Option<Group> {
        self.claim.which_group()
    }

    pub fn to_record(&self) -> BookingRecord {
        BookingRecord {
            id: self.id,
            name: self.name.clone(),
            date: self.date,
            couples: self.claim.groups_requested(),
            which_couple: self.claim.which_group(),
            created_at: self.created_at,
        }
    }
}

impl TryFrom<BookingRecord> for Booking {
    type Error = DecodeError;

    fn try_from(record: BookingRecord) -> Result<Self, Self::Error> {
        let claim = Claim::from_parts(record.couples, record.which_couple).ok_or(
            DecodeError::Incoherent("which_couple must be set iff couples = uma"),
        )?;
        if record.name.trim().is_empty() {
            return Err(DecodeError::Incoherent("empty name"));
        }
        Ok(Booking {
            id: record.id,
            name: record.name,
            date: record.date,
            claim,
            created_at: record.created_at,
        })
    }
}

/// Row shape persisted by the store and carried on the change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: BookingId,
    pub name: String,
    pub date: NaiveDate,
    pub couples: GroupsRequested,
    pub which_couple: Option<Group>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub name: String,
    pub date: NaiveDate,
    pub couples: GroupsRequested,
    pub which_couple: Option<Group>,
}

impl NewRecord {
    pub fn into_record(self, id: BookingId, created_at: DateTime<Utc>) -> BookingRecord {
        BookingRecord {
            id,
            name: self.name,
            date: self.date,
            couples: self.couples,
            which_couple: self.which_couple,
            created_at,
        }
    }
}

/// A submission that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub name: String,
    pub date: NaiveDate,
    pub claim: Claim,
}

impl NewBooking {
    pub fn to_new_record(&self) -> NewRecord {
        NewRecord {
            name: self.name.clone(),
            date: self.date,
            couples: self.claim.groups_requested(),
            which_couple: self.claim.which_group(),
        }
    }
}

/// Candidate booking as filled in by a caller. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub name: Option<String>,
    pub date: Option<NaiveDate>,
    pub couples: Option<GroupsRequested>,
    pub which_couple: Option<Group>,
}

impl SubmissionRequest {
    pub fn one(name: &str, date: NaiveDate, group: Group) -> Self {
        Self {
            name: Some(name.to_string()),
            date: Some(date),
            couples: Some(GroupsRequested::One),
            which_couple: Some(group),
        }
    }

    pub fn both(name: &str, date: NaiveDate) -> Self {
        Self {
            name: Some(name.to_string()),
            date: Some(date),
            couples: Some(GroupsRequested::Both),
            which_couple: None,
        }
    }

    /// Trimmed name, `None` when blank.
    pub fn trimmed_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }

    pub fn name_too_long(&self) -> bool {
        self.trimmed_name().is_some_and(|n| n.len() > MAX_NAME_LEN)
    }
}

/// A typed change, decoded from a feed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Inserted(Booking),
    Updated(Booking),
    Deleted(BookingId),
}

/// Why a record or feed payload could not be mirrored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    MissingPayload(&'static str),
    Json(String),
    Incoherent(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::MissingPayload(side) => write!(f, "missing `{side}` payload"),
            DecodeError::Json(e) => write!(f, "malformed record: {e}"),
            DecodeError::Incoherent(msg) => write!(f, "incoherent record: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}
