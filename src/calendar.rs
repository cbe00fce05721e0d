use std::fmt;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;

use crate::limits::MAX_OFFERED_DATES;

const WEEKDAYS: [&str; 7] = [
    "Segunda-feira",
    "Terça-feira",
    "Quarta-feira",
    "Quinta-feira",
    "Sexta-feira",
    "Sábado",
    "Domingo",
];

const MONTHS: [&str; 12] = [
    "janeiro", "fevereiro", "março", "abril", "maio", "junho", "julho", "agosto", "setembro",
    "outubro", "novembro", "dezembro",
];

/// One date on which lunches are offered, with its display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfferedDate {
    pub date: NaiveDate,
    /// e.g. `Sábado, 6 de setembro`
    pub label: String,
}

impl OfferedDate {
    pub fn new(date: NaiveDate) -> Self {
        let weekday = WEEKDAYS[date.weekday().num_days_from_monday() as usize];
        let month = MONTHS[date.month0() as usize];
        Self {
            date,
            label: format!("{weekday}, {} de {month}", date.day()),
        }
    }

    /// The label without the weekday, used by the per-group calendars.
    pub fn short_label(&self) -> &str {
        self.label
            .split_once(',')
            .map_or(self.label.as_str(), |(_, rest)| rest.trim())
    }
}

/// The fixed, chronologically ordered set of offered dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferedDates {
    dates: Vec<OfferedDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    InvalidDate(String),
    Empty,
    TooMany(usize),
}

impl fmt::Display for CalendarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalendarError::InvalidDate(s) => write!(f, "invalid date `{s}`, expected YYYY-MM-DD"),
            CalendarError::Empty => write!(f, "no offered dates"),
            CalendarError::TooMany(n) => {
                write!(f, "{n} offered dates exceeds the limit of {MAX_OFFERED_DATES}")
            }
        }
    }
}

impl std::error::Error for CalendarError {}

impl OfferedDates {
    /// Sorts and deduplicates.
    pub fn new(mut dates: Vec<NaiveDate>) -> Result<Self, CalendarError> {
        dates.sort();
        dates.dedup();
        if dates.is_empty() {
            return Err(CalendarError::Empty);
        }
        if dates.len() > MAX_OFFERED_DATES {
            return Err(CalendarError::TooMany(dates.len()));
        }
        Ok(Self {
            dates: dates.into_iter().map(OfferedDate::new).collect(),
        })
    }

    /// Parse a comma-separated list of ISO dates.
    pub fn parse_list(input: &str) -> Result<Self, CalendarError> {
        let dates = input
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map_err(|_| CalendarError::InvalidDate(s.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(dates)
    }

    /// Every Saturday and Sunday of the given month.
    pub fn weekends_of(year: i32, month: u32) -> Result<Self, CalendarError> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| CalendarError::InvalidDate(format!("{year}-{month:02}-01")))?;
        let dates = first
            .iter_days()
            .take_while(|d| d.month() == month)
            .filter(|d| matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .collect();
        Self::new(dates)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OfferedDate> {
        self.dates.iter()
    }

    /// Bare dates in canonical order.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.dates.iter().map(|d| d.date).collect()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&OfferedDate> {
        self.dates
            .binary_search_by_key(&date, |d| d.date)
            .ok()
            .map(|i| &self.dates[i])
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.get(date).is_some()
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}
