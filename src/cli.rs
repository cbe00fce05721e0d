use std::fmt;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

/// One line typed at the prompt.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// `book <date> uma <sisteres|elderes> <name>` or `book <date> duas <name>`
    Book(SubmissionRequest),
    /// `select <date>` focuses the form on a date; `select none` clears it.
    Select(Option<NaiveDate>),
    /// `calendar [on|off]`
    Calendar(bool),
    /// Print the current views.
    Dates,
    /// `cancel <id>`: delete a stored booking.
    Cancel(BookingId),
    /// `rename <id> <name>`: change a stored booking's name.
    Rename { id: BookingId, name: String },
    Reload,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    Unknown(String),
    Missing(&'static str),
    InvalidDate(String),
    InvalidId(String),
    Invalid { what: &'static str, value: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty command"),
            ParseError::Unknown(cmd) => write!(f, "unknown command `{cmd}`, try `help`"),
            ParseError::Missing(what) => write!(f, "missing {what}"),
            ParseError::InvalidDate(s) => write!(f, "invalid date `{s}`, expected YYYY-MM-DD"),
            ParseError::InvalidId(s) => write!(f, "invalid booking id `{s}`"),
            ParseError::Invalid { what, value } => write!(f, "invalid {what} `{value}`"),
        }
    }
}

impl std::error::Error for ParseError {}

pub const HELP: &str = "\
commands:
  book <date> uma <sisteres|elderes> <name>   book one couple
  book <date> duas <name>                     book both couples
  select <date|none>                          show availability for a date
  calendar [on|off]                           show the per-group calendars
  dates                                       print the current views
  cancel <id>                                 delete a booking
  rename <id> <name>                          rename a booking
  reload                                      reload every booking
  quit";

pub fn parse_line(line: &str) -> Result<Command, ParseError> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err(ParseError::Empty);
    };
    let rest: Vec<&str> = words.collect();

    match head.to_lowercase().as_str() {
        "book" => parse_book(&rest).map(Command::Book),
        "select" => match rest.first() {
            None => Err(ParseError::Missing("date")),
            Some(w) if w.eq_ignore_ascii_case("none") => Ok(Command::Select(None)),
            Some(w) => parse_date(w).map(|d| Command::Select(Some(d))),
        },
        "calendar" => match rest.first().map(|w| w.to_lowercase()).as_deref() {
            None | Some("on") => Ok(Command::Calendar(true)),
            Some("off") => Ok(Command::Calendar(false)),
            Some(other) => Err(ParseError::Invalid {
                what: "calendar switch",
                value: other.to_string(),
            }),
        },
        "dates" => Ok(Command::Dates),
        "cancel" => {
            let id = rest.first().ok_or(ParseError::Missing("id"))?;
            parse_id(id).map(Command::Cancel)
        }
        "rename" => {
            let id = parse_id(rest.first().ok_or(ParseError::Missing("id"))?)?;
            let name = rest[1..].join(" ");
            if name.is_empty() {
                return Err(ParseError::Missing("name"));
            }
            Ok(Command::Rename { id, name })
        }
        "reload" => Ok(Command::Reload),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

/// Fields left out stay empty so validation names the first one missing.
fn parse_book(words: &[&str]) -> Result<SubmissionRequest, ParseError> {
    let mut request = SubmissionRequest::default();
    let mut words = words.iter().copied().peekable();

    if let Some(w) = words.next() {
        request.date = Some(parse_date(w)?);
    }
    if let Some(w) = words.next() {
        request.couples = Some(match w.to_lowercase().as_str() {
            "uma" | "one" => GroupsRequested::One,
            "duas" | "both" => GroupsRequested::Both,
            _ => {
                return Err(ParseError::Invalid {
                    what: "couples",
                    value: w.to_string(),
                })
            }
        });
    }
    if let Some(group) = words.peek().and_then(|w| parse_group(w)) {
        request.which_couple = Some(group);
        words.next();
    }
    let name = words.collect::<Vec<_>>().join(" ");
    if !name.is_empty() {
        request.name = Some(name);
    }
    Ok(request)
}

fn parse_group(word: &str) -> Option<Group> {
    match word.to_lowercase().as_str() {
        "sisteres" => Some(Group::Sisteres),
        "elderes" => Some(Group::Elderes),
        _ => None,
    }
}

fn parse_date(word: &str) -> Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(word, "%Y-%m-%d").map_err(|_| ParseError::InvalidDate(word.to_string()))
}

fn parse_id(word: &str) -> Result<BookingId, ParseError> {
    Ulid::from_string(word).map_err(|_| ParseError::InvalidId(word.to_string()))
}
