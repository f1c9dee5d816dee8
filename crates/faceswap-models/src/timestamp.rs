//! Timestamp parsing and validation utilities.
//!
//! One grammar is accepted everywhere a timestamp enters the system (trim
//! bounds, frame-at-time face sources): `[H:][M:]S[.fff]`, each component
//! one or two digits, optional fractional seconds.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel used as the trim end when the request leaves it open.
pub const OPEN_END: &str = "01:00:00";

fn timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{1,2}:)?(\d{1,2}:)?\d{1,2}(\.\d*)?$").expect("timestamp regex is valid")
    })
}

/// Returns true if `text` matches the accepted timestamp grammar.
pub fn is_timestamp(text: &str) -> bool {
    timestamp_pattern().is_match(text)
}

/// Parse a timestamp string to total seconds.
///
/// Supports formats:
/// - `HH:MM:SS` or `HH:MM:SS.mmm`
/// - `MM:SS` or `MM:SS.mmm`
/// - `SS` or `SS.mmm`
///
/// # Examples
/// ```
/// use faceswap_models::timestamp::parse_timestamp;
/// assert_eq!(parse_timestamp("01:30:00").unwrap(), 5400.0);
/// assert_eq!(parse_timestamp("05:30").unwrap(), 330.0);
/// assert_eq!(parse_timestamp("9.5").unwrap(), 9.5);
/// ```
pub fn parse_timestamp(ts: &str) -> Result<f64, TimestampError> {
    let ts = ts.trim();
    if ts.is_empty() {
        return Err(TimestampError::Empty);
    }
    if !is_timestamp(ts) {
        return Err(TimestampError::InvalidFormat(ts.to_string()));
    }

    // A trailing "." is allowed by the grammar but not by f64 parsing.
    let ts = ts.strip_suffix('.').unwrap_or(ts);

    let mut total = 0.0;
    for part in ts.split(':') {
        let value: f64 = part
            .parse()
            .map_err(|_| TimestampError::InvalidFormat(ts.to_string()))?;
        total = total * 60.0 + value;
    }
    Ok(total)
}

/// Format seconds into HH:MM:SS or HH:MM:SS.mmm string.
pub fn format_seconds(total_secs: f64) -> String {
    let hours = (total_secs / 3600.0).floor() as u32;
    let mins = ((total_secs % 3600.0) / 60.0).floor() as u32;
    let secs = total_secs % 60.0;

    if (secs - secs.floor()).abs() > 0.0001 {
        format!("{:02}:{:02}:{:06.3}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs.floor() as u32)
    }
}

/// A validated timestamp, keeping the caller's text for the media toolkit
/// and its value in seconds for range checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp {
    text: String,
    seconds: f64,
}

impl Timestamp {
    /// Parse and validate a timestamp.
    pub fn parse(text: &str) -> Result<Self, TimestampError> {
        let seconds = parse_timestamp(text)?;
        Ok(Self {
            text: text.trim().to_string(),
            seconds,
        })
    }

    /// Build a timestamp from a number of seconds.
    pub fn from_seconds(seconds: f64) -> Self {
        Self {
            text: format_seconds(seconds),
            seconds,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn seconds(&self) -> f64 {
        self.seconds
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl JsonSchema for Timestamp {
    fn schema_name() -> String {
        "Timestamp".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

impl TryFrom<String> for Timestamp {
    type Error = TimestampError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Timestamp> for String {
    fn from(value: Timestamp) -> Self {
        value.text
    }
}

/// Timestamp parsing/validation error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimestampError {
    #[error("Timestamp cannot be empty")]
    Empty,

    #[error("Invalid timestamp format '{0}'. Use [H:][M:]S[.fff], e.g. 00:01:30.500")]
    InvalidFormat(String),
}
