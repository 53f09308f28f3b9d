//! Event log parser
//!
//! An event log is comma-separated text with one event per row and no
//! required header:
//!
//! ```text
//! activity_id,event_name,track_id,start,finish[,resource]
//! ```
//!
//! Fields may be double-quoted, with embedded quotes doubled. A first row
//! whose leading field is `activity_id` is read as a header and skipped.
//! Timestamps are wall-clock readings: a trailing `+HH:MM` offset is dropped
//! and date and time may be separated by a space. An empty resource is
//! recorded as none.
//!
//! Event logs carry no edges. They come from the companion graph file, see
//! [`super::companion_graph`].
//!
//! Rejected rows are reported the same way as rejected graph file lines.

use super::parser::{content_hash, ParseResult};
use crate::error::Error;
use crate::format::parse_wall_clock;
use crate::types::Event;

/// Parser for comma-separated event logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventLogParser;

impl EventLogParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse event log content.
    pub fn parse_str(&self, text: &str) -> ParseResult {
        let mut result = ParseResult {
            content_hash: content_hash(text),
            ..Default::default()
        };

        for (i, line) in text.lines().enumerate() {
            let line_number = i + 1;
            result.lines = line_number;

            if line.trim().is_empty() {
                continue;
            }

            let outcome = split_record(line).and_then(|fields| {
                if line_number == 1 && fields[0].trim() == "activity_id" {
                    return Ok(None);
                }
                parse_row(&fields).map(Some)
            });

            match outcome {
                Ok(Some(event)) => result.events.push(event),
                Ok(None) => {}
                Err(message) => {
                    tracing::warn!(line = line_number, %message, "Skipping malformed row");
                    result.errors.push(Error::MalformedLine {
                        line: line_number,
                        message,
                    });
                }
            }
        }

        result
    }
}

/// Split one row into fields. Always yields at least one field.
fn split_record(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    quoted = false;
                }
            }
            '"' if field.is_empty() => quoted = true,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }

    if quoted {
        return Err("unterminated quoted field".to_string());
    }
    fields.push(field);
    Ok(fields)
}

fn parse_row(fields: &[String]) -> std::result::Result<Event, String> {
    if !(5..=6).contains(&fields.len()) {
        return Err(format!(
            "event row expects 5 or 6 fields, found {}",
            fields.len()
        ));
    }

    let id = fields[0].trim();
    let activity_id = id
        .parse::<u32>()
        .map_err(|_| format!("activity id '{}' is not a non-negative integer", id))?;

    let event_name = required(&fields[1], "event name")?;
    let track_id = required(&fields[2], "track id")?;
    let start_time = parse_wall_clock(&fields[3]).map_err(|e| e.to_string())?;
    let finish_time = parse_wall_clock(&fields[4]).map_err(|e| e.to_string())?;
    let resource = fields
        .get(5)
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .map(str::to_string);

    Ok(Event {
        activity_id,
        event_name,
        track_id,
        start_time,
        finish_time,
        resource,
    })
}

fn required(field: &str, what: &str) -> std::result::Result<String, String> {
    let value = field.trim();
    if value.is_empty() {
        Err(format!("{} is empty", what))
    } else {
        Ok(value.to_string())
    }
}
