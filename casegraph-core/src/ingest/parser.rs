//! Graph file parser
//!
//! A graph file is line-oriented, whitespace-separated:
//!
//! ```text
//! v <activity_id> <event_name> <timestamp> <track_id>
//! e <node1> <node2> <event_name>
//! ```
//!
//! Edge lines carry no track id; they belong to the case of the most recent
//! vertex line. `XP` lines (prefix separators) and blank lines are ignored.
//!
//! # Error Handling
//!
//! A line that cannot be parsed is recorded as [`Error::MalformedLine`] in
//! [`ParseResult::errors`] and parsing continues with the next line.

use crate::error::Error;
use crate::format::parse_timestamp;
use crate::types::{Edge, Event};
use sha2::{Digest, Sha256};

/// Everything extracted from one input file.
#[derive(Debug, Default)]
pub struct ParseResult {
    /// Vertex lines or event rows, in file order
    pub events: Vec<Event>,
    /// Edge lines, in file order
    pub edges: Vec<Edge>,
    /// Rejected lines
    pub errors: Vec<Error>,
    /// SHA-256 of the parsed content, hex-encoded
    pub content_hash: String,
    /// Number of lines read
    pub lines: usize,
}

impl ParseResult {
    /// Rejected lines rendered for display.
    pub fn warnings(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }
}

/// Parser for `v`/`e` graph files.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphFileParser;

impl GraphFileParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse graph file content.
    pub fn parse_str(&self, text: &str) -> ParseResult {
        let mut result = ParseResult {
            content_hash: content_hash(text),
            ..Default::default()
        };
        let mut current_track: Option<String> = None;

        for (i, line) in text.lines().enumerate() {
            let line_number = i + 1;
            result.lines = line_number;

            let fields: Vec<&str> = line.split_whitespace().collect();
            let outcome = match fields.first().copied() {
                None | Some("XP") => continue,
                Some("v") => parse_vertex(&fields).map(|event| {
                    current_track = Some(event.track_id.clone());
                    result.events.push(event);
                }),
                Some("e") => match &current_track {
                    Some(track) => parse_edge(&fields, track).map(|edge| result.edges.push(edge)),
                    None => Err("edge line before any vertex line".to_string()),
                },
                Some(tag) => Err(format!("unknown line tag '{}'", tag)),
            };

            if let Err(message) = outcome {
                tracing::warn!(line = line_number, %message, "Skipping malformed line");
                result.errors.push(Error::MalformedLine {
                    line: line_number,
                    message,
                });
            }
        }

        result
    }
}

/// SHA-256 of input file content, hex-encoded.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

fn expect_fields(fields: &[&str], expected: usize) -> std::result::Result<(), String> {
    if fields.len() == expected {
        Ok(())
    } else {
        Err(format!(
            "'{}' line expects {} fields, found {}",
            fields[0],
            expected,
            fields.len()
        ))
    }
}

fn parse_id(text: &str, what: &str) -> std::result::Result<u32, String> {
    text.parse::<u32>()
        .map_err(|_| format!("{} '{}' is not a non-negative integer", what, text))
}

fn parse_vertex(fields: &[&str]) -> std::result::Result<Event, String> {
    expect_fields(fields, 5)?;
    let activity_id = parse_id(fields[1], "activity id")?;
    let at = parse_timestamp(fields[3]).map_err(|e| e.to_string())?;
    Ok(Event::instant(fields[4], activity_id, fields[2], at))
}

fn parse_edge(fields: &[&str], track_id: &str) -> std::result::Result<Edge, String> {
    expect_fields(fields, 4)?;
    let mut edge = Edge::new(
        track_id,
        parse_id(fields[1], "node1")?,
        parse_id(fields[2], "node2")?,
    );
    edge.event_name = Some(fields[3].to_string());
    Ok(edge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const SAMPLE: &str = "\
v 1 START 2011-10-0108:00:00 173715
v 2 Register 2011-10-0108:10:00 173715
e 1 2 START__Register
XP

v 1 START 2024-01-01T00:00:00 caseB
";

    #[test]
    fn test_parse_vertices_and_edges() {
        let result = GraphFileParser::new().parse_str(SAMPLE);
        assert!(result.errors.is_empty(), "{:?}", result.warnings());
        assert_eq!(result.events.len(), 3);
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.lines, 6);

        let register = &result.events[1];
        assert_eq!(register.activity_id, 2);
        assert_eq!(register.event_name, "Register");
        assert_eq!(register.track_id, "173715");
        assert_eq!(
            register.finish_time,
            Utc.with_ymd_and_hms(2011, 10, 1, 8, 10, 0).unwrap()
        );

        let edge = &result.edges[0];
        assert_eq!(edge.track_id, "173715");
        assert_eq!((edge.node1, edge.node2), (1, 2));
        assert_eq!(edge.event_name.as_deref(), Some("START__Register"));
    }

    #[test]
    fn test_malformed_lines_are_reported_and_skipped() {
        let text = "\
v 1 START 2024-01-01T00:00:00 t1
v two A 2024-01-01T00:01:00 t1
v 3 B t1
e 1 x START__A
q 1 2
v 2 A not-a-time t1
v 2 A 2024-01-01T00:02:00 t1
";
        let result = GraphFileParser::new().parse_str(text);

        let lines: Vec<usize> = result
            .errors
            .iter()
            .map(|e| match e {
                Error::MalformedLine { line, .. } => *line,
                other => panic!("unexpected error: {other}"),
            })
            .collect();
        assert_eq!(lines, vec![2, 3, 4, 5, 6]);
        assert_eq!(result.events.len(), 2);
        assert!(result.warnings()[0].starts_with("malformed line 2"));
    }

    #[test]
    fn test_edge_before_vertex() {
        let result = GraphFileParser::new().parse_str("e 1 2 START__A\n");
        assert_eq!(result.errors.len(), 1);
        assert!(result.edges.is_empty());
    }

    #[test]
    fn test_edges_follow_latest_case() {
        let text = "\
v 1 START 2024-01-01T00:00:00 a
v 1 START 2024-01-01T00:00:00 b
v 2 X 2024-01-01T00:05:00 b
e 1 2 START__X
";
        let result = GraphFileParser::new().parse_str(text);
        assert_eq!(result.edges[0].track_id, "b");
    }

    #[test]
    fn test_content_hash_tracks_content() {
        let parser = GraphFileParser::new();
        let a = parser.parse_str(SAMPLE);
        let b = parser.parse_str(SAMPLE);
        let c = parser.parse_str("v 1 START 2024-01-01T00:00:00 x\n");
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.content_hash, c.content_hash);
        assert_eq!(a.content_hash.len(), 64);
    }
}
