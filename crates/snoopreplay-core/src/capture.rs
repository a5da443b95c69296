use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Error, Result};
use crate::frame::{Exchange, Frame};

/// Ordered exchanges as they appeared in the recording.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Capture {
    pub exchanges: Vec<Exchange>,
}

impl Capture {
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.iter()
    }
}

impl IntoIterator for Capture {
    type Item = Exchange;
    type IntoIter = std::vec::IntoIter<Exchange>;

    fn into_iter(self) -> Self::IntoIter {
        self.exchanges.into_iter()
    }
}

/// Why a session record contributed nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    MissingCommands,
    MissingResponses,
    LengthMismatch { commands: usize, responses: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingCommands => f.write_str("missing `commands` array"),
            SkipReason::MissingResponses => f.write_str("missing `responses` array"),
            SkipReason::LengthMismatch {
                commands,
                responses,
            } => write!(f, "{} commands but {} responses", commands, responses),
        }
    }
}

/// A single element of the capture root, classified.
#[derive(Debug)]
pub enum SessionRecord<'a> {
    Valid {
        commands: &'a [Value],
        responses: &'a [Value],
    },
    Malformed(SkipReason),
}

impl<'a> SessionRecord<'a> {
    pub fn classify(record: &'a Map<String, Value>) -> Self {
        let commands = record.get("commands").and_then(Value::as_array);
        let responses = record.get("responses").and_then(Value::as_array);
        match (commands, responses) {
            (None, _) => SessionRecord::Malformed(SkipReason::MissingCommands),
            (_, None) => SessionRecord::Malformed(SkipReason::MissingResponses),
            (Some(c), Some(r)) if c.len() != r.len() => {
                SessionRecord::Malformed(SkipReason::LengthMismatch {
                    commands: c.len(),
                    responses: r.len(),
                })
            }
            (Some(c), Some(r)) => SessionRecord::Valid {
                commands: c,
                responses: r,
            },
        }
    }
}

/// Session-level outcome of a parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseReport {
    pub sessions: usize,
    pub accepted: usize,
    /// `(session index, reason)` for every skipped record.
    pub skipped: Vec<(usize, SkipReason)>,
    pub exchanges: usize,
}

/// Render a frame value the way it appears in the document, then normalize.
///
/// A string keeps its quotes and an array renders as compact JSON, both of
/// which normalization strips.
fn frame_from_value(value: &Value) -> Frame {
    Frame::new(&value.to_string())
}

/// Parse a capture document, returning the exchanges and a per-session report.
pub fn parse_with_report(raw: &str) -> Result<(Capture, ParseReport)> {
    let root: Value = serde_json::from_str(raw)?;
    let sessions = root
        .as_array()
        .ok_or_else(|| Error::MalformedCapture("root is not an array".to_string()))?;

    let mut capture = Capture::default();
    let mut report = ParseReport {
        sessions: sessions.len(),
        ..ParseReport::default()
    };

    for (index, element) in sessions.iter().enumerate() {
        let record = element.as_object().ok_or_else(|| {
            Error::MalformedCapture(format!("session {} is not an object", index))
        })?;

        match SessionRecord::classify(record) {
            SessionRecord::Valid {
                commands,
                responses,
            } => {
                report.accepted += 1;
                capture.exchanges.extend(
                    commands
                        .iter()
                        .zip(responses)
                        .map(|(c, r)| Exchange {
                            command: frame_from_value(c),
                            response: frame_from_value(r),
                        }),
                );
            }
            SessionRecord::Malformed(reason) => {
                tracing::warn!(session = index, %reason, "skipping session record");
                report.skipped.push((index, reason));
            }
        }
    }

    report.exchanges = capture.len();
    tracing::debug!(
        sessions = report.sessions,
        skipped = report.skipped.len(),
        exchanges = report.exchanges,
        "parsed capture"
    );
    Ok((capture, report))
}

/// Parse a capture document into its ordered exchanges.
pub fn parse(raw: &str) -> Result<Capture> {
    parse_with_report(raw).map(|(capture, _)| capture)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(capture: &Capture) -> Vec<(&str, &str)> {
        capture
            .iter()
            .map(|e| (e.command.as_str(), e.response.as_str()))
            .collect()
    }

    #[test]
    fn parses_single_session() {
        let raw = r#"[{"commands": ["[00, A4, 04, 00]"], "responses": ["[90, 00]"]}]"#;
        let capture = parse(raw).unwrap();
        assert_eq!(pairs(&capture), vec![("00A40400", "9000")]);
    }

    #[test]
    fn pairs_in_index_order_across_sessions() {
        let raw = r#"[
            {"commands": ["[01]", "[02]", "[03]"], "responses": ["[A1]", "[A2]", "[A3]"]},
            {"commands": ["[04]"], "responses": ["[A4]"]}
        ]"#;
        let capture = parse(raw).unwrap();
        assert_eq!(
            pairs(&capture),
            vec![("01", "A1"), ("02", "A2"), ("03", "A3"), ("04", "A4")]
        );
    }

    #[test]
    fn length_mismatch_skips_only_that_session() {
        let raw = r#"[
            {"commands": ["[01]", "[02]"], "responses": ["[A1]"]},
            {"commands": ["[03]"], "responses": ["[A3]"]}
        ]"#;
        let (capture, report) = parse_with_report(raw).unwrap();
        assert_eq!(pairs(&capture), vec![("03", "A3")]);
        assert_eq!(report.sessions, 2);
        assert_eq!(report.accepted, 1);
        assert_eq!(
            report.skipped,
            vec![(
                0,
                SkipReason::LengthMismatch {
                    commands: 2,
                    responses: 1
                }
            )]
        );
    }

    #[test]
    fn missing_or_non_array_fields_skip() {
        let raw = r#"[
            {"responses": ["[A1]"]},
            {"commands": ["[01]"]},
            {"commands": "[01]", "responses": ["[A1]"]},
            {"commands": [], "responses": []}
        ]"#;
        let (capture, report) = parse_with_report(raw).unwrap();
        assert!(capture.is_empty());
        assert_eq!(report.accepted, 1);
        let reasons: Vec<_> = report.skipped.iter().map(|(_, r)| r.clone()).collect();
        assert_eq!(
            reasons,
            vec![
                SkipReason::MissingCommands,
                SkipReason::MissingResponses,
                SkipReason::MissingCommands,
            ]
        );
    }

    #[test]
    fn array_frame_values_normalize_too() {
        let raw = r#"[{"commands": [["00", "B0"]], "responses": [["90", "00"]]}]"#;
        let capture = parse(raw).unwrap();
        assert_eq!(pairs(&capture), vec![("00B0", "9000")]);
    }

    #[test]
    fn extra_keys_are_ignored() {
        let raw = r#"[{"name": "x", "commands": ["[01]"], "responses": ["[02]"], "ts": 4}]"#;
        assert_eq!(parse(raw).unwrap().len(), 1);
    }

    #[test]
    fn non_array_root_is_fatal() {
        let err = parse(r#"{"commands": [], "responses": []}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedCapture(_)));
    }

    #[test]
    fn non_object_element_is_fatal() {
        let err = parse(r#"[{"commands": [], "responses": []}, 3]"#).unwrap_err();
        match err {
            Error::MalformedCapture(msg) => assert!(msg.contains("session 1")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn invalid_json_is_fatal() {
        assert!(matches!(parse("[{"), Err(Error::MalformedCapture(_))));
    }
}
