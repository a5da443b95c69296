use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

use crate::capture::{self, ParseReport};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::table::{ExhaustionPolicy, ReplayTable, TableStats};

pub const DEFAULT_LOG_CAPACITY: usize = 64;

/// One answered (or missed) inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub seq: u64,
    pub command: Frame,
    /// `None` when nothing was recorded for the command.
    pub response: Option<Frame>,
}

/// Immutable view of the emulator for status displays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub capture: Option<String>,
    pub exchanges: usize,
    pub policy: ExhaustionPolicy,
    pub stats: TableStats,
    pub log: Vec<LogEntry>,
}

struct State {
    capture: Option<String>,
    exchanges: usize,
    table: ReplayTable,
    log: VecDeque<LogEntry>,
    seq: u64,
}

/// Shared replay state: the loaded table, a bounded transaction log and a
/// snapshot feed.
///
/// Loading parses and builds outside the lock and installs the new table in
/// one assignment, so answers never see a half-built table and a failed load
/// leaves the previous one in place.
pub struct Emulator {
    state: Mutex<State>,
    policy: ExhaustionPolicy,
    log_capacity: usize,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new(ExhaustionPolicy::default(), DEFAULT_LOG_CAPACITY)
    }
}

impl Emulator {
    pub fn new(policy: ExhaustionPolicy, log_capacity: usize) -> Self {
        let (status_tx, _) = watch::channel(StatusSnapshot {
            policy,
            ..StatusSnapshot::default()
        });
        Self {
            state: Mutex::new(State {
                capture: None,
                exchanges: 0,
                table: ReplayTable::build_with_policy(Vec::new(), policy),
                log: VecDeque::new(),
                seq: 0,
            }),
            policy,
            log_capacity,
            status_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave the table half-swapped.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Parse `raw` and replace the loaded table with it.
    pub fn load(&self, name: impl Into<String>, raw: &str) -> Result<ParseReport> {
        let name = name.into();
        let (capture, report) = capture::parse_with_report(raw).map_err(|err| {
            tracing::debug!(capture = %name, error = %err, "capture rejected");
            err
        })?;
        let table = ReplayTable::build_with_policy(capture, self.policy);
        tracing::info!(
            capture = %name,
            exchanges = report.exchanges,
            commands = table.len(),
            skipped = report.skipped.len(),
            "capture loaded"
        );

        let mut state = self.lock();
        *state = State {
            capture: Some(name),
            exchanges: report.exchanges,
            table,
            log: VecDeque::new(),
            seq: 0,
        };
        self.publish(&state);
        Ok(report)
    }

    /// Answer one inbound command from the loaded table.
    pub fn answer(&self, command: &Frame) -> Option<Frame> {
        self.exchange(command).response
    }

    /// Answer `command` and return the transaction log entry it produced.
    pub fn exchange(&self, command: &Frame) -> LogEntry {
        let mut state = self.lock();
        self.record(&mut state, command.clone())
    }

    /// Answer raw inbound bytes.
    ///
    /// Bytes render as uppercase hex; a capture recorded in lowercase hex is
    /// matched through its lowercase rendering instead.
    pub fn exchange_apdu(&self, apdu: &[u8]) -> LogEntry {
        let mut state = self.lock();
        let upper = Frame::from_bytes(apdu);
        let command = if state.table.contains(&upper) {
            upper
        } else {
            let lower = Frame::new(&hex::encode(apdu));
            if state.table.contains(&lower) {
                lower
            } else {
                upper
            }
        };
        self.record(&mut state, command)
    }

    /// Answer raw inbound bytes, returning raw response bytes.
    pub fn answer_apdu(&self, apdu: &[u8]) -> Result<Option<Vec<u8>>> {
        let LogEntry {
            command, response, ..
        } = self.exchange_apdu(apdu);
        match response {
            Some(response) => response
                .to_bytes()
                .map(Some)
                .map_err(|_| Error::InvalidResponse { command, response }),
            None => Ok(None),
        }
    }

    fn record(&self, state: &mut State, command: Frame) -> LogEntry {
        let response = state.table.answer(&command).cloned();
        match &response {
            Some(r) => tracing::debug!(%command, response = %r, "replay hit"),
            None => tracing::debug!(%command, "replay miss"),
        }

        state.seq += 1;
        let entry = LogEntry {
            seq: state.seq,
            command,
            response,
        };
        if self.log_capacity > 0 {
            if state.log.len() == self.log_capacity {
                state.log.pop_front();
            }
            state.log.push_back(entry.clone());
        }
        self.publish(state);
        entry
    }

    /// Rewind all cursors and clear the transaction log; the table stays loaded.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.table.reset();
        state.log.clear();
        state.seq = 0;
        self.publish(&state);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.status_tx.borrow().clone()
    }

    /// Receive a new snapshot after every load, answer and reset.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    fn publish(&self, state: &State) {
        let snapshot = StatusSnapshot {
            capture: state.capture.clone(),
            exchanges: state.exchanges,
            policy: self.policy,
            stats: state.table.stats(),
            log: state.log.iter().cloned().collect(),
        };
        self.status_tx.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPTURE_1: &str = r#"[
        {"commands": ["[00, A4, 04, 00]", "[00, A4, 04, 00]"], "responses": ["[61, 10]", "[90, 00]"]},
        {"commands": ["[80, CA]"], "responses": ["[01, 02, 90, 00]"]}
    ]"#;
    const CAPTURE_2: &str = r#"[{"commands": ["[00, B0]"], "responses": ["[6A, 82]"]}]"#;

    fn f(s: &str) -> Frame {
        Frame::new(s)
    }

    #[test]
    fn answers_before_load_are_misses() {
        let emu = Emulator::default();
        assert_eq!(emu.answer(&f("00A40400")), None);
        let snap = emu.snapshot();
        assert_eq!(snap.capture, None);
        assert_eq!(snap.stats.misses, 1);
    }

    #[test]
    fn load_then_answer_in_order() {
        let emu = Emulator::default();
        let report = emu.load("card.json", CAPTURE_1).unwrap();
        assert_eq!(report.exchanges, 3);
        assert_eq!(emu.answer(&f("00A40400")), Some(f("6110")));
        assert_eq!(emu.answer(&f("00A40400")), Some(f("9000")));
        assert_eq!(emu.answer(&f("00A40400")), Some(f("9000")));
        assert_eq!(emu.answer(&f("80CA")), Some(f("01029000")));
    }

    #[test]
    fn failed_load_keeps_previous_table() {
        let emu = Emulator::default();
        emu.load("card.json", CAPTURE_1).unwrap();
        assert_eq!(emu.answer(&f("00A40400")), Some(f("6110")));

        assert!(emu.load("broken.json", "{\"not\": \"an array\"}").is_err());
        assert_eq!(emu.answer(&f("00A40400")), Some(f("9000")));
        assert_eq!(emu.snapshot().capture.as_deref(), Some("card.json"));
    }

    #[test]
    fn reload_replaces_everything() {
        let emu = Emulator::default();
        emu.load("one.json", CAPTURE_1).unwrap();
        emu.answer(&f("00A40400"));
        emu.load("two.json", CAPTURE_2).unwrap();

        assert_eq!(emu.answer(&f("00A40400")), None);
        assert_eq!(emu.answer(&f("00B0")), Some(f("6A82")));
        let snap = emu.snapshot();
        assert_eq!(snap.capture.as_deref(), Some("two.json"));
        assert_eq!(snap.log.len(), 2);
        assert_eq!(snap.log[0].seq, 1);
    }

    #[test]
    fn answer_apdu_round_trips_bytes() {
        let emu = Emulator::default();
        emu.load("card.json", CAPTURE_1).unwrap();
        let resp = emu.answer_apdu(&[0x80, 0xCA]).unwrap();
        assert_eq!(resp, Some(vec![0x01, 0x02, 0x90, 0x00]));
        assert_eq!(emu.answer_apdu(&[0xFF]).unwrap(), None);
    }

    #[test]
    fn answer_apdu_reports_non_hex_response() {
        let emu = Emulator::default();
        emu.load("odd.json", r#"[{"commands": ["[01]"], "responses": ["[OK]"]}]"#)
            .unwrap();
        let err = emu.answer_apdu(&[0x01]).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse { .. }));
    }

    #[test]
    fn log_is_bounded_newest_last() {
        let emu = Emulator::new(ExhaustionPolicy::Saturate, 2);
        emu.load("card.json", CAPTURE_1).unwrap();
        emu.answer(&f("00A40400"));
        emu.answer(&f("80CA"));
        emu.answer(&f("FFFF"));
        let log = emu.snapshot().log;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].command, f("80CA"));
        assert_eq!(log[1].command, f("FFFF"));
        assert_eq!(log[1].response, None);
        assert_eq!(log[1].seq, 3);
    }

    #[test]
    fn huge_log_capacity_does_not_preallocate() {
        let emu = Emulator::new(ExhaustionPolicy::Saturate, usize::MAX / 2);
        emu.load("card.json", CAPTURE_1).unwrap();
        emu.load("card.json", CAPTURE_1).unwrap();
        assert_eq!(emu.answer(&f("80CA")), Some(f("01029000")));
        assert_eq!(emu.snapshot().log.len(), 1);
    }

    #[test]
    fn exchange_returns_sequenced_entry() {
        let emu = Emulator::default();
        emu.load("card.json", CAPTURE_1).unwrap();
        let first = emu.exchange(&f("00A40400"));
        let second = emu.exchange(&f("FFFF"));
        assert_eq!(first.seq, 1);
        assert_eq!(first.response, Some(f("6110")));
        assert_eq!(second.seq, 2);
        assert_eq!(second.response, None);
    }

    #[test]
    fn lowercase_capture_matches_live_bytes() {
        let emu = Emulator::default();
        emu.load(
            "lower.json",
            r#"[{"commands": ["[00, a4]", "[00, a4]"], "responses": ["[90, 00]", "[6a, 82]"]}]"#,
        )
        .unwrap();
        let entry = emu.exchange_apdu(&[0x00, 0xA4]);
        assert_eq!(entry.command, f("00a4"));
        assert_eq!(entry.response, Some(f("9000")));
        assert_eq!(emu.answer_apdu(&[0x00, 0xA4]).unwrap(), Some(vec![0x6A, 0x82]));
        assert_eq!(emu.snapshot().stats.misses, 0);
    }

    #[test]
    fn reset_rewinds_and_clears_log() {
        let emu = Emulator::default();
        emu.load("card.json", CAPTURE_1).unwrap();
        emu.answer(&f("00A40400"));
        emu.reset();
        assert!(emu.snapshot().log.is_empty());
        assert_eq!(emu.answer(&f("00A40400")), Some(f("6110")));
    }

    #[test]
    fn subscribers_see_updates() {
        let emu = Emulator::default();
        let mut rx = emu.subscribe();
        emu.load("card.json", CAPTURE_1).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().capture.as_deref(), Some("card.json"));
        emu.answer(&f("80CA"));
        assert_eq!(rx.borrow_and_update().stats.hits, 1);
    }
}
