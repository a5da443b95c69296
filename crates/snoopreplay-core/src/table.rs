use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::frame::{Exchange, Frame};

/// What a command's cursor does once every recorded response has been served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Keep serving the last recorded response.
    #[default]
    Saturate,
    /// Wrap back to the first recorded response.
    Cycle,
}

impl std::str::FromStr for ExhaustionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "saturate" => Ok(Self::Saturate),
            "cycle" => Ok(Self::Cycle),
            other => Err(format!("unknown exhaustion policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    responses: Vec<Frame>,
    cursor: usize,
}

impl Entry {
    fn next(&mut self, policy: ExhaustionPolicy) -> &Frame {
        let index = self.cursor;
        let last = self.responses.len() - 1;
        self.cursor = match policy {
            ExhaustionPolicy::Saturate => (index + 1).min(last),
            ExhaustionPolicy::Cycle => (index + 1) % self.responses.len(),
        };
        &self.responses[index]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub commands: usize,
    pub responses: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Recorded responses grouped by command, each with its own replay cursor.
#[derive(Debug, Clone, Default)]
pub struct ReplayTable {
    entries: HashMap<Frame, Entry>,
    policy: ExhaustionPolicy,
    hits: u64,
    misses: u64,
}

impl ReplayTable {
    /// Group `exchanges` by command, keeping responses in capture order.
    pub fn build(exchanges: impl IntoIterator<Item = Exchange>) -> Self {
        Self::build_with_policy(exchanges, ExhaustionPolicy::default())
    }

    pub fn build_with_policy(
        exchanges: impl IntoIterator<Item = Exchange>,
        policy: ExhaustionPolicy,
    ) -> Self {
        let mut entries: HashMap<Frame, Entry> = HashMap::new();
        for Exchange { command, response } in exchanges {
            entries
                .entry(command)
                .or_insert_with(|| Entry {
                    responses: Vec::new(),
                    cursor: 0,
                })
                .responses
                .push(response);
        }
        Self {
            entries,
            policy,
            hits: 0,
            misses: 0,
        }
    }

    /// Serve the next recorded response for `command`, or `None` if it was never recorded.
    pub fn answer(&mut self, command: &Frame) -> Option<&Frame> {
        match self.entries.get_mut(command) {
            Some(entry) => {
                self.hits += 1;
                Some(entry.next(self.policy))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Rewind every cursor to the first response.
    pub fn reset(&mut self) {
        for entry in self.entries.values_mut() {
            entry.cursor = 0;
        }
        self.hits = 0;
        self.misses = 0;
    }

    pub fn contains(&self, command: &Frame) -> bool {
        self.entries.contains_key(command)
    }

    /// All recorded responses for `command`, in capture order.
    pub fn responses(&self, command: &Frame) -> Option<&[Frame]> {
        self.entries.get(command).map(|e| e.responses.as_slice())
    }

    /// Commands in sorted order, for stable display.
    pub fn commands(&self) -> Vec<&Frame> {
        let mut commands: Vec<_> = self.entries.keys().collect();
        commands.sort();
        commands
    }

    pub fn policy(&self) -> ExhaustionPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> TableStats {
        TableStats {
            commands: self.entries.len(),
            responses: self.entries.values().map(|e| e.responses.len()).sum(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(s: &str) -> Frame {
        Frame::new(s)
    }

    fn sample() -> Vec<Exchange> {
        vec![
            Exchange::new("A", "R1"),
            Exchange::new("A", "R2"),
            Exchange::new("B", "R3"),
        ]
    }

    #[test]
    fn repeated_command_replays_in_order_then_saturates() {
        let mut table = ReplayTable::build(sample());
        assert_eq!(table.answer(&f("A")), Some(&f("R1")));
        assert_eq!(table.answer(&f("A")), Some(&f("R2")));
        assert_eq!(table.answer(&f("B")), Some(&f("R3")));
        assert_eq!(table.answer(&f("A")), Some(&f("R2")));
        assert_eq!(table.answer(&f("A")), Some(&f("R2")));
        assert_eq!(table.answer(&f("B")), Some(&f("R3")));
    }

    #[test]
    fn cycle_policy_wraps() {
        let mut table = ReplayTable::build_with_policy(sample(), ExhaustionPolicy::Cycle);
        assert_eq!(table.answer(&f("A")), Some(&f("R1")));
        assert_eq!(table.answer(&f("A")), Some(&f("R2")));
        assert_eq!(table.answer(&f("A")), Some(&f("R1")));
        assert_eq!(table.answer(&f("B")), Some(&f("R3")));
        assert_eq!(table.answer(&f("B")), Some(&f("R3")));
    }

    #[test]
    fn unknown_command_is_none_every_time() {
        let mut table = ReplayTable::build(sample());
        for _ in 0..3 {
            assert_eq!(table.answer(&f("C")), None);
        }
        assert_eq!(table.stats().misses, 3);
        assert_eq!(table.stats().hits, 0);
    }

    #[test]
    fn empty_table_answers_nothing() {
        let mut table = ReplayTable::build(Vec::new());
        assert!(table.is_empty());
        assert_eq!(table.answer(&f("A")), None);
    }

    #[test]
    fn rebuild_discards_previous_state() {
        let mut table = ReplayTable::build(sample());
        table.answer(&f("A"));
        table.answer(&f("A"));

        table = ReplayTable::build(vec![Exchange::new("A", "S1"), Exchange::new("A", "S2")]);
        assert_eq!(table.answer(&f("A")), Some(&f("S1")));
        assert_eq!(table.answer(&f("B")), None);
        assert_eq!(table.stats().hits, 1);
    }

    #[test]
    fn reset_rewinds_cursors() {
        let mut table = ReplayTable::build(sample());
        table.answer(&f("A"));
        table.answer(&f("A"));
        table.reset();
        assert_eq!(table.answer(&f("A")), Some(&f("R1")));
    }

    #[test]
    fn responses_keep_capture_order() {
        let table = ReplayTable::build(sample());
        assert_eq!(table.responses(&f("A")), Some(&[f("R1"), f("R2")][..]));
        assert_eq!(table.commands(), vec![&f("A"), &f("B")]);
        assert!(table.contains(&f("B")));
        assert!(!table.contains(&f("C")));
        let stats = table.stats();
        assert_eq!(stats.commands, 2);
        assert_eq!(stats.responses, 3);
    }

    #[test]
    fn policy_from_str() {
        assert_eq!("cycle".parse::<ExhaustionPolicy>(), Ok(ExhaustionPolicy::Cycle));
        assert_eq!(
            "saturate".parse::<ExhaustionPolicy>(),
            Ok(ExhaustionPolicy::Saturate)
        );
        assert!("wrap".parse::<ExhaustionPolicy>().is_err());
    }
}
