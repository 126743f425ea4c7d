//! Bounded in-memory diagnostics log

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Default number of entries kept before the oldest are evicted
pub const DEFAULT_LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogDirection {
    Tx,
    Rx,
    System,
}

/// Tag shown in front of a rendered entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogKind {
    Tx,
    RxAuto,
    RxFeedback,
    System,
    Error,
    Ignored,
}

impl LogKind {
    pub fn tag(&self) -> &'static str {
        match self {
            LogKind::Tx => "TX",
            LogKind::RxAuto => "RX-Auto",
            LogKind::RxFeedback => "RX-Feedback",
            LogKind::System => "System",
            LogKind::Error => "Error",
            LogKind::Ignored => "Ignored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub direction: LogDirection,
    pub kind: LogKind,
    pub topic: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Local>,
}

impl LogEntry {
    pub fn tx(topic: &str, payload: &str) -> Self {
        Self::with_topic(LogDirection::Tx, LogKind::Tx, topic, payload)
    }

    pub fn rx(kind: LogKind, topic: &str, payload: &str) -> Self {
        Self::with_topic(LogDirection::Rx, kind, topic, payload)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::message(LogDirection::System, LogKind::System, None, text)
    }

    pub fn error(direction: LogDirection, topic: Option<&str>, text: impl Into<String>) -> Self {
        Self::message(direction, LogKind::Error, topic, text)
    }

    fn with_topic(direction: LogDirection, kind: LogKind, topic: &str, payload: &str) -> Self {
        Self::message(direction, kind, Some(topic), payload)
    }

    fn message(
        direction: LogDirection,
        kind: LogKind,
        topic: Option<&str>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            direction,
            kind,
            topic: topic.map(str::to_string),
            text: text.into(),
            timestamp: Local::now(),
        }
    }

    /// Entry with its timestamp, as shown in a log view
    pub fn render(&self) -> String {
        format!("{} {}", self.timestamp.format("%H:%M:%S%.3f"), self)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (&self.kind, &self.topic) {
            (LogKind::Tx | LogKind::RxAuto | LogKind::RxFeedback, Some(topic)) => {
                write!(f, "[{}] {} -> {}", self.kind.tag(), topic, self.text)
            }
            (LogKind::Ignored, Some(topic)) => write!(f, "[{}] {}", self.kind.tag(), topic),
            (_, Some(topic)) => write!(f, "[{}] {}: {}", self.kind.tag(), topic, self.text),
            (_, None) => write!(f, "[{}] {}", self.kind.tag(), self.text),
        }
    }
}

/// Append-only log with oldest-first eviction
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    evicted: u64,
}

impl EventLog {
    /// A capacity of zero is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity,
            evicted: 0,
        }
    }

    pub fn append(&mut self, entry: LogEntry) -> &LogEntry {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries dropped so far to respect the capacity
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Last `n` entries, oldest first
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_source_style_lines() {
        assert_eq!(
            LogEntry::rx(LogKind::RxAuto, "test/topic/switch/2/val", "1").to_string(),
            "[RX-Auto] test/topic/switch/2/val -> 1"
        );
        assert_eq!(
            LogEntry::rx(LogKind::RxFeedback, "test/topic/dimmer/1/val", "40").to_string(),
            "[RX-Feedback] test/topic/dimmer/1/val -> 40"
        );
        assert_eq!(
            LogEntry::tx("home/panel/dimmer/1/set", "73").to_string(),
            "[TX] home/panel/dimmer/1/set -> 73"
        );
        assert_eq!(LogEntry::system("Connected!").to_string(), "[System] Connected!");
        assert_eq!(
            LogEntry::error(LogDirection::Rx, Some("a/number/2/val"), "bad").to_string(),
            "[Error] a/number/2/val: bad"
        );
    }

    #[test]
    fn evicts_oldest_first() {
        let mut log = EventLog::new(3);
        for n in 0..5 {
            log.append(LogEntry::system(n.to_string()));
        }

        let texts: Vec<String> = log.iter().map(|entry| entry.text.clone()).collect();
        assert_eq!(texts, vec!["2", "3", "4"]);
        assert_eq!(log.len(), 3);
        assert_eq!(log.evicted(), 2);
    }

    #[test]
    fn tail_returns_latest_entries_in_order() {
        let mut log = EventLog::new(10);
        for n in 0..4 {
            log.append(LogEntry::system(n.to_string()));
        }

        let tail: Vec<String> = log.tail(2).into_iter().map(|entry| entry.text).collect();
        assert_eq!(tail, vec!["2", "3"]);
        assert_eq!(log.tail(100).len(), 4);
        assert_eq!(log.snapshot().len(), 4);
    }

    #[test]
    fn zero_capacity_still_keeps_latest_entry() {
        let mut log = EventLog::new(0);
        log.append(LogEntry::system("a"));
        log.append(LogEntry::system("b"));
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.tail(1)[0].text, "b");
    }
}
