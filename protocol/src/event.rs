use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

use crate::testcase::TestCase;

/// Classification of one observable occurrence on the driver/candidate
/// conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    /// A scripted command was sent. `details` carries the serialized command
    /// so the grading evaluator can replay the conversation positionally.
    Input,
    /// One logical line of candidate output (or a prompt).
    Output,
    /// A wait on the candidate expired.
    Timeout,
    /// A POSIX signal was delivered to the sandbox.
    Signal,
    /// The driver itself failed; the run is aborted and graded as a failure.
    Error,
    /// The candidate closed its side of the PTY.
    Eof,
}

/// A typed, timestamped record of one conversation step. Events are
/// append-only and strictly time-ordered within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub details: String,
}

impl Event {
    pub fn new(kind: EventType, details: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            kind,
            details: details.into(),
        }
    }
}

/// Everything a single test run produced: the test case that was executed,
/// the event stream, the verbatim PTY transcript (with restart separators
/// between sandbox sessions), and the driver's own diagnostic log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub testcase: TestCase,
    pub events: Vec<Event>,
    pub raw_log: String,
    pub driver_log: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn event_type_serializes_snake_case() {
        let json = serde_json::to_string(&EventType::Eof).unwrap();
        assert_eq!(json, "\"eof\"");
        assert_eq!(EventType::Timeout.to_string(), "timeout");
    }

    #[test]
    fn event_roundtrips() {
        let event = Event::new(EventType::Output, "hello");
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
