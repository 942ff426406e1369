//! Execution Timeline
//!
//! Tracks step events of a single coroutine run for execution reports.
//! Offsets are measured with a monotonic clock, timestamps are wall-clock
//! for correlation with log output.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Step started executing
    Started,
    /// Step completed successfully
    Completed,
    /// Step failed
    Failed,
    /// Step suspended the run
    Suspended,
    /// A suspension of the step was resumed
    Resumed,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEvent {
    /// Label of the step
    pub step: String,
    /// Type of event
    pub event_type: EventType,
    /// Wall-clock time of the event
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the timeline was created
    pub offset_ms: u128,
}

/// Tracks the execution timeline of a coroutine run.
///
/// Records when each step starts, completes, fails, suspends or resumes.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    #[serde(skip)]
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for a step.
    pub fn add_event(&mut self, step: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            step: step.into(),
            event_type,
            timestamp: Utc::now(),
            offset_ms: self.start_time.elapsed().as_millis(),
        });
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Returns true if no event was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Returns the labels of all started steps in execution order.
    pub fn executed_steps(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter(|event| event.event_type == EventType::Started)
            .map(|event| event.step.as_str())
            .collect()
    }

    /// Returns step durations in milliseconds, in execution order.
    ///
    /// A step that appears several times in a chain yields one entry per
    /// execution. Suspended time is not part of a step's duration.
    pub fn get_durations(&self) -> Vec<(String, u128)> {
        let mut open: Vec<(&str, u128)> = Vec::new();
        let mut durations = Vec::new();

        for event in &self.events {
            match event.event_type {
                EventType::Started => open.push((event.step.as_str(), event.offset_ms)),
                EventType::Completed | EventType::Failed | EventType::Suspended => {
                    if let Some(index) = open.iter().rposition(|(step, _)| *step == event.step) {
                        let (step, start) = open.remove(index);
                        durations.push((step.to_string(), event.offset_ms - start));
                    }
                }
                EventType::Resumed => {}
            }
        }

        durations
    }

    /// Generates a textual per-step summary of the run.
    pub fn summary(&self) -> String {
        let mut output = String::from("Execution Timeline:\n");

        for event in &self.events {
            output.push_str(&format!(
                "{:>8} ms  {:16} {:?}\n",
                event.offset_ms,
                truncate(&event.step, 16),
                event.event_type
            ));
        }

        output.push_str(&format!("Total: {} ms\n", self.elapsed().as_millis()));
        output
    }

    /// Serializes the recorded events as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_timeline_creation() {
        let timeline = ExecutionTimeline::new();
        assert!(timeline.is_empty());
    }

    #[test]
    fn test_get_durations() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("Double", EventType::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.add_event("Double", EventType::Completed);

        let durations = timeline.get_durations();
        assert_eq!(durations.len(), 1);
        assert_eq!(durations[0].0, "Double");
        assert!(durations[0].1 >= 30);
    }

    #[test]
    fn test_repeated_step_gets_one_duration_per_execution() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("AddOne", EventType::Started);
        timeline.add_event("AddOne", EventType::Completed);
        timeline.add_event("AddOne", EventType::Started);
        timeline.add_event("AddOne", EventType::Failed);

        assert_eq!(timeline.get_durations().len(), 2);
        assert_eq!(timeline.executed_steps(), vec!["AddOne", "AddOne"]);
    }

    #[test]
    fn test_get_durations_only_started() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("Receive", EventType::Started);

        assert!(timeline.get_durations().is_empty());
    }

    #[test]
    fn test_suspension_closes_step_duration() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("Receive", EventType::Started);
        timeline.add_event("Receive", EventType::Suspended);
        timeline.add_event("Receive", EventType::Resumed);

        let durations = timeline.get_durations();
        assert_eq!(durations.len(), 1);
        assert_eq!(timeline.get_events()[2].event_type, EventType::Resumed);
    }

    #[test]
    fn test_summary_lists_events() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("Double", EventType::Started);
        timeline.add_event("Double", EventType::Completed);

        let summary = timeline.summary();
        assert!(summary.contains("Double"));
        assert!(summary.contains("Completed"));
        assert!(summary.contains("Total:"));
    }

    #[test]
    fn test_to_json() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("Delay", EventType::Suspended);

        let json = timeline.to_json().unwrap();
        assert!(json.contains("\"step\": \"Delay\""));
        assert!(json.contains("\"suspended\""));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 16), "short");
        assert_eq!(truncate("AVeryLongStepLabelIndeed", 10), "AVeryLo...");
    }
}
