// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduled-event queue.
//!
//! One sorted list per actor, persisted in the actor blob. The storage
//! alarm is always armed for the head timestamp (or disarmed when empty);
//! the instance dispatches due events on alarm fire.

use uuid::Uuid;

use crate::persist::ScheduledEvent;
use crate::protocol::Value;

/// Build a new event for `action` at `timestamp` (epoch millis).
pub fn new_event(timestamp: i64, action: &str, args: Value) -> ScheduledEvent {
    ScheduledEvent { event_id: Uuid::new_v4(), timestamp, action_name: action.to_owned(), args }
}

/// Insert keeping the list sorted by timestamp; ties keep insertion order
/// (the new event lands after existing equal timestamps). Returns the
/// insert index — index 0 means the alarm must be rearmed.
pub fn insert_sorted(events: &mut Vec<ScheduledEvent>, event: ScheduledEvent) -> usize {
    let index = events.partition_point(|e| e.timestamp <= event.timestamp);
    events.insert(index, event);
    index
}

/// Splice every event with `timestamp <= now` off the front.
pub fn split_due(events: &mut Vec<ScheduledEvent>, now: i64) -> Vec<ScheduledEvent> {
    let due = events.partition_point(|e| e.timestamp <= now);
    events.drain(..due).collect()
}

/// The deadline the storage alarm should be armed for.
pub fn next_deadline(events: &[ScheduledEvent]) -> Option<i64> {
    events.first().map(|e| e.timestamp)
}

/// Sorted-ascending check (used to uphold the persisted-snapshot
/// invariant in debug assertions and tests).
pub fn is_sorted(events: &[ScheduledEvent]) -> bool {
    events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
