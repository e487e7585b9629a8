#![forbid(unsafe_code)]

//! Scheduling trace.
//!
//! Records what the task queue did (spawns, runs, yields, completions,
//! cancellations, failures) with a monotonic sequence number instead of
//! wall-clock time, so two runs of the same workload produce the same trace.
//! Traces hash with FNV-1a for cheap golden comparisons.
//!
//! # Example
//!
//! ```
//! use fibre_scheduler::trace::{ScheduleTrace, TaskEvent};
//! use fibre_scheduler::PriorityLevel;
//!
//! let mut trace = ScheduleTrace::new(16);
//! trace.record(TaskEvent::Spawn { task_id: 1, priority: PriorityLevel::Normal, delayed: false });
//! trace.record(TaskEvent::Run { task_id: 1, did_timeout: false });
//! trace.record(TaskEvent::Complete { task_id: 1 });
//! assert_eq!(trace.run_order(), vec![1]);
//! ```

use std::collections::VecDeque;

use crate::priority::PriorityLevel;

/// One scheduler event.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// Task entered the ready or timed heap.
    Spawn {
        task_id: u64,
        priority: PriorityLevel,
        delayed: bool,
    },
    /// Timed task became ready.
    Promote { task_id: u64 },
    /// Task callback started.
    Run { task_id: u64, did_timeout: bool },
    /// Task returned a continuation and stays queued.
    Continue { task_id: u64 },
    /// Task callback finished and the task left the queue.
    Complete { task_id: u64 },
    /// Task was cancelled before it finished.
    Cancel { task_id: u64 },
    /// Task callback returned an error.
    Fail { task_id: u64, message: String },
    /// The flush loop gave control back to the host.
    Yield { pending: usize },
}

/// Traced event with its sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry {
    pub seq: u64,
    pub event: TaskEvent,
}

/// Bounded ring of [`TraceEntry`] values.
#[derive(Debug, Clone)]
pub struct ScheduleTrace {
    entries: VecDeque<TraceEntry>,
    max_entries: usize,
    seq: u64,
}

impl ScheduleTrace {
    /// Create a trace that keeps at most `max_entries` (0 = unbounded).
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries,
            seq: 0,
        }
    }

    /// Append an event, evicting the oldest one when full.
    pub fn record(&mut self, event: TaskEvent) {
        if self.max_entries > 0 && self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(TraceEntry {
            seq: self.seq,
            event,
        });
        self.seq += 1;
    }

    /// Recorded entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been recorded (or everything was evicted).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries. The sequence counter keeps counting.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Task ids in the order their callbacks started.
    ///
    /// A task that yields with a continuation appears once per slice.
    pub fn run_order(&self) -> Vec<u64> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.event {
                TaskEvent::Run { task_id, .. } => Some(task_id),
                _ => None,
            })
            .collect()
    }

    /// Task ids in the order they completed.
    pub fn completion_order(&self) -> Vec<u64> {
        self.entries
            .iter()
            .filter_map(|entry| match entry.event {
                TaskEvent::Complete { task_id } => Some(task_id),
                _ => None,
            })
            .collect()
    }

    /// FNV-1a 64-bit hash over sequence numbers and event payloads.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        const FNV_OFFSET: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x100000001b3;

        let mut hash = FNV_OFFSET;
        let mut feed = |bytes: &[u8]| {
            for byte in bytes {
                hash ^= u64::from(*byte);
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        };
        for entry in &self.entries {
            feed(&entry.seq.to_le_bytes());
            match &entry.event {
                TaskEvent::Spawn {
                    task_id,
                    priority,
                    delayed,
                } => {
                    feed(&[0]);
                    feed(&task_id.to_le_bytes());
                    feed(&[*priority as u8, u8::from(*delayed)]);
                }
                TaskEvent::Promote { task_id } => {
                    feed(&[1]);
                    feed(&task_id.to_le_bytes());
                }
                TaskEvent::Run {
                    task_id,
                    did_timeout,
                } => {
                    feed(&[2]);
                    feed(&task_id.to_le_bytes());
                    feed(&[u8::from(*did_timeout)]);
                }
                TaskEvent::Continue { task_id } => {
                    feed(&[3]);
                    feed(&task_id.to_le_bytes());
                }
                TaskEvent::Complete { task_id } => {
                    feed(&[4]);
                    feed(&task_id.to_le_bytes());
                }
                TaskEvent::Cancel { task_id } => {
                    feed(&[5]);
                    feed(&task_id.to_le_bytes());
                }
                TaskEvent::Fail { task_id, message } => {
                    feed(&[6]);
                    feed(&task_id.to_le_bytes());
                    feed(message.as_bytes());
                }
                TaskEvent::Yield { pending } => {
                    feed(&[7]);
                    feed(&(*pending as u64).to_le_bytes());
                }
            }
        }
        hash
    }
}

impl Default for ScheduleTrace {
    fn default() -> Self {
        Self::new(4_096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ScheduleTrace {
        let mut trace = ScheduleTrace::new(0);
        trace.record(TaskEvent::Spawn {
            task_id: 1,
            priority: PriorityLevel::Normal,
            delayed: false,
        });
        trace.record(TaskEvent::Run {
            task_id: 1,
            did_timeout: false,
        });
        trace.record(TaskEvent::Continue { task_id: 1 });
        trace.record(TaskEvent::Run {
            task_id: 1,
            did_timeout: true,
        });
        trace.record(TaskEvent::Complete { task_id: 1 });
        trace
    }

    #[test]
    fn run_order_counts_each_slice() {
        assert_eq!(sample().run_order(), vec![1, 1]);
        assert_eq!(sample().completion_order(), vec![1]);
    }

    #[test]
    fn checksum_is_deterministic() {
        assert_eq!(sample().checksum(), sample().checksum());
    }

    #[test]
    fn checksum_detects_reordering() {
        let mut other = ScheduleTrace::new(0);
        other.record(TaskEvent::Run {
            task_id: 1,
            did_timeout: false,
        });
        other.record(TaskEvent::Spawn {
            task_id: 1,
            priority: PriorityLevel::Normal,
            delayed: false,
        });
        assert_ne!(sample().checksum(), other.checksum());
    }

    #[test]
    fn bounded_trace_evicts_oldest() {
        let mut trace = ScheduleTrace::new(2);
        for task_id in 0..5 {
            trace.record(TaskEvent::Complete { task_id });
        }
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.completion_order(), vec![3, 4]);
        let first = trace.entries().next().map(|e| e.seq);
        assert_eq!(first, Some(3));
    }
}
