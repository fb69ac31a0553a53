//! Output aggregation for task-logic output.
//!
//! Task logic emits arbitrary text fragments (partial lines, escape-laden
//! progress updates). The aggregator coalesces them into coherent log events
//! for the presentation layer, flushing when a fragment completes a line, the
//! buffer grows past 100 characters, or half a second has passed since the
//! last flush. Emission is an unbounded channel send and never blocks the
//! producer.

use crate::runtime::{EventSink, RuntimeEvent};
use std::time::{Duration, Instant};

/// Buffer length (in characters) beyond which a flush is forced.
const FLUSH_MAX_CHARS: usize = 100;

/// Maximum buffer age before the next write forces a flush.
const FLUSH_MAX_AGE: Duration = Duration::from_millis(500);

/// Coalesces fragmented task output into discrete log events.
///
/// Owned and mutated exclusively by the run's worker context; only emits
/// (read-only) events outward.
pub struct OutputAggregator {
    sink: EventSink,
    buf: String,
    last_flush: Instant,
}

impl OutputAggregator {
    /// Create an aggregator emitting through the given sink.
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            buf: String::new(),
            last_flush: Instant::now(),
        }
    }

    /// Accept an output fragment, flushing if any trigger condition holds.
    pub fn write(&mut self, fragment: &str) {
        self.write_at(Instant::now(), fragment);
    }

    /// Emit any remaining non-whitespace buffer content (used at run end).
    ///
    /// Idempotent: a second immediate call emits nothing.
    pub fn flush(&mut self) {
        self.flush_at(Instant::now());
    }

    pub(crate) fn write_at(&mut self, now: Instant, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        self.buf.push_str(fragment);

        let should_flush = self.buf.ends_with('\n')
            || self.buf.chars().count() > FLUSH_MAX_CHARS
            || now.duration_since(self.last_flush) > FLUSH_MAX_AGE;

        if should_flush {
            self.flush_at(now);
        }
    }

    pub(crate) fn flush_at(&mut self, now: Instant) {
        if self.buf.trim().is_empty() {
            return;
        }
        let line = std::mem::take(&mut self.buf);
        self.sink.emit(RuntimeEvent::Log(line));
        self.last_flush = now;
    }
}
