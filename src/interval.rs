//! Splits a date range into calendar-aligned, contiguous half-open intervals.

use crate::error::EtlError;
use crate::period::Period;
use crate::types::{TimeInterval, Timestamp};

/// Lazy, restartable sequence of `[t, next_period_start(t))` intervals covering an aligned range.
///
/// Cloning the iterator yields an independent walk from the current position, so a fresh
/// [`Intervals`] can be replayed any number of times.
#[derive(Debug, Clone)]
pub struct Intervals {
    period: Period,
    cursor: Timestamp,
    end: Timestamp,
}

impl Intervals {
    /// Aligns `from` down to the start of its period and `to` up to the start of the period
    /// following its own, then walks the aligned range.
    ///
    /// # Errors
    /// Returns [`EtlError::TimestampOutOfRange`] if alignment overflows the calendar.
    pub fn new(from: Timestamp, to: Timestamp, period: Period) -> Result<Self, EtlError> {
        let start = period.period_start(from)?;
        let end = period.next_period_start(to)?;
        Ok(Intervals {
            period,
            cursor: start,
            end,
        })
    }

    pub fn period(&self) -> Period {
        self.period
    }

    /// Aligned start of the remaining range.
    pub fn aligned_start(&self) -> Timestamp {
        self.cursor
    }

    /// Aligned (exclusive) end of the range.
    pub fn aligned_end(&self) -> Timestamp {
        self.end
    }

    /// Returns true if no intervals remain.
    pub fn is_empty(&self) -> bool {
        self.cursor >= self.end
    }
}

impl Iterator for Intervals {
    type Item = TimeInterval;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }
        // The aligned end is itself reachable, so overflow here only happens at the calendar's edge.
        let next = self.period.next_period_start(self.cursor).ok()?;
        let interval = TimeInterval::new(self.cursor, next);
        self.cursor = next;
        Some(interval)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.cursor >= self.end {
            return (0, Some(0));
        }
        // Months and longer vary in length; count by walking a copy for those.
        let exact = match self.period {
            Period::Hour => count_fixed(self.cursor, self.end, 3600),
            Period::Day => count_fixed(self.cursor, self.end, 86_400),
            Period::Week => count_fixed(self.cursor, self.end, 7 * 86_400),
            Period::Month | Period::Quarter | Period::Year => {
                let mut walker = Intervals {
                    period: self.period,
                    cursor: self.cursor,
                    end: self.end,
                };
                let mut n = 0usize;
                while walker.cursor < walker.end {
                    match walker.period.next_period_start(walker.cursor) {
                        Ok(next) => walker.cursor = next,
                        Err(_) => break,
                    }
                    n += 1;
                }
                n
            }
        };
        (exact, Some(exact))
    }
}

fn count_fixed(start: Timestamp, end: Timestamp, step_secs: i64) -> usize {
    let secs = (end - start).num_seconds();
    // Both ends are aligned, so the division is exact.
    (secs / step_secs).max(0) as usize
}

impl ExactSizeIterator for Intervals {}

/// Partitions `[from, to]` into intervals of `period`.
///
/// Empty when the aligned start is not before the aligned end.
pub fn partition(from: Timestamp, to: Timestamp, period: Period) -> Result<Intervals, EtlError> {
    Intervals::new(from, to, period)
}
