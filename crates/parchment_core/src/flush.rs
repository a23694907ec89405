//! Flush strategy (§4.3): decides when a writer's buffered updates become a
//! packed file on disk.

use std::time::Duration;

/// Snapshot of a note's pending buffer, passed to a strategy on every
/// `addUpdate`.
#[derive(Debug, Clone, Copy)]
pub struct BufferState {
    /// Number of updates currently buffered.
    pub update_count: usize,
    /// Total encoded byte size of buffered updates.
    pub total_bytes: usize,
}

/// A stateful flush decider. Strategies are per-note; the store owns the
/// idle timer, the strategy only advises when to arm or cancel it.
pub trait FlushStrategy: Send + Sync {
    /// Should the store flush right now, given the current buffer state?
    fn should_flush_now(&self, state: BufferState) -> bool;

    /// Idle duration to arm a single-shot timer for, if this strategy uses
    /// one. `None` means no timer is needed (e.g. `Immediate`, `Count`).
    fn idle_duration(&self) -> Option<Duration> {
        None
    }

    /// Called after a successful flush to reset any internal state.
    fn reset(&self) {}
}

/// Flush once `max_updates` or `max_bytes` is reached; otherwise rely on a
/// single-shot idle timer rearmed on every new update.
#[derive(Debug, Clone, Copy)]
pub struct Idle {
    /// Flush immediately once the buffer holds this many updates.
    pub max_updates: usize,
    /// Flush immediately once the buffer holds this many bytes.
    pub max_bytes: usize,
    /// How long to wait with no new updates before flushing.
    pub idle: Duration,
}

impl Default for Idle {
    fn default() -> Self {
        Idle {
            max_updates: 100,
            max_bytes: 1024 * 1024,
            idle: Duration::from_millis(3000),
        }
    }
}

impl FlushStrategy for Idle {
    fn should_flush_now(&self, state: BufferState) -> bool {
        state.update_count >= self.max_updates || state.total_bytes >= self.max_bytes
    }

    fn idle_duration(&self) -> Option<Duration> {
        Some(self.idle)
    }
}

/// Flush after every single update.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl FlushStrategy for Immediate {
    fn should_flush_now(&self, _state: BufferState) -> bool {
        true
    }
}

/// Flush once the buffer reaches exactly `n` updates.
#[derive(Debug, Clone, Copy)]
pub struct Count(pub usize);

impl FlushStrategy for Count {
    fn should_flush_now(&self, state: BufferState) -> bool {
        state.update_count >= self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(update_count: usize, total_bytes: usize) -> BufferState {
        BufferState {
            update_count,
            total_bytes,
        }
    }

    #[test]
    fn idle_flushes_on_update_count() {
        let idle = Idle {
            max_updates: 3,
            ..Idle::default()
        };
        assert!(!idle.should_flush_now(state(2, 10)));
        assert!(idle.should_flush_now(state(3, 10)));
    }

    #[test]
    fn idle_flushes_on_byte_size() {
        let idle = Idle {
            max_bytes: 100,
            ..Idle::default()
        };
        assert!(!idle.should_flush_now(state(1, 99)));
        assert!(idle.should_flush_now(state(1, 100)));
    }

    #[test]
    fn immediate_always_flushes() {
        assert!(Immediate.should_flush_now(state(0, 0)));
        assert!(Immediate.should_flush_now(state(1, 1)));
    }

    #[test]
    fn count_flushes_at_threshold() {
        let count = Count(3);
        assert!(!count.should_flush_now(state(2, 0)));
        assert!(count.should_flush_now(state(3, 0)));
    }
}
