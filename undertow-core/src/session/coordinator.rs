//! Seek/reset state machine.
//!
//! Each seek starts a new generation. Process events carry the generation
//! that produced them; anything older than the current one is stale and must
//! not reach the client after the `reset` that announced the seek.

use tracing::debug;

/// Streaming state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekState {
    Streaming,
    /// New processes spawned, no output seen from them yet
    Restarting,
}

#[derive(Debug)]
pub struct SeekCoordinator {
    state: SeekState,
    generation: u64,
    offset: f64,
}

impl Default for SeekCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SeekCoordinator {
    /// Starts streaming generation 0 at offset 0.
    pub fn new() -> Self {
        Self {
            state: SeekState::Streaming,
            generation: 0,
            offset: 0.0,
        }
    }

    /// Begins a seek and returns the generation for the new processes.
    ///
    /// A seek while already restarting supersedes the pending one.
    pub fn request_seek(&mut self, offset: f64) -> u64 {
        self.generation += 1;
        self.offset = offset;
        self.state = SeekState::Restarting;
        debug!("Seek to {}s, generation {}", offset, self.generation);
        self.generation
    }

    /// Checks an event's generation and returns true if it may be relayed.
    ///
    /// The first current-generation event completes a pending restart.
    pub fn accept(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        if self.state == SeekState::Restarting {
            debug!("Generation {} streaming", generation);
            self.state = SeekState::Streaming;
        }
        true
    }

    pub fn state(&self) -> SeekState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_transitions() {
        let mut coordinator = SeekCoordinator::new();
        assert_eq!(coordinator.state(), SeekState::Streaming);

        let generation = coordinator.request_seek(12.5);
        assert_eq!(generation, 1);
        assert_eq!(coordinator.state(), SeekState::Restarting);
        assert_eq!(coordinator.offset(), 12.5);

        assert!(!coordinator.accept(0));
        assert_eq!(coordinator.state(), SeekState::Restarting);

        assert!(coordinator.accept(1));
        assert_eq!(coordinator.state(), SeekState::Streaming);
    }

    #[test]
    fn test_overlapping_seeks_supersede() {
        let mut coordinator = SeekCoordinator::new();
        coordinator.request_seek(10.0);
        let latest = coordinator.request_seek(20.0);

        assert!(!coordinator.accept(1));
        assert!(coordinator.accept(latest));
        assert_eq!(coordinator.offset(), 20.0);
    }
}
