//! Event log for checking mutual exclusion.
//!
//! Mutations record `Enter` when they start and `Exit` just before they
//! return. For transactions that share a lock token the log must read as a
//! strict sequence of `Enter(a) Exit(a) Enter(b) Exit(b) ...`.

use parking_lot::Mutex;

/// One entry of an [`EventLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A mutation started.
    Enter(usize),
    /// A mutation is about to return.
    Exit(usize),
}

/// Thread-safe append-only log of mutation windows.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of mutation `id`.
    pub fn enter(&self, id: usize) {
        self.events.lock().push(Event::Enter(id));
    }

    /// Records the end of mutation `id`.
    pub fn exit(&self, id: usize) {
        self.events.lock().push(Event::Exit(id));
    }

    /// Returns a copy of every recorded event.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Returns every pair `(inside, entering)` where a mutation started
    /// while another was still running.
    pub fn overlaps(&self) -> Vec<(usize, usize)> {
        let mut inside: Option<usize> = None;
        let mut found = Vec::new();
        for event in self.events.lock().iter() {
            match *event {
                Event::Enter(id) => {
                    if let Some(current) = inside {
                        found.push((current, id));
                    }
                    inside = Some(id);
                }
                Event::Exit(id) => {
                    if inside == Some(id) {
                        inside = None;
                    }
                }
            }
        }
        found
    }

    /// Panics if any two recorded windows overlap.
    ///
    /// # Panics
    ///
    /// Panics with the overlapping pairs.
    pub fn assert_exclusive(&self) {
        let overlaps = self.overlaps();
        assert!(
            overlaps.is_empty(),
            "mutation windows overlapped: {overlaps:?}"
        );
    }
}
