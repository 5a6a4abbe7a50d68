//! Live server toggles.
//!
//! Shared by reference, not snapshotted: every consumer reads a flag at the
//! moment it needs it, so a flip is observed by behavior already in flight.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct Settings {
    debug: AtomicBool,
    extra_search_path: AtomicBool,
    more: AtomicBool,
    detached_session: AtomicBool,
    show_filename: AtomicBool,
}

impl Settings {
    pub fn new(
        debug: bool,
        extra_search_path: bool,
        more: bool,
        detached_session: bool,
        show_filename: bool,
    ) -> Self {
        Self {
            debug: AtomicBool::new(debug),
            extra_search_path: AtomicBool::new(extra_search_path),
            more: AtomicBool::new(more),
            detached_session: AtomicBool::new(detached_session),
            show_filename: AtomicBool::new(show_filename),
        }
    }

    pub fn debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn extra_search_path(&self) -> bool {
        self.extra_search_path.load(Ordering::Relaxed)
    }

    pub fn more(&self) -> bool {
        self.more.load(Ordering::Relaxed)
    }

    pub fn detached_session(&self) -> bool {
        self.detached_session.load(Ordering::Relaxed)
    }

    pub fn show_filename(&self) -> bool {
        self.show_filename.load(Ordering::Relaxed)
    }

    pub fn set_detached_session(&self, value: bool) {
        self.detached_session.store(value, Ordering::Relaxed);
    }

    pub fn set_show_filename(&self, value: bool) {
        self.show_filename.store(value, Ordering::Relaxed);
    }
}
