use std::fmt;
use std::usize;

use crate::frame;

/// The connection's active-stream accounting.
///
/// A stream becomes active when it leaves `idle` and stops being active
/// when it closes. Each time the count returns to zero the idle hook fires
/// exactly once.
pub(crate) struct Counts {
    num_active: usize,
    num_local_active: usize,

    /// The peer's SETTINGS_MAX_CONCURRENT_STREAMS, bounding local opens.
    max_local_initiated: usize,

    idle_hook: Option<Box<dyn FnMut() + Send>>,
}

impl Counts {
    pub fn new() -> Counts {
        Counts {
            num_active: 0,
            num_local_active: 0,
            max_local_initiated: usize::MAX,
            idle_hook: None,
        }
    }

    pub fn set_idle_hook(&mut self, hook: Box<dyn FnMut() + Send>) {
        self.idle_hook = Some(hook);
    }

    pub fn apply_remote_settings(&mut self, settings: &frame::Settings) {
        if let Some(val) = settings.max_concurrent_streams() {
            self.max_local_initiated = val as usize;
        }
    }

    pub fn has_streams(&self) -> bool {
        self.num_active != 0
    }

    pub fn can_open_local(&self) -> bool {
        self.num_local_active < self.max_local_initiated
    }

    pub fn inc_num_streams(&mut self, local: bool) {
        assert!(self.num_active < usize::MAX);
        self.num_active += 1;
        if local {
            self.num_local_active += 1;
        }
    }

    pub fn dec_num_streams(&mut self, local: bool) {
        assert!(self.num_active > 0);
        self.num_active -= 1;
        if local {
            assert!(self.num_local_active > 0);
            self.num_local_active -= 1;
        }

        if self.num_active == 0 {
            tracing::trace!("connection idle");
            if let Some(hook) = self.idle_hook.as_mut() {
                hook();
            }
        }
    }
}

impl fmt::Debug for Counts {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Counts")
            .field("num_active", &self.num_active)
            .field("num_local_active", &self.num_local_active)
            .field("max_local_initiated", &self.max_local_initiated)
            .field("idle_hook", &self.idle_hook.is_some())
            .finish()
    }
}
