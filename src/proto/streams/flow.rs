use std::fmt;

use crate::frame::Reason;
use crate::proto::{WindowSize, MAX_WINDOW_SIZE};

/// The flow-control ledger for one direction of one stream, or of the
/// connection.
///
/// The counter is signed: SETTINGS_INITIAL_WINDOW_SIZE changes may drive a
/// window transiently negative, and the arithmetic must survive that even
/// though this module never initiates it.
#[derive(Copy, Clone, Debug)]
pub struct FlowControl {
    window: Window,
}

impl FlowControl {
    pub fn new(initial: WindowSize) -> FlowControl {
        debug_assert!(initial <= MAX_WINDOW_SIZE);
        FlowControl {
            window: Window(initial as i32),
        }
    }

    /// The credit currently available, clamped at zero.
    pub fn window_size(&self) -> WindowSize {
        self.window.as_size()
    }

    pub fn is_positive(&self) -> bool {
        self.window > 0
    }

    /// Applies a WINDOW_UPDATE increment. Saturation past 2^31-1 is a
    /// flow-control violation.
    pub fn inc_window(&mut self, sz: WindowSize) -> Result<(), Reason> {
        let (val, overflow) = self.window.0.overflowing_add(sz as i32);

        if overflow || val > MAX_WINDOW_SIZE as i32 {
            return Err(Reason::FLOW_CONTROL_ERROR);
        }

        tracing::trace!("inc_window; sz={}; old={}; new={}", sz, self.window, val);

        self.window = Window(val);
        Ok(())
    }

    /// Charges `sz` octets against the window, failing when the credit is
    /// insufficient.
    pub fn consume(&mut self, sz: WindowSize) -> Result<(), Reason> {
        if self.window < sz {
            return Err(Reason::FLOW_CONTROL_ERROR);
        }

        tracing::trace!("consume; sz={}; window={}", sz, self.window);

        self.window -= sz;
        Ok(())
    }

    /// Charges credit the caller has already bounded by `window_size`.
    pub fn send_data(&mut self, sz: WindowSize) {
        tracing::trace!("send_data; sz={}; window={}", sz, self.window);

        assert!(self.window >= sz);
        self.window -= sz;
    }
}

/// A signed window value.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
struct Window(i32);

impl Window {
    fn as_size(self) -> WindowSize {
        if self.0 < 0 {
            0
        } else {
            self.0 as WindowSize
        }
    }
}

impl PartialEq<WindowSize> for Window {
    fn eq(&self, other: &WindowSize) -> bool {
        if self.0 < 0 {
            false
        } else {
            (self.0 as WindowSize).eq(other)
        }
    }
}

impl PartialOrd<WindowSize> for Window {
    fn partial_cmp(&self, other: &WindowSize) -> Option<std::cmp::Ordering> {
        if self.0 < 0 {
            Some(std::cmp::Ordering::Less)
        } else {
            (self.0 as WindowSize).partial_cmp(other)
        }
    }
}

impl std::ops::SubAssign<WindowSize> for Window {
    fn sub_assign(&mut self, other: WindowSize) {
        self.0 -= other as i32;
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
