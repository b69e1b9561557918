//! Bus timing state carried through a single trace.

use crate::usb::{Speed, TICKS_PER_FSLS_FRAME};

/// Time assumed for the bus to settle after reset ends. There is no chirp
/// detection, so a high speed handshake is not modelled; ten full speed
/// frames is an approximation.
pub const RESET_EXIT_TICKS: u32 = TICKS_PER_FSLS_FRAME * 10;

/// Ticks elapsed since the last timing reference point, plus the last
/// reset state seen on the bus.
#[derive(Clone, Debug, Default)]
pub struct LineTiming {
    elapsed: u32,
    in_reset: Option<bool>,
}

impl LineTiming {
    pub fn new() -> LineTiming {
        LineTiming::default()
    }

    pub fn elapsed(&self) -> u32 {
        self.elapsed
    }

    pub fn in_reset(&self) -> Option<bool> {
        self.in_reset
    }

    pub fn advance(&mut self, ticks: u32) {
        self.elapsed = self.elapsed.saturating_add(ticks);
    }

    pub fn restart(&mut self) {
        self.elapsed = 0;
    }

    /// Record a reset notification.
    ///
    /// Returns `None` if the bus was already in this state. Otherwise the
    /// accumulator restarts and the duration to report for the new state is
    /// returned: the captured delta when entering reset, or
    /// [`RESET_EXIT_TICKS`] when leaving it.
    pub fn reset_transition(&mut self, active: bool, cycle_delta: u32) -> Option<u32> {
        if self.in_reset == Some(active) {
            return None;
        }
        self.in_reset = Some(active);
        self.restart();
        Some(if active { cycle_delta } else { RESET_EXIT_TICKS })
    }

    /// Ticks needed to pad the time since the previous SOF out to a full
    /// frame. Always at least one tick.
    pub fn sof_padding(&self, speed: Speed) -> u32 {
        speed
            .ticks_per_frame()
            .checked_sub(self.elapsed)
            .filter(|&delta| delta > 0)
            .unwrap_or(1)
    }
}
