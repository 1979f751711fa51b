//! The logical uptime clock.
//!
//! Power-down halts the tick source, so from the firmware's point of view
//! no time passes while it sleeps. The sleep controller credits the slept
//! seconds back through [`Clock::advance_ms`] after every wake; without
//! that, any component that measures time against this clock (most
//! importantly the radio service's duty-cycle accounting) would treat a
//! whole sleep cycle as a frozen instant.

pub trait Clock {
    /// Milliseconds since boot, as observed by the running firmware.
    fn now_ms(&self) -> u32;

    /// Credit time that passed while the tick source was halted.
    fn advance_ms(&mut self, ms: u32);
}

#[cfg(test)]
pub(crate) struct FakeClock {
    now: u32,
}

#[cfg(test)]
impl FakeClock {
    pub fn at(now: u32) -> Self {
        Self { now }
    }
}

#[cfg(test)]
impl Clock for FakeClock {
    fn now_ms(&self) -> u32 {
        self.now
    }

    fn advance_ms(&mut self, ms: u32) {
        self.now = self.now.wrapping_add(ms);
    }
}
