//! Millisecond uptime from SysTick.
//!
//! SysTick halts in STOP mode, which is exactly what the logical clock
//! model expects: the sleep controller credits the slept time back through
//! `Clock::advance_ms` after each wake.

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::peripheral::{syst::SystClkSource, SYST};
use cortex_m_rt::exception;

use envsense_firmware::clock::Clock;

static TICKS_MS: AtomicU32 = AtomicU32::new(0);
static SLEPT_MS: AtomicU32 = AtomicU32::new(0);

/// Handle to the uptime counter. Copies all observe the same counter, so
/// one can live in the radio service while the control loop owns another.
#[derive(Copy, Clone)]
pub struct Uptime;

impl Uptime {
    /// Start the 1 kHz tick, assuming the 16 MHz core clock.
    pub fn new(mut syst: SYST) -> Self {
        syst.set_clock_source(SystClkSource::Core);
        syst.set_reload(16_000 - 1);
        syst.clear_current();
        syst.enable_interrupt();
        syst.enable_counter();
        Uptime
    }
}

impl Clock for Uptime {
    fn now_ms(&self) -> u32 {
        TICKS_MS
            .load(Ordering::Relaxed)
            .wrapping_add(SLEPT_MS.load(Ordering::Relaxed))
    }

    fn advance_ms(&mut self, ms: u32) {
        SLEPT_MS.fetch_add(ms, Ordering::Relaxed);
    }
}

#[exception]
fn SysTick() {
    TICKS_MS.fetch_add(1, Ordering::Relaxed);
}
