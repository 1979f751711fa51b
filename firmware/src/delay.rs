//! Blocking delay provider using TIM7.
//!
//! SysTick is claimed by the uptime counter, so the short blocking delays
//! needed by the 1-Wire bus and the atmospheric sensor run off TIM7 in
//! one-pulse mode instead.

use core::cmp::max;

use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use stm32l0xx_hal::pac;

pub struct Tim7Delay {
    tim7: pac::TIM7,
}

impl Tim7Delay {
    pub fn new(tim7: pac::TIM7, rcc: &mut pac::RCC) -> Self {
        // Enable and reset TIM7 in RCC
        rcc.apb1enr.modify(|_, w| w.tim7en().set_bit());
        rcc.apb1rstr.modify(|_, w| w.tim7rst().set_bit());
        rcc.apb1rstr.modify(|_, w| w.tim7rst().clear_bit());

        // One-pulse mode: the counter stops at the next update event,
        // clearing the CEN bit
        tim7.cr1.modify(|_, w| w.opm().enabled());

        Self { tim7 }
    }

    /// Busy-wait for one timer pulse of `ticks` timer ticks, with the
    /// prescaler choosing the tick duration.
    ///
    /// Assumes the 16 MHz core clock: a prescaler of 16 gives 1 µs ticks,
    /// 16_000 gives 1 ms ticks.
    fn pulse(&mut self, prescaler: u16, ticks: u16) {
        self.tim7.psc.write(|w| w.psc().bits(prescaler));
        self.tim7
            .arr
            .write(|w| unsafe { w.arr().bits(max(1, ticks)) });

        // Trigger an update event to load the new prescaler immediately
        self.tim7.egr.write(|w| w.ug().set_bit());

        self.tim7.cr1.modify(|_, w| w.cen().set_bit());
        while self.tim7.cr1.read().cen().is_enabled() { /* wait */ }
    }
}

/// Delays below ~4 µs are dominated by the setup overhead and will be
/// rounded up to it.
impl DelayUs<u16> for Tim7Delay {
    fn delay_us(&mut self, us: u16) {
        // Roughly 3 µs of measured call overhead; the update event fires
        // one tick after the ARR value.
        let overhead = 3;
        self.pulse(16, if us > overhead { us - overhead - 1 } else { 0 });
    }
}

impl DelayMs<u16> for Tim7Delay {
    fn delay_ms(&mut self, ms: u16) {
        // An ARR value of 0 (1-1) would never trigger the update event.
        if ms <= 1 {
            self.delay_us(ms * 1000);
            return;
        }
        self.pulse(16_000, ms - 1);
    }
}

// The BME280 driver asks for u8 millisecond delays.
impl DelayMs<u8> for Tim7Delay {
    fn delay_ms(&mut self, ms: u8) {
        DelayMs::<u16>::delay_ms(self, u16::from(ms));
    }
}
