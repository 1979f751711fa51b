//! Power-down implementation: STOP mode timed by the RTC wakeup timer.
//!
//! The power-down menu is fixed to 8/4/2/1 second increments; the sleep
//! controller decomposes longer requests into a sequence of these. STOP
//! mode keeps the EXTI wake lines armed, so an external interrupt ends an
//! increment early and the indefinite variant entirely relies on it.

use cortex_m::peripheral::SCB;
use embedded_hal::timer::{Cancel, CountDown};
use stm32l0xx_hal::exti::{ConfigurableLine, Exti};
use stm32l0xx_hal::pac::{self, interrupt};
use stm32l0xx_hal::pwr::{StopModeConfig, PWR};
use stm32l0xx_hal::rcc::Rcc;
use stm32l0xx_hal::rtc::{Interrupts, Rtc};

use envsense_firmware::sleep::{PowerDown, PowerDownPeriod};

pub struct StopPowerDown {
    scb: SCB,
    rcc: Rcc,
    pwr: PWR,
    rtc: Rtc,
}

impl StopPowerDown {
    /// Takes ownership of the clock/power plumbing; the caller must have
    /// armed the RTC wakeup EXTI line and unmasked the RTC interrupt.
    pub fn new(scb: SCB, rcc: Rcc, pwr: PWR, mut rtc: Rtc) -> Self {
        rtc.enable_interrupts(Interrupts {
            timestamp: false,
            wakeup_timer: true,
            alarm_a: false,
            alarm_b: false,
        });
        Self { scb, rcc, pwr, rtc }
    }

    fn stop(&mut self) {
        self.pwr
            .stop_mode(
                &mut self.scb,
                &mut self.rcc,
                StopModeConfig {
                    ultra_low_power: true,
                },
            )
            .enter();
    }
}

impl PowerDown for StopPowerDown {
    fn power_down(&mut self, period: PowerDownPeriod) {
        self.rtc.wakeup_timer().start(period.seconds());
        self.stop();
        // Woken by the timer or an EXTI line; either way the timer is done.
        self.rtc.wakeup_timer().cancel().ok();
        Exti::unpend(ConfigurableLine::RtcWakeup);
    }

    fn power_down_forever(&mut self) {
        // No timed wake source armed, only the EXTI lines remain.
        self.stop();
    }
}

#[interrupt]
fn RTC() {
    // Clear the wakeup-timer flag; the handler itself has nothing to do,
    // its only purpose is terminating STOP mode.
    let rtc = unsafe { &*pac::RTC::ptr() };
    rtc.isr.modify(|_, w| w.wutf().clear_bit());
    Exti::unpend(ConfigurableLine::RtcWakeup);
}
