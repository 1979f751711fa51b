//! Sleep decomposition and the duty-cycle-aware sleep controller.
//!
//! The power-down primitive only accepts a fixed menu of durations
//! (8/4/2/1 seconds), so a sleep request is decomposed greedily into the
//! largest increments first, one power-down operation per increment. A
//! latched wake interrupt aborts the remaining decomposition before the
//! next increment starts.
//!
//! After every sleep the controller re-aligns two clocks with reality:
//! the logical uptime clock is credited with the executed sleep time, and
//! the radio service's per-band availability timestamps are rewritten to
//! the post-sleep time. The latter matters because those timestamps were
//! recorded against the pre-sleep clock; left alone, the service would
//! hold every band closed until real time crawls past the stale values,
//! stalling uplinks for minutes after each wake.

use core::fmt::Write;

use crate::clock::Clock;
use crate::radio::{Radio, BAND_COUNT};
use crate::wake::WakeMonitor;

/// Durations the power-down primitive accepts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PowerDownPeriod {
    Seconds8,
    Seconds4,
    Seconds2,
    Seconds1,
}

impl PowerDownPeriod {
    pub const fn seconds(self) -> u32 {
        match self {
            Self::Seconds8 => 8,
            Self::Seconds4 => 4,
            Self::Seconds2 => 2,
            Self::Seconds1 => 1,
        }
    }
}

pub trait PowerDown {
    /// Power down for one fixed period. Returns early if an armed wake
    /// interrupt fires.
    fn power_down(&mut self, period: PowerDownPeriod);

    /// Power down with no timed wake source; only an external wake event
    /// or a reset ends this.
    fn power_down_forever(&mut self);
}

/// Greedy largest-first decomposition of a sleep duration into the fixed
/// power-down menu.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SleepPlan {
    pub eights: u32,
    pub fours: u32,
    pub twos: u32,
    pub ones: u32,
}

impl SleepPlan {
    pub fn for_seconds(seconds: u32) -> Self {
        Self {
            eights: seconds / 8,
            fours: (seconds % 8) / 4,
            twos: (seconds % 8 % 4) / 2,
            ones: seconds % 8 % 4 % 2,
        }
    }

    pub fn total_seconds(&self) -> u32 {
        self.eights * 8 + self.fours * 4 + self.twos * 2 + self.ones
    }

    /// The individual power-down operations, largest increments first.
    pub fn iter(&self) -> impl Iterator<Item = PowerDownPeriod> {
        use core::iter::repeat;
        repeat(PowerDownPeriod::Seconds8)
            .take(self.eights as usize)
            .chain(repeat(PowerDownPeriod::Seconds4).take(self.fours as usize))
            .chain(repeat(PowerDownPeriod::Seconds2).take(self.twos as usize))
            .chain(repeat(PowerDownPeriod::Seconds1).take(self.ones as usize))
    }
}

/// Sleep tuning, loaded from the device configuration.
#[derive(Debug, Copy, Clone)]
pub struct SleepParams {
    /// Upper bound of the per-cycle random jitter, in seconds.
    pub jitter_max_seconds: u8,
    /// Compensation factor, in percent, for the low-power oscillator
    /// running fast during power-down (nominal 88 on this board).
    pub drift_comp_pct: u8,
}

pub struct SleepController {
    params: SleepParams,
    rng_state: u32,
}

impl SleepController {
    pub fn new(params: SleepParams, seed: u32) -> Self {
        Self {
            params,
            // xorshift must not be seeded with zero
            rng_state: if seed == 0 { 0xA5A5_5A5A } else { seed },
        }
    }

    /// Bounded random jitter, desynchronizing nodes that share a transmit
    /// cadence and channel plan (xorshift32).
    fn next_jitter_seconds(&mut self) -> u32 {
        if self.params.jitter_max_seconds == 0 {
            return 0;
        }
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng_state = x;
        x % (u32::from(self.params.jitter_max_seconds) + 1)
    }

    /// Apply jitter, then the oscillator drift compensation factor.
    fn corrected_seconds(&mut self, requested: u32) -> u32 {
        let jittered = requested + self.next_jitter_seconds();
        jittered * u32::from(self.params.drift_comp_pct.min(100)) / 100
    }

    /// Sleep for roughly `requested_seconds` (0 = until an external wake
    /// event), then repair the clocks. Returns the executed sleep seconds.
    pub fn run(
        &mut self,
        requested_seconds: u32,
        power: &mut impl PowerDown,
        wake: &WakeMonitor,
        radio: &mut impl Radio,
        clock: &mut impl Clock,
        debug: &mut impl Write,
    ) -> u32 {
        radio.suspend();

        let executed = if requested_seconds == 0 {
            writeln!(debug, "{}: sleeping until external wake", clock.now_ms()).ok();
            power.power_down_forever();
            0
        } else {
            let corrected = self.corrected_seconds(requested_seconds);
            let plan = SleepPlan::for_seconds(corrected);
            writeln!(
                debug,
                "{}: sleeping for {}s ({}x8 + {}x4 + {}x2 + {}x1)",
                clock.now_ms(),
                corrected,
                plan.eights,
                plan.fours,
                plan.twos,
                plan.ones,
            )
            .ok();

            let mut slept = 0;
            for period in plan.iter() {
                if wake.wake_pending() {
                    writeln!(debug, "wake interrupt, aborting sleep").ok();
                    break;
                }
                power.power_down(period);
                slept += period.seconds();
            }
            slept
        };

        clock.advance_ms(executed * 1000);
        radio.resume();

        // The service recorded its per-band availability against the
        // pre-sleep clock; every tracked band is free again now.
        let now = clock.now_ms();
        for band in 0..BAND_COUNT {
            radio.set_band_available_at(band, now);
        }

        executed
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicBool, Ordering};

    use rstest::rstest;

    use super::*;
    use crate::clock::FakeClock;
    use crate::radio::mock::MockRadio;

    #[rstest]
    #[case(0, (0, 0, 0, 0))]
    #[case(1, (0, 0, 0, 1))]
    #[case(7, (0, 1, 1, 1))]
    #[case(8, (1, 0, 0, 0))]
    #[case(15, (1, 1, 1, 1))]
    #[case(60, (7, 1, 0, 0))]
    #[case(300, (37, 1, 0, 0))]
    fn test_sleep_plan_decomposition(#[case] seconds: u32, #[case] expected: (u32, u32, u32, u32)) {
        let plan = SleepPlan::for_seconds(seconds);
        assert_eq!(
            (plan.eights, plan.fours, plan.twos, plan.ones),
            expected
        );
        // 8/4/2/1 covers every remainder, so the plan is always exact.
        assert_eq!(plan.total_seconds(), seconds);
    }

    #[test]
    fn test_sleep_plan_iterates_largest_first() {
        let periods: Vec<_> = SleepPlan::for_seconds(15).iter().collect();
        assert_eq!(
            periods,
            vec![
                PowerDownPeriod::Seconds8,
                PowerDownPeriod::Seconds4,
                PowerDownPeriod::Seconds2,
                PowerDownPeriod::Seconds1,
            ]
        );
    }

    /// Records power-downs; optionally latches a wake flag after the n-th
    /// operation to emulate an interrupt firing mid-sleep.
    struct FakePowerDown {
        periods: Vec<PowerDownPeriod>,
        forever: usize,
        wake_after: Option<(usize, &'static AtomicBool)>,
    }

    impl FakePowerDown {
        fn new() -> Self {
            Self {
                periods: Vec::new(),
                forever: 0,
                wake_after: None,
            }
        }
    }

    impl PowerDown for FakePowerDown {
        fn power_down(&mut self, period: PowerDownPeriod) {
            self.periods.push(period);
            if let Some((n, flag)) = self.wake_after {
                if self.periods.len() == n {
                    flag.store(true, Ordering::Release);
                }
            }
        }

        fn power_down_forever(&mut self) {
            self.forever += 1;
        }
    }

    fn controller(jitter_max: u8, comp_pct: u8) -> SleepController {
        SleepController::new(
            SleepParams {
                jitter_max_seconds: jitter_max,
                drift_comp_pct: comp_pct,
            },
            1,
        )
    }

    #[test]
    fn test_run_executes_full_corrected_duration() {
        static A: AtomicBool = AtomicBool::new(false);
        static B: AtomicBool = AtomicBool::new(false);
        let wake = WakeMonitor::new(&A, &B);
        let mut power = FakePowerDown::new();
        let mut radio = MockRadio::new();
        let mut clock = FakeClock::at(5_000);

        let executed = controller(0, 100).run(
            60,
            &mut power,
            &wake,
            &mut radio,
            &mut clock,
            &mut String::new(),
        );
        assert_eq!(executed, 60);
        assert_eq!(power.periods.len(), 8); // 7x8 + 1x4
        assert_eq!(clock.now_ms(), 5_000 + 60_000);
        assert_eq!(radio.suspends, 1);
        assert_eq!(radio.resumes, 1);
    }

    #[test]
    fn test_run_applies_drift_compensation() {
        static A: AtomicBool = AtomicBool::new(false);
        static B: AtomicBool = AtomicBool::new(false);
        let wake = WakeMonitor::new(&A, &B);
        let mut power = FakePowerDown::new();
        let mut radio = MockRadio::new();
        let mut clock = FakeClock::at(0);

        let executed = controller(0, 88).run(
            60,
            &mut power,
            &wake,
            &mut radio,
            &mut clock,
            &mut String::new(),
        );
        // 60 s × 0.88 = 52.8, truncated to whole seconds
        assert_eq!(executed, 52);
        assert_eq!(clock.now_ms(), 52_000);
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let mut ctrl = controller(5, 100);
        for _ in 0..100 {
            let corrected = ctrl.corrected_seconds(60);
            assert!((60..=65).contains(&corrected));
        }
    }

    #[test]
    fn test_run_aborts_on_wake_interrupt() {
        static A: AtomicBool = AtomicBool::new(false);
        static B: AtomicBool = AtomicBool::new(false);
        let wake = WakeMonitor::new(&A, &B);
        let mut power = FakePowerDown::new();
        power.wake_after = Some((2, &B));
        let mut radio = MockRadio::new();
        let mut clock = FakeClock::at(0);

        let executed = controller(0, 100).run(
            60,
            &mut power,
            &wake,
            &mut radio,
            &mut clock,
            &mut String::new(),
        );
        // Two 8 s power-downs ran before the latched interrupt was seen.
        assert_eq!(executed, 16);
        assert_eq!(power.periods.len(), 2);
        assert_eq!(clock.now_ms(), 16_000);
        // The flag stays latched for the wake classification in the loop.
        assert!(wake.wake_pending());
    }

    #[test]
    fn test_run_repairs_band_availability_after_full_sleep() {
        static A: AtomicBool = AtomicBool::new(false);
        static B: AtomicBool = AtomicBool::new(false);
        let wake = WakeMonitor::new(&A, &B);
        let mut power = FakePowerDown::new();
        let mut radio = MockRadio::new();
        radio.bands = [9_999_999; BAND_COUNT];
        let mut clock = FakeClock::at(1_000);

        controller(0, 100).run(
            8,
            &mut power,
            &wake,
            &mut radio,
            &mut clock,
            &mut String::new(),
        );
        assert_eq!(radio.bands, [9_000; BAND_COUNT]);
    }

    #[test]
    fn test_run_repairs_band_availability_after_aborted_sleep() {
        static A: AtomicBool = AtomicBool::new(false);
        static B: AtomicBool = AtomicBool::new(false);
        let wake = WakeMonitor::new(&A, &B);
        let mut power = FakePowerDown::new();
        power.wake_after = Some((1, &A));
        let mut radio = MockRadio::new();
        radio.bands = [123_456; BAND_COUNT];
        let mut clock = FakeClock::at(0);

        controller(0, 100).run(
            24,
            &mut power,
            &wake,
            &mut radio,
            &mut clock,
            &mut String::new(),
        );
        assert_eq!(radio.bands, [8_000; BAND_COUNT]);
    }

    #[test]
    fn test_run_zero_sleeps_indefinitely() {
        static A: AtomicBool = AtomicBool::new(false);
        static B: AtomicBool = AtomicBool::new(false);
        let wake = WakeMonitor::new(&A, &B);
        let mut power = FakePowerDown::new();
        let mut radio = MockRadio::new();
        radio.bands = [42; BAND_COUNT];
        let mut clock = FakeClock::at(7_000);

        let executed = controller(3, 88).run(
            0,
            &mut power,
            &wake,
            &mut radio,
            &mut clock,
            &mut String::new(),
        );
        assert_eq!(executed, 0);
        assert_eq!(power.forever, 1);
        assert!(power.periods.is_empty());
        // No measurable elapsed time, but the bands are still repaired.
        assert_eq!(clock.now_ms(), 7_000);
        assert_eq!(radio.bands, [7_000; BAND_COUNT]);
    }

    #[test]
    fn test_seed_affects_jitter_sequence() {
        let a: Vec<u32> = {
            let mut c = SleepController::new(
                SleepParams {
                    jitter_max_seconds: 200,
                    drift_comp_pct: 100,
                },
                1,
            );
            (0..8).map(|_| c.next_jitter_seconds()).collect()
        };
        let b: Vec<u32> = {
            let mut c = SleepController::new(
                SleepParams {
                    jitter_max_seconds: 200,
                    drift_comp_pct: 100,
                },
                0xDEAD_BEEF,
            );
            (0..8).map(|_| c.next_jitter_seconds()).collect()
        };
        assert_ne!(a, b);
    }
}
