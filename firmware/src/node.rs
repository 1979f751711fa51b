//! The transmission orchestrator and the radio event state machine.
//!
//! One `Node` owns all mutable control-loop state. The loop is strictly
//! single-threaded and cooperative: radio events are pumped first, then
//! [`Node::poll`] runs exactly one iteration of wake classification,
//! scheduled-send handling and the sleep/measure/transmit cycle. The only
//! state shared with interrupt context are the two wake flags behind the
//! [`WakeMonitor`].

use core::fmt::Write;

use envsense_common::payload::{self, Uplink, WakeStatus};
use envsense_common::version::FirmwareVersion;

use crate::clock::Clock;
use crate::radio::{Radio, RadioEvent};
use crate::sensors::{AtmoSensor, BatteryMonitor, SensorSet, TempProbe};
use crate::sleep::{PowerDown, SleepController};
use crate::wake::{WakeLine, WakeMonitor};

/// Delay between a join accept and the first scheduled uplink.
const FIRST_SEND_DELAY_MS: u32 = 10;

/// `at` has passed on a wrapping millisecond clock.
fn due(now_ms: u32, at_ms: u32) -> bool {
    now_ms.wrapping_sub(at_ms) < u32::MAX / 2
}

/// The slice of the device configuration the control loop acts on.
#[derive(Debug, Copy, Clone)]
pub struct NodeConfig {
    pub sleep_interval_seconds: u16,
    /// Uplinks are deferred while the supply is below this level.
    pub battery_min_volts: f32,
    pub confirmed_uplinks: bool,
}

pub struct Node {
    cfg: NodeConfig,
    version: FirmwareVersion,
    wake: WakeMonitor,
    wake_status: WakeStatus,
    /// Set by `TxComplete`; the next loop iteration turns it into a sleep
    /// cycle followed by a fresh measurement.
    tx_complete: bool,
    /// Whether the last uplink was acknowledged. Diagnostics only, ack and
    /// nack proceed identically.
    last_acked: bool,
    send_requested: bool,
    /// Deadline of a scheduled send on the logical clock.
    send_at_ms: Option<u32>,
}

impl Node {
    pub fn new(cfg: NodeConfig, version: FirmwareVersion, wake: WakeMonitor) -> Self {
        Self {
            cfg,
            version,
            wake,
            wake_status: WakeStatus::default(),
            tx_complete: false,
            last_acked: false,
            send_requested: false,
            send_at_ms: None,
        }
    }

    /// Request a transmission on the next loop iteration.
    pub fn request_send(&mut self) {
        self.send_requested = true;
    }

    pub fn last_acked(&self) -> bool {
        self.last_acked
    }

    /// React to one radio service notification.
    pub fn handle_event(
        &mut self,
        event: RadioEvent,
        radio: &mut impl Radio,
        clock: &impl Clock,
        debug: &mut impl Write,
    ) {
        writeln!(debug, "{}: {:?}", clock.now_ms(), event).ok();
        match event {
            RadioEvent::Joined => {
                // Enabled here rather than at session setup because the
                // join procedure overwrites both settings.
                radio.set_adr(true);
                radio.set_link_check(true);
                self.send_at_ms = Some(clock.now_ms().wrapping_add(FIRST_SEND_DELAY_MS));
            }
            RadioEvent::JoinFailed | RadioEvent::RejoinFailed => {
                // Unattended node: a failed join is not an application
                // error. Rebuild the session and retry, indefinitely.
                radio.reset_session();
            }
            RadioEvent::TxComplete { acked } => {
                if acked {
                    writeln!(debug, "> received ack").ok();
                }
                self.last_acked = acked;
                self.tx_complete = true;
            }
            // Everything else (JoinTxComplete included) is logged above
            // and must not disturb the control loop.
            _ => {}
        }
    }

    /// Fold a freshly latched wake interrupt into the status byte.
    ///
    /// The `triggered` bit only holds for the iteration in which the
    /// interrupt was observed; the line bits persist until the next wake.
    fn handle_wake(&mut self, radio: &mut impl Radio, debug: &mut impl Write) {
        match self.wake.poll() {
            Some(line) => {
                self.wake_status.set_triggered(true);
                match line {
                    WakeLine::A => {
                        self.wake_status.set_line_a(true);
                        self.wake_status.set_line_b(false);
                    }
                    WakeLine::B => {
                        self.wake_status.set_line_b(true);
                        self.wake_status.set_line_a(false);
                    }
                }
                if !self.tx_complete {
                    // A queued uplink would carry pre-interrupt readings;
                    // drop it so the next cycle sends fresh data.
                    radio.clear_pending();
                }
                self.send_requested = true;
                writeln!(debug, "wake interrupt on line {:?}", line).ok();
            }
            None => self.wake_status.set_triggered(false),
        }
    }

    /// Read the sensors, build one uplink and hand it to the radio
    /// service. A no-op while the service reports an operation in flight;
    /// that is flow control, not an error.
    pub fn do_send<A, P, B>(
        &mut self,
        radio: &mut impl Radio,
        sensors: &mut SensorSet<A, P, B>,
        clock: &impl Clock,
        debug: &mut impl Write,
    ) where
        A: AtmoSensor,
        P: TempProbe,
        B: BatteryMonitor,
    {
        self.send_requested = false;

        if radio.busy() {
            writeln!(debug, "{}: uplink pending, not sending", clock.now_ms()).ok();
            return;
        }

        let atmo = sensors.atmo.as_mut().and_then(|s| s.measure());
        let probe = sensors.probe.as_mut().and_then(|p| p.read_temperature_c());
        let battery = sensors.battery.read_volts();

        let uplink = Uplink {
            wake_status: self.wake_status.0,
            battery_centivolts: payload::encode_battery(battery),
            version: self.version,
            atmo_temperature: payload::encode_temperature(atmo.map(|a| a.temperature_c)),
            atmo_humidity: payload::encode_humidity(atmo.map(|a| a.humidity_pct)),
            atmo_pressure: payload::encode_pressure(atmo.map(|a| a.pressure_pa)),
            probe_temperature: payload::encode_temperature(probe),
        };
        let frame = uplink.encode();
        writeln!(debug, "{}: queueing uplink {:02x?}", clock.now_ms(), frame).ok();
        radio.submit(&frame, self.cfg.confirmed_uplinks);
        self.tx_complete = false;
    }

    /// One iteration of the control loop. Call after pumping the radio
    /// service for events.
    pub fn poll<A, P, B>(
        &mut self,
        radio: &mut impl Radio,
        sensors: &mut SensorSet<A, P, B>,
        sleep: &mut SleepController,
        power: &mut impl PowerDown,
        clock: &mut impl Clock,
        debug: &mut impl Write,
    ) where
        A: AtmoSensor,
        P: TempProbe,
        B: BatteryMonitor,
    {
        self.handle_wake(radio, debug);

        if let Some(at) = self.send_at_ms {
            if due(clock.now_ms(), at) {
                self.send_at_ms = None;
                self.send_requested = true;
            }
        }

        if self.send_requested {
            self.do_send(radio, sensors, clock, debug);
            return;
        }

        if self.tx_complete {
            // The transmission cycle is over; sleep, then start the next
            // one. The sleep only ever begins here, after the service
            // signalled completion.
            sleep.run(
                u32::from(self.cfg.sleep_interval_seconds),
                power,
                &self.wake,
                radio,
                clock,
                debug,
            );

            // Classify a break-sleep interrupt before the payload is built.
            self.handle_wake(radio, debug);

            if let Some(volts) = sensors.battery.read_volts() {
                if volts < self.cfg.battery_min_volts {
                    // Brownout avoidance: skip the uplink and go back to
                    // sleep until the supply recovers.
                    writeln!(
                        debug,
                        "{}: battery at {}cV, deferring uplink",
                        clock.now_ms(),
                        payload::encode_battery(Some(volts)),
                    )
                    .ok();
                    self.send_requested = false;
                    return;
                }
            }

            self.tx_complete = false;
            self.do_send(radio, sensors, clock, debug);
        }
    }
}
