//! Radio service backed by the RN2483 LoRaWAN modem.
//!
//! The modem driver is synchronous: a join or an uplink blocks until the
//! modem reports the outcome. This adapter queues work submitted by the
//! control loop, executes it when the service is pumped and maps the
//! results onto the `RadioEvent` vocabulary the event state machine
//! consumes.
//!
//! Duty-cycle availability is tracked host-side, per band, against the
//! logical uptime clock. The modem keeps its own accounting, but that one
//! runs on the modem's clock; ours is what gates submissions, and since
//! the MCU clock halts during power-down it is the one the sleep
//! controller must repair after every wake.

use core::time::Duration;

use embedded_hal::serial;
use rn2xx3::{ConfirmationMode, DataRateEuCn, Driver as Rn2xx3, Freq868, JoinMode};

use config::{ActivationMode, Config};
use envsense_common::payload::UPLINK_LEN;
use envsense_firmware::clock::Clock;
use envsense_firmware::radio::{Radio, RadioEvent, BAND_COUNT};

use crate::uptime::Uptime;

/// Application port carrying the sensor uplink.
const UPLINK_PORT: u8 = 1;

/// Off-time charged to a band per uplink: ~72 ms airtime at SF8/125 kHz
/// for a 12-byte frame, times 99 for the 1% duty-cycle bands.
const BAND_OFF_TIME_MS: u32 = 7_200;

/// How long the modem may sleep while the MCU powers down. Resuming wakes
/// it early through the UART break condition.
const MODEM_SLEEP: Duration = Duration::from_secs(3_600);

/// The credential set for the configured activation mode.
pub enum SessionKeys {
    Abp {
        devaddr: [u8; 4],
        nwkskey: [u8; 16],
        appskey: [u8; 16],
    },
    Otaa {
        deveui: [u8; 8],
        appeui: [u8; 8],
        appkey: [u8; 16],
    },
}

impl SessionKeys {
    pub fn from_config(config: &Config) -> Self {
        match config.activation {
            ActivationMode::Abp => Self::Abp {
                devaddr: config.devaddr,
                nwkskey: config.nwkskey,
                appskey: config.appskey,
            },
            ActivationMode::Otaa => Self::Otaa {
                deveui: config.deveui,
                appeui: config.appeui,
                appkey: config.appkey,
            },
        }
    }
}

struct QueuedUplink {
    data: [u8; UPLINK_LEN],
    len: usize,
    confirmed: bool,
}

pub struct ModemRadio<S> {
    rn: Rn2xx3<Freq868, S>,
    session: SessionKeys,
    clock: Uptime,
    queued: Option<QueuedUplink>,
    pending_event: Option<RadioEvent>,
    join_requested: bool,
    joined: bool,
    suspended: bool,
    adr: bool,
    bands: [u32; BAND_COUNT],
    next_band: usize,
}

impl<S, E> ModemRadio<S>
where
    S: serial::Read<u8, Error = E> + serial::Write<u8, Error = E>,
{
    pub fn new(rn: Rn2xx3<Freq868, S>, session: SessionKeys, clock: Uptime) -> Self {
        let now = clock.now_ms();
        Self {
            rn,
            session,
            clock,
            queued: None,
            pending_event: None,
            join_requested: false,
            joined: false,
            suspended: false,
            adr: false,
            bands: [now; BAND_COUNT],
            next_band: 0,
        }
    }

    fn join_mode(&self) -> JoinMode {
        match self.session {
            SessionKeys::Abp { .. } => JoinMode::Abp,
            SessionKeys::Otaa { .. } => JoinMode::Otaa,
        }
    }

    /// Write the session parameters into the modem. Failures are retried
    /// on the next session reset, so errors are intentionally dropped.
    fn write_session(&mut self) {
        match &self.session {
            SessionKeys::Abp {
                devaddr,
                nwkskey,
                appskey,
            } => {
                self.rn.set_dev_addr_slice(devaddr).ok();
                self.rn.set_network_session_key_slice(nwkskey).ok();
                self.rn.set_app_session_key_slice(appskey).ok();
            }
            SessionKeys::Otaa {
                deveui,
                appeui,
                appkey,
            } => {
                self.rn.set_dev_eui_slice(deveui).ok();
                self.rn.set_app_eui_slice(appeui).ok();
                self.rn.set_app_key_slice(appkey).ok();
            }
        }
        self.rn.set_data_rate(DataRateEuCn::Sf8Bw125).ok();
    }

    fn any_band_available(&self) -> bool {
        let now = self.clock.now_ms();
        self.bands
            .iter()
            .any(|&at| now.wrapping_sub(at) < u32::MAX / 2)
    }

    /// Charge the duty-cycle off-time for one uplink to the current band
    /// and rotate to the next one.
    fn note_transmission(&mut self) {
        let now = self.clock.now_ms();
        self.bands[self.next_band] = now.wrapping_add(BAND_OFF_TIME_MS);
        self.next_band = (self.next_band + 1) % BAND_COUNT;
    }
}

impl<S, E> Radio for ModemRadio<S>
where
    S: serial::Read<u8, Error = E> + serial::Write<u8, Error = E>,
{
    fn poll_event(&mut self) -> Option<RadioEvent> {
        if let Some(event) = self.pending_event.take() {
            return Some(event);
        }
        if self.suspended {
            return None;
        }

        if self.join_requested {
            self.join_requested = false;
            return Some(match self.rn.join(self.join_mode()) {
                Ok(()) => {
                    self.joined = true;
                    RadioEvent::Joined
                }
                Err(_) => RadioEvent::JoinFailed,
            });
        }

        if !self.joined {
            return None;
        }

        if self.queued.is_some() && self.any_band_available() {
            let uplink = self.queued.take()?;
            let mode = if uplink.confirmed {
                ConfirmationMode::Confirmed
            } else {
                ConfirmationMode::Unconfirmed
            };
            if !self.adr {
                // Without ADR the uplink data rate stays pinned.
                self.rn.set_data_rate(DataRateEuCn::Sf8Bw125).ok();
            }
            let result = self
                .rn
                .transmit_slice(mode, UPLINK_PORT, &uplink.data[..uplink.len]);
            self.note_transmission();
            return Some(match result {
                // The modem only confirms a confirmed uplink after the ack
                // arrived.
                Ok(_) => RadioEvent::TxComplete {
                    acked: uplink.confirmed,
                },
                // A failed uplink still ends the cycle; the next one
                // carries fresh readings anyway.
                Err(_) => RadioEvent::TxComplete { acked: false },
            });
        }

        None
    }

    fn busy(&self) -> bool {
        self.queued.is_some()
    }

    fn submit(&mut self, payload: &[u8], confirmed: bool) {
        let mut data = [0u8; UPLINK_LEN];
        let len = payload.len().min(UPLINK_LEN);
        data[..len].copy_from_slice(&payload[..len]);
        self.queued = Some(QueuedUplink {
            data,
            len,
            confirmed,
        });
    }

    fn clear_pending(&mut self) {
        self.queued = None;
    }

    fn reset_session(&mut self) {
        self.joined = false;
        self.queued = None;
        self.write_session();
        self.join_requested = true;
        self.pending_event = Some(RadioEvent::Joining);
    }

    fn set_adr(&mut self, on: bool) {
        // The modem runs ADR itself from the join exchange onwards; the
        // flag controls whether we keep re-pinning the data rate.
        self.adr = on;
    }

    fn set_link_check(&mut self, _on: bool) {
        // The modem firmware performs link check validation itself once a
        // session is established; there is nothing to configure here.
    }

    fn suspend(&mut self) {
        self.rn.sleep(MODEM_SLEEP).ok();
        self.suspended = true;
    }

    fn resume(&mut self) {
        self.suspended = false;
        // The UART break of the autobaud sequence wakes the modem early.
        self.rn.ensure_known_state().ok();
    }

    fn band_available_at(&self, band: usize) -> u32 {
        self.bands[band]
    }

    fn set_band_available_at(&mut self, band: usize, at_ms: u32) {
        self.bands[band] = at_ms;
    }
}
