//! Interface to the LoRaWAN radio service.
//!
//! The radio stack is an external collaborator. It reports its progress as
//! [`RadioEvent`] values that are pumped out of [`Radio::poll_event`] and
//! fed to the node's event handler, and it is controlled through the
//! remaining trait methods. Keeping the whole surface behind a trait means
//! the event state machine runs in host tests against a scripted mock.

/// Number of duty-cycle frequency bands the service tracks.
pub const BAND_COUNT: usize = 4;

/// Notification from the radio service, delivered at most once per
/// underlying radio operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    Joining,
    Joined,
    JoinFailed,
    RejoinFailed,
    TxStarted,
    TxComplete { acked: bool },
    TxCanceled,
    /// A join request went out but no join-accept was received yet.
    JoinTxComplete,
    RxComplete,
    LinkDead,
    LinkAlive,
    Reset,
    LostTimeSync,
}

pub trait Radio {
    /// Fetch the next pending service notification, if any.
    fn poll_event(&mut self) -> Option<RadioEvent>;

    /// An uplink or join exchange is currently in flight.
    fn busy(&self) -> bool;

    /// Queue `payload` for uplink, optionally requesting a link-layer
    /// acknowledgement.
    fn submit(&mut self, payload: &[u8], confirmed: bool);

    /// Drop an uplink that was queued but not yet sent.
    fn clear_pending(&mut self);

    /// Full MAC reset: the session and any pending transfers are discarded
    /// and a fresh join is started.
    fn reset_session(&mut self);

    /// Enable or disable adaptive data rate.
    fn set_adr(&mut self, on: bool);

    /// Enable or disable link check validation.
    fn set_link_check(&mut self, on: bool);

    /// Stop radio activity before the MCU powers down.
    fn suspend(&mut self);

    /// Resume normal operation after wake.
    fn resume(&mut self);

    /// Logical time (ms) at which `band` may transmit again.
    fn band_available_at(&self, band: usize) -> u32;

    /// Overwrite the availability bookkeeping of `band`. The sleep
    /// controller uses this to re-align the service's duty-cycle clock
    /// with the post-sleep logical time.
    fn set_band_available_at(&mut self, band: usize, at_ms: u32);
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    /// Scripted radio double: events are queued by the test, every control
    /// call is recorded.
    pub struct MockRadio {
        pub events: Vec<RadioEvent>,
        pub busy: bool,
        pub submitted: Vec<(Vec<u8>, bool)>,
        pub cleared: usize,
        pub session_resets: usize,
        pub adr: Option<bool>,
        pub link_check: Option<bool>,
        pub suspends: usize,
        pub resumes: usize,
        pub bands: [u32; BAND_COUNT],
    }

    impl MockRadio {
        pub fn new() -> Self {
            Self {
                events: Vec::new(),
                busy: false,
                submitted: Vec::new(),
                cleared: 0,
                session_resets: 0,
                adr: None,
                link_check: None,
                suspends: 0,
                resumes: 0,
                bands: [0; BAND_COUNT],
            }
        }
    }

    impl Radio for MockRadio {
        fn poll_event(&mut self) -> Option<RadioEvent> {
            if self.events.is_empty() {
                None
            } else {
                Some(self.events.remove(0))
            }
        }

        fn busy(&self) -> bool {
            self.busy
        }

        fn submit(&mut self, payload: &[u8], confirmed: bool) {
            self.submitted.push((payload.to_vec(), confirmed));
            self.busy = true;
        }

        fn clear_pending(&mut self) {
            self.cleared += 1;
            self.busy = false;
        }

        fn reset_session(&mut self) {
            self.session_resets += 1;
        }

        fn set_adr(&mut self, on: bool) {
            self.adr = Some(on);
        }

        fn set_link_check(&mut self, on: bool) {
            self.link_check = Some(on);
        }

        fn suspend(&mut self) {
            self.suspends += 1;
        }

        fn resume(&mut self) {
            self.resumes += 1;
        }

        fn band_available_at(&self, band: usize) -> u32 {
            self.bands[band]
        }

        fn set_band_available_at(&mut self, band: usize, at_ms: u32) {
            self.bands[band] = at_ms;
        }
    }
}
