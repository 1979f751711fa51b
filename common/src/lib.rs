//! Types shared between the node firmware and backend tooling: the uplink
//! wire format and the firmware version encoding.

#![cfg_attr(not(test), no_std)]

pub mod payload;
pub mod version;
