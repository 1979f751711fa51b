#![cfg_attr(not(test), no_std)]
//! # Device Configuration
//!
//! The device configuration is read from EEPROM once at boot and is
//! read-only afterwards. The provisioning tool may rewrite it between
//! reboots only.
//!
//! ## Memory Map
//!
//! ```text
//!             0           8          16          24          32
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0000 | Version   | Reserved (0x23 0x42 0x99)         |
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0004 | DevAddr                                       |
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0008 |                                               |
//! 0x0808_000C | NwkSKey                                       |
//! 0x0808_0010 |                                               |
//! 0x0808_0014 |                                               |
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0018 |                                               |
//! 0x0808_001C | AppSKey                                       |
//! 0x0808_0020 |                                               |
//! 0x0808_0024 |                                               |
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0028 | DevEui                                        |
//! 0x0808_002C |                                               |
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0030 | AppEui                                        |
//! 0x0808_0034 |                                               |
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0038 |                                               |
//! 0x0808_003C | AppKey                                        |
//! 0x0808_0040 |                                               |
//! 0x0808_0044 |                                               |
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0048 | SleepInterval         | BatteryMin            |
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_004C | VoltsPerBit                                   |
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0050 | Activation| WakeByInt | Confirmed | JitterMax |
//!             +-----------+-----------+-----------+-----------+
//! 0x0808_0054 | DriftComp | Reserved                          |
//!             +-----------+-----------+-----------+-----------+
//! ```
//!
//! ## Fields
//!
//! ### Header (0x0808_0000 - 0x0808_0004, 4 bytes)
//!
//! - `Version`: The constant `0x01`, can be used to change the config layout
//!   in the future (1 byte)
//! - The other three bytes are reserved, for version 1 they should contain
//!   the sequence `0x23 0x42 0x99` (in order to have some more checks
//!   against configuration data corruption).
//!
//! ### LoRaWAN Configuration (0x0808_0004 - 0x0808_0048, 68 bytes)
//!
//! - `DevAddr`: LoRaWAN device address (4 bytes)
//! - `NwkSKey`: LoRaWAN ABP network session key (16 bytes)
//! - `AppSKey`: LoRaWAN ABP app session key (16 bytes)
//! - `DevEui`: LoRaWAN OTAA device EUI (8 bytes)
//! - `AppEui`: LoRaWAN OTAA application EUI (8 bytes)
//! - `AppKey`: LoRaWAN OTAA application key (16 bytes)
//!
//! Only the credential set matching the activation mode needs to contain
//! valid data; the other set may be zeroed.
//!
//! ### Node Configuration (0x0808_0048 - 0x0808_0058, 16 bytes)
//!
//! - `SleepInterval`: Seconds of deep sleep between two transmission
//!   cycles (2 bytes, u16, LE); 0 means sleep until an external wake event
//! - `BatteryMin`: Minimum operating battery voltage in centivolts; below
//!   this level transmissions are deferred (2 bytes, u16, LE)
//! - `VoltsPerBit`: ADC calibration constant of the battery voltage
//!   divider (4 bytes, f32, LE)
//! - `Activation`: `0x00` for ABP (pre-shared session), `0x01` for OTAA
//!   (network join); any other value marks the configuration invalid
//! - `WakeByInt`: Non-zero to arm the two external wake interrupt lines
//! - `Confirmed`: Non-zero to request a link-layer acknowledgement for
//!   every uplink
//! - `JitterMax`: Upper bound, in seconds, of the random jitter added to
//!   each sleep interval (1 byte, u8)
//! - `DriftComp`: Sleep duration compensation factor in percent,
//!   countering the low-power oscillator drift during power-down; the
//!   empirical value for this board revision is 88 (1 byte, u8)

use core::fmt;

pub const BASE_ADDR: usize = 0x0808_0000;
pub const CONFIG_DATA_SIZE: usize = 88;

#[derive(PartialEq, Debug, Copy, Clone)]
#[repr(u8)]
pub enum ConfigVersion {
    V1 = 1,
}

impl fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "1"),
        }
    }
}

/// LoRaWAN session establishment mode.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
#[repr(u8)]
pub enum ActivationMode {
    /// Pre-shared static session keys.
    Abp = 0,
    /// Dynamic network join handshake.
    Otaa = 1,
}

pub enum ConfigError {
    /// The version byte is not supported.
    UnsupportedVersion(u8),
    /// Wrong magic bytes, the configuration data might be corrupted.
    WrongMagicBytes,
    /// The activation mode byte is neither ABP nor OTAA.
    InvalidActivationMode(u8),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion(v) => write!(f, "Unsupported config format version ({})", v),
            Self::WrongMagicBytes => write!(f, "Wrong magic bytes"),
            Self::InvalidActivationMode(v) => write!(f, "Invalid activation mode ({})", v),
        }
    }
}

pub struct Config {
    /// Configuration format version
    pub version: ConfigVersion,
    /// LoRaWAN device address (4 bytes)
    pub devaddr: [u8; 4],
    /// LoRaWAN ABP network session key (16 bytes)
    pub nwkskey: [u8; 16],
    /// LoRaWAN ABP app session key (16 bytes)
    pub appskey: [u8; 16],
    /// LoRaWAN OTAA device EUI (8 bytes)
    pub deveui: [u8; 8],
    /// LoRaWAN OTAA application EUI (8 bytes)
    pub appeui: [u8; 8],
    /// LoRaWAN OTAA application key (16 bytes)
    pub appkey: [u8; 16],
    /// Seconds of deep sleep between two transmission cycles
    pub sleep_interval_seconds: u16,
    /// Minimum operating battery voltage in centivolts
    pub battery_min_centivolts: u16,
    /// ADC calibration constant of the battery voltage divider
    pub volts_per_bit: f32,
    /// Session establishment mode
    pub activation: ActivationMode,
    /// Arm the two external wake interrupt lines
    pub wake_by_interrupt: bool,
    /// Request a link-layer acknowledgement for every uplink
    pub confirmed_uplinks: bool,
    /// Upper bound of the per-cycle random sleep jitter, in seconds
    pub sleep_jitter_max_seconds: u8,
    /// Sleep duration compensation factor in percent (nominal 88)
    pub sleep_drift_comp_pct: u8,
}

impl Config {
    /// Parse a configuration image.
    ///
    /// Returns an error if the version, magic bytes or activation mode
    /// field do not contain supported values. A node with an invalid
    /// configuration must not start radio operation.
    pub fn parse(data: &[u8; CONFIG_DATA_SIZE]) -> Result<Self, ConfigError> {
        // Determine version
        let version: ConfigVersion = match data[0] {
            1 => ConfigVersion::V1,
            other => return Err(ConfigError::UnsupportedVersion(other)),
        };

        // Validate magic bytes
        if data[0x01..0x04] != [0x23, 0x42, 0x99] {
            return Err(ConfigError::WrongMagicBytes);
        }

        // Read keys
        let mut devaddr = [0; 4];
        devaddr.copy_from_slice(&data[0x04..0x08]);
        let mut nwkskey = [0; 16];
        nwkskey.copy_from_slice(&data[0x08..0x18]);
        let mut appskey = [0; 16];
        appskey.copy_from_slice(&data[0x18..0x28]);
        let mut deveui = [0; 8];
        deveui.copy_from_slice(&data[0x28..0x30]);
        let mut appeui = [0; 8];
        appeui.copy_from_slice(&data[0x30..0x38]);
        let mut appkey = [0; 16];
        appkey.copy_from_slice(&data[0x38..0x48]);

        // Read node configuration
        let sleep_interval_seconds = u16::from_le_bytes([data[0x48], data[0x49]]);
        let battery_min_centivolts = u16::from_le_bytes([data[0x4A], data[0x4B]]);
        let volts_per_bit =
            f32::from_le_bytes([data[0x4C], data[0x4D], data[0x4E], data[0x4F]]);
        let activation = match data[0x50] {
            0 => ActivationMode::Abp,
            1 => ActivationMode::Otaa,
            other => return Err(ConfigError::InvalidActivationMode(other)),
        };
        let wake_by_interrupt = data[0x51] != 0;
        let confirmed_uplinks = data[0x52] != 0;
        let sleep_jitter_max_seconds = data[0x53];
        let sleep_drift_comp_pct = data[0x54];

        Ok(Self {
            version,
            devaddr,
            nwkskey,
            appskey,
            deveui,
            appeui,
            appkey,
            sleep_interval_seconds,
            battery_min_centivolts,
            volts_per_bit,
            activation,
            wake_by_interrupt,
            confirmed_uplinks,
            sleep_jitter_max_seconds,
            sleep_drift_comp_pct,
        })
    }

    /// Read current device configuration from EEPROM.
    ///
    /// UNSAFE: This method is unsafe because it reads raw memory. When
    /// calling this, ensure that no other part of the code can write to
    /// EEPROM at the same time. An easy way to do this, is to hold a
    /// mutable reference to the `pac::FLASH` peripheral.
    pub unsafe fn read_from_eeprom() -> Result<Self, ConfigError> {
        // Note(unsafe): Read with no side effects. See function docs for
        // more information.
        let data: &[u8; CONFIG_DATA_SIZE] = &*(BASE_ADDR as *const [u8; CONFIG_DATA_SIZE]);
        Self::parse(data)
    }

    /// Serialize the configuration into the in-memory representation.
    pub fn serialize(&self) -> [u8; CONFIG_DATA_SIZE] {
        let mut data = [0; CONFIG_DATA_SIZE];

        // Write version
        data[0] = self.version as u8;

        // Write magic bytes
        data[1] = 0x23;
        data[2] = 0x42;
        data[3] = 0x99;

        // Write keys
        data[0x04..0x08].copy_from_slice(&self.devaddr);
        data[0x08..0x18].copy_from_slice(&self.nwkskey);
        data[0x18..0x28].copy_from_slice(&self.appskey);
        data[0x28..0x30].copy_from_slice(&self.deveui);
        data[0x30..0x38].copy_from_slice(&self.appeui);
        data[0x38..0x48].copy_from_slice(&self.appkey);

        // Write node configuration
        data[0x48..0x4A].copy_from_slice(&self.sleep_interval_seconds.to_le_bytes());
        data[0x4A..0x4C].copy_from_slice(&self.battery_min_centivolts.to_le_bytes());
        data[0x4C..0x50].copy_from_slice(&self.volts_per_bit.to_le_bytes());
        data[0x50] = self.activation as u8;
        data[0x51] = self.wake_by_interrupt as u8;
        data[0x52] = self.confirmed_uplinks as u8;
        data[0x53] = self.sleep_jitter_max_seconds;
        data[0x54] = self.sleep_drift_comp_pct;

        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_config() -> Config {
        Config {
            version: ConfigVersion::V1,
            devaddr: [0x26, 0x01, 0x2A, 0x7F],
            nwkskey: [0x11; 16],
            appskey: [0x22; 16],
            deveui: [0x33; 8],
            appeui: [0x44; 8],
            appkey: [0x55; 16],
            sleep_interval_seconds: 300,
            battery_min_centivolts: 330,
            volts_per_bit: 0.005_65,
            activation: ActivationMode::Abp,
            wake_by_interrupt: true,
            confirmed_uplinks: false,
            sleep_jitter_max_seconds: 5,
            sleep_drift_comp_pct: 88,
        }
    }

    #[test]
    fn test_serialize_parse_roundtrip() {
        let config = example_config();
        let data = config.serialize();
        let parsed = Config::parse(&data).ok().unwrap();
        assert_eq!(parsed.devaddr, config.devaddr);
        assert_eq!(parsed.nwkskey, config.nwkskey);
        assert_eq!(parsed.appkey, config.appkey);
        assert_eq!(parsed.sleep_interval_seconds, 300);
        assert_eq!(parsed.battery_min_centivolts, 330);
        assert_eq!(parsed.volts_per_bit, 0.005_65);
        assert_eq!(parsed.activation, ActivationMode::Abp);
        assert!(parsed.wake_by_interrupt);
        assert!(!parsed.confirmed_uplinks);
        assert_eq!(parsed.sleep_jitter_max_seconds, 5);
        assert_eq!(parsed.sleep_drift_comp_pct, 88);
    }

    #[test]
    fn test_parse_rejects_unsupported_version() {
        let mut data = example_config().serialize();
        data[0] = 0x07;
        assert!(matches!(
            Config::parse(&data),
            Err(ConfigError::UnsupportedVersion(0x07))
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_magic_bytes() {
        let mut data = example_config().serialize();
        data[2] = 0x00;
        assert!(matches!(
            Config::parse(&data),
            Err(ConfigError::WrongMagicBytes)
        ));
    }

    #[test]
    fn test_parse_rejects_invalid_activation_mode() {
        let mut data = example_config().serialize();
        data[0x50] = 0xFF;
        assert!(matches!(
            Config::parse(&data),
            Err(ConfigError::InvalidActivationMode(0xFF))
        ));
    }
}
