//! DS18B20 1-Wire temperature probe.

use core::cell::RefCell;

use embedded_hal::{
    blocking::delay::{DelayMs, DelayUs},
    digital::v2::{InputPin, OutputPin},
};
use one_wire_bus::{Address, OneWire, OneWireError, OneWireResult};

use envsense_firmware::sensors::{TempProbe, DISCONNECTED_TEMPERATURE_C};

use crate::delay::Tim7Delay;

/// Family code of the DS18B20
const FAMILY_CODE_DS18B20: u8 = 0x28;

/// Worst-case conversion time at the power-up resolution of 12 bits.
const CONVERSION_TIME_MS: u16 = 750;

/// Command bytes that can be sent to the DS18B20
mod commands {
    /// Convert temperature
    ///
    /// Initiates a single temperature conversion. The result is stored in
    /// the 2-byte temperature register in the scratchpad memory and the
    /// DS18B20 returns to its low-power idle state.
    pub const CONVERT_TEMP: u8 = 0x44;

    /// Read scratchpad
    ///
    /// Allows the master to read the contents of the scratchpad, starting
    /// with the least significant bit of byte 0 through to byte 8 (CRC).
    pub const READ_SCRATCHPAD: u8 = 0xBE;
}

pub struct Ds18b20(Address);

impl Ds18b20 {
    /// Scan the one-wire bus for a DS18B20 sensor. Return the first sensor found.
    pub fn find<P, E>(
        one_wire_bus: &mut OneWire<P>,
        delay: &mut (impl DelayUs<u16> + DelayMs<u16>),
    ) -> OneWireResult<Self, E>
    where
        P: OutputPin<Error = E> + InputPin<Error = E>,
    {
        for device_address in one_wire_bus.devices(false, delay) {
            let addr = device_address?;
            if addr.family_code() == FAMILY_CODE_DS18B20 {
                return Ok(Self(addr));
            }
        }
        Err(OneWireError::Timeout)
    }

    /// Start a temperature measurement.
    pub fn start_measurement<P, E>(
        &self,
        one_wire_bus: &mut OneWire<P>,
        delay: &mut (impl DelayUs<u16> + DelayMs<u16>),
    ) -> OneWireResult<(), E>
    where
        P: OutputPin<Error = E> + InputPin<Error = E>,
    {
        one_wire_bus.send_command(commands::CONVERT_TEMP, Some(&self.0), delay)
    }

    /// Return the raw DS18B20 temperature data from the scratchpad register.
    ///
    /// NOTE: The resolution of the temperature sensor is user-configurable
    /// to 9, 10, 11, or 12 bits. The default resolution at power-up is
    /// 12-bit (increments of 0.0625°C). Because we never set the
    /// resolution, we can rely on the fact that it's always 12-bit.
    pub fn read_raw_temperature_data<P, E>(
        &self,
        one_wire_bus: &mut OneWire<P>,
        delay: &mut (impl DelayUs<u16> + DelayMs<u16>),
    ) -> OneWireResult<u16, E>
    where
        P: OutputPin<Error = E> + InputPin<Error = E>,
    {
        one_wire_bus.send_command(commands::READ_SCRATCHPAD, Some(&self.0), delay)?;

        // We're only interested in the first two bytes, but we still want
        // to read all 9 bytes in order to be able to verify the CRC.
        let mut scratchpad = [0; 9];
        one_wire_bus.read_bytes(&mut scratchpad, delay)?;
        one_wire_bus::crc::check_crc8(&scratchpad)?;

        if cfg!(feature = "dev") {
            assert!(
                (scratchpad[1] & 0xf0) == 0 || (scratchpad[1] & 0xf0) == 0xf0,
                "Raw data contains more than 12 data bits"
            );
        }
        Ok(u16::from_le_bytes([scratchpad[0], scratchpad[1]]))
    }
}

/// Blocking convert-then-read probe for the control loop.
pub struct Ds18b20Probe<'a, P>
where
    P: OutputPin + InputPin,
{
    bus: OneWire<P>,
    device: Ds18b20,
    delay: &'a RefCell<Tim7Delay>,
}

impl<'a, P, E> Ds18b20Probe<'a, P>
where
    P: OutputPin<Error = E> + InputPin<Error = E>,
{
    pub fn new(bus: OneWire<P>, device: Ds18b20, delay: &'a RefCell<Tim7Delay>) -> Self {
        Self { bus, device, delay }
    }
}

impl<P, E> TempProbe for Ds18b20Probe<'_, P>
where
    P: OutputPin<Error = E> + InputPin<Error = E>,
{
    fn read_temperature_c(&mut self) -> Option<f32> {
        let delay = &mut *self.delay.borrow_mut();
        self.device.start_measurement(&mut self.bus, delay).ok()?;
        delay.delay_ms(CONVERSION_TIME_MS);
        let raw = self
            .device
            .read_raw_temperature_data(&mut self.bus, delay)
            .ok()?;
        let temperature = f32::from(raw as i16) / 16.0;
        // A probe that stopped answering reads back the power-on reset
        // value; treat it like a CRC failure.
        if temperature <= DISCONNECTED_TEMPERATURE_C {
            None
        } else {
            Some(temperature)
        }
    }
}
