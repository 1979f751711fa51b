//! BME280 combined temperature/humidity/pressure sensor.

use core::cell::RefCell;

use bme280::i2c::BME280;
use embedded_hal::blocking::i2c;

use envsense_firmware::sensors::{AtmoReading, AtmoSensor};

use crate::delay::Tim7Delay;

pub struct AtmoProbe<'a, I2C> {
    bme: BME280<I2C>,
    delay: &'a RefCell<Tim7Delay>,
}

impl<'a, I2C, E> AtmoProbe<'a, I2C>
where
    I2C: i2c::Read<Error = E> + i2c::Write<Error = E> + i2c::WriteRead<Error = E>,
{
    /// Probe the sensor on its primary I²C address. `None` when it does
    /// not answer; the node then uplinks the documented sentinels instead.
    pub fn init(i2c: I2C, delay: &'a RefCell<Tim7Delay>) -> Option<Self> {
        let mut bme = BME280::new_primary(i2c);
        bme.init(&mut *delay.borrow_mut()).ok()?;
        Some(Self { bme, delay })
    }
}

impl<I2C, E> AtmoSensor for AtmoProbe<'_, I2C>
where
    I2C: i2c::Read<Error = E> + i2c::Write<Error = E> + i2c::WriteRead<Error = E>,
{
    fn measure(&mut self) -> Option<AtmoReading> {
        // Forced mode: one measurement per call, idle in between.
        let measurement = self.bme.measure(&mut *self.delay.borrow_mut()).ok()?;
        Some(AtmoReading {
            temperature_c: measurement.temperature,
            humidity_pct: measurement.humidity,
            pressure_pa: measurement.pressure,
        })
    }
}
