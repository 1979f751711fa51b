//! Battery supply voltage monitoring.
//!
//! The battery sits behind a switchable voltage divider; a reading enables
//! the divider, averages a burst of ADC samples and converts them with the
//! volts-per-bit calibration constant from the device configuration.

use embedded_hal::adc::OneShot;
use embedded_hal::digital::v2::OutputPin;
use stm32l0xx_hal::{
    adc::{self, Adc, Align},
    gpio::{gpioa::PA1, Analog, Output, Pin, PushPull},
};

use envsense_firmware::sensors::BatteryMonitor;

/// Samples averaged per reading.
const SAMPLE_COUNT: u16 = 10;

pub struct SupplyMonitor {
    adc_pin: PA1<Analog>,
    adc: Adc<adc::Ready>,
    enable_pin: Pin<Output<PushPull>>,
    volts_per_bit: f32,
}

impl SupplyMonitor {
    pub fn new(
        adc_pin: PA1<Analog>,
        mut adc: Adc<adc::Ready>,
        enable_pin: Pin<Output<PushPull>>,
        volts_per_bit: f32,
    ) -> Self {
        adc.set_precision(adc::Precision::B_12);
        adc.set_align(Align::Right); // Use 12 least-significant bits to encode data
        adc.set_sample_time(adc::SampleTime::T_79_5);
        SupplyMonitor {
            adc_pin,
            adc,
            enable_pin,
            volts_per_bit,
        }
    }

    /// Disable the supply voltage monitoring voltage divider
    fn disable(&mut self) {
        self.enable_pin.set_low().unwrap();
    }

    /// Enable the supply voltage monitoring voltage divider
    fn enable(&mut self) {
        self.enable_pin.set_high().unwrap();
    }

    /// One raw ADC sample, with the divider switched around it. Used at
    /// boot to gather an entropy seed for the sleep jitter.
    pub fn read_supply_raw(&mut self) -> Option<u16> {
        self.enable();
        let val: Option<u16> = self.adc.read(&mut self.adc_pin).ok();
        self.disable();
        val
    }

    /// Average `SAMPLE_COUNT` samples and convert to volts.
    pub fn read_supply(&mut self) -> Option<f32> {
        self.enable();
        let mut sum: u32 = 0;
        for _ in 0..SAMPLE_COUNT {
            let val: u16 = match self.adc.read(&mut self.adc_pin).ok() {
                Some(val) => val,
                None => {
                    self.disable();
                    return None;
                }
            };
            sum += u32::from(val);
        }
        self.disable();
        Some(Self::convert_sum(sum, self.volts_per_bit))
    }

    /// Convert a sum of `SAMPLE_COUNT` raw samples to volts.
    pub fn convert_sum(sum: u32, volts_per_bit: f32) -> f32 {
        (sum as f32 / f32::from(SAMPLE_COUNT)) * volts_per_bit
    }
}

impl BatteryMonitor for SupplyMonitor {
    fn read_volts(&mut self) -> Option<f32> {
        self.read_supply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_sum() {
        // 10 samples of 655 counts at 5.65 mV/bit ≈ 3.70 V
        let result = SupplyMonitor::convert_sum(6550, 0.005_65);
        assert!((result - 3.70).abs() < 0.01);
    }
}
