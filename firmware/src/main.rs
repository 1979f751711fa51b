#![no_main]
#![no_std]
#![cfg(target_arch = "arm")]

// Libcore
use core::cell::RefCell;
use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

// Third party
use cortex_m_rt::entry;
use one_wire_bus::OneWire;
use panic_persist as _;
use rn2xx3::rn2483_868;
use stm32l0xx_hal::exti::{ConfigurableLine, Exti, ExtiLine, GpioLine, TriggerEdge};
use stm32l0xx_hal::gpio::Port;
use stm32l0xx_hal::prelude::*;
use stm32l0xx_hal::syscfg::SYSCFG;
use stm32l0xx_hal::{self as hal, pac, pac::interrupt, serial, time};

// First party crates
use config::Config;
use envsense_common::version::FirmwareVersion;
use envsense_firmware::node::{Node, NodeConfig};
use envsense_firmware::radio::Radio;
use envsense_firmware::sensors::SensorSet;
use envsense_firmware::sleep::{SleepController, SleepParams};
use envsense_firmware::wake::WakeMonitor;

// Modules
mod atmo;
mod delay;
mod ds18b20;
mod power;
mod rn2483;
mod supply_monitor;
mod uptime;

// Crate-internal
use atmo::AtmoProbe;
use delay::Tim7Delay;
use ds18b20::{Ds18b20, Ds18b20Probe};
use power::StopPowerDown;
use rn2483::{ModemRadio, SessionKeys};
use supply_monitor::SupplyMonitor;
use uptime::Uptime;

const FIRMWARE_VERSION_STR: &str = env!("CARGO_PKG_VERSION");
// Keep in sync with the package version above.
const FIRMWARE_VERSION: FirmwareVersion = FirmwareVersion::new(0, 3);

/// One-shot wake flags, each written by exactly one interrupt handler and
/// consumed by the main loop through the wake monitor.
static WAKE_LINE_A: AtomicBool = AtomicBool::new(false);
static WAKE_LINE_B: AtomicBool = AtomicBool::new(false);

#[entry]
fn main() -> ! {
    let cp = pac::CorePeripherals::take().unwrap();
    let mut dp = pac::Peripherals::take().unwrap();

    // Init delay timer
    let delay = RefCell::new(Tim7Delay::new(dp.TIM7, &mut dp.RCC));

    // Clock configuration. Use HSI at 16 MHz.
    let mut rcc = dp.RCC.freeze(hal::rcc::Config::hsi16());

    // Millisecond uptime counter
    let mut clock = Uptime::new(cp.SYST);

    // Get access to GPIOs
    let gpioa = dp.GPIOA.split(&mut rcc);
    let gpiob = dp.GPIOB.split(&mut rcc);

    // Initialize serial port(s)
    let mut debug = serial::Serial::usart1(
        dp.USART1,
        gpiob.pb6.into_floating_input(),
        gpiob.pb7.into_floating_input(),
        serial::Config {
            baudrate: time::Bps(57_600),
            wordlength: serial::WordLength::DataBits8,
            parity: serial::Parity::ParityNone,
            stopbits: serial::StopBits::STOP1,
        },
        &mut rcc,
    )
    .unwrap();
    let mut lpuart1 = serial::Serial::lpuart1(
        dp.LPUART1,
        gpioa.pa2.into_floating_input(),
        gpioa.pa3.into_floating_input(),
        // Config: See RN2483 datasheet, table 3-1
        serial::Config {
            baudrate: time::Bps(57_600),
            wordlength: serial::WordLength::DataBits8,
            parity: serial::Parity::ParityNone,
            stopbits: serial::StopBits::STOP1,
        },
        &mut rcc,
    )
    .unwrap();

    writeln!(debug, "\nBooting: EnvSense firmware={}", FIRMWARE_VERSION_STR).unwrap();

    // Check whether we just woke up after a panic
    if let Some(msg) = panic_persist::get_panic_message_utf8() {
        // If yes, send backtrace via serial
        writeln!(debug, "=== 🔥 FOUND PANIC 🔥 ===").ok();
        writeln!(debug, "{}", msg.trim_end()).ok();
        writeln!(debug, "==== 🚒 END PANIC 🚒 ====").ok();
    }

    // Read config from EEPROM
    //
    // Note(unsafe): We need to guarantee that no part of the code can
    // write to EEPROM while it's being read. To ensure that, we hold a
    // mutable reference to the FLASH peripheral.
    let device_config = match unsafe {
        let _flash = &mut dp.FLASH;
        Config::read_from_eeprom()
    } {
        Ok(c) => c,
        Err(e) => {
            // Operating with unset or corrupted radio credentials could
            // violate spectrum regulations or poison a shared network
            // session. Never proceed.
            writeln!(debug, "Error: invalid config: {}. Halting.", e).ok();
            loop {
                cortex_m::asm::wfi();
            }
        }
    };
    writeln!(debug, "Loaded config (v{}) from EEPROM", device_config.version).unwrap();

    // Initialize supply monitor
    let adc = dp.ADC.constrain(&mut rcc);
    let a1 = gpioa.pa1.into_analog();
    let adc_enable_pin = gpioa.pa5.into_push_pull_output().downgrade();
    let mut supply = SupplyMonitor::new(a1, adc, adc_enable_pin, device_config.volts_per_bit);
    writeln!(debug, "Supply: {:?} V", supply.read_supply()).unwrap();

    // Seed the sleep jitter from ADC noise and the device identity
    let seed = (u32::from(supply.read_supply_raw().unwrap_or(0)) << 16)
        ^ u32::from_le_bytes(device_config.devaddr)
        ^ u32::from_le_bytes([
            device_config.deveui[0],
            device_config.deveui[1],
            device_config.deveui[2],
            device_config.deveui[3],
        ]);

    // Set up I²C pins and initialize the BME280
    writeln!(debug, "Init BME280…").unwrap();
    let sda = gpioa.pa10.into_open_drain_output();
    let scl = gpioa.pa9.into_open_drain_output();
    let i2c = dp.I2C1.i2c(sda, scl, 10.khz(), &mut rcc);
    let atmo = AtmoProbe::init(i2c, &delay);
    if atmo.is_none() {
        writeln!(debug, "Could not find BME280").unwrap();
    }

    // Initialize DS18B20
    writeln!(debug, "Init DS18B20…").unwrap();
    let one_wire_pin = gpioa.pa6.into_open_drain_output();
    let mut one_wire = OneWire::new(one_wire_pin).unwrap();
    let probe = Ds18b20::find(&mut one_wire, &mut *delay.borrow_mut())
        .map_err(|err| writeln!(debug, "Could not find DS18B20: {:?}", err).unwrap())
        .ok()
        .map(|device| Ds18b20Probe::new(one_wire, device, &delay));

    // Arm the external wake lines
    let mut syscfg = SYSCFG::new(dp.SYSCFG, &mut rcc);
    let mut exti = Exti::new(dp.EXTI);
    if device_config.wake_by_interrupt {
        writeln!(debug, "Arming wake interrupts (PA0/PA8)").unwrap();
        let _wake_a = gpioa.pa0.into_pull_down_input();
        let _wake_b = gpioa.pa8.into_pull_down_input();
        exti.listen_gpio(
            &mut syscfg,
            Port::PA,
            GpioLine::from_raw_line(0).unwrap(),
            TriggerEdge::Rising,
        );
        exti.listen_gpio(
            &mut syscfg,
            Port::PA,
            GpioLine::from_raw_line(8).unwrap(),
            TriggerEdge::Rising,
        );
        unsafe {
            cortex_m::peripheral::NVIC::unmask(pac::Interrupt::EXTI0_1);
            cortex_m::peripheral::NVIC::unmask(pac::Interrupt::EXTI4_15);
        }
    }

    // Reset RN2483
    writeln!(debug, "Init RN2483…").unwrap();
    writeln!(debug, "RN2483: Hard reset…").unwrap();
    let mut rn_reset_pin = gpioa.pa4.into_push_pull_output();
    rn_reset_pin.set_low().expect("Could not set RN reset pin");
    delay.borrow_mut().delay_us(500u16);
    rn_reset_pin.set_high().expect("Could not set RN reset pin");
    // 100ms until TX line is up, 85ms until version is sent, 10ms extra
    delay.borrow_mut().delay_ms(195u16);

    // Clear hardware error flags
    lpuart1.clear_errors();

    // Initialize RN2xx3
    let mut rn = rn2483_868(lpuart1);

    // Show device info
    writeln!(debug, "RN2483: Device info").unwrap();
    match rn.hweui() {
        Ok(hweui) => writeln!(debug, "  Hardware EUI: {}", hweui).unwrap(),
        Err(e) => writeln!(debug, "  Could not read hweui: {:?}", e).unwrap(),
    };
    match rn.version() {
        Ok(version) => writeln!(debug, "  Version: {}", version).unwrap(),
        Err(e) => writeln!(debug, "  Could not read version: {:?}", e).unwrap(),
    };

    let mut radio = ModemRadio::new(rn, SessionKeys::from_config(&device_config), clock);

    // Power-down machinery: RTC wakeup timer ends the timed STOP periods
    let pwr = hal::pwr::PWR::new(dp.PWR, &mut rcc);
    let rtc = hal::rtc::Rtc::new(dp.RTC, &mut rcc, &pwr, None).expect("Could not init RTC");
    exti.listen_configurable(ConfigurableLine::RtcWakeup, TriggerEdge::Rising);
    unsafe {
        cortex_m::peripheral::NVIC::unmask(pac::Interrupt::RTC);
    }
    let mut power = StopPowerDown::new(cp.SCB, rcc, pwr, rtc);

    let mut node = Node::new(
        NodeConfig {
            sleep_interval_seconds: device_config.sleep_interval_seconds,
            battery_min_volts: f32::from(device_config.battery_min_centivolts) / 100.0,
            confirmed_uplinks: device_config.confirmed_uplinks,
        },
        FIRMWARE_VERSION,
        WakeMonitor::new(&WAKE_LINE_A, &WAKE_LINE_B),
    );
    let mut sleep = SleepController::new(
        SleepParams {
            jitter_max_seconds: device_config.sleep_jitter_max_seconds,
            drift_comp_pct: device_config.sleep_drift_comp_pct,
        },
        seed,
    );
    let mut sensors = SensorSet {
        atmo,
        probe,
        battery: supply,
    };

    writeln!(debug, "Initialization done").unwrap();

    // Session setup and join; in ABP mode the join is a local operation
    // and completes on the first pump below.
    radio.reset_session();

    loop {
        while let Some(event) = radio.poll_event() {
            node.handle_event(event, &mut radio, &clock, &mut debug);
        }
        node.poll(
            &mut radio,
            &mut sensors,
            &mut sleep,
            &mut power,
            &mut clock,
            &mut debug,
        );
    }
}

#[interrupt]
fn EXTI0_1() {
    Exti::unpend(GpioLine::from_raw_line(0).unwrap());
    WAKE_LINE_A.store(true, Ordering::SeqCst);
}

#[interrupt]
fn EXTI4_15() {
    Exti::unpend(GpioLine::from_raw_line(8).unwrap());
    WAKE_LINE_B.store(true, Ordering::SeqCst);
}
