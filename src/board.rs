use embassy_stm32::gpio::{Level, Output, OutputType, Speed};
use embassy_stm32::mode::Async;
use embassy_stm32::peripherals::TIM1;
use embassy_stm32::time::Hertz;
use embassy_stm32::timer::low_level::CountingMode;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm, SimplePwmChannel};
use embassy_stm32::{bind_interrupts, i2c, peripherals, rcc, Config};

use crate::bus::SharedBus;
use crate::config::{
    ADC_A_ADDRESS, ADC_B_ADDRESS, I2C_FREQUENCY_HZ, IMU_ADDRESS, MOTOR_PWM_FREQUENCY_HZ,
};
use crate::drivers::{Adc128d818, Bno055, Cd74hc4067, HBridgeMotor, Pca9956};

// ── IRQ table ─────────────────────────────────────────────
bind_interrupts!(pub struct Irqs {
    I2C2   => i2c::EventInterruptHandler<peripherals::I2C2>,
              i2c::ErrorInterruptHandler<peripherals::I2C2>;
});

pub type PlatformI2c = i2c::I2c<'static, Async>;
pub type PlatformMux = Cd74hc4067<Output<'static>>;
pub type PlatformPwm = SimplePwmChannel<'static, TIM1>;
pub type PlatformMotor = HBridgeMotor<PlatformPwm, PlatformPwm>;

/// Everything that sits behind the bus arbiter on this board.
pub type PlatformDevices = SharedBus<PlatformI2c, Adc128d818, Pca9956, PlatformMux, Bno055>;

// ── Board struct ──────────────────────────────────────────
pub struct Board {
    pub devices: PlatformDevices,
    pub x_motor: PlatformMotor,
    pub y_motor: PlatformMotor,
    /// Held high to keep the motor bridges awake.
    pub motor_sleep_n: Output<'static>,
}

impl Board {
    pub fn init() -> Self {
        let mut config = Config::default();

        // Enable HSI and configure PLL for 64MHz
        config.rcc.hsi = Some(rcc::Hsi {
            sys_div: rcc::HsiSysDiv::DIV1,
        });
        config.rcc.pll = Some(rcc::Pll {
            source: rcc::PllSource::HSI,    // Use HSI as PLL source
            prediv: rcc::PllPreDiv::DIV2,   // 16MHz / 2 = 8MHz
            mul: rcc::PllMul::MUL16,        // 8MHz * 16 = 128MHz
            divp: None,                     // Not used
            divq: None,                     // Not used
            divr: Some(rcc::PllRDiv::DIV2), // 128MHz / 2 = 64MHz
        });
        config.rcc.sys = rcc::Sysclk::PLL1_R;
        let p = embassy_stm32::init(config);

        // I²C2  (DMA CH7 TX, CH6 RX), external pull-ups on the sensor board
        let mut i2c_cfg = i2c::Config::default();
        i2c_cfg.sda_pullup = false;
        i2c_cfg.scl_pullup = false;

        let i2c = i2c::I2c::new(
            p.I2C2,
            p.PB10,
            p.PB11,
            Irqs,
            p.DMA1_CH7,
            p.DMA1_CH6,
            Hertz(I2C_FREQUENCY_HZ),
            i2c_cfg,
        );

        // Ground-select multiplexer: S0..S3 on PB0..PB3, active-low enable on PB4
        let mux = Cd74hc4067::new(
            [
                Output::new(p.PB0, Level::Low, Speed::Low),
                Output::new(p.PB1, Level::Low, Speed::Low),
                Output::new(p.PB2, Level::Low, Speed::Low),
                Output::new(p.PB3, Level::Low, Speed::Low),
            ],
            Output::new(p.PB4, Level::High, Speed::Low),
        )
        .unwrap();

        // TIM1: CH1/CH2 drive the X bridge, CH3/CH4 the Y bridge
        let pwm = SimplePwm::new(
            p.TIM1,
            Some(PwmPin::new_ch1(p.PA8, OutputType::PushPull)),
            Some(PwmPin::new_ch2(p.PA9, OutputType::PushPull)),
            Some(PwmPin::new_ch3(p.PA10, OutputType::PushPull)),
            Some(PwmPin::new_ch4(p.PA11, OutputType::PushPull)),
            Hertz(MOTOR_PWM_FREQUENCY_HZ),
            CountingMode::EdgeAlignedUp,
        );
        let mut channels = pwm.split();
        channels.ch1.enable();
        channels.ch2.enable();
        channels.ch3.enable();
        channels.ch4.enable();

        let x_motor = HBridgeMotor::new(channels.ch1, channels.ch2).unwrap();
        let y_motor = HBridgeMotor::new(channels.ch3, channels.ch4).unwrap();

        let motor_sleep_n = Output::new(p.PB5, Level::High, Speed::Low);

        Self {
            devices: SharedBus {
                bus: i2c,
                converter_a: Adc128d818::new(ADC_A_ADDRESS),
                converter_b: Adc128d818::new(ADC_B_ADDRESS),
                current_source: Pca9956::new(),
                mux,
                orientation: Bno055::new(IMU_ADDRESS),
            },
            x_motor,
            y_motor,
            motor_sleep_n,
        }
    }
}
