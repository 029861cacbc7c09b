use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, OutputType, Pull, Speed};
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::time::Hertz;
use embassy_stm32::timer::low_level::CountingMode;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm};
use embassy_time::{Duration, block_for};
use static_cell::StaticCell;

use balance_core::config::{WHEELS, WheelSide};
use balance_core::{BalanceConfig, EdgeBinding, PulseCounter, Supervisor, WheelChannel};

use crate::hw::{Mpu6050, PwmBridge};

use self::control_task::{FirmwareSupervisor, now};

mod control_task;
mod encoder_task;
mod serial_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

const PWM_FREQUENCY: Hertz = Hertz::khz(20);
const I2C_FREQUENCY: Hertz = Hertz::khz(400);
const CALIBRATION_PAUSE: Duration = Duration::from_millis(10);

static LEFT_COUNTER: PulseCounter = PulseCounter::new();
static RIGHT_COUNTER: PulseCounter = PulseCounter::new();
static SUPERVISOR: StaticCell<FirmwareSupervisor> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA2,
        PA3,
        PA4,
        PA5,
        PA6,
        PA7,
        PB0,
        PB1,
        PB4,
        PB5,
        PB6,
        PB7,
        EXTI0,
        EXTI1,
        EXTI4,
        EXTI5,
        TIM3,
        I2C1,
        USART5,
        ..
    } = hal::init(config);

    // Enables come up released so neither bridge can conduct before the loop runs.
    let pwm = SimplePwm::new(
        TIM3,
        Some(PwmPin::new(PA6, OutputType::PushPull)),
        Some(PwmPin::new(PA7, OutputType::PushPull)),
        None,
        None,
        PWM_FREQUENCY,
        CountingMode::EdgeAlignedUp,
    );
    let channels = pwm.split();
    let left_bridge = PwmBridge::new(
        channels.ch1,
        Output::new(PA4, Level::Low, Speed::Low),
        Output::new(PA5, Level::Low, Speed::Low),
    );
    let right_bridge = PwmBridge::new(
        channels.ch2,
        Output::new(PA2, Level::Low, Speed::Low),
        Output::new(PA3, Level::Low, Speed::Low),
    );

    spawner
        .spawn(encoder_task::run(
            EdgeBinding::new(WheelSide::Left, &LEFT_COUNTER),
            ExtiInput::new(PA0, EXTI0, Pull::Up),
            ExtiInput::new(PA1, EXTI1, Pull::Up),
        ))
        .expect("failed to spawn left encoder task");
    spawner
        .spawn(encoder_task::run(
            EdgeBinding::new(WheelSide::Right, &RIGHT_COUNTER),
            ExtiInput::new(PB4, EXTI4, Pull::Up),
            ExtiInput::new(PB5, EXTI5, Pull::Up),
        ))
        .expect("failed to spawn right encoder task");
    for wheel in WHEELS {
        defmt::info!(
            "encoder: {} wheel A={} B={} pwm={} en={}/{}",
            defmt::Display2Format(&wheel.side),
            wheel.encoder_a,
            wheel.encoder_b,
            wheel.pwm,
            wheel.forward_enable,
            wheel.reverse_enable
        );
    }

    let i2c = I2c::new_blocking(I2C1, PB6, PB7, I2C_FREQUENCY, i2c::Config::default());
    let imu = match Mpu6050::init(i2c) {
        Ok(imu) => imu,
        Err(err) => {
            defmt::error!(
                "imu: initialization failed: {}; motors held stopped",
                defmt::Display2Format(&err)
            );
            let _held = (left_bridge, right_bridge);
            idle_forever().await
        }
    };
    defmt::info!("imu: MPU6050 ready at 0x{=u8:x}", crate::imu::ADDRESS);

    let balance = BalanceConfig::DEFAULT;
    let supervisor = match Supervisor::new(
        balance,
        imu,
        WheelChannel::new(&LEFT_COUNTER, left_bridge),
        WheelChannel::new(&RIGHT_COUNTER, right_bridge),
    ) {
        Ok(supervisor) => SUPERVISOR.init(supervisor),
        Err(err) => {
            defmt::error!(
                "supervisor: invalid configuration: {}",
                defmt::Display2Format(&err)
            );
            idle_forever().await
        }
    };

    defmt::info!(
        "imu: calibrating over {} samples, keep the chassis upright",
        balance.calibration_samples
    );
    match supervisor.calibrate_blocking(balance.calibration_samples, now(), || {
        block_for(CALIBRATION_PAUSE);
    }) {
        Ok(offset) => defmt::info!("imu: calibration offset {} deg", offset),
        Err(err) => defmt::warn!(
            "imu: calibration failed, using zero offset: {}",
            defmt::Display2Format(&err)
        ),
    }

    let (uart_tx, uart_rx) = match serial_task::open(USART5, PB0, PB1) {
        Ok(uart) => uart.split(),
        Err(_) => {
            defmt::error!("serial: UART configuration rejected; motors held stopped");
            supervisor.stop_motors();
            idle_forever().await
        }
    };
    spawner
        .spawn(serial_task::run(uart_tx))
        .expect("failed to spawn serial writer task");
    spawner
        .spawn(control_task::run(supervisor, uart_rx))
        .expect("failed to spawn control task");

    idle_forever().await
}

async fn idle_forever() -> ! {
    loop {
        core::future::pending::<()>().await;
    }
}
