use balance_core::motor::HBridge;
use embassy_stm32::gpio::{Level, Output};
use embassy_stm32::peripherals::TIM3;
use embassy_stm32::timer::simple_pwm::SimplePwmChannel;

/// One BTS7960 channel: a TIM3 compare output plus the two enable lines.
pub struct PwmBridge {
    pwm: SimplePwmChannel<'static, TIM3>,
    forward: Output<'static>,
    reverse: Output<'static>,
}

impl PwmBridge {
    /// Takes over the pins with both enables released and zero duty.
    pub fn new(
        mut pwm: SimplePwmChannel<'static, TIM3>,
        mut forward: Output<'static>,
        mut reverse: Output<'static>,
    ) -> Self {
        forward.set_low();
        reverse.set_low();
        pwm.set_duty_cycle(0);
        pwm.enable();
        Self {
            pwm,
            forward,
            reverse,
        }
    }
}

impl HBridge for PwmBridge {
    fn set_forward_enable(&mut self, asserted: bool) {
        self.forward.set_level(Level::from(asserted));
    }

    fn set_reverse_enable(&mut self, asserted: bool) {
        self.reverse.set_level(Level::from(asserted));
    }

    fn set_duty(&mut self, duty: u16) {
        self.pwm.set_duty_cycle(duty);
    }

    fn max_duty(&self) -> u16 {
        self.pwm.max_duty_cycle()
    }
}
