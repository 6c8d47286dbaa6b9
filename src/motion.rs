//! MPU6050 motion-wake driver.
//!
//! The sensor is only used as a wake source: configured once at boot for
//! latched, active-high motion interrupts in cycle mode, then read back to
//! clear the latch. Absence is not an error (the power button takes over).
//!
//! Reference: InvenSense MPU-6000/6050 Register Map (RM-MPU-6000A-00)

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::error::Error;

/// ACCEL_CONFIG: full scale and high-pass filter.
pub const REG_ACCEL_CONFIG: u8 = 0x1C;
/// MOT_THR: motion threshold, 2 mg/LSB at ±2 g.
pub const REG_MOT_THR: u8 = 0x1F;
/// MOT_DUR: motion duration, 1 ms/LSB.
pub const REG_MOT_DUR: u8 = 0x20;
pub const REG_INT_PIN_CFG: u8 = 0x37;
pub const REG_INT_ENABLE: u8 = 0x38;
/// INT_STATUS: reading clears the latched interrupt.
pub const REG_INT_STATUS: u8 = 0x3A;
pub const REG_MOT_DETECT_CTRL: u8 = 0x69;
pub const REG_PWR_MGMT_1: u8 = 0x6B;
pub const REG_PWR_MGMT_2: u8 = 0x6C;
pub const REG_WHO_AM_I: u8 = 0x75;

/// Expected WHO_AM_I. Some clones report other values.
pub const WHO_AM_I_MPU6050: u8 = 0x68;

/// INT_STATUS / INT_ENABLE motion bit.
pub const MOT_INT: u8 = 0x40;

/// HPF 5 Hz, ±2 g.
const ACCEL_HPF_5HZ: u8 = 0x01;
/// ~40 mg: picks up a lift, ignores table vibration.
const MOT_THRESHOLD: u8 = 20;
const MOT_DURATION: u8 = 1;
const MOT_DETECT_DECREMENT: u8 = 0x15;
/// Active high, push-pull, latched, cleared on any read.
const INT_LATCHED_ACTIVE_HIGH: u8 = 0x30;
/// CYCLE=1, SLEEP=0, TEMP_DIS=1.
const PWR1_CYCLE: u8 = 0x28;
/// LP_WAKE_CTRL=5 Hz, gyro in standby.
const PWR2_LP_WAKE_5HZ: u8 = 0x47;

/// Register writes for motion wake, in order.
pub const WAKE_SEQUENCE: [(u8, u8); 8] = [
    (REG_ACCEL_CONFIG, ACCEL_HPF_5HZ),
    (REG_MOT_THR, MOT_THRESHOLD),
    (REG_MOT_DUR, MOT_DURATION),
    (REG_MOT_DETECT_CTRL, MOT_DETECT_DECREMENT),
    (REG_INT_PIN_CFG, INT_LATCHED_ACTIVE_HIGH),
    (REG_INT_ENABLE, MOT_INT),
    (REG_PWR_MGMT_1, PWR1_CYCLE),
    (REG_PWR_MGMT_2, PWR2_LP_WAKE_5HZ),
];

pub struct MotionSensor<I> {
    i2c: I,
    addr: u8,
}

impl<I: I2c> MotionSensor<I> {
    pub fn new(i2c: I, addr: u8) -> Self {
        Self { i2c, addr }
    }

    fn read(&mut self, reg: u8) -> Result<u8, I::Error> {
        let mut buf = [0u8];
        self.i2c.write_read(self.addr, &[reg], &mut buf)?;
        Ok(buf[0])
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), Error> {
        self.i2c.write(self.addr, &[reg, value]).map_err(|_| Error::I2c)
    }

    /// Bounded presence check. Any bus error (NAK included) means absent.
    pub fn probe(&mut self) -> Result<(), Error> {
        match self.read(REG_WHO_AM_I) {
            Ok(WHO_AM_I_MPU6050) => Ok(()),
            Ok(other) => {
                warn!("Motion: WHO_AM_I {=u8:#x}, continuing", other);
                Ok(())
            }
            Err(_) => {
                info!("Motion: no sensor at {=u8:#x}", self.addr);
                Err(Error::SensorAbsent)
            }
        }
    }

    /// Wake the chip and arm latched motion interrupts in cycle mode.
    pub fn configure_wake(&mut self, delay: &mut impl DelayNs) -> Result<(), Error> {
        self.write(REG_PWR_MGMT_1, 0x00)?;
        delay.delay_ms(100);
        for (reg, value) in WAKE_SEQUENCE {
            self.write(reg, value)?;
        }
        info!("Motion: wake armed (threshold {})", MOT_THRESHOLD);
        Ok(())
    }

    /// Read and clear the latched interrupt. `Ok(true)` if it was motion.
    pub fn check_motion(&mut self) -> Result<bool, Error> {
        let status = self.read(REG_INT_STATUS).map_err(|_| Error::I2c)?;
        Ok(status & MOT_INT != 0)
    }

    /// Give the bus back.
    pub fn release(self) -> I {
        self.i2c
    }
}
