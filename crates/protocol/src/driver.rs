use core::f64::consts::TAU;

use embedded_hal::{
    delay::DelayNs,
    digital::{self, OutputPin},
    spi::{self, SpiBus},
};
use serde::{Deserialize, Serialize};

use crate::{
    register::{self, AccelParams, Divisors, IfConf, RampMode, Register},
    Datagram, Error, Reply,
};

pub type DriverError<SPI, CS> =
    Error<<SPI as spi::ErrorType>::Error, <CS as digital::ErrorType>::Error>;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub steps_per_revolution: u32,
    pub microsteps: u32,
    pub v_min: u16,
    pub v_max: u16,
    pub divisors: Divisors,
    pub max_accel: u32,
    /// Swap the motor's idea of positive and negative.
    pub reverse: bool,
    /// How long to wait around a write to `X_ACTUAL` for the motor to settle.
    pub settle_ms: u32,
    /// How many times to try an SPI transaction before giving up.
    pub attempts: u32,
    /// The wait before the first retry; it doubles for each later one.
    pub backoff_ms: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            steps_per_revolution: 48,
            microsteps: 8,
            v_min: 20,
            v_max: 400,
            divisors: Divisors {
                pulse_div: 9,
                ramp_div: 9,
            },
            max_accel: 100,
            reverse: false,
            settle_ms: 200,
            attempts: 4,
            backoff_ms: 10,
        }
    }
}

impl DriverConfig {
    pub fn usteps_per_radian(&self) -> f64 {
        f64::from(self.steps_per_revolution * self.microsteps) / TAU
    }

    /// Converts radians to microsteps, truncating toward zero.
    pub fn to_usteps(&self, radians: f64) -> i32 {
        (radians * self.usteps_per_radian()) as i32
    }

    pub fn to_radians(&self, usteps: i32) -> f64 {
        f64::from(usteps) / self.usteps_per_radian()
    }
}

/// One motor, driven through its own TMC4210.
pub struct StepperDriver<SPI, CS, D> {
    spi: SPI,
    cs: CS,
    delay: D,
    config: DriverConfig,
    accel: AccelParams,
    mode: RampMode,
    target_usteps: i32,
}

impl<SPI, CS, D> StepperDriver<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
{
    /// Takes over the chip and runs its start-up sequence, leaving it in
    /// ramp mode.
    pub fn new(
        spi: SPI,
        cs: CS,
        delay: D,
        config: DriverConfig,
    ) -> Result<Self, DriverError<SPI, CS>> {
        let mut ret = StepperDriver {
            spi,
            cs,
            delay,
            config,
            accel: AccelParams { pmul: 0, pdiv: 0 },
            mode: RampMode::Hold,
            target_usteps: 0,
        };

        ret.write(
            Register::IfConfiguration,
            IfConf::for_direction(config.reverse).bits(),
        )?;
        ret.set_vmin(config.v_min)?;
        ret.set_vmax(config.v_max)?;
        ret.set_divs(config.divisors)?;
        ret.set_accel(config.max_accel)?;
        ret.set_mode(RampMode::Ramp)?;
        Ok(ret)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn mode(&self) -> RampMode {
        self.mode
    }

    pub fn accel(&self) -> AccelParams {
        self.accel
    }

    /// The last position we asked for, in microsteps.
    pub fn target_usteps(&self) -> i32 {
        self.target_usteps
    }

    pub fn release(self) -> (SPI, CS, D) {
        (self.spi, self.cs, self.delay)
    }

    pub fn set_mode(&mut self, mode: RampMode) -> Result<(), DriverError<SPI, CS>> {
        self.write(Register::RampMode, mode.payload())?;
        log::debug!("switched to {mode} mode");
        self.mode = mode;
        Ok(())
    }

    pub fn set_vmin(&mut self, v: u16) -> Result<(), DriverError<SPI, CS>> {
        self.write_velocity_limit(Register::VMin, v)
    }

    pub fn set_vmax(&mut self, v: u16) -> Result<(), DriverError<SPI, CS>> {
        self.write_velocity_limit(Register::VMax, v)
    }

    fn write_velocity_limit(
        &mut self,
        reg: Register,
        v: u16,
    ) -> Result<(), DriverError<SPI, CS>> {
        let payload = register::encode_unsigned_11(v.into())
            .ok_or(Error::VelocityOutOfRange(v.into()))?;
        self.write(reg, payload)
    }

    pub fn set_divs(&mut self, divs: Divisors) -> Result<(), DriverError<SPI, CS>> {
        self.write(Register::PulseRampDiv, divs.payload())
    }

    /// Sets the maximum acceleration, along with the scaling factors that go with it.
    ///
    /// Nothing is written unless both the acceleration and its factors are valid.
    pub fn set_accel(&mut self, max_accel: u32) -> Result<(), DriverError<SPI, CS>> {
        let a_max =
            register::encode_unsigned_11(max_accel).ok_or(Error::AccelOutOfRange(max_accel))?;
        let params = AccelParams::search(max_accel).ok_or(Error::NoAccelParams(max_accel))?;
        log::debug!(
            "acceleration {max_accel}: pmul {}, pdiv {}",
            params.pmul,
            params.pdiv
        );

        self.write(Register::PmulPdiv, params.payload())?;
        self.write(Register::AMax, a_max)?;
        self.accel = params;
        Ok(())
    }

    /// Runs the motor at a constant (signed) velocity, in register units.
    pub fn set_velocity(&mut self, v: i32) -> Result<(), DriverError<SPI, CS>> {
        let payload = register::encode_velocity(v).ok_or(Error::VelocityOutOfRange(v))?;
        self.set_mode(RampMode::Velocity)?;
        self.write(Register::VTarget, payload)
    }

    /// Asks the motor to move to `radians`.
    pub fn set_target_position(&mut self, radians: f64) -> Result<(), DriverError<SPI, CS>> {
        let usteps = self.config.to_usteps(radians);
        self.write(Register::XTarget, register::encode_position(usteps))?;
        self.target_usteps = usteps;
        Ok(())
    }

    /// Declares that the motor is currently at `radians`.
    ///
    /// The target is moved along with it, so the motor stays put when it goes
    /// back into ramp mode.
    pub fn set_zero(&mut self, radians: f64) -> Result<(), DriverError<SPI, CS>> {
        let usteps = self.config.to_usteps(radians);
        let position = register::encode_position(usteps);

        self.set_mode(RampMode::Hold)?;
        self.delay.delay_ms(self.config.settle_ms);
        self.write(Register::XActual, position)?;
        self.write(Register::XTarget, position)?;
        self.target_usteps = usteps;
        self.delay.delay_ms(self.config.settle_ms);
        self.set_mode(RampMode::Ramp)
    }

    /// Where the motor is right now, in radians.
    pub fn get_position(&mut self) -> Result<f64, DriverError<SPI, CS>> {
        let usteps = register::decode_position(self.read(Register::XActual)?);
        Ok(self.config.to_radians(usteps))
    }

    /// Where the chip thinks the motor is going, in radians.
    pub fn get_target_position(&mut self) -> Result<f64, DriverError<SPI, CS>> {
        let usteps = register::decode_position(self.read(Register::XTarget)?);
        Ok(self.config.to_radians(usteps))
    }

    /// Whether the motor is within `tolerance` radians of its target.
    ///
    /// Both positions are read fresh from the chip every time.
    pub fn arrived(&mut self, tolerance: f64) -> Result<bool, DriverError<SPI, CS>> {
        let diff = self.get_position()? - self.get_target_position()?;
        Ok(-tolerance <= diff && diff <= tolerance)
    }

    pub fn type_version(&mut self) -> Result<u32, DriverError<SPI, CS>> {
        self.read(Register::TypeVersion)
    }

    fn write(&mut self, reg: Register, payload: u32) -> Result<(), DriverError<SPI, CS>> {
        self.transaction(Datagram::write(reg, payload)).map(drop)
    }

    fn read(&mut self, reg: Register) -> Result<u32, DriverError<SPI, CS>> {
        self.transaction(Datagram::read(reg)).map(|r| r.payload)
    }

    /// Sends one datagram, retrying failed transfers with a doubling back-off.
    ///
    /// Chip-select failures aren't retried.
    fn transaction(&mut self, datagram: Datagram) -> Result<Reply, DriverError<SPI, CS>> {
        let mut backoff = self.config.backoff_ms;
        let mut attempt = 1;
        loop {
            match self.transfer(datagram.to_bytes()) {
                Ok(bytes) => return Ok(Reply::from_bytes(bytes)),
                Err(Error::Spi { error, .. }) if attempt < self.config.attempts => {
                    log::warn!(
                        "SPI transfer for {:?} failed (attempt {attempt}): {error:?}",
                        datagram.register
                    );
                    self.delay.delay_ms(backoff);
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(Error::Spi { error, .. }) => {
                    return Err(Error::Spi {
                        error,
                        attempts: attempt,
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn transfer(&mut self, bytes: [u8; 4]) -> Result<[u8; 4], DriverError<SPI, CS>> {
        let mut buf = bytes;
        self.cs.set_low().map_err(Error::Pin)?;
        let res = self
            .spi
            .transfer_in_place(&mut buf)
            .and_then(|()| self.spi.flush());
        self.cs.set_high().map_err(Error::Pin)?;
        res.map(|()| buf)
            .map_err(|error| Error::Spi { error, attempts: 1 })
    }
}
