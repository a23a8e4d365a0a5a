#![cfg_attr(not(feature = "std"), no_std)]

//! Talking to the TMC4210 motion controller over SPI.
//!
//! The chip does the step generation and ramping on its own; all we do is
//! write target positions and limits into its registers and read back where
//! the motor is. Each register access is one 4-byte [`Datagram`], framed by
//! the chip-select line.

mod datagram;
mod driver;
pub mod register;
#[cfg(feature = "std")]
pub mod sim;

pub use datagram::{Access, Datagram, Reply};
pub use driver::{DriverConfig, DriverError, StepperDriver};
pub use register::{AccelParams, Divisors, RampMode, Register, UnknownMode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error<S, P> {
    #[error("SPI transfer failed after {attempts} attempts: {error:?}")]
    Spi { error: S, attempts: u32 },
    #[error("chip select failed: {0:?}")]
    Pin(P),
    #[error("no PMUL/PDIV pair for acceleration {0}")]
    NoAccelParams(u32),
    #[error("acceleration {0} doesn't fit in A_MAX")]
    AccelOutOfRange(u32),
    #[error("velocity {0} doesn't fit in its register")]
    VelocityOutOfRange(i32),
}
