//! A register-level stand-in for a TMC4210 and its motor.
//!
//! The chip sits behind a shared handle ([`Sim`]); its SPI bus and
//! chip-select line are handed out separately, just like on a real board.
//! Motion happens only when the owner calls [`Sim::advance`], so tests get
//! to decide exactly how far the motor has moved.

use std::{
    cell::{Cell, RefCell},
    convert::Infallible,
    rc::Rc,
};

use embedded_hal::{delay::DelayNs, digital, spi};

use crate::{
    register::{self, RampMode, Register},
    Access, Datagram, Reply,
};

/// What the chip reports in `TYPE_VERSION`.
pub const TYPE_VERSION: u32 = 0x42_9101;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    #[error("transfer while chip select was high")]
    NotSelected,
    #[error("expected a 4-byte frame, got {0} bytes")]
    Framing(usize),
    #[error("no register at address {0:#04x}")]
    UnknownRegister(u8),
    #[error("injected failure")]
    Injected,
}

impl spi::Error for SimError {
    fn kind(&self) -> spi::ErrorKind {
        match self {
            SimError::NotSelected => spi::ErrorKind::ChipSelectFault,
            SimError::Framing(_) => spi::ErrorKind::FrameFormat,
            SimError::UnknownRegister(_) | SimError::Injected => spi::ErrorKind::Other,
        }
    }
}

#[derive(Debug)]
struct Chip {
    registers: [u32; 64],
    selected: bool,
    failures: u32,
    usteps_per_tick: u32,
    writes: Vec<Datagram>,
}

impl Chip {
    fn get(&self, reg: Register) -> u32 {
        self.registers[usize::from(reg.addr())]
    }

    fn set(&mut self, reg: Register, payload: u32) {
        self.registers[usize::from(reg.addr())] = payload & 0xFF_FFFF;
    }

    fn mode(&self) -> RampMode {
        RampMode::from_payload(self.get(Register::RampMode))
    }

    fn transfer(&mut self, words: &mut [u8]) -> Result<(), SimError> {
        if !self.selected {
            return Err(SimError::NotSelected);
        }
        if self.failures > 0 {
            self.failures -= 1;
            return Err(SimError::Injected);
        }
        let len = words.len();
        let bytes: [u8; 4] = (&*words)
            .try_into()
            .map_err(|_| SimError::Framing(len))?;
        let datagram = Datagram::from_bytes(bytes).map_err(SimError::UnknownRegister)?;

        let reply = Reply {
            status: 0,
            payload: self.get(datagram.register),
        };
        if datagram.access == Access::Write {
            self.write(datagram);
        }
        words.copy_from_slice(&reply.to_bytes());
        Ok(())
    }

    fn write(&mut self, datagram: Datagram) {
        match datagram.register {
            Register::TypeVersion => {
                log::warn!("ignoring write to TYPE_VERSION");
                return;
            }
            Register::XActual if self.mode() != RampMode::Hold => {
                log::warn!("ignoring write to X_ACTUAL in {} mode", self.mode());
                return;
            }
            reg => self.set(reg, datagram.payload),
        }
        self.writes.push(datagram);
    }

    fn advance(&mut self) {
        let pos = register::decode_position(self.get(Register::XActual));
        let step = match self.mode() {
            RampMode::Ramp => {
                let target = register::decode_position(self.get(Register::XTarget));
                let max = i64::from(self.usteps_per_tick);
                (i64::from(target) - i64::from(pos)).clamp(-max, max)
            }
            RampMode::Velocity => {
                i64::from(register::decode_velocity(self.get(Register::VTarget)))
            }
            RampMode::Soft | RampMode::Hold => 0,
        };
        let pos = (i64::from(pos) + step) as i32;
        self.set(Register::XActual, register::encode_position(pos));
    }
}

/// A shared handle to one simulated chip.
#[derive(Clone, Debug)]
pub struct Sim {
    chip: Rc<RefCell<Chip>>,
}

impl Sim {
    /// A powered-up chip, in hold mode with everything zeroed, whose motor
    /// covers at most `usteps_per_tick` microsteps per [`Sim::advance`].
    pub fn new(usteps_per_tick: u32) -> Self {
        let mut registers = [0; 64];
        registers[usize::from(Register::TypeVersion.addr())] = TYPE_VERSION;
        registers[usize::from(Register::RampMode.addr())] = RampMode::Hold.payload();
        Sim {
            chip: Rc::new(RefCell::new(Chip {
                registers,
                selected: false,
                failures: 0,
                usteps_per_tick,
                writes: Vec::new(),
            })),
        }
    }

    pub fn bus(&self) -> SimBus {
        SimBus {
            chip: Rc::clone(&self.chip),
        }
    }

    pub fn select(&self) -> SimSelect {
        SimSelect {
            chip: Rc::clone(&self.chip),
        }
    }

    /// Lets the motor move for one tick.
    pub fn advance(&self) {
        self.chip.borrow_mut().advance();
    }

    /// Makes the next `n` transfers fail.
    pub fn fail_next(&self, n: u32) {
        self.chip.borrow_mut().failures = n;
    }

    pub fn register(&self, reg: Register) -> u32 {
        self.chip.borrow().get(reg)
    }

    /// The motor position in microsteps.
    pub fn position(&self) -> i32 {
        register::decode_position(self.register(Register::XActual))
    }

    /// Every write that the chip accepted, oldest first.
    pub fn writes(&self) -> Vec<Datagram> {
        self.chip.borrow().writes.clone()
    }
}

#[derive(Debug)]
pub struct SimBus {
    chip: Rc<RefCell<Chip>>,
}

impl spi::ErrorType for SimBus {
    type Error = SimError;
}

impl spi::SpiBus for SimBus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), SimError> {
        words.fill(0);
        self.transfer_in_place(words)
    }

    fn write(&mut self, words: &[u8]) -> Result<(), SimError> {
        let mut buf = words.to_vec();
        self.transfer_in_place(&mut buf)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), SimError> {
        let mut buf = write.to_vec();
        self.transfer_in_place(&mut buf)?;
        let n = read.len().min(buf.len());
        read[..n].copy_from_slice(&buf[..n]);
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), SimError> {
        self.chip.borrow_mut().transfer(words)
    }

    fn flush(&mut self) -> Result<(), SimError> {
        Ok(())
    }
}

/// The chip-select line, active low.
#[derive(Debug)]
pub struct SimSelect {
    chip: Rc<RefCell<Chip>>,
}

impl digital::ErrorType for SimSelect {
    type Error = Infallible;
}

impl digital::OutputPin for SimSelect {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.chip.borrow_mut().selected = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.chip.borrow_mut().selected = false;
        Ok(())
    }
}

/// Simulated time: delays are added up instead of slept.
#[derive(Clone, Debug, Default)]
pub struct SimDelay {
    elapsed_ns: Rc<Cell<u64>>,
}

impl SimDelay {
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ns.get() / 1_000_000
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns.set(self.elapsed_ns.get() + u64::from(ns));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.elapsed_ns
            .set(self.elapsed_ns.get() + u64::from(ms) * 1_000_000);
    }
}
