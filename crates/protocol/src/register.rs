//! Register addresses and payload layouts of the TMC4210.
//!
//! Every register holds (at most) 24 bits. The helpers here only build and
//! pick apart payloads; putting them on the wire is [`crate::Datagram`]'s job.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    XTarget = 0x00,
    XActual = 0x01,
    VMin = 0x02,
    VMax = 0x03,
    VTarget = 0x04,
    AMax = 0x06,
    PmulPdiv = 0x09,
    RampMode = 0x0A,
    PulseRampDiv = 0x0C,
    XLatched = 0x0E,
    IfConfiguration = 0x34,
    TypeVersion = 0x39,
}

impl Register {
    pub const ALL: [Register; 12] = [
        Register::XTarget,
        Register::XActual,
        Register::VMin,
        Register::VMax,
        Register::VTarget,
        Register::AMax,
        Register::PmulPdiv,
        Register::RampMode,
        Register::PulseRampDiv,
        Register::XLatched,
        Register::IfConfiguration,
        Register::TypeVersion,
    ];

    pub fn addr(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Register {
    /// The address that didn't match a register we know about.
    type Error = u8;

    fn try_from(addr: u8) -> Result<Self, u8> {
        Register::ALL
            .into_iter()
            .find(|r| r.addr() == addr)
            .ok_or(addr)
    }
}

bitflags::bitflags! {
    /// The bits of `IF_CONFIGURATION` that we touch.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IfConf: u32 {
        /// Flip which way the motor turns for positive moves.
        const INV_DIR = 1 << 4;
        /// Enable the step/direction outputs to the power stage.
        const EN_SD = 1 << 5;
    }
}

impl IfConf {
    pub fn for_direction(reverse: bool) -> Self {
        if reverse {
            IfConf::EN_SD | IfConf::INV_DIR
        } else {
            IfConf::EN_SD
        }
    }
}

/// The largest value of the unsigned 11-bit velocity and acceleration registers.
pub const MAX_11_BIT: u16 = 0x7FF;

/// Encodes an unsigned 11-bit velocity (`V_MIN`, `V_MAX`) or acceleration (`A_MAX`).
pub fn encode_unsigned_11(value: u32) -> Option<u32> {
    (value <= u32::from(MAX_11_BIT)).then_some(value)
}

/// Encodes a 12-bit two's complement target velocity (`V_TARGET`).
pub fn encode_velocity(v: i32) -> Option<u32> {
    (-2048..=2047).contains(&v).then_some((v as u32) & 0xFFF)
}

pub fn decode_velocity(raw: u32) -> i32 {
    (((raw & 0xFFF) << 20) as i32) >> 20
}

/// Encodes a position (`X_TARGET`, `X_ACTUAL`) as 24-bit two's complement.
///
/// Positions outside the 24-bit range wrap, like the chip's own counter does.
pub fn encode_position(usteps: i32) -> u32 {
    (usteps as u32) & 0xFF_FFFF
}

pub fn decode_position(raw: u32) -> i32 {
    ((raw << 8) as i32) >> 8
}

/// Clock divisors for step pulses and for the acceleration ramp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divisors {
    pub pulse_div: u8,
    pub ramp_div: u8,
}

impl Divisors {
    pub fn payload(&self) -> u32 {
        (u32::from(self.pulse_div & 0xF) << 12) | (u32::from(self.ramp_div & 0xF) << 8)
    }

    pub fn from_payload(raw: u32) -> Self {
        Divisors {
            pulse_div: ((raw >> 12) & 0xF) as u8,
            ramp_div: ((raw >> 8) & 0xF) as u8,
        }
    }
}

/// The scaling factors the chip needs to get its deceleration ramp right.
///
/// For a given `A_MAX` they have to satisfy
/// `0.95 < (pmul / a_max) * 2^(4 - pdiv) < 1`, with `pmul` in `128..=255`
/// and `pdiv` in `0..=13`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccelParams {
    pub pmul: u8,
    pub pdiv: u8,
}

impl AccelParams {
    /// Finds the pair with the smallest `pmul` (and then the smallest `pdiv`)
    /// that suits `max_accel`.
    pub fn search(max_accel: u32) -> Option<Self> {
        if max_accel == 0 {
            return None;
        }
        let a = f64::from(max_accel);
        (128..=255u8).find_map(|pmul| {
            (0..=13u8).find_map(|pdiv| {
                let q = AccelParams { pmul, pdiv }.ratio(a);
                (0.95 < q && q < 1.0).then_some(AccelParams { pmul, pdiv })
            })
        })
    }

    /// `(pmul / a_max) * 2^(4 - pdiv)`.
    pub fn ratio(&self, max_accel: f64) -> f64 {
        f64::from(self.pmul) / max_accel * 16.0 / f64::from(1u32 << self.pdiv)
    }

    pub fn payload(&self) -> u32 {
        (u32::from(self.pmul | 0x80) << 8) | u32::from(self.pdiv & 0xF)
    }

    pub fn from_payload(raw: u32) -> Self {
        AccelParams {
            pmul: ((raw >> 8) & 0xFF) as u8,
            pdiv: (raw & 0xF) as u8,
        }
    }
}

/// Only one of these is active at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RampMode {
    /// Move to `X_TARGET` along a trapezoidal velocity profile.
    Ramp = 0,
    Soft = 1,
    /// Run at `V_TARGET`.
    Velocity = 2,
    /// Don't move; `X_ACTUAL` may only be written in this mode.
    Hold = 3,
}

// Reference switch configuration; the chip is always told to stop softly.
const REF_CONF_SOFT_STOP: u32 = 1 << 10;

impl RampMode {
    pub fn payload(self) -> u32 {
        REF_CONF_SOFT_STOP | self as u32
    }

    pub fn from_payload(raw: u32) -> Self {
        match raw & 0b11 {
            0 => RampMode::Ramp,
            1 => RampMode::Soft,
            2 => RampMode::Velocity,
            _ => RampMode::Hold,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RampMode::Ramp => "ramp",
            RampMode::Soft => "soft",
            RampMode::Velocity => "velocity",
            RampMode::Hold => "hold",
        }
    }
}

impl core::fmt::Display for RampMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown ramp mode")]
pub struct UnknownMode;

impl FromStr for RampMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, UnknownMode> {
        match s {
            "ramp" => Ok(RampMode::Ramp),
            "soft" => Ok(RampMode::Soft),
            "velocity" => Ok(RampMode::Velocity),
            "hold" => Ok(RampMode::Hold),
            _ => Err(UnknownMode),
        }
    }
}
