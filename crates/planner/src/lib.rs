//! The offline half of the plotter: turning an HPGL drawing into a list of
//! motor angles.
//!
//! The pipeline is [`hpgl::parse`] → [`resample`] → [`Scaling::apply`] →
//! [`solve_path`], with [`files`] for the flat text files that sit between
//! the stages and between the offline and real-time phases.

use std::{fmt, str::FromStr};

use kurbo::{Affine, Point, Vec2};
use scriba_geom::JointAngles;
use serde::{Deserialize, Serialize};

pub mod files;
pub mod hpgl;
pub mod resample;
mod solve;

pub use hpgl::{parse, Malformed, ParseError, Program};
pub use resample::{resample, ResampleConfig};
pub use solve::{solve_path, SolvePathError, Solver};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PenState {
    Up,
    Down,
}

impl PenState {
    /// The HPGL mnemonic, which is also how pen states are written to files.
    pub fn mnemonic(self) -> &'static str {
        match self {
            PenState::Up => "PU",
            PenState::Down => "PD",
        }
    }
}

impl fmt::Display for PenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown pen state {0:?}")]
pub struct UnknownPenState(pub String);

impl FromStr for PenState {
    type Err = UnknownPenState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PU" => Ok(PenState::Up),
            "PD" => Ok(PenState::Down),
            _ => Err(UnknownPenState(s.to_owned())),
        }
    }
}

/// One coordinate pair of a `PU` or `PD` instruction, in HPGL units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawCommand {
    pub pen: PenState,
    pub x: i32,
    pub y: i32,
}

impl RawCommand {
    pub fn new(pen: PenState, x: i32, y: i32) -> Self {
        Self { pen, x, y }
    }

    pub fn point(&self) -> Point {
        Point::new(self.x.into(), self.y.into())
    }
}

/// A point of the resampled path. Order matters: it is the drawing order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Waypoint {
    pub pen: PenState,
    pub x: f64,
    pub y: f64,
}

impl Waypoint {
    pub fn new(pen: PenState, p: Point) -> Self {
        Self { pen, x: p.x, y: p.y }
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Everything the real-time phase needs to know about one waypoint.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionCommand {
    pub pen: PenState,
    pub theta1: f64,
    pub theta2: f64,
    pub x: f64,
    pub y: f64,
    /// Angle of the arm in radians; only used for telemetry.
    pub arm_angle: f64,
}

impl MotionCommand {
    pub fn angles(&self) -> JointAngles {
        JointAngles::new(self.theta1, self.theta2)
    }
}

/// Maps HPGL units to plotter-physical units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scaling {
    pub scale: Vec2,
    pub offset: Vec2,
}

impl Default for Scaling {
    fn default() -> Self {
        Self {
            scale: Vec2::new(1.0 / 40.0, 1.0 / 40.0),
            offset: Vec2::new(-70.0, -500.0),
        }
    }
}

impl Scaling {
    pub fn affine(&self) -> Affine {
        Affine::scale_non_uniform(self.scale.x, self.scale.y).then_translate(self.offset)
    }

    pub fn apply(&self, waypoint: &Waypoint) -> Waypoint {
        Waypoint::new(waypoint.pen, self.affine() * waypoint.point())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pen_state_mnemonics() {
        assert_eq!(PenState::Up.to_string(), "PU");
        assert_eq!("PD".parse::<PenState>(), Ok(PenState::Down));
        assert!("SP".parse::<PenState>().is_err());
    }

    #[test]
    fn default_scaling() {
        let w = Waypoint::new(PenState::Down, Point::new(4000.0, 20000.0));
        let scaled = Scaling::default().apply(&w);
        assert_eq!(scaled.pen, PenState::Down);
        assert!((scaled.x - 30.0).abs() < 1e-9);
        assert!((scaled.y - 0.0).abs() < 1e-9);
    }
}
