//! Basic geometry of the plotter arm, including the conversion from
//! Cartesian coordinates to motor angles.
//!
//! The arm swings about a fixed pivot and carries the pen on a carriage
//! that slides along it. Motor 1 turns the arm through a geared linkage, so
//! the arm angle is `theta1 / gear_ratio`. Motor 2 drives the carriage, and
//! the pen's distance from the pivot grows linearly with `theta2`.
//!
//! The forward map is easy; going backwards we find joint angles
//! numerically with Newton-Raphson, warm-started from wherever the arm was
//! for the previous point. Adjacent points on a drawing are close together,
//! so the previous solution is almost always within a couple of iterations
//! of the next one.

use std::f64::consts::{PI, TAU};

pub type Angle = euclid::Angle<f64>;
pub type Point = euclid::Point2D<f64, Mm>;
pub type Vector = euclid::Vector2D<f64, Mm>;

/// Plotter-physical units.
pub struct Mm;

/// Joint space: `(theta1, theta2)`, both measured in motor radians.
pub struct Joint;

pub type JointVector = euclid::Vector2D<f64, Joint>;

/// Partial derivatives of the residual with respect to the joint angles.
pub type Jacobian = euclid::Transform2D<f64, Joint, Mm>;

pub trait FromKurbo {
    type Input;
    fn from_kurbo(p: Self::Input) -> Self;
}

#[cfg(feature = "kurbo")]
impl FromKurbo for Point {
    type Input = kurbo::Point;
    fn from_kurbo(p: kurbo::Point) -> Self {
        Point::new(p.x, p.y)
    }
}

/// Motor angles for one point of the drawing.
///
/// `theta1` is the arm motor, `theta2` the carriage motor. Since `theta2`
/// also encodes how far the carriage has travelled, it is not an angle in
/// any periodic sense and is never wrapped.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct JointAngles {
    pub theta1: f64,
    pub theta2: f64,
}

impl JointAngles {
    pub fn new(theta1: f64, theta2: f64) -> Self {
        Self { theta1, theta2 }
    }

    /// Wraps `theta1` into `[0, 2π)`, leaving `theta2` alone.
    pub fn normalized(self) -> Self {
        let mut theta1 = self.theta1.rem_euclid(TAU);
        // rem_euclid rounds tiny negative inputs up to exactly TAU.
        if theta1 >= TAU {
            theta1 = 0.0;
        }
        Self {
            theta1,
            theta2: self.theta2,
        }
    }

    fn to_vector(self) -> JointVector {
        JointVector::new(self.theta1, self.theta2)
    }

    fn from_vector(v: JointVector) -> Self {
        Self::new(v.x, v.y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
pub enum SolveError {
    #[error("singular Jacobian at {at:?} after {iterations} iterations")]
    Singular { at: JointAngles, iterations: u32 },
    #[error("Newton-Raphson diverged after {iterations} iterations")]
    Diverged { iterations: u32 },
    #[error("no convergence after {iterations} iterations (residual {residual_x}, {residual_y})")]
    NoConvergence {
        iterations: u32,
        residual_x: f64,
        residual_y: f64,
    },
}

pub struct ConfigBuilder {
    extension_per_radian: f64,
    gear_ratio: f64,
    tolerance: f64,
    max_iterations: u32,
    initial_guess: JointAngles,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            extension_per_radian: 4.0 / PI,
            gear_ratio: 3.0,
            tolerance: 1e-3,
            max_iterations: 100,
            // The home position: arm pointing straight up the page, carriage
            // 110 eighth-turns out.
            initial_guess: JointAngles::new(3.0 * PI / 2.0, 110.0 * 2.0 * PI / 8.0),
        }
    }
}

impl ConfigBuilder {
    pub fn build(&self) -> Config {
        Config {
            extension_per_radian: self.extension_per_radian,
            gear_ratio: self.gear_ratio,
            tolerance: self.tolerance,
            max_iterations: self.max_iterations,
            initial_guess: self.initial_guess,
        }
    }

    pub fn with_extension_per_radian(&mut self, extension: f64) -> &mut Self {
        self.extension_per_radian = extension;
        self
    }

    pub fn with_gear_ratio(&mut self, ratio: f64) -> &mut Self {
        self.gear_ratio = ratio;
        self
    }

    pub fn with_tolerance(&mut self, tolerance: f64) -> &mut Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(&mut self, iterations: u32) -> &mut Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_initial_guess(&mut self, guess: JointAngles) -> &mut Self {
        self.initial_guess = guess;
        self
    }
}

/// The geometric configuration of the plotter, plus solver settings.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// How far the pen moves along the arm per radian of the carriage motor.
    pub extension_per_radian: f64,
    /// Motor 1 turns this many times per turn of the arm.
    pub gear_ratio: f64,
    /// Componentwise bound on the residual for the solver to stop.
    pub tolerance: f64,
    /// Newton-Raphson gives up after this many updates.
    pub max_iterations: u32,
    /// Where to start solving the very first point of a drawing.
    pub initial_guess: JointAngles,
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::default().build()
    }
}

impl Config {
    /// Where the pen ends up for the given motor angles.
    pub fn forward(&self, angles: &JointAngles) -> Point {
        let r = self.extension_per_radian * angles.theta2;
        let phi = angles.theta1 / self.gear_ratio;
        Point::new(r * phi.cos(), r * phi.sin())
    }

    /// The distance still to go from the pen position at `angles` to `desired`.
    pub fn residual(&self, desired: &Point, angles: &JointAngles) -> Vector {
        *desired - self.forward(angles)
    }

    /// The derivative of [`Config::residual`] with respect to the joint angles.
    pub fn jacobian(&self, angles: &JointAngles) -> Jacobian {
        let k = self.extension_per_radian;
        let (sin, cos) = (angles.theta1 / self.gear_ratio).sin_cos();

        // The residual is desired minus model, hence the signs.
        let dx_dtheta1 = k * angles.theta2 * sin / self.gear_ratio;
        let dy_dtheta1 = -k * angles.theta2 * cos / self.gear_ratio;
        let dx_dtheta2 = -k * cos;
        let dy_dtheta2 = -k * sin;

        // euclid multiplies row vectors, so each row holds one joint's partials.
        Jacobian::new(dx_dtheta1, dy_dtheta1, dx_dtheta2, dy_dtheta2, 0.0, 0.0)
    }

    /// Finds motor angles that put the pen within `tolerance` (in each
    /// coordinate separately) of `desired`, starting from `guess`.
    ///
    /// The returned angles are not normalized; see [`JointAngles::normalized`].
    pub fn solve(
        &self,
        desired: &Point,
        guess: JointAngles,
        tolerance: f64,
    ) -> Result<JointAngles, SolveError> {
        let mut theta = guess;
        let mut iterations = 0;
        loop {
            let g = self.residual(desired, &theta);
            if g.x.abs() <= tolerance && g.y.abs() <= tolerance {
                log::trace!("solved {desired:?} in {iterations} iterations");
                return Ok(theta);
            }
            if iterations >= self.max_iterations {
                return Err(SolveError::NoConvergence {
                    iterations,
                    residual_x: g.x,
                    residual_y: g.y,
                });
            }

            let inverse = self
                .jacobian(&theta)
                .inverse()
                .ok_or(SolveError::Singular {
                    at: theta,
                    iterations,
                })?;
            theta = JointAngles::from_vector(theta.to_vector() - inverse.transform_vector(g));
            iterations += 1;

            if !theta.theta1.is_finite() || !theta.theta2.is_finite() {
                return Err(SolveError::Diverged { iterations });
            }
        }
    }

    /// The angle of the arm itself, for displaying it.
    pub fn arm_angle(&self, angles: &JointAngles) -> Angle {
        Angle::radians(angles.theta1 / self.gear_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    impl Arbitrary for JointAngles {
        type Parameters = ();
        type Strategy = BoxedStrategy<JointAngles>;

        // Keep the carriage well away from the pivot: right at the pivot the
        // arm angle doesn't matter and the Jacobian is singular.
        fn arbitrary_with(_: ()) -> Self::Strategy {
            (0.3..(3.0 * TAU - 0.3), 20.0..120.0f64)
                .prop_map(|(theta1, theta2)| JointAngles::new(theta1, theta2))
                .boxed()
        }
    }

    #[test]
    fn residual_matches_hand_computation() {
        let cfg = Config::default();
        let g = cfg.residual(&Point::new(10.0, 0.0), &JointAngles::new(PI, 5.0));
        assert_eq!(g.x, 10.0 - (4.0 / PI) * 5.0 * (PI / 3.0).cos());
        assert_eq!(g.y, 0.0 - (4.0 / PI) * 5.0 * (PI / 3.0).sin());
    }

    #[test]
    fn solves_near_home() {
        let cfg = Config::default();
        let desired = Point::new(5.0, 100.0);
        let theta = cfg.solve(&desired, cfg.initial_guess, 1e-3).unwrap();
        let reached = cfg.forward(&theta);
        assert!((reached.x - desired.x).abs() <= 1e-3);
        assert!((reached.y - desired.y).abs() <= 1e-3);
    }

    #[test]
    fn already_converged_guess_is_returned_unchanged() {
        let cfg = Config::default();
        let guess = JointAngles::new(1.0, 50.0);
        let desired = cfg.forward(&guess);
        assert_eq!(cfg.solve(&desired, guess, 1e-9), Ok(guess));
    }

    #[test]
    fn singular_jacobian_is_an_error() {
        let cfg = Config::default();
        let err = cfg
            .solve(&Point::new(10.0, 10.0), JointAngles::new(1.0, 0.0), 1e-3)
            .unwrap_err();
        assert!(matches!(err, SolveError::Singular { iterations: 0, .. }));
    }

    #[test]
    fn iteration_cap_is_an_error() {
        let cfg = ConfigBuilder::default().with_max_iterations(1).build();
        let err = cfg
            .solve(&Point::new(-80.0, -20.0), cfg.initial_guess, 1e-9)
            .unwrap_err();
        assert!(matches!(err, SolveError::NoConvergence { iterations: 1, .. }));
    }

    #[test]
    fn arm_angle_is_a_third_of_theta1() {
        let cfg = Config::default();
        let angle = cfg.arm_angle(&JointAngles::new(3.0, 7.0));
        assert_eq!(angle.get(), 1.0);
    }

    proptest! {
        // Compare the Jacobian against a difference quotient of the residual.
        #[test]
        fn jacobian_matches_difference_quotient(theta: JointAngles, v1 in -1.0..1.0f64, v2 in -1.0..1.0f64) {
            let cfg = Config::default();
            let desired = Point::new(3.0, 4.0);
            let v = JointVector::new(v1, v2);
            let g = cfg.residual(&desired, &theta);
            let moved = JointAngles::from_vector(theta.to_vector() + v * 1e-4);
            let approx = (cfg.residual(&desired, &moved) - g) * 1e4;
            let exact = cfg.jacobian(&theta).transform_vector(v);
            assert!((exact.x - approx.x).abs() < 1e-2);
            assert!((exact.y - approx.y).abs() < 1e-2);
        }

        #[test]
        fn solve_round_trip(target: JointAngles, d1 in -0.2..0.2f64, d2 in -5.0..5.0f64) {
            let cfg = Config::default();
            let desired = cfg.forward(&target);
            let guess = JointAngles::new(target.theta1 + d1, target.theta2 + d2);
            let theta = cfg.solve(&desired, guess, 1e-3).unwrap();
            let reached = cfg.forward(&theta);
            assert!((reached.x - desired.x).abs() <= 1e-3);
            assert!((reached.y - desired.y).abs() <= 1e-3);
        }

        #[test]
        fn normalized_theta1_is_in_range(theta1 in -1e4..1e4f64, theta2 in -100.0..100.0f64) {
            let n = JointAngles::new(theta1, theta2).normalized();
            assert!(n.theta1 >= 0.0 && n.theta1 < TAU);
            assert_eq!(n.theta2, theta2);
        }
    }
}
