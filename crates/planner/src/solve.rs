use scriba_geom::{Config, FromKurbo as _, JointAngles, Point, SolveError};

use crate::{MotionCommand, Waypoint};

#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
#[error("failed to solve waypoint {index} at ({x}, {y})")]
pub struct SolvePathError {
    pub index: usize,
    pub x: f64,
    pub y: f64,
    #[source]
    pub error: SolveError,
}

/// Solves a sequence of waypoints for motor angles, one at a time.
///
/// The first waypoint starts from [`Config::initial_guess`] and every later
/// one from the previous waypoint's answer. The angles that come out have
/// `theta1` wrapped into `[0, 2π)`.
pub struct Solver<I> {
    config: Config,
    waypoints: I,
    guess: JointAngles,
    index: usize,
    failed: bool,
}

impl<I: Iterator<Item = Waypoint>> Solver<I> {
    pub fn new(config: Config, waypoints: I) -> Self {
        Self {
            guess: config.initial_guess,
            config,
            waypoints,
            index: 0,
            failed: false,
        }
    }
}

impl<I: Iterator<Item = Waypoint>> Iterator for Solver<I> {
    type Item = Result<MotionCommand, SolvePathError>;

    fn next(&mut self) -> Option<Self::Item> {
        // After a failure there's no sensible guess to continue from.
        if self.failed {
            return None;
        }
        let w = self.waypoints.next()?;
        let index = self.index;
        self.index += 1;

        let desired = Point::from_kurbo(w.point());
        match self.config.solve(&desired, self.guess, self.config.tolerance) {
            Ok(theta) => {
                let normalized = theta.normalized();
                self.guess = normalized;
                Some(Ok(MotionCommand {
                    pen: w.pen,
                    theta1: normalized.theta1,
                    theta2: normalized.theta2,
                    x: w.x,
                    y: w.y,
                    arm_angle: self.config.arm_angle(&normalized).get(),
                }))
            }
            Err(error) => {
                self.failed = true;
                Some(Err(SolvePathError {
                    index,
                    x: w.x,
                    y: w.y,
                    error,
                }))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            let (_, hi) = self.waypoints.size_hint();
            (0, hi)
        }
    }
}

/// Solves a whole path, stopping at the first waypoint that can't be solved.
pub fn solve_path(
    waypoints: &[Waypoint],
    config: Config,
) -> Result<Vec<MotionCommand>, SolvePathError> {
    Solver::new(config, waypoints.iter().copied()).collect()
}

#[cfg(test)]
mod tests {
    use std::f64::consts::TAU;

    use kurbo::Point;
    use scriba_geom::ConfigBuilder;

    use super::*;
    use crate::PenState;

    #[test]
    fn solutions_reach_their_waypoints() {
        let config = Config::default();
        let path = [
            Waypoint::new(PenState::Up, Point::new(0.0, 100.0)),
            Waypoint::new(PenState::Down, Point::new(5.0, 100.0)),
            Waypoint::new(PenState::Down, Point::new(5.0, 95.0)),
        ];
        let cmds = solve_path(&path, config).unwrap();
        assert_eq!(cmds.len(), 3);
        for (cmd, w) in cmds.iter().zip(&path) {
            assert_eq!(cmd.pen, w.pen);
            assert_eq!((cmd.x, cmd.y), (w.x, w.y));
            assert!((0.0..TAU).contains(&cmd.theta1));
            let reached = config.forward(&cmd.angles());
            assert!((reached.x - w.x).abs() <= 1e-3);
            assert!((reached.y - w.y).abs() <= 1e-3);
        }
    }

    #[test]
    fn theta1_is_wrapped() {
        // Start a full arm turn out so the raw solution is past 2π.
        let config = ConfigBuilder::default()
            .with_initial_guess(JointAngles::new(3.0 * (TAU + 2.2), 60.0))
            .build();
        let path = [Waypoint::new(PenState::Down, Point::new(-50.0, 60.0))];
        let cmds = solve_path(&path, config).unwrap();
        let raw = config
            .solve(&scriba_geom::Point::new(-50.0, 60.0), config.initial_guess, config.tolerance)
            .unwrap();
        assert!(raw.theta1 >= TAU);
        assert!((0.0..TAU).contains(&cmds[0].theta1));
        assert!((cmds[0].theta1 - raw.theta1.rem_euclid(TAU)).abs() < 1e-12);
        assert_eq!(cmds[0].arm_angle, cmds[0].theta1 / config.gear_ratio);
    }

    #[test]
    fn failure_reports_the_waypoint() {
        let config = ConfigBuilder::default().with_max_iterations(1).build();
        let path = [
            Waypoint::new(PenState::Up, Point::new(0.0, 110.0)),
            // Half a turn away: one Newton step is nowhere near enough.
            Waypoint::new(PenState::Down, Point::new(-90.0, -3000.0)),
            Waypoint::new(PenState::Down, Point::new(0.0, 110.0)),
        ];
        let err = solve_path(&path, config).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!((err.x, err.y), (-90.0, -3000.0));

        let mut solver = Solver::new(config, path.iter().copied());
        assert!(solver.next().unwrap().is_ok());
        assert!(solver.next().unwrap().is_err());
        assert!(solver.next().is_none());
    }
}
