//! The real-time half: walking the motion commands out to the motors and pen.
//!
//! [`Coordinator::tick`] is called once per scheduler period and never
//! waits for anything. Where the plotter is in the drawing lives entirely in
//! the coordinator's fields, so a tick can always pick up where the last one
//! left off.

use std::io::Write;

use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};
use scriba_geom::JointAngles;
use scriba_planner::{MotionCommand, PenState};
use scriba_protocol::{DriverError, StepperDriver};
use serde::{Deserialize, Serialize};

use crate::telemetry::Telemetry;

/// One motor, as far as the coordinator cares.
pub trait Axis {
    /// Starts moving towards `radians`.
    fn set_target(&mut self, radians: f64) -> anyhow::Result<()>;

    fn arrived(&mut self, tolerance: f64) -> anyhow::Result<bool>;
}

impl<SPI, CS, D> Axis for StepperDriver<SPI, CS, D>
where
    SPI: SpiBus,
    CS: OutputPin,
    D: DelayNs,
    DriverError<SPI, CS>: std::error::Error + Send + Sync + 'static,
{
    fn set_target(&mut self, radians: f64) -> anyhow::Result<()> {
        Ok(self.set_target_position(radians)?)
    }

    fn arrived(&mut self, tolerance: f64) -> anyhow::Result<bool> {
        Ok(StepperDriver::arrived(self, tolerance)?)
    }
}

/// The pen lift. `engage` and `disengage` get the pen moving; `hold` locks
/// it wherever it ended up.
pub trait Pen {
    fn engage(&mut self) -> anyhow::Result<()>;
    fn disengage(&mut self) -> anyhow::Result<()>;
    fn hold(&mut self) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// How close (in radians) both motors need to be to their targets
    /// before moving on to the next command.
    pub arrival_tolerance: f64,
    /// Where the motors start out.
    pub zero: JointAngles,
    /// Where the motors go once the drawing is finished.
    pub home: JointAngles,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        use std::f64::consts::PI;

        Self {
            arrival_tolerance: 0.0,
            zero: JointAngles::new(3.0 * 4.0 * PI / 9.0, 110.0 * 2.0 * PI / 8.0),
            home: JointAngles::new(3.0 * 4.0 * PI / 9.0, 105.0 * PI / 4.0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Init,
    Plotting,
    Done,
}

pub struct Coordinator<A, P, W> {
    config: CoordinatorConfig,
    commands: Vec<MotionCommand>,
    arm: A,
    carriage: A,
    pen: P,
    telemetry: Telemetry<W>,

    state: State,
    step: usize,
    pen_is_up: bool,
    fetch_pending: bool,
    completion_reported: bool,
}

impl<A: Axis, P: Pen, W: Write> Coordinator<A, P, W> {
    /// `arm` turns the arm (it gets `theta1`); `carriage` moves the pen
    /// along it (it gets `theta2`).
    pub fn new(
        config: CoordinatorConfig,
        commands: Vec<MotionCommand>,
        arm: A,
        carriage: A,
        pen: P,
        telemetry: Telemetry<W>,
    ) -> Self {
        Self {
            config,
            commands,
            arm,
            carriage,
            pen,
            telemetry,
            state: State::Init,
            step: 0,
            pen_is_up: true,
            fetch_pending: true,
            completion_reported: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The index of the command currently being worked on.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn telemetry(&self) -> &Telemetry<W> {
        &self.telemetry
    }

    /// True once the drawing is finished and that has been announced.
    pub fn is_complete(&self) -> bool {
        self.completion_reported
    }

    pub fn tick(&mut self) -> anyhow::Result<State> {
        match self.state {
            State::Init => {
                self.step = 0;
                self.pen_is_up = true;
                self.fetch_pending = true;
                log::info!("starting on {} motion commands", self.commands.len());
                self.state = State::Plotting;
            }
            State::Plotting => self.plot()?,
            State::Done => {
                if !self.completion_reported {
                    log::info!("completed");
                    self.completion_reported = true;
                }
            }
        }
        Ok(self.state)
    }

    fn plot(&mut self) -> anyhow::Result<()> {
        // The last command is never drawn: its slot is taken by the trip home.
        if self.step + 1 >= self.commands.len() {
            return self.finish();
        }

        let cmd = self.commands[self.step];
        if self.fetch_pending {
            log::debug!("command {}: {:?}", self.step, cmd);
            self.telemetry.record(&cmd)?;
            self.fetch_pending = false;
        }

        match (cmd.pen, self.pen_is_up) {
            (PenState::Up, false) => {
                self.pen.disengage()?;
                self.pen.hold()?;
                self.pen_is_up = true;
            }
            (PenState::Down, true) => {
                self.pen.engage()?;
                self.pen.hold()?;
                self.pen_is_up = false;
            }
            (PenState::Up, true) | (PenState::Down, false) => {}
        }

        self.arm.set_target(cmd.theta1)?;
        self.carriage.set_target(cmd.theta2)?;

        let tol = self.config.arrival_tolerance;
        let arm_arrived = self.arm.arrived(tol)?;
        let carriage_arrived = self.carriage.arrived(tol)?;
        if arm_arrived && carriage_arrived {
            self.step += 1;
            self.fetch_pending = true;
        }
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        log::info!("all commands sent, heading home");
        self.pen.disengage()?;
        self.pen.hold()?;
        self.pen_is_up = true;

        self.arm.set_target(self.config.home.theta1)?;
        self.carriage.set_target(self.config.home.theta2)?;
        self.telemetry.flush()?;
        self.state = State::Done;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    enum Action {
        Engage,
        Disengage,
        Hold,
        Target(&'static str, f64),
    }

    type Log = Rc<RefCell<Vec<Action>>>;

    struct MockAxis {
        name: &'static str,
        log: Log,
        // How many `arrived` polls return false before the motor gets there.
        travel: Rc<RefCell<u32>>,
    }

    impl Axis for MockAxis {
        fn set_target(&mut self, radians: f64) -> anyhow::Result<()> {
            self.log.borrow_mut().push(Action::Target(self.name, radians));
            Ok(())
        }

        fn arrived(&mut self, _tolerance: f64) -> anyhow::Result<bool> {
            let mut travel = self.travel.borrow_mut();
            if *travel == 0 {
                Ok(true)
            } else {
                *travel -= 1;
                Ok(false)
            }
        }
    }

    struct MockPen {
        log: Log,
    }

    impl Pen for MockPen {
        fn engage(&mut self) -> anyhow::Result<()> {
            self.log.borrow_mut().push(Action::Engage);
            Ok(())
        }

        fn disengage(&mut self) -> anyhow::Result<()> {
            self.log.borrow_mut().push(Action::Disengage);
            Ok(())
        }

        fn hold(&mut self) -> anyhow::Result<()> {
            self.log.borrow_mut().push(Action::Hold);
            Ok(())
        }
    }

    struct FailingAxis;

    impl Axis for FailingAxis {
        fn set_target(&mut self, _radians: f64) -> anyhow::Result<()> {
            anyhow::bail!("SPI bus on fire")
        }

        fn arrived(&mut self, _tolerance: f64) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    fn cmd(pen: PenState, theta1: f64, theta2: f64) -> MotionCommand {
        MotionCommand {
            pen,
            theta1,
            theta2,
            x: theta1 * 10.0,
            y: theta2 * 10.0,
            arm_angle: theta1 / 3.0,
        }
    }

    struct Harness {
        log: Log,
        travel: Rc<RefCell<u32>>,
        coordinator: Coordinator<MockAxis, MockPen, Vec<u8>>,
    }

    fn harness(commands: Vec<MotionCommand>) -> Harness {
        let log = Log::default();
        let travel = Rc::new(RefCell::new(0));
        let axis = |name: &'static str| MockAxis {
            name,
            log: Rc::clone(&log),
            travel: Rc::clone(&travel),
        };
        let coordinator = Coordinator::new(
            CoordinatorConfig::default(),
            commands,
            axis("arm"),
            axis("carriage"),
            MockPen {
                log: Rc::clone(&log),
            },
            Telemetry::new(Vec::new()),
        );
        Harness {
            log,
            travel,
            coordinator,
        }
    }

    impl Harness {
        fn take_log(&self) -> Vec<Action> {
            std::mem::take(&mut *self.log.borrow_mut())
        }
    }

    #[test]
    fn pen_down_then_home() {
        let mut h = harness(vec![
            cmd(PenState::Down, 0.0, 0.0),
            cmd(PenState::Up, 1.0, 1.0),
        ]);
        let home = CoordinatorConfig::default().home;

        assert_eq!(h.coordinator.tick().unwrap(), State::Plotting);
        assert!(h.take_log().is_empty());

        assert_eq!(h.coordinator.tick().unwrap(), State::Plotting);
        assert_eq!(
            h.take_log(),
            vec![
                Action::Engage,
                Action::Hold,
                Action::Target("arm", 0.0),
                Action::Target("carriage", 0.0),
            ]
        );
        assert_eq!(h.coordinator.step(), 1);

        assert_eq!(h.coordinator.tick().unwrap(), State::Done);
        assert_eq!(
            h.take_log(),
            vec![
                Action::Disengage,
                Action::Hold,
                Action::Target("arm", home.theta1),
                Action::Target("carriage", home.theta2),
            ]
        );
        assert!(!h.coordinator.is_complete());

        assert_eq!(h.coordinator.tick().unwrap(), State::Done);
        assert!(h.coordinator.is_complete());
        assert_eq!(h.coordinator.tick().unwrap(), State::Done);
        assert!(h.take_log().is_empty());

        let telemetry = h.coordinator.telemetry.lines();
        assert_eq!(telemetry, 1);
    }

    #[test]
    fn waits_for_arrival() {
        let mut h = harness(vec![
            cmd(PenState::Up, 1.0, 2.0),
            cmd(PenState::Up, 3.0, 4.0),
            cmd(PenState::Up, 0.0, 0.0),
        ]);
        h.coordinator.tick().unwrap();
        // Both motors are polled every tick, so this is two ticks of "not yet".
        *h.travel.borrow_mut() = 4;

        h.coordinator.tick().unwrap();
        h.coordinator.tick().unwrap();
        assert_eq!(h.coordinator.step(), 0);
        h.coordinator.tick().unwrap();
        assert_eq!(h.coordinator.step(), 1);

        // The pen was already up, so it was never touched, and the command
        // was re-sent on every tick.
        let log = h.take_log();
        assert!(!log.contains(&Action::Disengage));
        assert_eq!(
            log.iter()
                .filter(|a| **a == Action::Target("arm", 1.0))
                .count(),
            3
        );
        // Telemetry only goes out when a command is first fetched.
        assert_eq!(h.coordinator.telemetry.lines(), 1);
    }

    #[test]
    fn pen_up_while_down() {
        let mut h = harness(vec![
            cmd(PenState::Down, 1.0, 2.0),
            cmd(PenState::Up, 3.0, 4.0),
            cmd(PenState::Down, 5.0, 6.0),
        ]);
        for _ in 0..3 {
            h.coordinator.tick().unwrap();
        }
        assert_eq!(
            h.take_log(),
            vec![
                Action::Engage,
                Action::Hold,
                Action::Target("arm", 1.0),
                Action::Target("carriage", 2.0),
                Action::Disengage,
                Action::Hold,
                Action::Target("arm", 3.0),
                Action::Target("carriage", 4.0),
            ]
        );
        assert_eq!(h.coordinator.step(), 2);
        assert_eq!(h.coordinator.tick().unwrap(), State::Done);
    }

    #[test]
    fn short_lists_go_straight_home() {
        for commands in [vec![], vec![cmd(PenState::Down, 1.0, 1.0)]] {
            let mut h = harness(commands);
            assert_eq!(h.coordinator.tick().unwrap(), State::Plotting);
            assert_eq!(h.coordinator.tick().unwrap(), State::Done);
            assert_eq!(h.take_log()[0], Action::Disengage);
            assert_eq!(h.coordinator.telemetry.lines(), 0);
        }
    }

    #[test]
    fn axis_errors_are_fatal() {
        let log = Log::default();
        let mut c = Coordinator::new(
            CoordinatorConfig::default(),
            vec![cmd(PenState::Up, 1.0, 1.0), cmd(PenState::Up, 2.0, 2.0)],
            FailingAxis,
            FailingAxis,
            MockPen { log },
            Telemetry::new(Vec::new()),
        );
        c.tick().unwrap();
        let err = c.tick().unwrap_err();
        assert!(err.to_string().contains("on fire"));
        assert_eq!(c.state(), State::Plotting);
    }
}
