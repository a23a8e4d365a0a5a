use std::{cell::RefCell, io::Write, rc::Rc};

use kurbo::{Point, Rect};
use scriba_planner::MotionCommand;
use scriba_protocol::{
    register::decode_position,
    sim::{Sim, SimBus, SimDelay, SimSelect},
    DriverConfig, Register, StepperDriver,
};
use serde::{Deserialize, Serialize};
use svg::{
    node::element::{path::Data, Circle, Path},
    Document,
};

use crate::{coordinator::Pen, settings::Settings};

pub type SimDriver = StepperDriver<SimBus, SimSelect, SimDelay>;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// The scheduler period.
    pub tick_ms: u64,
    /// How far each simulated motor can go in one tick.
    pub usteps_per_tick: u32,
    /// Multiplies all dimensions of the illustration.
    pub svg_scale: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_ms: 5,
            usteps_per_tick: 8,
            // Browsers don't like to see small svgs.
            svg_scale: 10.0,
        }
    }
}

#[derive(Debug, Default)]
struct PenInner {
    down: bool,
    held: bool,
    moves: usize,
}

/// A pen lift that just remembers where it was told to go.
#[derive(Clone, Debug, Default)]
pub struct SimPen {
    inner: Rc<RefCell<PenInner>>,
}

impl SimPen {
    pub fn is_down(&self) -> bool {
        self.inner.borrow().down
    }

    pub fn is_held(&self) -> bool {
        self.inner.borrow().held
    }

    /// How many times the pen went up or down.
    pub fn moves(&self) -> usize {
        self.inner.borrow().moves
    }

    fn lift(&mut self, down: bool) {
        let mut inner = self.inner.borrow_mut();
        log::debug!("pen {}", if down { "down" } else { "up" });
        inner.down = down;
        inner.held = false;
        inner.moves += 1;
    }
}

impl Pen for SimPen {
    fn engage(&mut self) -> anyhow::Result<()> {
        self.lift(true);
        Ok(())
    }

    fn disengage(&mut self) -> anyhow::Result<()> {
        self.lift(false);
        Ok(())
    }

    fn hold(&mut self) -> anyhow::Result<()> {
        self.inner.borrow_mut().held = true;
        Ok(())
    }
}

/// The parts of a simulated plotter that the coordinator drives.
pub struct Hardware {
    pub arm: SimDriver,
    pub carriage: SimDriver,
    pub pen: SimPen,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stroke {
    pub from: Point,
    pub to: Point,
    pub drawn: bool,
}

/// Two simulated motor controllers and a pen, plus a record of where the
/// pen has been.
pub struct Simulation {
    geom: scriba_geom::Config,
    driver: DriverConfig,
    config: SimulationConfig,
    arm: Sim,
    carriage: Sim,
    pen: SimPen,
    delay: SimDelay,
    position: Point,
    strokes: Vec<Stroke>,
}

impl Simulation {
    /// Powers up the simulated chips, runs the drivers' start-up sequence
    /// and zeroes both motors at the configured starting angles, with the
    /// pen up.
    pub fn new(settings: &Settings) -> anyhow::Result<(Self, Hardware)> {
        let config = settings.simulation;
        let arm = Sim::new(config.usteps_per_tick);
        let carriage = Sim::new(config.usteps_per_tick);
        let delay = SimDelay::default();

        let mut arm_driver =
            StepperDriver::new(arm.bus(), arm.select(), delay.clone(), settings.driver)?;
        let mut carriage_driver = StepperDriver::new(
            carriage.bus(),
            carriage.select(),
            delay.clone(),
            settings.driver,
        )?;
        log::info!(
            "TYPE_VERSION: arm {:#x}, carriage {:#x}",
            arm_driver.type_version()?,
            carriage_driver.type_version()?
        );

        let zero = settings.motion.zero;
        arm_driver.set_zero(zero.theta1)?;
        carriage_driver.set_zero(zero.theta2)?;
        log::info!(
            "zeroed at ({:.3}, {:.3}) after {} ms",
            zero.theta1,
            zero.theta2,
            delay.elapsed_ms()
        );

        let mut pen = SimPen::default();
        pen.disengage()?;
        pen.hold()?;

        let mut sim = Simulation {
            geom: settings.kinematics,
            driver: settings.driver,
            config,
            arm,
            carriage,
            pen: pen.clone(),
            delay,
            position: Point::ZERO,
            strokes: Vec::new(),
        };
        sim.position = sim.pen_position();

        let hardware = Hardware {
            arm: arm_driver,
            carriage: carriage_driver,
            pen,
        };
        Ok((sim, hardware))
    }

    /// Simulated milliseconds spent in driver delays.
    pub fn delay_ms(&self) -> u64 {
        self.delay.elapsed_ms()
    }

    pub fn pen_position(&self) -> Point {
        let angles = scriba_geom::JointAngles::new(
            self.driver.to_radians(self.arm.position()),
            self.driver.to_radians(self.carriage.position()),
        );
        let p = self.geom.forward(&angles);
        Point::new(p.x, p.y)
    }

    /// Lets both motors move for one tick.
    pub fn advance(&mut self) {
        self.arm.advance();
        self.carriage.advance();

        let to = self.pen_position();
        if to != self.position {
            if !self.pen.is_held() {
                log::warn!("moving while the pen lift isn't locked");
            }
            self.strokes.push(Stroke {
                from: self.position,
                to,
                drawn: self.pen.is_down(),
            });
            self.position = to;
        }
    }

    /// Whether both motors have reached their targets.
    pub fn parked(&self) -> bool {
        [&self.arm, &self.carriage]
            .iter()
            .all(|sim| sim.position() == decode_position(sim.register(Register::XTarget)))
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    /// Draws where the pen went, on top of the commanded points.
    ///
    /// Pen-down strokes are black and pen-up travel is grey. The arm is shown
    /// in its final position.
    pub fn illustrate<W: Write>(&self, out: W, commands: &[MotionCommand]) -> std::io::Result<()> {
        let scale = self.config.svg_scale;
        // svg's y axis points down.
        let flip = |p: Point| Point::new(p.x * scale, -p.y * scale);

        let mut bbox = Rect::from_points(flip(Point::ZERO), flip(self.position));
        let mut document = Document::new();

        for stroke in &self.strokes {
            let (from, to) = (flip(stroke.from), flip(stroke.to));
            bbox = bbox.union_pt(from).union_pt(to);
            let data = Data::new()
                .move_to((from.x, from.y))
                .line_to((to.x, to.y));
            document = document.add(
                Path::new()
                    .set("fill", "none")
                    .set("stroke", if stroke.drawn { "black" } else { "lightgrey" })
                    .set("stroke-width", 1)
                    .set("d", data),
            );
        }

        for cmd in commands {
            let p = flip(Point::new(cmd.x, cmd.y));
            bbox = bbox.union_pt(p);
            document = document.add(
                Circle::new()
                    .set("cx", p.x)
                    .set("cy", p.y)
                    .set("r", 2.0)
                    .set("fill", "blue"),
            );
        }

        let pen = flip(self.position);
        let arm = Data::new().move_to((0.0, 0.0)).line_to((pen.x, pen.y));
        document = document.add(
            Path::new()
                .set("fill", "none")
                .set("stroke", "red")
                .set("stroke-width", 2)
                .set("d", arm),
        );

        let bbox = bbox.inflate(10.0, 10.0);
        document = document.set("viewBox", (bbox.x0, bbox.y0, bbox.width(), bbox.height()));
        svg::write(out, &document)
    }
}
