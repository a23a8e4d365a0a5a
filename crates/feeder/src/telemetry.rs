use std::io::Write;

use scriba_planner::MotionCommand;

/// The position stream that the live display consumes: one
/// `x, y, arm_angle` line per command that the plotter starts on.
pub struct Telemetry<W> {
    out: W,
    lines: usize,
}

impl<W: Write> Telemetry<W> {
    pub fn new(out: W) -> Self {
        Self { out, lines: 0 }
    }

    pub fn record(&mut self, cmd: &MotionCommand) -> std::io::Result<()> {
        write!(self.out, "{}, {}, {}\r\n", cmd.x, cmd.y, cmd.arm_angle)?;
        self.lines += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }

    pub fn lines(&self) -> usize {
        self.lines
    }
}
