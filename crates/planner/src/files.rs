//! The flat text files that sit between the pipeline stages.
//!
//! Both formats are one record per line, comma-separated, with `\r\n` line
//! endings. Readers also take plain `\n` and skip blank lines.

use std::io::{BufRead, Write};

use crate::{MotionCommand, PenState, Waypoint};

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: unknown pen state {text:?}")]
    Pen { line: usize, text: String },
    #[error("line {line}: invalid number {text:?}")]
    Number { line: usize, text: String },
}

pub fn write_waypoints<W: Write>(mut w: W, waypoints: &[Waypoint]) -> std::io::Result<()> {
    for p in waypoints {
        write!(w, "{}, {}, {}\r\n", p.pen, p.x, p.y)?;
    }
    w.flush()
}

pub fn write_motion_commands<W: Write>(
    mut w: W,
    commands: &[MotionCommand],
) -> std::io::Result<()> {
    for c in commands {
        write!(
            w,
            "{}, {}, {}, {}, {}, {}\r\n",
            c.pen, c.theta1, c.theta2, c.x, c.y, c.arm_angle
        )?;
    }
    w.flush()
}

pub fn read_waypoints<R: BufRead>(r: R) -> Result<Vec<Waypoint>, FileError> {
    read_records(r, |line, fields| {
        let [pen, x, y] = fields_array(line, fields)?;
        Ok(Waypoint {
            pen: parse_pen(line, pen)?,
            x: parse_number(line, x)?,
            y: parse_number(line, y)?,
        })
    })
}

pub fn read_motion_commands<R: BufRead>(r: R) -> Result<Vec<MotionCommand>, FileError> {
    read_records(r, |line, fields| {
        let [pen, theta1, theta2, x, y, arm_angle] = fields_array(line, fields)?;
        Ok(MotionCommand {
            pen: parse_pen(line, pen)?,
            theta1: parse_number(line, theta1)?,
            theta2: parse_number(line, theta2)?,
            x: parse_number(line, x)?,
            y: parse_number(line, y)?,
            arm_angle: parse_number(line, arm_angle)?,
        })
    })
}

fn read_records<R, T, F>(r: R, mut parse: F) -> Result<Vec<T>, FileError>
where
    R: BufRead,
    F: FnMut(usize, &[&str]) -> Result<T, FileError>,
{
    let mut ret = Vec::new();
    for (idx, text) in r.lines().enumerate() {
        let text = text?;
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let fields: Vec<&str> = text.split(',').map(str::trim).collect();
        // Line numbers are 1-based, like an editor shows them.
        ret.push(parse(idx + 1, &fields)?);
    }
    Ok(ret)
}

fn fields_array<'a, const N: usize>(
    line: usize,
    fields: &[&'a str],
) -> Result<[&'a str; N], FileError> {
    fields.try_into().map_err(|_| FileError::FieldCount {
        line,
        expected: N,
        found: fields.len(),
    })
}

fn parse_pen(line: usize, text: &str) -> Result<PenState, FileError> {
    text.parse().map_err(|_| FileError::Pen {
        line,
        text: text.to_owned(),
    })
}

fn parse_number(line: usize, text: &str) -> Result<f64, FileError> {
    text.parse().map_err(|_| FileError::Number {
        line,
        text: text.to_owned(),
    })
}
