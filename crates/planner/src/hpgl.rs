//! The subset of HPGL that the plotter understands.
//!
//! Only absolute pen-up and pen-down moves (`PU` and `PD`) produce anything.
//! Everything else (`IN`, `SP1`, ...) is set-up chatter that gets skipped,
//! although we count it. Pen commands that we can't make sense of are
//! collected instead of dropped, so the caller can decide whether to give
//! up or carry on without them.

use std::fmt;

use crate::{PenState, RawCommand};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("odd number of coordinates ({0})")]
    OddCoordinates(usize),
    #[error("invalid coordinate {0:?}")]
    BadCoordinate(String),
}

/// A `PU` or `PD` command that didn't parse.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Malformed {
    /// Position of the command in the `;`-separated input.
    pub index: usize,
    pub command: String,
    pub error: ParseError,
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command {} ({:?}): {}", self.index, self.command, self.error)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    pub commands: Vec<RawCommand>,
    pub malformed: Vec<Malformed>,
    /// How many non-pen commands were skipped.
    pub ignored: usize,
}

pub fn parse(input: &str) -> Program {
    let mut ret = Program::default();

    for (index, command) in input.split(';').enumerate() {
        let command = command.trim();
        if command.is_empty() {
            continue;
        }

        let (pen, args) = if let Some(args) = command.strip_prefix("PU") {
            (PenState::Up, args)
        } else if let Some(args) = command.strip_prefix("PD") {
            (PenState::Down, args)
        } else {
            log::debug!("skipping HPGL command {command:?}");
            ret.ignored += 1;
            continue;
        };

        match parse_coordinates(args) {
            Ok(coords) => ret
                .commands
                .extend(coords.into_iter().map(|(x, y)| RawCommand::new(pen, x, y))),
            Err(error) => ret.malformed.push(Malformed {
                index,
                command: command.to_owned(),
                error,
            }),
        }
    }

    ret
}

// A bare `PU` or `PD` only changes the pen state without moving, and our
// pen state is attached to moves, so it produces nothing.
fn parse_coordinates(args: &str) -> Result<Vec<(i32, i32)>, ParseError> {
    let args = args.trim();
    if args.is_empty() {
        return Ok(Vec::new());
    }

    let values = args
        .split(',')
        .map(|s| {
            let s = s.trim();
            s.parse::<i32>()
                .map_err(|_| ParseError::BadCoordinate(s.to_owned()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if values.len() % 2 != 0 {
        return Err(ParseError::OddCoordinates(values.len()));
    }
    Ok(values.chunks_exact(2).map(|c| (c[0], c[1])).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use PenState::*;

    #[test]
    fn pen_moves() {
        let prog = parse("IN;SP1;PU100,200;PD100,300,200,300;PU0,0;");
        assert_eq!(
            prog.commands,
            vec![
                RawCommand::new(Up, 100, 200),
                RawCommand::new(Down, 100, 300),
                RawCommand::new(Down, 200, 300),
                RawCommand::new(Up, 0, 0),
            ]
        );
        assert_eq!(prog.ignored, 2);
        assert!(prog.malformed.is_empty());
    }

    #[test]
    fn whitespace_and_newlines() {
        let prog = parse("IN;\nPU 1, 2;\r\nPD-3,4 ;\n");
        assert_eq!(
            prog.commands,
            vec![RawCommand::new(Up, 1, 2), RawCommand::new(Down, -3, 4)]
        );
    }

    #[test]
    fn bare_pen_commands_produce_nothing() {
        let prog = parse("PU;PD;SP0;");
        assert!(prog.commands.is_empty());
        assert!(prog.malformed.is_empty());
        assert_eq!(prog.ignored, 1);
    }

    #[test]
    fn malformed_commands_are_collected() {
        let prog = parse("PU1,2;PD3;PD4,x;PD5,6");
        assert_eq!(
            prog.commands,
            vec![RawCommand::new(Up, 1, 2), RawCommand::new(Down, 5, 6)]
        );
        assert_eq!(
            prog.malformed,
            vec![
                Malformed {
                    index: 1,
                    command: "PD3".to_owned(),
                    error: ParseError::OddCoordinates(1),
                },
                Malformed {
                    index: 2,
                    command: "PD4,x".to_owned(),
                    error: ParseError::BadCoordinate("x".to_owned()),
                },
            ]
        );
    }
}
