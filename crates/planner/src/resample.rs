use kurbo::Point;
use serde::{Deserialize, Serialize};

use crate::{PenState, RawCommand, Waypoint};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleConfig {
    /// Longest segment allowed into a pen-down point, in source units.
    pub max_dist: f64,
    /// Minimum number of points a long segment is cut at, counting both ends.
    pub subdivisions: usize,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            max_dist: 10.0,
            subdivisions: 3,
        }
    }
}

impl ResampleConfig {
    // Enough points that every piece is at most `max_dist` long.
    fn point_count(&self, dist: f64) -> usize {
        let needed = ((dist / self.max_dist).ceil() as usize).saturating_add(1);
        self.subdivisions.max(needed).max(2)
    }
}

/// Cuts long segments into short ones.
///
/// The arm only moves in straight lines in joint space, which are curves on
/// the page. Keeping segments short keeps those curves close to the lines
/// that the drawing asked for. Segments that end at a pen-up point aren't
/// touched, since nothing is being drawn along them.
pub fn resample(commands: &[RawCommand], config: &ResampleConfig) -> Vec<Waypoint> {
    let mut ret = Vec::with_capacity(commands.len());

    for (idx, cur) in commands.iter().enumerate() {
        let p = cur.point();
        let Some(next) = commands.get(idx + 1) else {
            ret.push(Waypoint::new(cur.pen, p));
            continue;
        };
        let q = next.point();
        let long = p.distance(q) > config.max_dist;

        match (cur.pen, next.pen) {
            (PenState::Up, _) if long => {
                // The pen comes down partway along the travel move, so
                // everything after the starting point is drawn.
                ret.extend(interpolate(p, q, config).enumerate().map(|(i, pt)| {
                    let pen = if i == 0 {
                        PenState::Up
                    } else {
                        PenState::Down
                    };
                    Waypoint::new(pen, pt)
                }));
            }
            (PenState::Down, PenState::Down) if long => {
                ret.extend(
                    interpolate(p, q, config).map(|pt| Waypoint::new(PenState::Down, pt)),
                );
            }
            _ => ret.push(Waypoint::new(cur.pen, p)),
        }
    }

    ret
}

// Evenly spaced points from `p` towards `q`, starting at `p` and stopping
// one short of `q`, which is emitted by the next run.
fn interpolate(p: Point, q: Point, config: &ResampleConfig) -> impl Iterator<Item = Point> {
    let n = config.point_count(p.distance(q));
    let step = (q - p) / (n - 1) as f64;
    (0..n - 1).map(move |i| p + step * i as f64)
}
