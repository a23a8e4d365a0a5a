use std::{future::Future, ops::ControlFlow, time::Duration};

use tokio::time::{Instant, MissedTickBehavior};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The task asked to stop.
    Finished,
    /// The stop signal fired first.
    Interrupted,
}

/// Calls `task` once per `period` until it breaks, fails, or `stop` resolves.
///
/// Each call runs to completion before anything else happens; a call that
/// takes longer than `period` pushes the following ticks back rather than
/// bunching them up. Stopping abandons the task wherever it was.
pub async fn run_periodic<S, F>(period: Duration, stop: S, mut task: F) -> anyhow::Result<Outcome>
where
    S: Future<Output = std::io::Result<()>>,
    F: FnMut() -> anyhow::Result<ControlFlow<()>>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            res = &mut stop => {
                res?;
                log::warn!("interrupted");
                return Ok(Outcome::Interrupted);
            }
            _ = interval.tick() => {
                let start = Instant::now();
                let flow = task()?;
                let elapsed = start.elapsed();
                if elapsed > period {
                    log::warn!("tick took {elapsed:?}, longer than the {period:?} period");
                }
                if flow.is_break() {
                    return Ok(Outcome::Finished);
                }
            }
        }
    }
}
