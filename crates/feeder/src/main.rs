use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    ops::ControlFlow,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context as _};
use clap::Parser;
use indicatif::ProgressBar;
use scriba_planner::{files, MotionCommand, Solver};

use crate::{
    coordinator::Coordinator,
    scheduler::Outcome,
    settings::Settings,
    simulator::Simulation,
    telemetry::Telemetry,
};

mod coordinator;
mod scheduler;
mod settings;
mod simulator;
mod telemetry;

const SPINNER_TICK: Duration = Duration::from_millis(50);

#[derive(Parser)]
struct Args {
    /// A TOML file overriding the built-in settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(clap::Subcommand)]
enum Cmd {
    /// Turn an HPGL drawing into a motion-command file.
    Solve(SolveArgs),
    /// Play a motion-command file on the simulated plotter.
    Run {
        motion: PathBuf,

        #[command(flatten)]
        outputs: Outputs,
    },
    /// Solve, then run.
    Plot {
        #[command(flatten)]
        solve: SolveArgs,

        #[command(flatten)]
        outputs: Outputs,
    },
}

#[derive(clap::Args)]
struct SolveArgs {
    hpgl: PathBuf,

    #[arg(long, default_value = "waypoints.txt")]
    waypoints: PathBuf,

    #[arg(long, default_value = "motion.txt")]
    output: PathBuf,

    /// Give up on the first malformed pen command instead of skipping it.
    #[arg(long)]
    strict: bool,
}

#[derive(clap::Args)]
struct Outputs {
    /// Where to send telemetry; defaults to stdout.
    #[arg(long)]
    telemetry: Option<PathBuf>,

    /// Draw the simulated plot to this file.
    #[arg(long)]
    svg: Option<PathBuf>,
}

fn write_file(
    path: &Path,
    write: impl FnOnce(BufWriter<File>) -> std::io::Result<()>,
) -> anyhow::Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    write(BufWriter::new(file)).with_context(|| format!("failed to write {}", path.display()))
}

fn solve(settings: &Settings, args: &SolveArgs) -> anyhow::Result<Vec<MotionCommand>> {
    let text = std::fs::read_to_string(&args.hpgl)
        .with_context(|| format!("failed to read {}", args.hpgl.display()))?;

    let program = scriba_planner::parse(&text);
    for m in &program.malformed {
        log::warn!("skipping {m}");
    }
    if args.strict && !program.malformed.is_empty() {
        bail!(
            "{} malformed pen commands in {}",
            program.malformed.len(),
            args.hpgl.display()
        );
    }
    log::info!(
        "read {} pen moves ({} other commands ignored)",
        program.commands.len(),
        program.ignored
    );

    let waypoints: Vec<_> = scriba_planner::resample(&program.commands, &settings.resample)
        .iter()
        .map(|w| settings.scaling.apply(w))
        .collect();
    write_file(&args.waypoints, |w| {
        files::write_waypoints(w, &waypoints)
    })?;
    log::info!(
        "wrote {} waypoints to {}",
        waypoints.len(),
        args.waypoints.display()
    );

    let bar = ProgressBar::new(waypoints.len() as u64).with_message("solving");
    let mut commands = Vec::with_capacity(waypoints.len());
    for cmd in Solver::new(settings.kinematics, waypoints.iter().copied()) {
        match cmd {
            Ok(cmd) => commands.push(cmd),
            Err(e) => {
                bar.abandon_with_message("failed");
                return Err(e.into());
            }
        }
        bar.inc(1);
    }
    bar.finish_with_message("solved");

    write_file(&args.output, |w| {
        files::write_motion_commands(w, &commands)
    })?;
    log::info!(
        "wrote {} motion commands to {}",
        commands.len(),
        args.output.display()
    );
    Ok(commands)
}

async fn run(
    settings: &Settings,
    commands: Vec<MotionCommand>,
    outputs: &Outputs,
) -> anyhow::Result<()> {
    let spinner = ProgressBar::new_spinner().with_message("Zeroing motors...");
    spinner.enable_steady_tick(SPINNER_TICK);
    let (mut sim, hw) = Simulation::new(settings)?;
    spinner.finish_with_message("zeroed!");

    let out: Box<dyn Write> = match &outputs.telemetry {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout()),
    };

    let total = commands.len();
    let shown = commands.clone();
    let pen = hw.pen.clone();
    let mut coordinator = Coordinator::new(
        settings.motion,
        commands,
        hw.arm,
        hw.carriage,
        hw.pen,
        Telemetry::new(out),
    );

    let bar = ProgressBar::new(total as u64).with_message("plotting");
    let period = Duration::from_millis(settings.simulation.tick_ms);
    let outcome = scheduler::run_periodic(period, tokio::signal::ctrl_c(), || {
        sim.advance();
        coordinator.tick()?;
        bar.set_position(coordinator.step() as u64);
        if coordinator.is_complete() && sim.parked() {
            Ok(ControlFlow::Break(()))
        } else {
            Ok(ControlFlow::Continue(()))
        }
    })
    .await?;

    match outcome {
        Outcome::Finished => bar.finish_with_message("done"),
        Outcome::Interrupted => {
            bar.abandon_with_message("interrupted");
            log::warn!(
                "stopped in state {:?} at command {}",
                coordinator.state(),
                coordinator.step()
            );
        }
    }
    log::info!(
        "{} telemetry lines, {} strokes, {} pen moves, {} ms of driver delays",
        coordinator.telemetry().lines(),
        sim.strokes().len(),
        pen.moves(),
        sim.delay_ms()
    );

    if let Some(path) = &outputs.svg {
        write_file(path, |w| sim.illustrate(w, &shown))?;
        log::info!("wrote {}", path.display());
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    match &args.cmd {
        Cmd::Solve(solve_args) => {
            solve(&settings, solve_args)?;
        }
        Cmd::Run { motion, outputs } => {
            let file = File::open(motion)
                .with_context(|| format!("failed to open {}", motion.display()))?;
            let commands = files::read_motion_commands(BufReader::new(file))
                .with_context(|| format!("bad motion-command file {}", motion.display()))?;
            run(&settings, commands, outputs).await?;
        }
        Cmd::Plot { solve: solve_args, outputs } => {
            let commands = solve(&settings, solve_args)?;
            run(&settings, commands, outputs).await?;
        }
    }
    Ok(())
}
