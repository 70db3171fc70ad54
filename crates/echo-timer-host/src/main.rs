// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Headless host loop for echo-timer.
//!
//! Plays the part of an engine main loop: each frame it advances frame time,
//! drains the main queue, and optionally backgrounds itself for a while or
//! tears down and rebuilds its context (a hot restart) to exercise the shared
//! scheduler's generation handling.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use echo_timer::{
    shared, FrameTime, Generation, Lifecycle, MainQueue, Repeat, SchedulerConfig, Stopwatch,
    TICKS_PER_SECOND,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "timer.json";

#[derive(Parser, Debug)]
#[command(author, version, about = "Echo timer host loop")]
struct Args {
    /// Scheduler config (JSON). Defaults to timer.json in the user config dir.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Frames to run per context generation
    #[arg(long, default_value_t = 180)]
    frames: u32,
    /// Target frame rate
    #[arg(long, default_value_t = 60)]
    fps: u32,
    /// Frame at which the host goes to the background
    #[arg(long)]
    pause_at_frame: Option<u32>,
    /// Frames spent in the background
    #[arg(long, default_value_t = 30)]
    pause_frames: u32,
    /// Hot restarts after the first generation
    #[arg(long, default_value_t = 0)]
    restarts: u32,
    /// Keep timers running while backgrounded
    #[arg(long)]
    desktop: bool,
}

/// Counters gathered over one generation.
#[derive(Debug, Default)]
struct RunSummary {
    frames: u32,
    heartbeats: usize,
    one_shots: usize,
    frame_runs: usize,
    executed: usize,
    failed: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    if args.fps == 0 {
        bail!("--fps must be positive");
    }
    let config = resolve_config(&args)?;
    info!(?config, "scheduler config");

    for run in 0..=args.restarts {
        let summary = run_generation(&args, &config)
            .with_context(|| format!("generation run {run} failed"))?;
        info!(run, ?summary, "context torn down");
    }
    shared::shutdown();
    Ok(())
}

fn resolve_config(args: &Args) -> Result<SchedulerConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?
            .with_context(|| format!("config file {} not found", path.display()))?,
        None => default_config_path()
            .map(|path| load_config(&path))
            .transpose()?
            .flatten()
            .unwrap_or_default(),
    };
    if args.desktop {
        config.suspend_on_pause = false;
    }
    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "flyingrobots", "Echo").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

fn load_config(path: &Path) -> Result<Option<SchedulerConfig>> {
    let loaded = SchedulerConfig::load(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    if loaded.is_some() {
        debug!(path = %path.display(), "loaded scheduler config");
    }
    Ok(loaded)
}

/// Builds one host context, runs its frames, then destroys it.
fn run_generation(args: &Args, config: &SchedulerConfig) -> Result<RunSummary> {
    let generation = Generation::next();
    let queue = MainQueue::new();
    let scheduler = shared::scheduler_with(generation, &queue, config.clone())
        .context("failed to start scheduler")?;
    let lifecycle = Lifecycle::new();
    let listener = Arc::new(scheduler.clone());
    lifecycle.register(&listener);
    info!(%generation, "context started");

    let timer = scheduler.default_timer()?;
    let heartbeats = Arc::new(AtomicUsize::new(0));
    let one_shots = Arc::new(AtomicUsize::new(0));
    {
        let heartbeats = Arc::clone(&heartbeats);
        timer.run_every(
            Duration::from_millis(250),
            Duration::from_millis(250),
            Repeat::Forever,
            move || {
                let n = heartbeats.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(n, "heartbeat");
            },
        )?;
    }
    {
        let one_shots = Arc::clone(&one_shots);
        FrameTime::run_task(&timer, TICKS_PER_SECOND / 2.0, move || {
            one_shots.fetch_add(1, Ordering::Relaxed);
            info!("half-second task fired");
        })?;
    }

    let mut frame = FrameTime::new();
    let frame_runs = Rc::new(Cell::new(0_usize));
    schedule_frame_run(&mut frame, &frame_runs);

    let frame_budget = Duration::from_secs(1) / args.fps;
    let resume_at = args
        .pause_at_frame
        .map(|at| at.saturating_add(args.pause_frames));
    let mut summary = RunSummary::default();
    let mut watch = Stopwatch::default();
    watch.mark();

    let mut last = Instant::now();
    for index in 0..args.frames {
        let started = Instant::now();
        if args.pause_at_frame == Some(index) {
            lifecycle.on_pause();
        }
        if resume_at == Some(index) {
            lifecycle.on_resume();
        }

        frame.update_global(started.duration_since(last).as_secs_f32());
        last = started;
        if !lifecycle.is_paused() {
            frame.update();
            if frame.pending() == 0 {
                schedule_frame_run(&mut frame, &frame_runs);
            }
        }

        let report = queue.run_pending();
        summary.executed += report.executed;
        summary.failed += report.failed;
        summary.frames += 1;

        if !scheduler.is_alive() {
            warn!(failure = ?scheduler.failure(), "scheduler died mid-run");
            break;
        }
        if let Some(rest) = frame_budget.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    lifecycle.on_destroy();
    frame.clear();
    summary.heartbeats = heartbeats.load(Ordering::Relaxed);
    summary.one_shots = one_shots.load(Ordering::Relaxed);
    summary.frame_runs = frame_runs.get();
    if let Some(elapsed) = watch.elapsed() {
        info!(%generation, elapsed_ms = elapsed.as_millis(), "generation finished");
    }
    Ok(summary)
}

/// Queues a tick-delayed run one second of simulation time out.
fn schedule_frame_run(frame: &mut FrameTime, counter: &Rc<Cell<usize>>) {
    let counter = Rc::clone(counter);
    frame.run(TICKS_PER_SECOND, move || counter.set(counter.get() + 1));
}
