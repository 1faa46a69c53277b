//! CLI entry point and command definitions.

use crate::classifier::{StateCounts, StatusReport};
use crate::config::{JobConfig, SlicingParams};
use crate::error::GridJobError;
use crate::log_watcher::{LogChanged, LogWatcher};
use crate::registry::{Batch, BatchRegistry, JobPaths};
use crate::scheduler::{Scheduler, SubmitOutcome};
use crate::slice::run_slice;
use crate::submit_file::{self, SubmitContext};
use crate::ui::{self, App};
use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use crossterm::{
    cursor::{Hide, Show},
    event::{self, Event, KeyCode, KeyEventKind},
    execute, queue,
    terminal::{
        disable_raw_mode, enable_raw_mode, BeginSynchronizedUpdate, EndSynchronizedUpdate,
        EnterAlternateScreen, LeaveAlternateScreen,
    },
};
use ratatui::prelude::*;
use std::io::{self, stdout, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Grid job helper - submit, monitor and cancel sliced HTCondor jobs.
#[derive(Parser)]
#[command(name = "gridjob")]
#[command(version)]
#[command(about = "Submit, monitor and cancel sliced HTCondor grid jobs")]
pub struct Cli {
    /// Job file describing the workload (usually supplied by a `#!/usr/bin/env gridjob` line)
    pub job: PathBuf,

    #[command(subcommand)]
    pub command: Commands,

    /// Increase diagnostic output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only report errors on stderr
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print a brief description of this job
    Info,
    /// Report the execution status of the job
    Status {
        /// Also print the full condor_userlog listing
        #[arg(short = 'l')]
        long: bool,
        /// Keep a live dashboard open, refreshing as the condor log changes
        #[arg(short, long)]
        watch: bool,
    },
    /// Submit slices of the job to the grid
    Submit {
        /// First slice to submit, default 0
        #[arg(allow_negative_numbers = true)]
        start: Option<i64>,
        /// Number of slices to submit; 0 or missing means enough to reach the event goal
        #[arg(allow_negative_numbers = true)]
        count: Option<i64>,
    },
    /// Cancel submitted slices of the job
    Cancel {
        /// First slice to cancel, default 0
        #[arg(allow_negative_numbers = true)]
        start: Option<i64>,
        /// Number of slices to cancel; 0 or missing means enough to reach the event goal
        #[arg(allow_negative_numbers = true)]
        count: Option<i64>,
    },
    /// Execute one slice of the job in the present context
    Doslice {
        /// Base slice number of the batch
        start: u64,
        /// Offset within the batch; the slice run is <start> + <offset>
        offset: u64,
    },
}

/// Resolve optional `[start [count]]` arguments into a slice range.
pub fn resolve_range(
    slicing: &SlicingParams,
    start: Option<i64>,
    count: Option<i64>,
) -> Result<(u64, u64), GridJobError> {
    let start = start.unwrap_or(0);
    let mut count = count.unwrap_or(0);
    if count == 0 {
        count = i64::try_from(slicing.slice_count()).unwrap_or(i64::MAX);
    }
    if start < 0 {
        return Err(GridJobError::precondition(
            "start slice is less than zero!\nNothing to do, quitting...",
        ));
    }
    if count <= 0 {
        return Err(GridJobError::precondition(
            "start slice is greater than the job max slice count! Nothing to do, quitting...",
        ));
    }
    Ok((start as u64, count as u64))
}

/// Handle the info command.
pub fn handle_info(job: &JobConfig) -> Result<()> {
    for line in job.info_lines() {
        println!("{}", line);
    }
    Ok(())
}

/// Text block printed at the end of `status`.
pub fn format_summary(job_name: &str, counts: &StateCounts, user_log: &Path) -> String {
    format!(
        "Total statistics for job {} :\n\
         \x20 slices queued:  {}\n\
         \x20 slices completed:  {}\n\
         \x20 slices running:  {}\n\
         \x20 slices evicted:  {}\n\
         For more details, do condor_userlog {}",
        job_name,
        counts.queued,
        counts.completed,
        counts.running,
        counts.evicted,
        user_log.display()
    )
}

fn ensure_submitted(paths: &JobPaths) -> Result<(), GridJobError> {
    if !paths.user_log.exists() || !paths.batch_file.exists() {
        return Err(GridJobError::precondition(
            "no record exists of this job ever having been submitted!",
        ));
    }
    Ok(())
}

/// Fetch and classify the current usage report.
fn build_report(paths: &JobPaths, scheduler: &dyn Scheduler) -> Result<(StatusReport, String)> {
    let registry = BatchRegistry::load(&paths.batch_file)?;
    let output = scheduler
        .user_log(&paths.user_log)
        .context("Failed to read the condor user log")?
        .stdout;
    let report = StatusReport::build(&output, &registry)?;
    Ok((report, output))
}

/// Handle the status command. The report is written to `out`; diagnostics
/// go to the log as warnings.
pub fn handle_status(
    job: &JobConfig,
    base: &Path,
    scheduler: &dyn Scheduler,
    long: bool,
    out: &mut impl io::Write,
) -> Result<StatusReport> {
    let paths = JobPaths::under(base, &job.name);
    ensure_submitted(&paths)?;

    let (report, output) = build_report(&paths, scheduler)?;
    for diagnostic in &report.diagnostics {
        warn!("{}", diagnostic);
    }
    if long {
        for line in output.lines() {
            writeln!(out, "{}", line.trim_end())?;
        }
    }

    let relative = JobPaths::new(&job.name);
    writeln!(
        out,
        "{}",
        format_summary(&job.name, &report.counts(), &relative.user_log)
    )?;
    Ok(report)
}

/// Handle the submit command.
pub fn handle_submit(
    job: &JobConfig,
    base: &Path,
    scheduler: &dyn Scheduler,
    start: Option<i64>,
    count: Option<i64>,
) -> Result<()> {
    let (start, count) = resolve_range(&job.slicing, start, count)?;

    if !scheduler.proxy_valid(&job.site.proxy_validity)? {
        return Err(GridJobError::precondition(format!(
            "your grid certificate must be valid, and have at least {} hours left in order for you to submit this job.",
            job.site.proxy_validity.trim_end_matches(":00")
        ))
        .into());
    }
    let proxy_path = scheduler.proxy_path()?;

    let template_path = job.site.submit_template();
    let template = std::fs::read_to_string(&template_path).with_context(|| {
        format!("Failed to read submit template: {}", template_path.display())
    })?;

    let paths = JobPaths::under(base, &job.name);
    std::fs::create_dir_all(&paths.log_dir)
        .with_context(|| format!("Failed to create {}", paths.log_dir.display()))?;

    let sequence = BatchRegistry::submissions(&paths.batch_file)?;
    let submit_path = paths.submit_file(sequence);
    let ctx = SubmitContext {
        job_name: job.name.clone(),
        job_file_name: job.file_name.clone(),
        initial_dir: base.display().to_string(),
        log_dir: JobPaths::new(&job.name).log_dir.display().to_string(),
        container: job.site.container.clone(),
        container_wrapper: job.site.container_wrapper.clone(),
        proxy_path: proxy_path.display().to_string(),
        start,
        count,
    };
    std::fs::write(&submit_path, submit_file::render(&template, &ctx))
        .with_context(|| format!("Failed to write {}", submit_path.display()))?;
    info!(file = %submit_path.display(), start, count, "submit file written");

    match scheduler.submit(&submit_path)? {
        SubmitOutcome::Submitted { cluster } => {
            BatchRegistry::append(
                &paths.batch_file,
                Batch {
                    id: cluster,
                    first_slice: start,
                    slice_count: count,
                },
            )?;
            println!(
                "Submitted slices {} to {} of job {} as cluster {}",
                start,
                start + count - 1,
                job.name,
                cluster
            );
            Ok(())
        }
        SubmitOutcome::Failed { code } => Err(GridJobError::CommandExit {
            command: "condor_submit".to_string(),
            code,
        }
        .into()),
    }
}

/// Scheduler job ids covering `range` of `batch`: the bare cluster id when the
/// whole batch is selected.
fn job_specs(batch: &Batch, range: std::ops::Range<u64>) -> Vec<String> {
    if range.start == 0 && range.end >= batch.slice_count {
        vec![batch.id.to_string()]
    } else {
        range.map(|p| format!("{}.{}", batch.id, p)).collect()
    }
}

/// Handle the cancel command.
pub fn handle_cancel(
    job: &JobConfig,
    base: &Path,
    scheduler: &dyn Scheduler,
    start: Option<i64>,
    count: Option<i64>,
) -> Result<()> {
    let (start, count) = resolve_range(&job.slicing, start, count)?;
    let paths = JobPaths::under(base, &job.name);
    let registry = BatchRegistry::load(&paths.batch_file)?;

    let ranges = registry.cancel_ranges(start, count);
    if ranges.is_empty() {
        println!(
            "No submitted slices of job {} in range {} to {}, nothing to cancel.",
            job.name,
            start,
            start + count - 1
        );
        return Ok(());
    }

    let mut first_failure = None;
    for (batch, range) in ranges {
        let specs = job_specs(&batch, range);
        info!(cluster = batch.id, jobs = specs.len(), "cancelling");
        let code = scheduler.remove(&specs)?;
        if code != 0 {
            warn!(cluster = batch.id, code, "condor_rm failed");
            first_failure.get_or_insert(code);
        }
    }

    match first_failure {
        Some(code) => Err(GridJobError::CommandExit {
            command: "condor_rm".to_string(),
            code,
        }
        .into()),
        None => Ok(()),
    }
}

/// Handle the doslice command.
pub fn handle_doslice(job: &JobConfig, start: u64, offset: u64) -> Result<()> {
    let code = run_slice(job, start, offset)?;
    if code != 0 {
        return Err(GridJobError::CommandExit {
            command: format!("slice {}", start + offset),
            code,
        }
        .into());
    }
    Ok(())
}

/// Handle `status --watch`.
pub fn handle_watch(job: &JobConfig, base: &Path, scheduler: &dyn Scheduler) -> Result<()> {
    let paths = JobPaths::under(base, &job.name);
    ensure_submitted(&paths)?;

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, Hide)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(&job.name);

    let (log_tx, log_rx) = mpsc::channel();
    let mut watcher = LogWatcher::new(1.0);
    watcher.start(&paths.user_log, log_tx);

    let result = run_event_loop(&mut terminal, &mut app, log_rx, &paths, scheduler);

    // Cleanup
    watcher.stop();
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, Show)?;

    result
}

fn refresh(app: &mut App, paths: &JobPaths, scheduler: &dyn Scheduler) {
    match build_report(paths, scheduler) {
        Ok((report, _)) => app.apply_report(&report),
        Err(e) => app.set_error(format!("{:#}", e)),
    }
}

/// Main event loop.
fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    log_rx: Receiver<LogChanged>,
    paths: &JobPaths,
    scheduler: &dyn Scheduler,
) -> Result<()> {
    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    refresh(app, paths, scheduler);

    loop {
        let size = terminal.size()?;
        app.update_panel_heights(Rect::new(0, 0, size.width, size.height));

        // Synchronized update prevents flicker in tmux and other terminals
        queue!(terminal.backend_mut(), BeginSynchronizedUpdate)?;
        terminal.draw(|frame| {
            ui::render(frame, app);
        })?;
        queue!(terminal.backend_mut(), EndSynchronizedUpdate)?;
        std::io::Write::flush(terminal.backend_mut())?;

        // Coalesce bursts of log writes into one refresh
        let mut changed = false;
        while let Ok(update) = log_rx.try_recv() {
            debug!(path = %update.path.display(), "user log changed");
            changed = true;
        }
        if changed {
            refresh(app, paths, scheduler);
        }

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
                        KeyCode::Char('c')
                            if key.modifiers.contains(event::KeyModifiers::CONTROL) =>
                        {
                            app.should_quit = true;
                        }
                        KeyCode::Char('r') => refresh(app, paths, scheduler),
                        KeyCode::Up => app.scroll_up(1),
                        KeyCode::Down => app.scroll_down(1),
                        KeyCode::PageUp => app.scroll_up(10),
                        KeyCode::PageDown => app.scroll_down(10),
                        KeyCode::Home => app.scroll_to_top(),
                        KeyCode::End => app.scroll_to_bottom(),
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
