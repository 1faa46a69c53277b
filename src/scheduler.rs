//! HTCondor and grid proxy command execution.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Result of running an external command
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub return_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.return_code == 0
    }
}

/// Execute a command given as an argument list and capture its output.
///
/// # Arguments
/// * `cmd` - Program followed by its arguments; nothing is interpreted by a shell
/// * `check` - If true, return error on non-zero return code
pub fn run_command<S: AsRef<str>>(cmd: &[S], check: bool) -> Result<CommandResult> {
    let (program, args) = match cmd.split_first() {
        Some((program, args)) => (program.as_ref(), args),
        None => anyhow::bail!("Empty command"),
    };
    debug!(command = ?cmd.iter().map(|s| s.as_ref()).collect::<Vec<_>>(), "running");

    let output = Command::new(program)
        .args(args.iter().map(|a| a.as_ref()))
        .output()
        .with_context(|| format!("Failed to execute command: {}", program))?;

    let result = CommandResult {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        return_code: output.status.code().unwrap_or(-1),
    };

    if check && !result.success() {
        anyhow::bail!(
            "Command {} failed with code {}: {}",
            program,
            result.return_code,
            result.stderr.trim()
        );
    }

    Ok(result)
}

/// Parse the cluster id from condor_submit output.
///
/// Typical output: "1 job(s) submitted to cluster 12345."
pub fn parse_cluster_id(submit_output: &str) -> Option<u64> {
    let re = Regex::new(r"submitted to cluster (\d+)").ok()?;
    re.captures(submit_output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Outcome of handing a submit file to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted { cluster: u64 },
    Failed { code: i32 },
}

/// The operations this tool needs from the batch scheduler and grid proxy tools.
pub trait Scheduler {
    /// Queue the jobs described by `submit_file`.
    fn submit(&self, submit_file: &Path) -> Result<SubmitOutcome>;

    /// Remove the given jobs (`<cluster>` or `<cluster>.<proc>`); returns the exit code.
    fn remove(&self, job_specs: &[String]) -> Result<i32>;

    /// Per-task usage report for a scheduler user log.
    fn user_log(&self, log_file: &Path) -> Result<CommandResult>;

    /// Whether a grid proxy exists with at least `validity` (`HH:MM`) remaining.
    fn proxy_valid(&self, validity: &str) -> Result<bool>;

    /// Filesystem path of the current grid proxy.
    fn proxy_path(&self) -> Result<PathBuf>;
}

/// [`Scheduler`] backed by the HTCondor and VOMS command line tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct Condor;

impl Scheduler for Condor {
    fn submit(&self, submit_file: &Path) -> Result<SubmitOutcome> {
        let submit_file = submit_file.to_string_lossy();
        let result = run_command(&["condor_submit", &*submit_file], false)?;
        print!("{}", result.stdout);
        if !result.success() {
            eprint!("{}", result.stderr);
            return Ok(SubmitOutcome::Failed {
                code: result.return_code,
            });
        }
        let cluster = parse_cluster_id(&result.stdout)
            .ok_or_else(|| anyhow::anyhow!("Could not parse cluster id from condor_submit output"))?;
        Ok(SubmitOutcome::Submitted { cluster })
    }

    fn remove(&self, job_specs: &[String]) -> Result<i32> {
        let mut cmd = vec!["condor_rm".to_string()];
        cmd.extend(job_specs.iter().cloned());
        let result = run_command(&cmd, false)?;
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
        Ok(result.return_code)
    }

    fn user_log(&self, log_file: &Path) -> Result<CommandResult> {
        let log_file = log_file.to_string_lossy();
        run_command(&["condor_userlog", &*log_file], true)
    }

    fn proxy_valid(&self, validity: &str) -> Result<bool> {
        let result = run_command(&["voms-proxy-info", "-exists", "-valid", validity], false)?;
        Ok(result.success())
    }

    fn proxy_path(&self) -> Result<PathBuf> {
        let result = run_command(&["voms-proxy-info", "-path"], true)?;
        Ok(PathBuf::from(result.stdout.trim_end()))
    }
}
