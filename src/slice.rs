//! Execution of a single slice on the worker node.

use crate::config::JobConfig;
use crate::error::GridJobError;
use anyhow::{Context, Result};
use std::process::Command;
use tracing::info;

/// Where a slice sits in the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlicePlan {
    pub start: u64,
    pub offset: u64,
    pub slice: u64,
    pub first_event: u64,
    pub events: u64,
}

impl SlicePlan {
    /// Resolve `start + offset` against the job's slicing.
    pub fn resolve(job: &JobConfig, start: u64, offset: u64) -> Result<Self, GridJobError> {
        let slice = start
            .checked_add(offset)
            .ok_or_else(|| GridJobError::precondition("slice number overflows"))?;
        let (first_event, events) = job.slicing.slice_events(slice).ok_or_else(|| {
            GridJobError::precondition(format!(
                "slice {} is beyond the last slice {} of this job!",
                slice,
                job.slicing.slice_count().saturating_sub(1)
            ))
        })?;
        Ok(Self {
            start,
            offset,
            slice,
            first_event,
            events,
        })
    }

    /// Environment handed to the slice command.
    pub fn env(&self, job_name: &str) -> Vec<(&'static str, String)> {
        vec![
            ("GRIDJOB_NAME", job_name.to_string()),
            ("GRIDJOB_START", self.start.to_string()),
            ("GRIDJOB_OFFSET", self.offset.to_string()),
            ("GRIDJOB_SLICE", self.slice.to_string()),
            ("GRIDJOB_FIRST_EVENT", self.first_event.to_string()),
            ("GRIDJOB_EVENTS", self.events.to_string()),
        ]
    }

    /// Replace `{slice}`-style placeholders in a command argument.
    pub fn expand(&self, arg: &str) -> String {
        arg.replace("{slice}", &self.slice.to_string())
            .replace("{start}", &self.start.to_string())
            .replace("{offset}", &self.offset.to_string())
            .replace("{first_event}", &self.first_event.to_string())
            .replace("{events}", &self.events.to_string())
    }
}

/// Run the job's slice command for one slice and return its exit code.
pub fn run_slice(job: &JobConfig, start: u64, offset: u64) -> Result<i32> {
    let plan = SlicePlan::resolve(job, start, offset)?;
    let command = job
        .slice
        .as_ref()
        .map(|s| s.command.as_slice())
        .unwrap_or_default();
    let Some((program, args)) = command.split_first() else {
        return Err(GridJobError::precondition(format!(
            "job {} has no [slice] command to run",
            job.name
        ))
        .into());
    };

    let args: Vec<String> = args.iter().map(|a| plan.expand(a)).collect();
    info!(
        job = %job.name,
        slice = plan.slice,
        first_event = plan.first_event,
        events = plan.events,
        "starting slice"
    );

    let status = Command::new(plan.expand(program))
        .args(&args)
        .envs(plan.env(&job.name))
        .status()
        .with_context(|| format!("Failed to execute slice command: {}", program))?;

    let code = status.code().unwrap_or(-1);
    info!(slice = plan.slice, code, "slice finished");
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn job(command: &str) -> JobConfig {
        let source = format!(
            "[slicing]\n\
             total_events_to_generate = 250\n\
             number_of_events_per_slice = 100\n\
             [slice]\n\
             command = {}\n",
            command
        );
        JobConfig::from_source(Path::new("bggen.toml"), source).unwrap()
    }

    #[test]
    fn test_resolve_plan() {
        let job = job("[]");
        let plan = SlicePlan::resolve(&job, 1, 1).unwrap();
        assert_eq!(plan.slice, 2);
        assert_eq!(plan.first_event, 200);
        assert_eq!(plan.events, 50);
    }

    #[test]
    fn test_resolve_out_of_range() {
        let job = job("[]");
        let err = SlicePlan::resolve(&job, 2, 1).unwrap_err();
        assert!(err.to_string().contains("slice 3"));
    }

    #[test]
    fn test_expand_placeholders() {
        let job = job("[]");
        let plan = SlicePlan::resolve(&job, 0, 1).unwrap();
        assert_eq!(plan.expand("out_{slice}_{first_event}+{events}"), "out_1_100+100");
        let env = plan.env("bggen");
        assert!(env.contains(&("GRIDJOB_SLICE", "1".to_string())));
        assert!(env.contains(&("GRIDJOB_NAME", "bggen".to_string())));
    }

    #[test]
    fn test_missing_command() {
        let job = job("[]");
        let err = run_slice(&job, 0, 0).unwrap_err();
        assert!(err.downcast_ref::<GridJobError>().is_some());
    }

    #[test]
    fn test_run_slice_exit_code() {
        let job = job(r#"["sh", "-c", "test \"$GRIDJOB_SLICE\" = {slice} && exit 7"]"#);
        assert_eq!(run_slice(&job, 1, 0).unwrap(), 7);
    }
}
