//! Job file loading and site configuration.
//!
//! A job file is a TOML document. Its leading comment block doubles as the
//! human-readable job description printed by `info`, and a `#!/usr/bin/env gridjob`
//! first line is a plain TOML comment, so the file can be made executable.
//!
//! ```toml
//! #!/usr/bin/env gridjob
//! # =====================
//! # jobname: bggen-2017-01
//! # author: someone@example.org
//! # =====================
//! [slicing]
//! total_events_to_generate = 1000000
//! number_of_events_per_slice = 10000
//!
//! [slice]
//! command = ["./run_bggen.sh", "{first_event}", "{events}"]
//! ```

use crate::error::GridJobError;
use anyhow::{Context, Result};
use regex::RegexSet;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Number of header lines `info` will look at.
const INFO_HEADER_LIMIT: usize = 100;

/// Number of leading lines searched for unmodified template markers.
const TEMPLATE_MARKER_LINES: usize = 31;

/// Text that only appears in the unmodified job template.
const TEMPLATE_MARKERS: &[&str] = &[
    r"TEMPLATE JOB SCRIPT FOR GLUEX OSG PRODUCTION",
    r"YOU MUST REPLACE .* ABOVE WITH A UNIQUE NAME",
    r"CUSTOMIZE THE SCRIPT SO THE JOB DOES WHAT YO",
    r"HEADER LINES \(THE ONES BETWEEN THE ===\) WITH",
    r"WHAT IT DOES, AND SAVE IT UNDER THE NEW NAME",
    r"^# jobname: gridjob-template",
    r"^# author: gluex.experimenter@jlab.org",
    r"# created: jan 1, 1969",
];

/// How the job's events are divided into slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SlicingParams {
    #[serde(rename = "total_events_to_generate")]
    pub total_events: u64,
    #[serde(rename = "number_of_events_per_slice")]
    pub events_per_slice: u64,
}

impl SlicingParams {
    /// Number of slices needed to reach the event goal.
    pub fn slice_count(&self) -> u64 {
        self.total_events.div_ceil(self.events_per_slice)
    }

    /// First event number and event count of slice `slice`, if it exists.
    /// The last slice carries the remainder.
    pub fn slice_events(&self, slice: u64) -> Option<(u64, u64)> {
        if slice >= self.slice_count() {
            return None;
        }
        let first = slice * self.events_per_slice;
        let events = self.events_per_slice.min(self.total_events - first);
        Some((first, events))
    }

    fn validate(&self) -> Result<(), GridJobError> {
        if self.total_events == 0 {
            return Err(GridJobError::precondition(
                "total_events_to_generate must be greater than zero",
            ));
        }
        if self.events_per_slice == 0 {
            return Err(GridJobError::precondition(
                "number_of_events_per_slice must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// The program a slice runs, from the `[slice]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SliceCommand {
    /// Program followed by its arguments.
    pub command: Vec<String>,
}

/// Grid site settings shared by all jobs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Directory holding `osg-condor.sub`.
    pub templates: PathBuf,
    /// Singularity image every slice runs in.
    pub container: String,
    /// Executable named in the submit file that starts the container.
    pub container_wrapper: String,
    /// Minimum remaining proxy lifetime, in `voms-proxy-info -valid` notation.
    pub proxy_validity: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            templates: PathBuf::from("/cvmfs/oasis.opensciencegrid.org/gluex/templates"),
            container: "/cvmfs/singularity.opensciencegrid.org/rjones30/gluex:latest".to_string(),
            container_wrapper: "osg-container.sh".to_string(),
            proxy_validity: "24:00".to_string(),
        }
    }
}

impl SiteConfig {
    /// Apply `GRIDJOB_TEMPLATES` and `GRIDJOB_CONTAINER` overrides.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(templates) = lookup("GRIDJOB_TEMPLATES").filter(|v| !v.is_empty()) {
            self.templates = PathBuf::from(templates);
        }
        if let Some(container) = lookup("GRIDJOB_CONTAINER").filter(|v| !v.is_empty()) {
            self.container = container;
        }
    }

    /// Path of the submit-file template.
    pub fn submit_template(&self) -> PathBuf {
        self.templates.join("osg-condor.sub")
    }
}

#[derive(Debug, Deserialize)]
struct JobFile {
    slicing: SlicingParams,
    slice: Option<SliceCommand>,
    #[serde(default)]
    site: SiteConfig,
}

/// Everything a command needs to know about the job it acts on.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Job name, the job file name without `.toml`.
    pub name: String,
    /// Job file name as it appears in the working directory.
    pub file_name: String,
    /// Path the job file was loaded from.
    pub path: PathBuf,
    /// Raw job file text.
    pub source: String,
    pub slicing: SlicingParams,
    pub slice: Option<SliceCommand>,
    pub site: SiteConfig,
}

impl JobConfig {
    /// Load a job file, applying environment overrides to its site settings.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file: {}", path.display()))?;
        let mut config = Self::from_source(path, source)?;
        config
            .site
            .apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Build a job from already loaded job file text.
    pub fn from_source(path: &Path, source: String) -> Result<Self> {
        let file: JobFile = toml::from_str(&source)
            .with_context(|| format!("Invalid job file: {}", path.display()))?;
        file.slicing.validate()?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = job_name(&file_name);
        if name.is_empty() {
            anyhow::bail!("Cannot derive a job name from {}", path.display());
        }

        Ok(Self {
            name,
            file_name,
            path: path.to_path_buf(),
            source,
            slicing: file.slicing,
            slice: file.slice,
            site: file.site,
        })
    }

    /// Lines printed by `info`.
    pub fn info_lines(&self) -> Vec<String> {
        info_header(&self.source)
    }

    /// Refuse to run a job file that still carries template boilerplate.
    pub fn ensure_customized(&self) -> Result<()> {
        if is_uncustomized(&self.source)? {
            return Err(GridJobError::precondition(
                "this job script is a template; it must be customized before you can run it.\n\
                 At the very minimum, you must update the author and date fields in the header,\n\
                 and fill in some descriptive text between the === lines.",
            )
            .into());
        }
        Ok(())
    }
}

/// Job name for a job file name: the name with a trailing `.toml` removed.
pub fn job_name(file_name: &str) -> String {
    file_name
        .strip_suffix(".toml")
        .unwrap_or(file_name)
        .to_string()
}

/// The job description: the comment block after the first line, with the
/// comment markers removed. A blank line terminates the block if it ends
/// before the file does.
pub fn info_header(source: &str) -> Vec<String> {
    let mut out = Vec::new();
    for (idx, line) in source.lines().enumerate().skip(1) {
        let lineno = idx + 1;
        if line.starts_with('#') && lineno < INFO_HEADER_LIMIT {
            out.push(line.trim_start_matches('#').trim_end().to_string());
        } else {
            out.push(String::new());
            break;
        }
    }
    out
}

/// True if any template marker appears near the top of the job file.
pub fn is_uncustomized(source: &str) -> Result<bool> {
    let markers = RegexSet::new(TEMPLATE_MARKERS).context("Invalid template marker pattern")?;
    Ok(source
        .lines()
        .take(TEMPLATE_MARKER_LINES)
        .any(|line| markers.is_match(line)))
}
