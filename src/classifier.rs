//! Slice state reconstruction from `condor_userlog` output.

use crate::registry::BatchRegistry;
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;

/// Duration HTCondor prints for "no time at all".
pub const ZERO_DURATION: &str = "0+00:00";

/// Execution state of one slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceState {
    Queued,
    Running,
    Completed,
    /// Never produced by [`classify`]: a task with wall time but no good time
    /// is reported as running. Kept so the summary shows all four states.
    Evicted,
}

impl SliceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SliceState::Queued => "queued",
            SliceState::Running => "running",
            SliceState::Completed => "completed",
            SliceState::Evicted => "evicted",
        }
    }
}

impl std::fmt::Display for SliceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify a task from its wall-clock and good time.
pub fn classify(wall: &str, good: &str) -> SliceState {
    if wall == ZERO_DURATION {
        SliceState::Queued
    } else if good != ZERO_DURATION {
        SliceState::Completed
    } else {
        SliceState::Running
    }
}

/// One per-task line of `condor_userlog` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub batch: u64,
    pub offset: u64,
    pub wall_time: String,
    pub good_time: String,
    pub cpu_usage: String,
    pub avg_alloc: String,
    pub avg_lost: String,
    pub goodput: String,
    pub utilization: String,
}

impl UsageRecord {
    pub fn state(&self) -> SliceState {
        classify(&self.wall_time, &self.good_time)
    }
}

/// Outcome of parsing one output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Record(UsageRecord),
    /// Looked like a task line but lacked the usage columns.
    Truncated { batch: u64, offset: u64 },
    /// Header, totals or anything else.
    Other,
}

/// Parser for `<batch>.<offset> <wall> <good> <cpu> <alloc> <lost> <goodput> <util>%`.
pub struct UsageLineParser {
    re: Regex,
}

impl UsageLineParser {
    pub fn new() -> Result<Self> {
        let re = Regex::new(r"^([0-9]+)\.([0-9]+) (.*)%$").context("Invalid usage line pattern")?;
        Ok(Self { re })
    }

    pub fn parse(&self, line: &str) -> ParsedLine {
        let Some(caps) = self.re.captures(line) else {
            return ParsedLine::Other;
        };
        let (Ok(batch), Ok(offset)) = (caps[1].parse::<u64>(), caps[2].parse::<u64>()) else {
            return ParsedLine::Other;
        };
        let fields: Vec<&str> = caps[3].split_whitespace().collect();
        if fields.len() < 7 {
            return ParsedLine::Truncated { batch, offset };
        }
        ParsedLine::Record(UsageRecord {
            batch,
            offset,
            wall_time: fields[0].to_string(),
            good_time: fields[1].to_string(),
            cpu_usage: fields[2].to_string(),
            avg_alloc: fields[3].to_string(),
            avg_lost: fields[4].to_string(),
            goodput: fields[5].to_string(),
            utilization: fields[6].to_string(),
        })
    }
}

/// Per-state slice counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub evicted: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.queued + self.running + self.completed + self.evicted
    }

    fn bump(&mut self, state: SliceState) {
        match state {
            SliceState::Queued => self.queued += 1,
            SliceState::Running => self.running += 1,
            SliceState::Completed => self.completed += 1,
            SliceState::Evicted => self.evicted += 1,
        }
    }
}

/// Classified state of one slice with the usage line it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceStatus {
    pub state: SliceState,
    pub usage: UsageRecord,
}

/// Per-slice states reconstructed from one `condor_userlog` report.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    /// Latest status of each absolute slice number.
    pub slices: BTreeMap<u64, SliceStatus>,
    /// Lines that could not be attributed to a slice.
    pub diagnostics: Vec<String>,
}

impl StatusReport {
    /// Classify every task line of `output` against `registry`.
    pub fn build(output: &str, registry: &BatchRegistry) -> Result<Self> {
        let parser = UsageLineParser::new()?;
        let mut report = StatusReport::default();

        for line in output.lines() {
            let line = line.trim_end();
            match parser.parse(line) {
                ParsedLine::Record(record) => {
                    let Some(batch) = registry.batch(record.batch) else {
                        report.diagnostics.push(unknown_batch(record.batch));
                        continue;
                    };
                    let Some(slice) = batch.slice_of(record.offset) else {
                        report.diagnostics.push(format!(
                            "job {}.{} in the condor log is outside the {} slices recorded for cluster {}, skipping this line",
                            record.batch, record.offset, batch.slice_count, record.batch
                        ));
                        continue;
                    };
                    let state = record.state();
                    report.slices.insert(
                        slice,
                        SliceStatus {
                            state,
                            usage: record,
                        },
                    );
                }
                ParsedLine::Truncated { batch, offset } => {
                    report.diagnostics.push(format!(
                        "condor log line for {}.{} has too few fields, skipping this line",
                        batch, offset
                    ));
                }
                ParsedLine::Other => {}
            }
        }

        Ok(report)
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for status in self.slices.values() {
            counts.bump(status.state);
        }
        counts
    }
}

fn unknown_batch(batch: u64) -> String {
    format!(
        "cluster {} in the condor log was not recorded in the batches.log file, skipping this line",
        batch
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> BatchRegistry {
        BatchRegistry::parse("9876 0 50\n9877 50 50\n").unwrap()
    }

    #[test]
    fn test_classify_precedence() {
        assert_eq!(classify("0+00:00", "0+00:00"), SliceState::Queued);
        // wall sentinel wins even with good time recorded
        assert_eq!(classify("0+00:00", "0+45:00"), SliceState::Queued);
        assert_eq!(classify("1+02:00", "0+45:00"), SliceState::Completed);
        assert_eq!(classify("0+00:13", "0+00:00"), SliceState::Running);
    }

    #[test]
    fn test_parse_usage_line() {
        let parser = UsageLineParser::new().unwrap();
        let parsed = parser.parse("9876.10 1+02:00 0+45:00 0+40:00 1 0 100.0% 40%");
        let ParsedLine::Record(record) = parsed else {
            panic!("expected a record");
        };
        assert_eq!(record.batch, 9876);
        assert_eq!(record.offset, 10);
        assert_eq!(record.wall_time, "1+02:00");
        assert_eq!(record.good_time, "0+45:00");
        assert_eq!(record.goodput, "100.0%");
        assert_eq!(record.utilization, "40");
        assert_eq!(record.state(), SliceState::Completed);
    }

    #[test]
    fn test_parse_other_lines() {
        let parser = UsageLineParser::new().unwrap();
        assert_eq!(
            parser.parse("Job            WallTime  GoodTime CpuUsage AvgAlloc AvgLost Goodput  Util."),
            ParsedLine::Other
        );
        assert_eq!(parser.parse("9876.1 1+00:00 0+00:00 0+00:00 1 0 0.0% 0"), ParsedLine::Other);
        assert_eq!(
            parser.parse("9876.1 0+00:00 0%"),
            ParsedLine::Truncated { batch: 9876, offset: 1 }
        );
    }

    #[test]
    fn test_queued_example() {
        let report =
            StatusReport::build("9876.3 0+00:00 0+00:00 0+00:00 0 0 0.0% 0%\n", &registry()).unwrap();
        assert_eq!(report.slices[&3].state, SliceState::Queued);
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn test_absolute_slice_numbers() {
        let output = "\
9877.0 1+02:00 0+45:00 0+40:00 1 0 100.0% 40%
9877.49 0+01:00 0+00:00 0+00:10 1 0 0.0% 10%
";
        let report = StatusReport::build(output, &registry()).unwrap();
        assert_eq!(report.slices[&50].state, SliceState::Completed);
        assert_eq!(report.slices[&99].state, SliceState::Running);
    }

    #[test]
    fn test_unknown_batch_skipped() {
        let output = "\
9876.1 0+00:00 0+00:00 0+00:00 0 0 0.0% 0%
1234.0 1+00:00 1+00:00 1+00:00 1 0 100.0% 99%
";
        let report = StatusReport::build(output, &registry()).unwrap();
        assert_eq!(report.counts().total(), 1);
        assert_eq!(report.diagnostics.len(), 1);
        assert!(report.diagnostics[0].contains("cluster 1234"));
        // logged as a warning, so the text carries no error prefix
        assert!(!report.diagnostics[0].starts_with("Error"));
    }

    #[test]
    fn test_summary_counts() {
        let output = "\
Job            WallTime  GoodTime CpuUsage AvgAlloc AvgLost Goodput  Util.

9876.0 1+02:00 0+45:00 0+40:00 1 0 100.0% 40%
9876.1 1+02:00 0+45:00 0+40:00 1 0 100.0% 40%
9876.2 0+00:10 0+00:00 0+00:05 1 0 0.0% 50%
9876.3 0+00:00 0+00:00 0+00:00 0 0 0.0% 0%

Totals         2+04:10   1+30:00 1+20:05  1  0  50.0%  45%
";
        let counts = StatusReport::build(output, &registry()).unwrap().counts();
        assert_eq!(
            counts,
            StateCounts {
                queued: 1,
                running: 1,
                completed: 2,
                evicted: 0,
            }
        );
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_later_line_wins_for_same_slice() {
        let output = "\
9876.5 0+00:00 0+00:00 0+00:00 0 0 0.0% 0%
9876.5 0+10:00 0+00:00 0+05:00 1 0 0.0% 50%
";
        let report = StatusReport::build(output, &registry()).unwrap();
        assert_eq!(report.slices.len(), 1);
        assert_eq!(report.slices[&5].state, SliceState::Running);
    }

    #[test]
    fn test_offset_outside_batch_skipped() {
        let registry = BatchRegistry::parse("100 0 10\n101 10 10\n").unwrap();
        let output = "\
100.12 1+02:00 0+45:00 0+40:00 1 0 100.0% 40%
101.2 0+00:00 0+00:00 0+00:00 0 0 0.0% 0%
";
        let report = StatusReport::build(output, &registry).unwrap();
        assert_eq!(report.slices.len(), 1);
        assert_eq!(report.slices[&12].state, SliceState::Queued);
        assert_eq!(report.slices[&12].usage.batch, 101);
        assert_eq!(report.diagnostics.len(), 1);
        assert!(report.diagnostics[0].contains("100.12"));
    }

    #[test]
    fn test_huge_offset_does_not_overflow() {
        let registry = BatchRegistry::parse("9876 5 50\n").unwrap();
        let output = "9876.18446744073709551615 1+00:00 0+00:00 0+00:00 1 0 0.0% 0%\n";
        let report = StatusReport::build(output, &registry).unwrap();
        assert!(report.slices.is_empty());
        assert_eq!(report.diagnostics.len(), 1);
    }
}
