//! Dashboard state for `status --watch`.

use crate::classifier::{SliceStatus, StateCounts, StatusReport};
use ratatui::layout::{Constraint, Direction, Layout, Rect};

/// Main application state
pub struct App {
    /// Job being watched
    pub job_name: String,
    /// Latest per-state counts
    pub counts: StateCounts,
    /// Latest status of every known slice, ordered by slice number
    pub slices: Vec<(u64, SliceStatus)>,
    /// Diagnostics from the latest report
    pub diagnostics: Vec<String>,
    /// Error from the latest refresh attempt, if it failed
    pub last_error: Option<String>,
    /// Number of successful refreshes
    pub refreshes: usize,
    /// First visible row of the slice table
    pub scroll: usize,
    /// Inner height of the slice table (set from render layout)
    pub table_height: usize,
    /// Whether the app should quit
    pub should_quit: bool,
}

impl App {
    /// Create a new App instance.
    pub fn new(job_name: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            counts: StateCounts::default(),
            slices: Vec::new(),
            diagnostics: Vec::new(),
            last_error: None,
            refreshes: 0,
            scroll: 0,
            table_height: 20, // Default, will be updated from actual render layout
            should_quit: false,
        }
    }

    /// Replace the displayed state with a fresh report.
    pub fn apply_report(&mut self, report: &StatusReport) {
        self.counts = report.counts();
        self.slices = report.slices.iter().map(|(k, v)| (*k, v.clone())).collect();
        self.diagnostics = report.diagnostics.clone();
        self.last_error = None;
        self.refreshes += 1;
        self.scroll = self.scroll.min(self.max_scroll());
    }

    /// Keep the previous report on screen and show why the refresh failed.
    pub fn set_error(&mut self, err: String) {
        self.last_error = Some(err);
    }

    /// Fraction of known slices that completed.
    pub fn completed_ratio(&self) -> f64 {
        let total = self.counts.total();
        if total == 0 {
            0.0
        } else {
            self.counts.completed as f64 / total as f64
        }
    }

    fn max_scroll(&self) -> usize {
        self.slices.len().saturating_sub(self.table_height)
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll = self.scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll = (self.scroll + lines).min(self.max_scroll());
    }

    pub fn scroll_to_top(&mut self) {
        self.scroll = 0;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = self.max_scroll();
    }

    /// Rows of the slice table currently in view.
    pub fn visible_slices(&self) -> &[(u64, SliceStatus)] {
        let start = self.scroll.min(self.slices.len());
        let end = (start + self.table_height).min(self.slices.len());
        &self.slices[start..end]
    }

    /// Update the table height using the same layout as render.rs.
    pub fn update_panel_heights(&mut self, frame_area: Rect) {
        let chunks = main_layout(frame_area);
        // table border (2) + header row (1)
        self.table_height = chunks[2].height.saturating_sub(3).max(1) as usize;
        self.scroll = self.scroll.min(self.max_scroll());
    }
}

/// Header, summary, slice table and diagnostics areas.
pub(crate) fn main_layout(area: Rect) -> std::rc::Rc<[Rect]> {
    Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(7), // Summary
            Constraint::Min(5),    // Slice table
            Constraint::Length(5), // Diagnostics
        ])
        .split(area)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BatchRegistry;

    fn report() -> StatusReport {
        let registry = BatchRegistry::parse("100 0 50\n").unwrap();
        let mut output = String::new();
        for i in 0..30 {
            output.push_str(&format!("100.{} 1+00:00 0+30:00 0+20:00 1 0 100.0% 50%\n", i));
        }
        output.push_str("100.30 0+00:00 0+00:00 0+00:00 0 0 0.0% 0%\n");
        output.push_str("777.0 0+00:00 0+00:00 0+00:00 0 0 0.0% 0%\n");
        StatusReport::build(&output, &registry).unwrap()
    }

    #[test]
    fn test_apply_report() {
        let mut app = App::new("bggen");
        app.set_error("condor_userlog failed".to_string());
        app.apply_report(&report());
        assert_eq!(app.counts.completed, 30);
        assert_eq!(app.counts.queued, 1);
        assert_eq!(app.slices.len(), 31);
        assert_eq!(app.diagnostics.len(), 1);
        assert!(app.last_error.is_none());
        assert_eq!(app.refreshes, 1);
        assert!((app.completed_ratio() - 30.0 / 31.0).abs() < 1e-9);
    }

    #[test]
    fn test_scrolling_is_bounded() {
        let mut app = App::new("bggen");
        app.table_height = 10;
        app.apply_report(&report());

        app.scroll_down(100);
        assert_eq!(app.scroll, 21);
        assert_eq!(app.visible_slices().len(), 10);
        assert_eq!(app.visible_slices()[9].0, 30);

        app.scroll_up(5);
        assert_eq!(app.scroll, 16);
        app.scroll_to_top();
        assert_eq!(app.visible_slices()[0].0, 0);
        app.scroll_to_bottom();
        assert_eq!(app.scroll, 21);
    }

    #[test]
    fn test_empty_ratio() {
        let app = App::new("bggen");
        assert_eq!(app.completed_ratio(), 0.0);
        assert!(app.visible_slices().is_empty());
    }

    #[test]
    fn test_update_panel_heights() {
        let mut app = App::new("bggen");
        app.update_panel_heights(Rect::new(0, 0, 80, 40));
        // 40 - 3 - 7 - 5 = 25 rows for the table block
        assert_eq!(app.table_height, 22);
    }
}
