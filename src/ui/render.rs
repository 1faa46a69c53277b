//! Rendering logic using Ratatui.

use super::app::{main_layout, App};
use crate::classifier::SliceState;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table},
    Frame,
};

/// Render the entire UI.
pub fn render(frame: &mut Frame, app: &App) {
    let chunks = main_layout(frame.area());

    render_header(frame, app, chunks[0]);
    render_summary(frame, app, chunks[1]);
    render_slice_table(frame, app, chunks[2]);
    render_diagnostics(frame, app, chunks[3]);
}

fn state_color(state: SliceState) -> Color {
    match state {
        SliceState::Queued => Color::Yellow,
        SliceState::Running => Color::Green,
        SliceState::Completed => Color::Blue,
        SliceState::Evicted => Color::Red,
    }
}

/// Render the header panel.
fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let title = format!(
        "Grid Job Status - {} | {} slice{} reported",
        app.job_name,
        app.counts.total(),
        if app.counts.total() == 1 { "" } else { "s" }
    );

    let help_text = "q: quit | r: refresh | Scroll with arrow keys, PgUp/PgDn, Home/End";

    let header_text = vec![
        Line::from(Span::styled(
            title,
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(help_text, Style::default().fg(Color::DarkGray))),
    ];

    let header = Paragraph::new(header_text).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Blue)),
    );

    frame.render_widget(header, area);
}

/// Render per-state counts and a completion gauge.
fn render_summary(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title("Summary")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Length(1)])
        .split(inner);

    let count_line = |state: SliceState, n: usize| {
        Line::from(vec![
            Span::styled(
                format!("  slices {:<10}", format!("{}:", state)),
                Style::default().fg(state_color(state)),
            ),
            Span::raw(n.to_string()),
        ])
    };
    let counts = Paragraph::new(vec![
        count_line(SliceState::Queued, app.counts.queued),
        count_line(SliceState::Completed, app.counts.completed),
        count_line(SliceState::Running, app.counts.running),
        count_line(SliceState::Evicted, app.counts.evicted),
    ]);
    frame.render_widget(counts, rows[0]);

    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(Color::Blue))
        .ratio(app.completed_ratio().clamp(0.0, 1.0))
        .label(format!(
            "{}/{} completed",
            app.counts.completed,
            app.counts.total()
        ));
    frame.render_widget(gauge, rows[1]);
}

/// Render the per-slice table.
fn render_slice_table(frame: &mut Frame, app: &App, area: Rect) {
    let panel_title = format!(
        "Slices (refresh #{}{})",
        app.refreshes,
        if app.scroll > 0 { ", scrolled" } else { "" }
    );

    if app.slices.is_empty() {
        let text = if app.refreshes == 0 {
            "[Waiting for condor_userlog...]"
        } else {
            "[No slices reported in the condor log yet]"
        };
        let empty = Paragraph::new(text).block(
            Block::default()
                .title(panel_title)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Green)),
        );
        frame.render_widget(empty, area);
        return;
    }

    let header_cells = [
        "Slice", "Job", "State", "Wall", "Good", "CPU", "Alloc", "Lost", "Goodput", "Util",
    ]
    .iter()
    .map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Magenta)
                .add_modifier(Modifier::BOLD),
        )
    });
    let header = Row::new(header_cells).height(1);

    let rows: Vec<Row> = app
        .visible_slices()
        .iter()
        .map(|(slice, status)| {
            let usage = &status.usage;
            Row::new(vec![
                Cell::from(slice.to_string()).style(Style::default().fg(Color::Cyan)),
                Cell::from(format!("{}.{}", usage.batch, usage.offset)),
                Cell::from(status.state.as_str())
                    .style(Style::default().fg(state_color(status.state))),
                Cell::from(usage.wall_time.clone()),
                Cell::from(usage.good_time.clone()),
                Cell::from(usage.cpu_usage.clone()),
                Cell::from(usage.avg_alloc.clone()),
                Cell::from(usage.avg_lost.clone()),
                Cell::from(usage.goodput.clone()),
                Cell::from(format!("{}%", usage.utilization)),
            ])
            .height(1)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(8),
            Constraint::Length(14),
            Constraint::Length(10),
            Constraint::Length(11),
            Constraint::Length(11),
            Constraint::Length(11),
            Constraint::Length(6),
            Constraint::Length(5),
            Constraint::Length(8),
            Constraint::Min(5),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .title(panel_title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)),
    );

    frame.render_widget(table, area);
}

/// Render refresh errors and skipped log lines.
fn render_diagnostics(frame: &mut Frame, app: &App, area: Rect) {
    let inner_height = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = match &app.last_error {
        Some(err) => vec![Line::from(Span::styled(
            err.clone(),
            Style::default().fg(Color::Red),
        ))],
        None => app
            .diagnostics
            .iter()
            .rev()
            .take(inner_height)
            .map(|d| Line::from(Span::styled(d.clone(), Style::default().fg(Color::LightRed))))
            .collect(),
    };

    let border_color = if lines.is_empty() {
        Color::DarkGray
    } else {
        Color::LightRed
    };
    let diagnostics = Paragraph::new(lines).block(
        Block::default()
            .title(format!("Diagnostics ({})", app.diagnostics.len()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border_color)),
    );

    frame.render_widget(diagnostics, area);
}
