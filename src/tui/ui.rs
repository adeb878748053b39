//! UI rendering for the navigator.

use longrec_toolbox::annotation;
use longrec_toolbox::catalog::ModalityId;
use longrec_toolbox::navigation::loader::ChunkBuffer;
use longrec_toolbox::navigation::{DisplayWindow, NavigationController, WindowSlice};
use longrec_toolbox::timestamp;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Sparkline, Wrap},
    Frame,
};

use super::app::{App, AppMode};
use super::ui_helpers::{
    format_elapsed, help_item, help_item_dual, sparkline_bars, state_indicator,
    truncate_with_ellipsis,
};

/// Render the entire UI based on application state.
pub fn render(frame: &mut Frame, app: &App) {
    match app.mode {
        AppMode::Opening => render_opening(frame, app),
        AppMode::Failed => render_failed(frame, app),
        AppMode::Navigating => render_navigator(frame, app),
    }
}

fn render_opening(frame: &mut Frame, app: &App) {
    let text = vec![
        Line::from(Span::styled(
            "Long Recording Navigator",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(format!("Opening {}", app.session_path.display())),
        Line::from(Span::styled(
            format!(
                "cataloging files... {:.1} s",
                app.opened_at.elapsed().as_secs_f64()
            ),
            Style::default().fg(Color::DarkGray),
        )),
    ];
    let body = Paragraph::new(text).alignment(Alignment::Center).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    frame.render_widget(body, frame.area());
}

fn render_failed(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(2)])
        .split(frame.area());

    let message = app.error.as_deref().unwrap_or("unknown error");
    let body = Paragraph::new(vec![
        Line::from(format!("Could not open {}", app.session_path.display())),
        Line::from(""),
        Line::from(Span::styled(message.to_string(), Style::default().fg(Color::Red))),
    ])
    .wrap(Wrap { trim: false })
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Error ")
            .border_style(Style::default().fg(Color::Red)),
    );
    frame.render_widget(body, chunks[0]);

    let help = Paragraph::new(Line::from(help_item_dual("q", "Esc", "Quit")));
    frame.render_widget(help, chunks[1]);
}

fn render_navigator(frame: &mut Frame, app: &App) {
    let Some(controller) = app.controller() else {
        return;
    };
    let window = controller.get_display_window();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(8), // Cursor and window
            Constraint::Length(3), // Position in the recording
            Constraint::Min(4),    // Modalities
            Constraint::Length(6), // Signal preview
            Constraint::Length(7), // Messages
            Constraint::Length(2), // Help text
        ])
        .split(frame.area());

    render_status(frame, chunks[0], app, controller);
    render_progress(frame, chunks[1], controller);
    render_modalities(frame, chunks[2], controller, window.as_ref());
    render_preview(frame, chunks[3], window.as_ref());
    render_messages(frame, chunks[4], app);
    render_help(frame, chunks[5]);
}

fn render_status(frame: &mut Frame, area: Rect, app: &App, controller: &NavigationController) {
    let cursor = controller.cursor();
    let plan = controller.plan();
    let (state, color) = state_indicator(controller.state());
    let (window_start, window_width) = controller.window_range();
    let label = |s: &'static str| Span::styled(s, Style::default().fg(Color::DarkGray));

    let mut lines = vec![
        Line::from(vec![
            label("Time     "),
            Span::styled(
                timestamp::format_datetime(controller.current_time()),
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            label("Chunk    "),
            Span::raw(format!("{} / {}", cursor.chunk_index + 1, plan.chunk_count())),
            label("   sample "),
            Span::raw(format!(
                "{} / {}",
                cursor.sample_index,
                controller.chunk_sample_count(cursor.chunk_index)
            )),
            label(" @ "),
            Span::raw(format!("{} Hz", controller.reference().frequency)),
        ]),
        Line::from(vec![
            label("State    "),
            Span::styled(state, Style::default().fg(color)),
        ]),
        Line::from(vec![
            label("Window   "),
            Span::raw(format!("{:.3} s + {:.3} s", window_start, window_width)),
        ]),
    ];
    if let Some(mark) = &app.mark {
        let (time, index) = annotation::stamps(mark);
        lines.push(Line::from(vec![
            label("Mark     "),
            Span::styled(format!("{} ({})", time, index), Style::default().fg(Color::Magenta)),
        ]));
    }

    let reference = controller
        .reference()
        .modality
        .as_ref()
        .map_or("-".to_string(), |m| m.to_string());
    let status = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" {} ", app.session_path.display()))
            .title_bottom(format!(" reference: {} ", reference))
            .border_style(Style::default().fg(color)),
    );
    frame.render_widget(status, area);
}

fn render_progress(frame: &mut Frame, area: Rect, controller: &NavigationController) {
    let span = &controller.plan().span;
    let total = span.duration_secs();
    let elapsed = timestamp::seconds_between(span.global_start, controller.cursor().absolute_time);
    let ratio = if total > 0.0 { (elapsed / total).clamp(0.0, 1.0) } else { 0.0 };

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Recording "))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(ratio)
        .label(format!("{} / {}", format_elapsed(elapsed), format_elapsed(total)));
    frame.render_widget(gauge, area);
}

fn render_modalities(
    frame: &mut Frame,
    area: Rect,
    controller: &NavigationController,
    window: Option<&DisplayWindow>,
) {
    let chunk_index = controller.cursor().chunk_index;
    let items: Vec<ListItem> = controller
        .plan()
        .chunk_entries(chunk_index)
        .map(|entry| {
            let rate = match entry.frequency {
                Some(f) => format!("{:>8} Hz", f),
                None => format!("{:>11}", "irregular"),
            };
            let detail = match window.and_then(|w| w.modalities.get(&entry.modality)) {
                None if window.is_none() => {
                    Span::styled("loading...", Style::default().fg(Color::Cyan))
                }
                None => Span::styled("not loaded", Style::default().fg(Color::DarkGray)),
                Some(slice) => slice_detail(controller, &entry.modality, slice),
            };
            let coverage = if entry.is_all_gap() {
                Span::styled(" no data ", Style::default().fg(Color::Red))
            } else if entry.gap_duration() > 0.0 {
                Span::styled(" gaps    ", Style::default().fg(Color::Yellow))
            } else {
                Span::styled(" complete", Style::default().fg(Color::Green))
            };
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{:<12}", truncate_with_ellipsis(entry.modality.as_str(), 12)),
                    Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
                ),
                Span::styled(rate, Style::default().fg(Color::Gray)),
                coverage,
                Span::raw("  "),
                detail,
            ]))
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Modalities ")
            .border_style(Style::default().fg(Color::White)),
    );
    frame.render_widget(list, area);
}

/// One-line summary of a modality at the cursor.
fn slice_detail(
    controller: &NavigationController,
    modality: &ModalityId,
    slice: &WindowSlice,
) -> Span<'static> {
    match slice {
        WindowSlice::Signal { values, .. } => {
            let at_cursor = controller
                .current_frame_index(modality)
                .and_then(|(_, index)| match controller.chunk_buffer(modality) {
                    Some(ChunkBuffer::Signal { values, .. }) => {
                        values.get((index as usize, 0)).copied()
                    }
                    _ => None,
                });
            let value = match at_cursor {
                Some(v) if v.is_finite() => format!("{:.4}", v),
                _ => "gap".to_string(),
            };
            Span::raw(format!(
                "{} samples x {} ch, ch0 = {}",
                values.nrows(),
                values.ncols(),
                value
            ))
        }
        WindowSlice::Frames { frames, .. } => match controller.current_frame(modality) {
            Some(frame) => {
                let name = frame
                    .path
                    .file_name()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                Span::raw(format!(
                    "{} frames, showing {} #{}",
                    frames.len(),
                    truncate_with_ellipsis(&name, 32),
                    frame.frame_index
                ))
            }
            None => Span::styled(
                format!("{} frames, no frame at cursor", frames.len()),
                Style::default().fg(Color::DarkGray),
            ),
        },
        WindowSlice::Timed { times, .. } => {
            Span::raw(format!("{} irregular samples in window", times.len()))
        }
    }
}

/// Sparkline of the first channel of the first signal in the window.
fn render_preview(frame: &mut Frame, area: Rect, window: Option<&DisplayWindow>) {
    let signal = window.and_then(|w| {
        w.modalities.iter().find_map(|(id, slice)| match slice {
            WindowSlice::Signal { values, .. } if values.ncols() > 0 => {
                Some((id.clone(), values.column(0).to_vec()))
            }
            _ => None,
        })
    });

    let block = Block::default().borders(Borders::ALL);
    match signal {
        Some((id, values)) => {
            let width = area.width.saturating_sub(2) as usize;
            let bars = sparkline_bars(&values, width);
            let sparkline = Sparkline::default()
                .block(block.title(format!(" {} ch0 ", id)))
                .data(&bars)
                .max(100)
                .style(Style::default().fg(Color::Green));
            frame.render_widget(sparkline, area);
        }
        None => {
            let empty = Paragraph::new(Span::styled(
                "no signal in window",
                Style::default().fg(Color::DarkGray),
            ))
            .block(block.title(" Preview "));
            frame.render_widget(empty, area);
        }
    }
}

fn render_messages(frame: &mut Frame, area: Rect, app: &App) {
    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = app
        .messages
        .iter()
        .skip(app.messages.len().saturating_sub(visible))
        .map(|m| Line::from(m.as_str()))
        .collect();
    let messages = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Messages ")
            .border_style(Style::default().fg(Color::DarkGray)),
    );
    frame.render_widget(messages, area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let mut spans = vec![Span::raw(" ")];
    spans.extend(help_item_dual("←", "→", "Sample"));
    spans.extend(help_item_dual("↓", "↑", "1 s"));
    spans.extend(help_item_dual("PgUp", "PgDn", "Chunk"));
    spans.extend(help_item_dual("+", "-", "Zoom"));
    spans.extend(help_item("a", "All"));
    spans.extend(help_item_dual("[", "]", "Window"));
    spans.extend(help_item("Space", "Play"));
    spans.extend(help_item("m", "Mark"));
    spans.extend(help_item("s", "Stamp"));
    spans.extend(help_item("q", "Quit"));
    let help = Paragraph::new(Line::from(spans)).wrap(Wrap { trim: true });
    frame.render_widget(help, area);
}
