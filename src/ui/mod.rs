use crate::app_state::{App, FocusArea, InputMode, ViewMode};
use crate::tasks::TaskState;
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};

pub fn draw(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(ratatui::layout::Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Min(8),
        ])
        .split(f.size());

    render_top_bar(f, chunks[0], app);

    let middle_chunks = Layout::default()
        .direction(ratatui::layout::Direction::Horizontal)
        .constraints([Constraint::Length(20), Constraint::Min(0)])
        .split(chunks[1]);

    render_left_menu(f, middle_chunks[0], app);
    render_main_view(f, middle_chunks[1], app);
    render_bottom_bar(f, chunks[2], app);
}

fn focus_style(app: &App, area: FocusArea) -> Style {
    if app.focus_area == area {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::White)
    }
}

fn render_top_bar(f: &mut Frame, area: Rect, app: &App) {
    let stats = &app.task_stats;
    let title_text = Line::from(vec![
        Span::styled(
            " Survey Curator ",
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            " tasks: {} pending, {} running, {} failed",
            stats.pending, stats.running, stats.error
        )),
    ]);

    let paragraph = Paragraph::new(title_text)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .style(Style::default().fg(Color::Cyan)),
        )
        .alignment(ratatui::layout::Alignment::Center);
    f.render_widget(paragraph, area);
}

fn render_left_menu(f: &mut Frame, area: Rect, app: &App) {
    let menu_items: Vec<ListItem> = ViewMode::MENU
        .iter()
        .enumerate()
        .map(|(i, view)| {
            let is_selected = i == app.menu_selected_index;
            let is_active = *view == app.view_mode;

            let style = if is_selected && app.focus_area == FocusArea::Menu {
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Magenta)
                    .add_modifier(Modifier::BOLD)
            } else if is_selected {
                Style::default()
                    .fg(Color::Magenta)
                    .add_modifier(Modifier::BOLD)
            } else if is_active {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default().fg(Color::White)
            };

            let prefix = if is_active { "● " } else { "○ " };
            ListItem::new(format!("{}{}", prefix, view.title())).style(style)
        })
        .collect();

    let title = if app.focus_area == FocusArea::Menu {
        "Menu (Enter)"
    } else {
        "Menu (←)"
    };
    let menu = List::new(menu_items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .style(focus_style(app, FocusArea::Menu)),
    );
    f.render_widget(menu, area);
}

fn opt(v: Option<f64>, precision: usize) -> String {
    v.map(|x| format!("{:.*}", precision, x))
        .unwrap_or_else(|| "-".to_string())
}

fn task_color(state: &str) -> (&'static str, Color) {
    match state.parse::<TaskState>() {
        Ok(TaskState::Completed) => ("✓", Color::Green),
        Ok(TaskState::Error) => ("✗", Color::Red),
        Ok(TaskState::Running) => ("▶", Color::Cyan),
        Ok(TaskState::Pending) => ("○", Color::Yellow),
        Err(_) => ("?", Color::Gray),
    }
}

fn render_main_view(f: &mut Frame, area: Rect, app: &mut App) {
    let run_label = app
        .current_run
        .map(|id| format!(" of run {}", id))
        .unwrap_or_default();

    let (title, items): (String, Vec<ListItem>) = match app.view_mode {
        ViewMode::Runs => {
            let items = app
                .runs
                .iter()
                .map(|r| {
                    let flag_color = if r.unresolved > 0 || r.conflicts > 0 {
                        Color::Yellow
                    } else {
                        Color::Green
                    };
                    ListItem::new(Line::from(vec![
                        Span::styled(format!("{:>5} ", r.id), Style::default().fg(Color::Cyan)),
                        Span::raw(format!("{:<24}", r.name)),
                        Span::raw(format!(
                            " det {:>5}  acc {:>5}  ",
                            r.detections, r.accepted
                        )),
                        Span::styled(
                            format!("unres {:>4}  confl {:>4}", r.unresolved, r.conflicts),
                            Style::default().fg(flag_color),
                        ),
                    ]))
                })
                .collect();
            (
                "Runs (Enter/u unresolved, x conflicts, i inspect, r reload)".to_string(),
                items,
            )
        }
        ViewMode::Jobs => {
            let items = app
                .jobs
                .iter()
                .map(|t| {
                    let (symbol, color) = task_color(&t.state);
                    let detail = t
                        .error
                        .as_deref()
                        .or(t.retval.as_deref())
                        .unwrap_or("");
                    ListItem::new(Line::from(vec![
                        Span::styled(format!("{} ", symbol), Style::default().fg(color)),
                        Span::styled(format!("{:<10}", t.state), Style::default().fg(color)),
                        Span::raw(format!("#{:<5} {:<22} {:<14} {} ", t.id, t.func, t.args, t.user)),
                        Span::styled(detail.to_string(), Style::default().fg(Color::Gray)),
                    ]))
                })
                .collect();
            (format!("Jobs ({} total)", app.task_stats.total), items)
        }
        ViewMode::Conflicts => {
            let items = app
                .conflicts
                .iter()
                .map(|c| {
                    ListItem::new(Line::from(vec![
                        Span::styled(format!("{:>5} ", c.id), Style::default().fg(Color::Cyan)),
                        Span::raw(format!("detection {:<6} ", c.detection_id)),
                        Span::styled(
                            match c.conflict_ids() {
                                Ok(ids) => format!("vs source-detections {:?}", ids),
                                Err(_) => "⚠ unreadable source-detection list".to_string(),
                            },
                            Style::default().fg(Color::Yellow),
                        ),
                    ]))
                })
                .collect();
            (
                format!("External conflicts{} (`conflict <id> <action>`)", run_label),
                items,
            )
        }
        ViewMode::Unresolved => {
            let items = app
                .unresolved
                .iter()
                .map(|d| {
                    ListItem::new(Line::from(vec![
                        Span::styled(format!("{:>6} ", d.id), Style::default().fg(Color::Cyan)),
                        Span::raw(format!("{:<32}", d.name)),
                        Span::raw(format!(
                            " ra {:>10} dec {:>10} freq {:>14} flux {:>10}",
                            opt(d.ra, 5),
                            opt(d.dec, 5),
                            opt(d.freq, 0),
                            opt(d.f_sum, 3)
                        )),
                    ]))
                })
                .collect();
            (
                format!("Unresolved detections{} (check/resolve <ids..>)", run_label),
                items,
            )
        }
        ViewMode::Inspect => {
            let items = app
                .inspection
                .iter()
                .map(|d| {
                    ListItem::new(Line::from(vec![
                        Span::styled(format!("{:>6} ", d.id), Style::default().fg(Color::Cyan)),
                        Span::raw(format!("{:<32}", d.name)),
                        Span::styled(
                            format!(
                                " n_pix {:>6} rel {:>5}",
                                d.n_pix.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
                                opt(d.rel, 2)
                            ),
                            Style::default().fg(Color::Yellow),
                        ),
                        Span::raw(format!(
                            " f_sum {:>10} w20 {:>8} w50 {:>8}",
                            opt(d.f_sum, 2),
                            opt(d.w20, 2),
                            opt(d.w50, 2)
                        )),
                    ]))
                })
                .collect();
            (
                format!(
                    "To inspect{} ({} left; accept/reject <ids..>)",
                    run_label,
                    app.inspection.len()
                ),
                items,
            )
        }
    };

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .style(focus_style(app, FocusArea::MainView)),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(">> ");
    app.list_state.select(Some(app.selected_index));
    f.render_stateful_widget(list, area, &mut app.list_state);
}

fn render_bottom_bar(f: &mut Frame, area: Rect, app: &App) {
    let bottom_chunks = Layout::default()
        .direction(ratatui::layout::Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    let command_prompt = if app.input_mode == InputMode::Command {
        let mut spans = vec![Span::styled(
            "> ",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )];
        let cur = app.command_cursor.min(app.command_input.len());
        let (left, right) = app.command_input.split_at(cur);
        spans.push(Span::raw(left));
        spans.push(Span::styled("_", Style::default().fg(Color::Yellow)));
        spans.push(Span::raw(right));
        if let Some(hint) = app.get_completion_hint() {
            spans.push(Span::styled(hint, Style::default().fg(Color::DarkGray)));
        }
        Line::from(spans)
    } else {
        Line::from(vec![
            Span::styled("/ ", Style::default().fg(Color::Yellow)),
            Span::raw("command  ←→ focus  ↑↓ move  Enter open  r reload  q quit"),
        ])
    };
    let command_paragraph = Paragraph::new(command_prompt).block(
        Block::default()
            .borders(Borders::ALL)
            .title(if app.input_mode == InputMode::Command {
                "Command (Enter run, Esc cancel, Tab complete, ↑↓ history)"
            } else {
                "Command"
            })
            .style(if app.input_mode == InputMode::Command {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::White)
            }),
    );
    f.render_widget(command_paragraph, bottom_chunks[0]);

    let log_items: Vec<ListItem> = app
        .log_messages
        .iter()
        .rev()
        .take(20)
        .map(|msg| {
            let style = if msg.starts_with('✓') {
                Style::default().fg(Color::Green)
            } else if msg.starts_with('✗') {
                Style::default().fg(Color::Red)
            } else if msg.starts_with('⚠') {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default().fg(Color::White)
            };
            ListItem::new(msg.as_str()).style(style)
        })
        .collect();

    let log = List::new(log_items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Log ({})", app.log_messages.len()))
            .style(Style::default().fg(Color::White)),
    );
    f.render_widget(log, bottom_chunks[1]);
}
