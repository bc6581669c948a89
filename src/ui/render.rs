//! TUI rendering with ratatui.

use crate::ui::app::{App, TreeItem};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};

/// Main render function.
pub fn render(frame: &mut Frame, app: &App) {
    // Main layout: content area + error line + footer
    let outer_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),
            Constraint::Length(if app.last_error.is_some() { 1 } else { 0 }),
            Constraint::Length(1),
        ])
        .split(frame.area());

    // Content area: tree on left, details on right
    let main_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(outer_chunks[0]);

    render_tree(frame, app, main_chunks[0]);
    render_details(frame, app, main_chunks[1]);

    if let Some(error) = &app.last_error {
        let line = Paragraph::new(Line::from(vec![
            Span::styled(
                "Refresh failed: ",
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            ),
            Span::styled(error.as_str(), Style::default().fg(Color::Red)),
        ]));
        frame.render_widget(line, outer_chunks[1]);
    }

    render_footer(frame, app, outer_chunks[2]);

    if app.show_help {
        render_help(frame);
    }
}

/// Render tree view.
fn render_tree(frame: &mut Frame, app: &App, area: Rect) {
    let items = app.visible_items();

    let list_items: Vec<ListItem> = items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let indent = "  ".repeat(item.depth());
            let is_selected = i == app.selected;
            let selected_style = |style: Style| {
                if is_selected {
                    style.bg(Color::DarkGray).add_modifier(Modifier::BOLD)
                } else {
                    style
                }
            };

            let mut spans = vec![Span::raw(indent)];

            match item {
                TreeItem::Root {
                    index,
                    node,
                    label,
                    port_count,
                    has_children,
                } => {
                    let prefix = if !has_children {
                        "■ "
                    } else if app.is_expanded(&node.0) {
                        "▼ "
                    } else {
                        "▶ "
                    };
                    spans.push(Span::raw(prefix));
                    spans.push(Span::styled(
                        format!("{} {}", node, label),
                        selected_style(Style::default().fg(Color::Cyan)),
                    ));
                    spans.push(Span::styled(
                        format!(" [hub {}, {} ports]", index, port_count),
                        Style::default().fg(Color::DarkGray),
                    ));
                }
                TreeItem::Device {
                    node,
                    label,
                    is_hub,
                    port_number,
                    speed_name,
                    has_children,
                    is_new,
                    discovery_number,
                    ..
                } => {
                    let prefix = match (*is_hub, *has_children, app.is_expanded(&node.0)) {
                        (true, true, true) => "├─▼ ",
                        (true, true, false) => "├─▶ ",
                        (true, false, _) => "├─○ ",
                        _ => "└── ",
                    };
                    let icon = if *is_hub { "Hub" } else { "Dev" };
                    let color = if *is_hub { Color::Yellow } else { Color::White };

                    spans.push(Span::raw(prefix));
                    spans.push(Span::styled(
                        format!("{}: {} {}", port_number, icon, label),
                        selected_style(Style::default().fg(color)),
                    ));
                    spans.push(Span::styled(
                        format!(" ({})", speed_name),
                        Style::default().fg(Color::DarkGray),
                    ));

                    if *is_new {
                        spans.push(Span::styled(
                            " ●NEW",
                            Style::default()
                                .fg(Color::LightGreen)
                                .add_modifier(Modifier::BOLD),
                        ));
                        if let Some(n) = discovery_number {
                            spans.push(Span::styled(
                                format!(" [{}]", n),
                                Style::default().fg(Color::LightGreen),
                            ));
                        }
                    }
                }
            }

            ListItem::new(Line::from(spans))
        })
        .collect();

    let mut parts = vec![format!(" USB Topology ({})", app.device_count_str())];
    let new_count = app.new_device_count();
    if new_count > 0 {
        parts.push(format!("{} new", new_count));
    }
    let skipped = app.snapshot.skipped().len();
    if skipped > 0 {
        parts.push(format!("{} skipped", skipped));
    }
    let mode = if app.refresh_pending {
        "refreshing"
    } else if app.auto_refresh {
        "auto"
    } else {
        "manual"
    };
    parts.push(format!("[{}] ", mode));

    let list = List::new(list_items).block(
        Block::default()
            .title(parts.join(" | "))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    // ListState keeps the selection scrolled into view.
    let mut state = ListState::default().with_selected(Some(app.selected));
    frame.render_stateful_widget(list, area, &mut state);
}

fn field<'a>(name: &'a str, value: impl Into<Span<'a>>) -> Line<'a> {
    Line::from(vec![
        Span::styled(name, Style::default().fg(Color::DarkGray)),
        value.into(),
    ])
}

fn heading(text: &str) -> Line<'_> {
    Line::from(Span::styled(
        text,
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))
}

/// Render details panel.
fn render_details(frame: &mut Frame, app: &App, area: Rect) {
    let mut lines = Vec::new();

    if let Some(record) = app.selected_record() {
        let (vid, pid) = record.display_ids();
        lines.push(heading("Device Details"));
        lines.push(Line::from(""));
        lines.push(field("Name: ", app.config.display_name(record)));
        if !record.description.is_empty() {
            lines.push(field("Description: ", record.description.as_str()));
        }
        lines.push(field("Node: ", record.node.0.as_str()));
        if let Some(parent) = record.node.parent() {
            lines.push(field(
                "Upstream: ",
                format!("{} (tier {})", parent, record.node.depth() + 1),
            ));
        }
        lines.push(field("Path: ", record.device_path.as_str()));
        lines.push(field("VID: ", format!("{}, PID: {}", vid, pid)));
        lines.push(field("Speed: ", record.speed.to_string()));
        lines.push(field(
            "Type: ",
            if record.is_hub {
                "Hub (cascaded)"
            } else {
                "Device"
            },
        ));
        lines.push(field(
            "Position: ",
            format!("hub {}, port {}", record.hub_index, record.port_number),
        ));
        if let Some(index) = record.downstream_index {
            lines.push(field(
                "Hub Index: ",
                format!("{} ({} attached)", index, app.snapshot.children(index).len()),
            ));
        }
        if let Some((root, ports)) = app.snapshot.path_to_root(record) {
            let chain = ports
                .iter()
                .map(u8::to_string)
                .collect::<Vec<_>>()
                .join(".");
            lines.push(field("Route: ", format!("{} port {}", root.node, chain)));
        }
    } else if let Some(root) = app.selected_root() {
        lines.push(heading("Root Hub Details"));
        lines.push(Line::from(""));
        lines.push(field("Description: ", root.description.as_str()));
        if let Some(label) = app.config.hub_label(root) {
            lines.push(field("Label: ", label));
        }
        lines.push(field("Node: ", root.node.0.as_str()));
        lines.push(field("Path: ", root.device_path.as_str()));
        lines.push(field("Hub Index: ", root.index.to_string()));
        lines.push(field("Ports: ", root.port_count.to_string()));
        lines.push(field(
            "Attached: ",
            app.snapshot.children(root.index).len().to_string(),
        ));
    } else {
        lines.push(Line::from(Span::styled(
            "No USB root hubs found",
            Style::default().fg(Color::DarkGray),
        )));
    }

    let skipped = app.snapshot.skipped();
    if !skipped.is_empty() {
        lines.push(Line::from(""));
        lines.push(heading("Skipped Devices"));
        for error in skipped {
            lines.push(Line::from(Span::styled(
                error.to_string(),
                Style::default().fg(Color::Yellow),
            )));
        }
    }

    let paragraph = Paragraph::new(lines)
        .block(Block::default().title(" Details ").borders(Borders::ALL))
        .wrap(Wrap { trim: true });

    frame.render_widget(paragraph, area);
}

/// Render help overlay.
fn render_help(frame: &mut Frame) {
    let area = centered_rect(50, 60, frame.area());

    frame.render_widget(Clear, area);

    let section = |title: &'static str| {
        Line::from(Span::styled(
            title,
            Style::default().add_modifier(Modifier::BOLD),
        ))
    };

    let help_text = vec![
        heading("usbtopo Help"),
        Line::from(""),
        section("Navigation"),
        Line::from("  j/↓     Move down"),
        Line::from("  k/↑     Move up"),
        Line::from("  Enter   Expand/collapse"),
        Line::from("  g       Go to top"),
        Line::from("  G       Go to bottom"),
        Line::from("  x       Expand/collapse all"),
        Line::from(""),
        section("Devices"),
        Line::from("  m       Mark device as seen (clear NEW)"),
        Line::from(""),
        section("Actions"),
        Line::from("  r       Refresh topology"),
        Line::from("  a       Toggle auto-refresh"),
        Line::from("  ?       Toggle help"),
        Line::from("  q       Quit"),
    ];

    let paragraph = Paragraph::new(help_text)
        .block(
            Block::default()
                .title(" Help ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .style(Style::default().bg(Color::Black));

    frame.render_widget(paragraph, area);
}

/// Create a centered rect.
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

/// Render contextual footer with keybindings.
fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
    let mut spans = Vec::new();
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));

    if let Some(status) = app.status() {
        spans.push(Span::styled(
            status,
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        ));
    } else {
        spans.push(key("j/k"));
        spans.push(Span::raw(" Nav  "));
        spans.push(key("Enter"));
        spans.push(Span::raw(" Expand  "));
        spans.push(key("x"));
        spans.push(Span::raw(" All  "));
        spans.push(key("r"));
        spans.push(Span::raw(" Refresh  "));
        spans.push(key("a"));
        spans.push(Span::raw(if app.auto_refresh {
            " Auto off  "
        } else {
            " Auto on  "
        }));

        // Show mark-seen only for new devices
        let items = app.visible_items();
        if let Some(TreeItem::Device { is_new: true, .. }) = items.get(app.selected) {
            spans.push(key("m"));
            spans.push(Span::raw(" Mark seen  "));
        }

        spans.push(key("?"));
        spans.push(Span::raw(" Help  "));
        spans.push(key("q"));
        spans.push(Span::raw(" Quit"));
    }

    let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::DarkGray));

    frame.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::Snapshot;
    use crate::model::snapshot::tests::{hub, record, root};
    use ratatui::{Terminal, backend::TestBackend};

    fn screen(app: &App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 20)).unwrap();
        terminal.draw(|f| render(f, app)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        buffer
            .content()
            .chunks(buffer.area.width as usize)
            .map(|row| row.iter().map(|c| c.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_renders_tree_and_details() {
        let snapshot = Snapshot::from_parts(
            vec![root(0, 1)],
            vec![hub(0, 1, "1-1", 1), record(1, 2, "1-1.2", 0x046d, 0xc52b)],
            Vec::new(),
        );
        let mut app = App::new(snapshot, Config::default());
        let text = screen(&app);
        assert!(text.contains("USB Topology (2 devices on 2 hubs)"));
        assert!(text.contains("usb1 Root hub 1"));
        assert!(text.contains("Root Hub Details"));

        app.goto_bottom();
        let text = screen(&app);
        assert!(text.contains("2: Dev Device 1-1.2"));
        assert!(text.contains("VID: 0x046D, PID: 0xC52B"));
        assert!(text.contains("Upstream: 1-1 (tier 2)"));
    }

    #[test]
    fn test_renders_error_line() {
        let mut app = App::new(Snapshot::empty(), Config::default());
        app.refresh_failed("cannot initialize USB host access".to_string());
        let text = screen(&app);
        assert!(text.contains("Refresh failed: cannot initialize USB host access"));
        assert!(text.contains("No USB root hubs found"));
    }
}
