use std::collections::VecDeque;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};

use versus::ConnectionState;
use versus::net::Role;

use crate::session::SessionStats;

const MAX_LOG_LINES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Default)]
pub struct TuiState {
    log: VecDeque<(Level, String)>,
}

impl TuiState {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, level: Level, message: String) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back((level, message));
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.push(Level::Info, message.into());
    }

    pub fn log_warn(&mut self, message: impl Into<String>) {
        self.push(Level::Warn, message.into());
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.push(Level::Error, message.into());
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, stats: &SessionStats) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(5),
            Constraint::Length(6),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], stats);
    render_lobby(frame, chunks[1], stats);
    render_network(frame, chunks[2], stats);
    render_log(frame, chunks[3], state);
    render_help(frame, chunks[4], stats);
}

fn state_color(state: ConnectionState) -> Color {
    match state {
        ConnectionState::Connected => Color::Green,
        ConnectionState::Lagging => Color::Yellow,
        ConnectionState::Connecting => Color::Cyan,
        ConnectionState::Timeout | ConnectionState::Disconnected => Color::Red,
    }
}

fn render_header(frame: &mut Frame, area: Rect, stats: &SessionStats) {
    let role = match stats.role {
        Role::Host => "Host",
        Role::Guest => "Guest",
    };
    let title = format!(" Versus {} - Uptime: {} ", role, format_duration(stats.uptime_secs));

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let peer = stats
        .remote_addr
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "-".into());
    let line = Line::from(vec![
        Span::styled("State: ", Style::default().fg(Color::Gray)),
        Span::styled(
            stats.state.as_str(),
            Style::default().fg(state_color(stats.state)),
        ),
        Span::raw(format!("  |  Peer: {}", peer)),
    ]);

    frame.render_widget(Paragraph::new(line).block(block), area);
}

fn render_lobby(frame: &mut Frame, area: Rect, stats: &SessionStats) {
    let block = Block::default()
        .title(" Match ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let mode = stats.mode.map(|m| m.as_str()).unwrap_or("-");
    let phase = if stats.started {
        "playing"
    } else if stats.can_start {
        "ready to start"
    } else if stats.ready {
        "guest ready"
    } else {
        "waiting"
    };
    let lines = vec![
        Line::from(format!("Mode: {}  |  {}", mode, phase)),
        Line::from(format!(
            "Score: {}  |  Opponent: {}  |  Garbage received: {}",
            stats.score, stats.opponent_score, stats.garbage
        )),
        Line::from(format!(
            "Events sent: {}  filtered: {}  attacks: {}",
            stats.sync.events_sent, stats.sync.events_filtered, stats.sync.attacks_sent
        )),
    ];

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_network(frame: &mut Frame, area: Rect, stats: &SessionStats) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let net = &stats.network;
    let lines = vec![
        Line::from(vec![
            Span::styled("Frames: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} sent / {} recv", net.frames_sent, net.frames_received),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Bytes: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} sent / {} recv",
                    format_bytes(net.bytes_sent),
                    format_bytes(net.bytes_received)
                ),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("RTT: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{}ms avg, {}ms last", stats.rtt_avg_ms, stats.rtt_last_ms),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Dropped: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} overflow / {} codec",
                    net.frames_dropped_overflow, net.frames_dropped_codec
                ),
                Style::default().fg(
                    if net.frames_dropped_overflow + net.frames_dropped_codec > 0 {
                        Color::Red
                    } else {
                        Color::White
                    },
                ),
            ),
        ]),
    ];

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = state
        .log
        .iter()
        .skip(state.log.len().saturating_sub(visible))
        .map(|(level, message)| {
            let color = match level {
                Level::Info => Color::White,
                Level::Warn => Color::Yellow,
                Level::Error => Color::Red,
            };
            Line::styled(message.as_str(), Style::default().fg(color))
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect, stats: &SessionStats) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let keys = match stats.role {
        Role::Host => "'s' start  'm' switch mode  'q'/ESC quit",
        Role::Guest => "'r' toggle ready  'q'/ESC quit",
    };
    let text = Paragraph::new(keys).block(block).style(
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    );

    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
