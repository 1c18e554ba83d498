use ratatui::{
    backend::CrosstermBackend,
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph},
    layout::{Layout, Constraint, Direction, Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    Terminal, Frame,
};
use crossterm::{
    terminal::{enable_raw_mode, disable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    ExecutableCommand,
};
use anyhow::Context;
use log::info;
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;

use crate::analysis::TrafficStatistics;
use crate::config::{Config, ReceiverConfig};
use crate::traffic::{GeneratorHandle, ReceiverHandle, TrafficGenerator, TrafficReceiver};
use crate::ui::form::InputForm;
use crate::utils::formatting::{format_bitrate, format_bytes, format_elapsed, truncate_string};

pub struct App {
    pub should_quit: bool,
    config: Config,
    runtime: Handle,
    form: InputForm,
    log_lines: VecDeque<String>,
    generator: Option<GeneratorHandle>,
    generator_target: String,
    receiver: Option<ReceiverHandle>,
    last_stats: Option<TrafficStatistics>,
    last_update: Instant,
}

impl App {
    pub fn new(config: Config, runtime: Handle) -> App {
        App {
            should_quit: false,
            form: InputForm::from_config(&config.generator),
            log_lines: VecDeque::with_capacity(config.ui.log_capacity),
            config,
            runtime,
            generator: None,
            generator_target: String::new(),
            receiver: None,
            last_stats: None,
            last_update: Instant::now(),
        }
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        enable_raw_mode().context("Cannot enable raw mode")?;
        let mut stdout = io::stdout();
        stdout.execute(EnterAlternateScreen)?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.event_loop(&mut terminal);

        // Restore the terminal even when the loop failed
        self.shutdown();
        disable_raw_mode()?;
        io::stdout().execute(LeaveAlternateScreen)?;
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> anyhow::Result<()> {
        let refresh = Duration::from_millis(self.config.ui.refresh_rate_ms.max(10));

        loop {
            if self.last_update.elapsed() >= refresh {
                self.update_data();
                self.last_update = Instant::now();
            }

            terminal.draw(|f| self.draw(f))?;

            if self.should_quit {
                return Ok(());
            }

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    self.handle_key(key);
                }
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if ctrl => self.should_quit = true,
            KeyCode::F(2) => self.start_generator(),
            KeyCode::Char('g') if ctrl => self.start_generator(),
            KeyCode::F(3) => self.start_receiver(),
            KeyCode::Char('r') if ctrl => self.start_receiver(),
            KeyCode::F(4) => self.stop_receiver(),
            KeyCode::Char('s') if ctrl => self.stop_receiver(),
            KeyCode::F(5) => self.cancel_generator(),
            KeyCode::Char('l') if ctrl => self.log_lines.clear(),
            KeyCode::Tab | KeyCode::Down | KeyCode::Enter => self.form.focus_next(),
            KeyCode::BackTab | KeyCode::Up => self.form.focus_previous(),
            KeyCode::Backspace => self.form.backspace(),
            KeyCode::Char(c) if !ctrl => self.form.input(c),
            _ => {}
        }
    }

    /// Appends to the on-screen log and mirrors the line to the log facade.
    pub fn log(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        info!("{}", msg);

        let capacity = self.config.ui.log_capacity.max(1);
        while self.log_lines.len() >= capacity {
            self.log_lines.pop_front();
        }
        self.log_lines.push_back(msg);
    }

    pub fn log_lines(&self) -> impl Iterator<Item = &str> {
        self.log_lines.iter().map(String::as_str)
    }

    pub fn form_mut(&mut self) -> &mut InputForm {
        &mut self.form
    }

    pub fn is_receiving(&self) -> bool {
        self.receiver.as_ref().is_some_and(|r| !r.is_finished())
    }

    pub fn is_generating(&self) -> bool {
        self.generator.as_ref().is_some_and(|g| !g.is_finished())
    }

    pub fn start_generator(&mut self) {
        if self.is_generating() {
            self.log("Generator is already running.");
            return;
        }

        let config = match self.form.generator_config() {
            Ok(config) => config,
            Err(e) => {
                self.log(format!("Generator error: {}", e));
                return;
            }
        };

        let target = format!("{}:{}", config.host, config.port);
        self.log(format!("Starting generator: {}", target));

        match TrafficGenerator::new(config) {
            Ok(generator) => {
                let _guard = self.runtime.enter();
                self.generator = Some(generator.spawn());
                self.generator_target = target;
            }
            Err(e) => self.log(format!("Generator error: {}", e)),
        }
    }

    pub fn cancel_generator(&mut self) {
        match self.generator {
            Some(ref handle) if !handle.is_finished() => {
                handle.cancel();
                self.log("Cancelling generator...");
            }
            _ => self.log("Generator is not running."),
        }
    }

    pub fn start_receiver(&mut self) {
        if self.is_receiving() {
            self.log("Receiver is already running.");
            return;
        }

        let port = match self.form.port() {
            Ok(port) => port,
            Err(e) => {
                self.log(format!("Receiver startup error: {}", e));
                return;
            }
        };

        self.log(format!("Starting receiver on port {}", port));
        let config = ReceiverConfig {
            port,
            ..self.config.receiver.clone()
        };

        match self.runtime.block_on(TrafficReceiver::start(&config)) {
            Ok(handle) => {
                self.receiver = Some(handle);
                self.last_stats = None;
                self.log("Receiver is running. Send traffic, then press F4 to stop.");
            }
            Err(e) => self.log(format!("Receiver startup error: {}", e)),
        }
    }

    pub fn stop_receiver(&mut self) {
        let handle = match self.receiver.take() {
            Some(handle) => handle,
            None => {
                self.log("Receiver is not running.");
                return;
            }
        };

        // Died before the next refresh reaped it; still report what it saw
        if handle.is_finished() {
            self.reap_receiver(handle);
            return;
        }

        self.log("Stopping receiver...");
        let stats = self.runtime.block_on(handle.stop(self.config.receiver.stop_grace()));
        self.show_stats(stats);
        self.log("Receiver stopped.");
    }

    fn show_stats(&mut self, stats: Option<TrafficStatistics>) {
        match stats {
            Some(stats) => {
                for line in stats.report_lines() {
                    self.log(line);
                }
                self.last_stats = Some(stats);
            }
            None => self.log("Stats: No packets received."),
        }
    }

    fn update_data(&mut self) {
        if self.generator.as_ref().is_some_and(|g| g.is_finished()) {
            if let Some(handle) = self.generator.take() {
                match self.runtime.block_on(handle.join()) {
                    Ok(summary) if summary.cancelled => self.log(format!(
                        "Generator cancelled after {} packets.",
                        summary.packets_sent
                    )),
                    Ok(summary) => {
                        self.log(format!(
                            "Sent {} packets ({}) in {}",
                            summary.packets_sent,
                            format_bytes(summary.bytes_sent),
                            format_elapsed(summary.elapsed)
                        ));
                        self.log("Generator finished.");
                    }
                    Err(e) => self.log(format!("Generator error: {}", e)),
                }
            }
        }

        // The loop only exits on its own after a socket error
        if self.receiver.as_ref().is_some_and(|r| r.is_finished()) {
            if let Some(handle) = self.receiver.take() {
                self.reap_receiver(handle);
            }
        }
    }

    fn reap_receiver(&mut self, handle: ReceiverHandle) {
        self.log("Receiver stopped unexpectedly.");
        let stats = self.runtime.block_on(handle.stop(Duration::ZERO));
        self.show_stats(stats);
    }

    /// Cancels background work before the application exits.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.generator.take() {
            handle.cancel();
        }
        if let Some(handle) = self.receiver.take() {
            let _ = self.runtime.block_on(handle.stop(self.config.receiver.stop_grace()));
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3),  // Header
                Constraint::Min(0),     // Main content
                Constraint::Length(3),  // Footer
            ])
            .split(f.size());

        self.draw_header(f, chunks[0]);

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(chunks[1]);

        let left = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(12), // Form
                Constraint::Length(3),  // Generator progress
                Constraint::Min(0),     // Receiver
            ])
            .split(columns[0]);

        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(10), // Statistics
                Constraint::Min(0),     // Log
            ])
            .split(columns[1]);

        self.form.render(f, left[0], true);
        self.draw_generator(f, left[1]);
        self.draw_receiver(f, left[2]);
        self.draw_statistics(f, right[0]);
        self.draw_log(f, right[1]);
        self.draw_footer(f, chunks[2]);
    }

    fn draw_header(&self, f: &mut Frame, area: Rect) {
        let running = Style::default().fg(Color::Green).add_modifier(Modifier::BOLD);
        let idle = Style::default().fg(Color::DarkGray);

        let generator = if self.is_generating() {
            Span::styled(format!(" Generator: {} ", truncate_string(&self.generator_target, 28)), running)
        } else {
            Span::styled(" Generator: idle ", idle)
        };
        let receiver = match self.receiver {
            Some(ref handle) if !handle.is_finished() => {
                Span::styled(format!(" Receiver: {} ", handle.local_addr()), running)
            }
            _ => Span::styled(" Receiver: stopped ", idle),
        };

        let header = Paragraph::new(Line::from(vec![generator, Span::raw("|"), receiver]))
            .block(Block::default().borders(Borders::ALL).title("Network Load Tester"))
            .alignment(Alignment::Center);

        f.render_widget(header, area);
    }

    fn draw_generator(&self, f: &mut Frame, area: Rect) {
        let (sent, total) = self.generator.as_ref().map(|g| g.progress()).unwrap_or((0, 0));
        let ratio = if total > 0 { (sent as f64 / total as f64).min(1.0) } else { 0.0 };

        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title("Generator Progress"))
            .gauge_style(Style::default().fg(Color::Cyan))
            .ratio(ratio)
            .label(format!("{}/{}", sent, total));

        f.render_widget(gauge, area);
    }

    fn draw_receiver(&self, f: &mut Frame, area: Rect) {
        let text = match self.receiver {
            Some(ref handle) => {
                let progress = handle.progress();
                format!(
                    "Listening: {}\nDatagrams: {}\nProbes:    {}\nBytes:     {}\nLast seq:  {}\nLast delay: {}",
                    handle.local_addr(),
                    progress.datagrams,
                    progress.probes,
                    format_bytes(progress.total_bytes),
                    progress.last_sequence.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
                    progress.last_delay_ms.map(|d| format!("{} ms", d)).unwrap_or_else(|| "-".to_string()),
                )
            }
            None => "Not running.\nF3 starts listening on the form's port.".to_string(),
        };

        let panel = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title("Traffic Receiver"));

        f.render_widget(panel, area);
    }

    fn draw_statistics(&self, f: &mut Frame, area: Rect) {
        let live = self.receiver.as_ref().and_then(|r| r.snapshot());
        let (title, stats) = match live {
            Some(stats) => ("Statistics (live)", Some(stats)),
            None => ("Statistics", self.last_stats.clone()),
        };

        let text = match stats {
            Some(stats) => format!(
                "Expected: {}   Received: {}   Duplicates: {}\nLost:     {} ({:.2} %)\nDelay:    avg {:.2} ms, min {} ms, max {} ms\nJitter:   {:.2} ms\nThroughput: {} ({:.2} bps)\nBytes:    {}   Time: {} ms",
                stats.expected_packets,
                stats.received_packets,
                stats.duplicate_packets,
                stats.lost_packets,
                stats.loss_percent,
                stats.avg_delay_ms,
                stats.min_delay_ms,
                stats.max_delay_ms,
                stats.jitter_ms,
                format_bitrate(stats.throughput_bps),
                stats.throughput_bps,
                format_bytes(stats.total_bytes),
                stats.total_time_ms,
            ),
            None => "No packets received.".to_string(),
        };

        let panel = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title(title));

        f.render_widget(panel, area);
    }

    fn draw_log(&self, f: &mut Frame, area: Rect) {
        let visible = area.height.saturating_sub(2) as usize;
        let skip = self.log_lines.len().saturating_sub(visible);

        let items: Vec<ListItem> = self.log_lines.iter().skip(skip).map(|line| {
            ListItem::new(line.as_str())
        }).collect();

        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title("Log"));

        f.render_widget(list, area);
    }

    fn draw_footer(&self, f: &mut Frame, area: Rect) {
        let help_text = "F2 start generator | F3 start receiver | F4 stop receiver & show stats | F5 cancel generator | Tab next field | Esc quit";
        let footer = Paragraph::new(help_text)
            .block(Block::default().borders(Borders::ALL))
            .alignment(Alignment::Center);

        f.render_widget(footer, area);
    }
}
