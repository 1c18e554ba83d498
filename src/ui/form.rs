use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use crate::config::GeneratorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldId {
    Host,
    Port,
    Packets,
    Size,
    Frequency,
}

impl FieldId {
    pub const ALL: [FieldId; 5] = [
        FieldId::Host,
        FieldId::Port,
        FieldId::Packets,
        FieldId::Size,
        FieldId::Frequency,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FieldId::Host => "Host",
            FieldId::Port => "Port",
            FieldId::Packets => "Packets",
            FieldId::Size => "Size (bytes)",
            FieldId::Frequency => "Frequency (packets/sec)",
        }
    }

    fn numeric(&self) -> bool {
        !matches!(self, FieldId::Host)
    }
}

/// Editable text fields for the generator and receiver settings.
pub struct InputForm {
    values: Vec<String>,
    focused: usize,
}

impl InputForm {
    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self {
            values: vec![
                config.host.clone(),
                config.port.to_string(),
                config.packet_count.to_string(),
                config.packet_size.to_string(),
                config.frequency.to_string(),
            ],
            focused: 0,
        }
    }

    pub fn focused(&self) -> FieldId {
        FieldId::ALL[self.focused]
    }

    pub fn focus_next(&mut self) {
        self.focused = (self.focused + 1) % FieldId::ALL.len();
    }

    pub fn focus_previous(&mut self) {
        self.focused = if self.focused == 0 {
            FieldId::ALL.len() - 1
        } else {
            self.focused - 1
        };
    }

    pub fn value(&self, field: FieldId) -> &str {
        &self.values[Self::index(field)]
    }

    pub fn set_value(&mut self, field: FieldId, value: &str) {
        self.values[Self::index(field)] = value.to_string();
    }

    /// Numeric fields silently drop anything but digits.
    pub fn input(&mut self, c: char) {
        let field = self.focused();
        if c.is_control() || (field.numeric() && !c.is_ascii_digit()) {
            return;
        }
        self.values[self.focused].push(c);
    }

    pub fn backspace(&mut self) {
        self.values[self.focused].pop();
    }

    pub fn port(&self) -> Result<u16, String> {
        parse_field(self, FieldId::Port)
    }

    pub fn generator_config(&self) -> Result<GeneratorConfig, String> {
        let host = self.value(FieldId::Host).trim();
        if host.is_empty() {
            return Err("Host must not be empty".to_string());
        }

        Ok(GeneratorConfig {
            host: host.to_string(),
            port: self.port()?,
            packet_count: parse_field(self, FieldId::Packets)?,
            packet_size: parse_field(self, FieldId::Size)?,
            frequency: parse_field(self, FieldId::Frequency)?,
        })
    }

    pub fn render(&self, f: &mut Frame, area: Rect, active: bool) {
        let label_style = Style::default().fg(Color::Gray);
        let value_style = Style::default().fg(Color::White);
        let focus_style = Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD);

        let mut lines = Vec::with_capacity(FieldId::ALL.len() * 2);
        for (i, field) in FieldId::ALL.iter().enumerate() {
            let focused = active && i == self.focused;
            let marker = if focused { "> " } else { "  " };
            let cursor = if focused { "_" } else { "" };

            lines.push(Line::from(Span::styled(format!("{}:", field.label()), label_style)));
            lines.push(Line::from(vec![
                Span::raw(marker),
                Span::styled(
                    format!("{}{}", self.values[i], cursor),
                    if focused { focus_style } else { value_style },
                ),
            ]));
        }

        let form = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Traffic Generator"));

        f.render_widget(form, area);
    }

    fn index(field: FieldId) -> usize {
        FieldId::ALL.iter().position(|f| *f == field).unwrap_or(0)
    }
}

fn parse_field<T: std::str::FromStr>(form: &InputForm, field: FieldId) -> Result<T, String> {
    let raw = form.value(field).trim();
    raw.parse()
        .map_err(|_| format!("Invalid {} value '{}'", field.label(), raw))
}
