use std::io::{self, Stdout};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::cursor::{Hide, Show};
use crossterm::event::{
    self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::buffer::Buffer;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Borders, Clear, Padding, Paragraph, Widget};
use ratatui::{Frame, Terminal};

use crate::config::AppConfig;
use crate::download::{DownloadMode, DownloadSupervisor, TaskState, is_valid_target};
use crate::error::{Error, Result};
use crate::notify::{CHROME_WIDTH, ICON_WIDTH, Notice, NoticeQueue, NoticeRect, NoticeSurface};

const PLACEHOLDER: &str = "https://www.youtube.com/watch?v=br3GIIQeefY";
const BACKDROP: (u8, u8, u8) = (16, 16, 20);

pub trait FrameHandler {
    // `now` is sampled once per frame.
    fn on_frame(&mut self, frame: &mut Frame<'_>, delta_secs: f32, now: Instant);
    fn on_event(&mut self, event: Event);
    fn should_quit(&self) -> bool;
}

pub fn run_frames<H: FrameHandler>(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    handler: &mut H,
    tick: Duration,
) -> Result<()> {
    let mut last_frame = Instant::now();
    loop {
        let now = Instant::now();
        let delta = now.saturating_duration_since(last_frame).as_secs_f32();
        last_frame = now;

        draw_frame(terminal, handler, delta, now)?;
        if handler.should_quit() {
            return Ok(());
        }

        if event::poll(tick).map_err(|e| Error::msg(e.to_string()))? {
            let ev = event::read().map_err(|e| Error::msg(e.to_string()))?;
            handler.on_event(ev);
        }
    }
}

// A panicking handler must not unwind past the caller, which still has to
// restore the terminal. Returns false when the frame was dropped.
fn draw_frame<B: Backend, H: FrameHandler>(
    terminal: &mut Terminal<B>,
    handler: &mut H,
    delta: f32,
    now: Instant,
) -> Result<bool> {
    let mut panicked = false;
    let drawn = terminal
        .draw(|f| {
            if catch_unwind(AssertUnwindSafe(|| handler.on_frame(f, delta, now))).is_err() {
                panicked = true;
            }
        })
        .map(|_| ())
        .map_err(|e| e.to_string());
    if panicked {
        tracing::error!("frame draw panicked; screen cleared");
        let _ = terminal.clear();
        return Ok(false);
    }
    drawn.map_err(|e| Error::msg(format!("tui draw failed: {e}")))?;
    Ok(true)
}

pub fn run_tui(cfg: &AppConfig, queue: Arc<NoticeQueue>) -> Result<()> {
    let mut stdout = io::stdout();
    enable_raw_mode().map_err(|e| Error::msg(e.to_string()))?;
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste, Hide)
        .map_err(|e| Error::msg(e.to_string()))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).map_err(|e| Error::msg(e.to_string()))?;
    terminal
        .clear()
        .map_err(|e| Error::msg(format!("tui clear failed: {e}")))?;

    let mut app = App::new(DownloadSupervisor::system(cfg), Arc::clone(&queue));
    queue.attach_surface();
    let result = run_frames(
        &mut terminal,
        &mut app,
        Duration::from_millis(cfg.ui.tick_ms.max(1)),
    );
    queue.detach_surface();

    disable_raw_mode().ok();
    execute!(
        terminal.backend_mut(),
        DisableBracketedPaste,
        LeaveAlternateScreen,
        Show
    )
    .ok();

    if app.supervisor.is_busy() {
        println!("Waiting for the running download to finish...");
    }
    if let Some(outcome) = app.supervisor.join() {
        match (&outcome.file_name, &outcome.error) {
            (Some(name), _) => println!("Last download: {name}"),
            (None, Some(err)) => println!("Last download failed: {err}"),
            (None, None) => {}
        }
    }
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Url,
    Format,
    Button,
}

impl Focus {
    fn next(self) -> Self {
        match self {
            Focus::Url => Focus::Format,
            Focus::Format => Focus::Button,
            Focus::Button => Focus::Url,
        }
    }

    fn prev(self) -> Self {
        match self {
            Focus::Url => Focus::Button,
            Focus::Format => Focus::Url,
            Focus::Button => Focus::Format,
        }
    }
}

struct App {
    url: String,
    url_valid: bool,
    mode: DownloadMode,
    focus: Focus,
    supervisor: DownloadSupervisor,
    queue: Arc<NoticeQueue>,
    quit: bool,
}

impl App {
    fn new(supervisor: DownloadSupervisor, queue: Arc<NoticeQueue>) -> Self {
        Self {
            url: String::new(),
            url_valid: false,
            mode: DownloadMode::AudioVideo,
            focus: Focus::Url,
            supervisor,
            queue,
            quit: false,
        }
    }

    fn set_url(&mut self, url: String) {
        self.url_valid = is_valid_target(&url);
        self.url = url;
    }

    fn can_download(&self) -> bool {
        self.url_valid && !self.supervisor.is_busy()
    }

    fn download(&mut self) {
        if !self.can_download() {
            return;
        }
        tracing::info!("Starting download..");
        if let Err(e) = self.supervisor.start(&self.url, self.mode) {
            tracing::error!("{e}");
        }
    }

    fn handle_key(&mut self, k: KeyEvent) {
        let ctrl = k.modifiers.contains(KeyModifiers::CONTROL);
        match k.code {
            KeyCode::Char('c') if ctrl => self.quit = true,
            KeyCode::Esc => self.quit = true,
            KeyCode::Tab => self.focus = self.focus.next(),
            KeyCode::BackTab => self.focus = self.focus.prev(),
            KeyCode::Enter => self.download(),
            KeyCode::Left | KeyCode::Right | KeyCode::Char(' ') if self.focus == Focus::Format => {
                self.mode = self.mode.toggled();
            }
            KeyCode::Char(' ') if self.focus == Focus::Button => self.download(),
            KeyCode::Char('u') if ctrl && self.focus == Focus::Url => self.set_url(String::new()),
            KeyCode::Char(c) if !ctrl && self.focus == Focus::Url => {
                let mut url = std::mem::take(&mut self.url);
                url.push(c);
                self.set_url(url);
            }
            KeyCode::Backspace if self.focus == Focus::Url => {
                let mut url = std::mem::take(&mut self.url);
                url.pop();
                self.set_url(url);
            }
            _ => {}
        }
    }

    fn paste(&mut self, text: &str) {
        if self.focus != Focus::Url {
            return;
        }
        let mut url = std::mem::take(&mut self.url);
        url.extend(text.chars().filter(|c| !c.is_control()));
        self.set_url(url);
    }

    fn draw(&mut self, f: &mut Frame<'_>, delta_secs: f32, now: Instant) {
        let size = f.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(2),
            ])
            .split(size);

        self.draw_header(f, chunks[0]);
        self.draw_url(f, chunks[1]);
        self.draw_format(f, chunks[2]);
        self.draw_button(f, chunks[3]);
        self.draw_status(f, chunks[4]);
        self.draw_footer(f, chunks[5]);

        // Notices overlay everything else, so they go last.
        let mut surface = BufferSurface {
            buf: f.buffer_mut(),
            area: size,
        };
        self.queue.render_and_age(&mut surface, delta_secs, now);
    }

    fn draw_header(&self, f: &mut Frame<'_>, area: Rect) {
        let now = chrono::Local::now().format("%H:%M:%S").to_string();
        let line = Line::from(vec![
            Span::styled("ImDL", Style::default().fg(Color::Cyan)),
            Span::raw("  "),
            Span::styled("YouTube downloader", Style::default().fg(Color::Gray)),
            Span::raw("  "),
            Span::styled(now, Style::default().fg(Color::Yellow)),
        ]);
        let p = Paragraph::new(Text::from(line)).block(
            Block::default()
                .borders(Borders::BOTTOM)
                .border_type(BorderType::Plain),
        );
        f.render_widget(p, area);
    }

    fn draw_url(&self, f: &mut Frame<'_>, area: Rect) {
        let (mark, mark_style) = match (self.url.is_empty(), self.url_valid) {
            (true, _) => ("", Style::default()),
            (false, true) => (" ok", Style::default().fg(Color::Green)),
            (false, false) => (" invalid", Style::default().fg(Color::Red)),
        };
        let block = field_block("URL", self.focus == Focus::Url);
        let inner = block.inner(area);

        let line = if self.url.is_empty() {
            Line::from(Span::styled(
                PLACEHOLDER,
                Style::default().fg(Color::DarkGray),
            ))
        } else {
            let room = (inner.width as usize).saturating_sub(mark.len() + 1);
            let shown = tail(&self.url, room);
            Line::from(vec![
                Span::raw(shown.to_string()),
                Span::styled(mark, mark_style),
            ])
        };
        f.render_widget(Paragraph::new(line).block(block), area);

        if self.focus == Focus::Url && inner.width > 0 {
            let typed = if self.url.is_empty() {
                0
            } else {
                let room = (inner.width as usize).saturating_sub(mark.len() + 1);
                tail(&self.url, room).chars().count() as u16
            };
            f.set_cursor_position((inner.x + typed.min(inner.width - 1), inner.y));
        }
    }

    fn draw_format(&self, f: &mut Frame<'_>, area: Rect) {
        let option = |m: DownloadMode| {
            let style = if m == self.mode {
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::LightYellow)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray)
            };
            Span::styled(format!(" {} ", m.label()), style)
        };
        let line = Line::from(vec![
            option(DownloadMode::AudioOnly),
            Span::raw("  "),
            option(DownloadMode::AudioVideo),
        ]);
        f.render_widget(
            Paragraph::new(line).block(field_block("Format", self.focus == Focus::Format)),
            area,
        );
    }

    fn draw_button(&self, f: &mut Frame<'_>, area: Rect) {
        let label = if self.supervisor.is_busy() {
            "Downloading..."
        } else {
            "Download"
        };
        let style = if self.can_download() {
            Style::default()
                .fg(Color::Black)
                .bg(Color::LightGreen)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let width = (label.len() as u16 + 6).min(area.width);
        let button_area = Rect::new(area.x, area.y, width, area.height);
        f.render_widget(
            Paragraph::new(Line::from(Span::styled(label, style)))
                .alignment(Alignment::Center)
                .block(field_block("", self.focus == Focus::Button)),
            button_area,
        );
    }

    fn draw_status(&self, f: &mut Frame<'_>, area: Rect) {
        let state = self.supervisor.state();
        let color = match state {
            TaskState::Idle => Color::Gray,
            TaskState::Resolving | TaskState::Transferring => Color::LightBlue,
            TaskState::Done => Color::Green,
            TaskState::Failed => Color::Red,
        };
        let line = Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Yellow)),
            Span::styled(state.to_string(), Style::default().fg(color)),
        ]);
        f.render_widget(Paragraph::new(line), area);
    }

    fn draw_footer(&self, f: &mut Frame<'_>, area: Rect) {
        let hint = "[Tab] Next field  [Left/Right] Format  [Enter] Download  [Ctrl+U] Clear  [Esc] Quit";
        let p = Paragraph::new(hint)
            .style(Style::default().fg(Color::Gray))
            .block(Block::default().borders(Borders::TOP));
        f.render_widget(p, area);
    }
}

impl FrameHandler for App {
    fn on_frame(&mut self, frame: &mut Frame<'_>, delta_secs: f32, now: Instant) {
        self.draw(frame, delta_secs, now);
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::Key(k) if k.kind == KeyEventKind::Press => self.handle_key(k),
            Event::Paste(text) => self.paste(&text),
            _ => {}
        }
    }

    fn should_quit(&self) -> bool {
        self.quit
    }
}

fn field_block(title: &str, focused: bool) -> Block<'_> {
    let border = if focused { Color::Yellow } else { Color::Gray };
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(border))
}

fn tail(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    let skip = count - max;
    s.char_indices().nth(skip).map(|(i, _)| &s[i..]).unwrap_or("")
}

fn cell_width(s: &str) -> usize {
    Span::raw(s).width()
}

// Greedy word wrap measured in terminal cells, so wide (CJK) characters count
// twice. Words wider than a line are split between characters.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut line_w = 0usize;

    for word in text.split_whitespace() {
        let word_w = cell_width(word);
        let needed = if line_w == 0 { word_w } else { line_w + 1 + word_w };
        if needed <= width {
            if line_w > 0 {
                line.push(' ');
            }
            line.push_str(word);
            line_w = needed;
            continue;
        }
        if line_w > 0 {
            lines.push(std::mem::take(&mut line));
            line_w = 0;
        }
        if word_w <= width {
            line.push_str(word);
            line_w = word_w;
            continue;
        }
        let mut buf = [0u8; 4];
        for c in word.chars() {
            let cw = cell_width(c.encode_utf8(&mut buf));
            if line_w > 0 && line_w + cw > width {
                lines.push(std::mem::take(&mut line));
                line_w = 0;
            }
            line.push(c);
            line_w += cw;
        }
    }
    if !line.is_empty() || lines.is_empty() {
        lines.push(line);
    }
    lines
}

fn blend(color: (u8, u8, u8), opacity: f32) -> Color {
    let t = opacity.clamp(0.0, 1.0);
    let mix = |c: u8, b: u8| (b as f32 + (c as f32 - b as f32) * t).round() as u8;
    Color::Rgb(
        mix(color.0, BACKDROP.0),
        mix(color.1, BACKDROP.1),
        mix(color.2, BACKDROP.2),
    )
}

// Notice rects are relative to `area`.
struct BufferSurface<'a> {
    buf: &'a mut Buffer,
    area: Rect,
}

impl NoticeSurface for BufferSurface<'_> {
    fn size(&self) -> (u16, u16) {
        (self.area.width, self.area.height)
    }

    fn text_height(&self, text: &str, wrap_width: u16) -> u16 {
        wrap_text(text, wrap_width as usize)
            .len()
            .min(u16::MAX as usize) as u16
    }

    fn draw_notice(&mut self, notice: &Notice, r: NoticeRect) {
        let rect = Rect::new(self.area.x + r.x, self.area.y + r.y, r.width, r.height)
            .intersection(self.area);
        if rect.is_empty() {
            return;
        }
        let style = notice.severity.style();
        let fg = blend(style.fg, notice.opacity);
        let bg = blend(style.bg, notice.opacity);
        let border = blend(style.border, notice.opacity);

        let wrap_w = r.width.saturating_sub(CHROME_WIDTH) as usize;
        let pad = " ".repeat(ICON_WIDTH as usize);
        let lines: Vec<Line> = wrap_text(&notice.message, wrap_w)
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let lead = if i == 0 {
                    Span::styled(
                        format!("{:<w$}", style.icon, w = ICON_WIDTH as usize),
                        Style::default().fg(border).add_modifier(Modifier::BOLD),
                    )
                } else {
                    Span::raw(pad.clone())
                };
                Line::from(vec![lead, Span::raw(text)])
            })
            .collect();

        Clear.render(rect, self.buf);
        Paragraph::new(lines)
            .style(Style::default().fg(fg).bg(bg))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded)
                    .border_style(Style::default().fg(border))
                    .padding(Padding::horizontal(1)),
            )
            .render(rect, self.buf);
    }
}
