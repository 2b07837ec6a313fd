use std::borrow::Cow;
use std::env;
use std::io::{self, Cursor, Stdout, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use arboard::Clipboard;
use base64::{engine::general_purpose, Engine as _};
use crossbeam_channel::{Receiver, TryRecvError};
use crossterm::cursor::MoveTo;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseEvent,
    MouseEventKind,
};
use crossterm::style::Print;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, window_size, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use image::ImageFormat;
use once_cell::sync::OnceCell;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use unicode_width::UnicodeWidthStr;

use crate::feed::{self, QueryPatch};
use crate::gallery::GalleryItem;
use crate::media;
use crate::reddit::SortOption;
use crate::theme::{self, Palette};

const CARD_WIDTH: u16 = 26;
const CARD_HEIGHT: u16 = 5;
const GRID_PRELOAD_ROWS: usize = 2;
const MAX_IMAGE_COLS: i32 = 64;
const MAX_IMAGE_ROWS: i32 = 18;
const KITTY_CHUNK_SIZE: usize = 4096;
const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

const SORT_CYCLE: [SortOption; 6] = [
    SortOption::Hot,
    SortOption::New,
    SortOption::Top,
    SortOption::Rising,
    SortOption::Relevance,
    SortOption::Comments,
];

struct Spinner {
    index: usize,
    last_tick: Instant,
}

impl Spinner {
    fn new() -> Self {
        Self {
            index: 0,
            last_tick: Instant::now(),
        }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_tick) >= Duration::from_millis(120) {
            self.index = (self.index + 1) % SPINNER_FRAMES.len();
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.index = 0;
        self.last_tick = Instant::now();
    }
}

#[derive(Clone)]
struct KittyImage {
    id: u32,
    cols: i32,
    rows: i32,
    transmit_chunks: Vec<String>,
    transmitted: bool,
    wrap_tmux: bool,
}

impl KittyImage {
    fn ensure_transmitted<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        if self.transmitted {
            return Ok(());
        }
        for chunk in &self.transmit_chunks {
            writer.write_all(chunk.as_bytes())?;
        }
        writer.flush()?;
        self.transmitted = true;
        Ok(())
    }

    fn placement_sequence(&self) -> String {
        let base = format!(
            "\x1b_Ga=p,q=2,C=1,i={},c={},r={};\x1b\\",
            self.id, self.cols, self.rows
        );
        if self.wrap_tmux {
            format!("\x1bPtmux;\x1b{base}\x1b\\")
        } else {
            base
        }
    }

    fn delete_sequence(&self) -> String {
        let base = format!("\x1b_Ga=d,q=2,i={};\x1b\\", self.id);
        if self.wrap_tmux {
            format!("\x1bPtmux;\x1b{}\x1b\\", base)
        } else {
            base
        }
    }
}

#[derive(Clone, Copy)]
struct CellMetrics {
    width: f64,
    height: f64,
}

fn terminal_cell_metrics() -> CellMetrics {
    static METRICS: OnceCell<CellMetrics> = OnceCell::new();
    *METRICS.get_or_init(|| {
        window_size().ok().map_or(
            CellMetrics {
                width: 8.0,
                height: 16.0,
            },
            |size| {
                let columns = size.columns.max(1) as f64;
                let rows = size.rows.max(1) as f64;
                let width = if size.width > 0 {
                    f64::from(size.width) / columns
                } else {
                    8.0
                };
                let height = if size.height > 0 {
                    f64::from(size.height) / rows
                } else {
                    16.0
                };
                CellMetrics { width, height }
            },
        )
    })
}

fn env_truthy(key: &str) -> bool {
    env::var(key)
        .map(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes" | "YES"))
        .unwrap_or(false)
}

fn tmux_passthrough_enabled() -> bool {
    env::var("TMUX").map(|v| !v.is_empty()).unwrap_or(false)
}

fn running_inside_tmux() -> bool {
    let in_tmux = env::var("TMUX").map(|v| !v.is_empty()).unwrap_or(false)
        || env::var("TMUX_PANE")
            .map(|v| !v.is_empty())
            .unwrap_or(false);
    if in_tmux {
        return true;
    }
    env::var("TERM")
        .map(|term| term.to_ascii_lowercase().contains("tmux"))
        .unwrap_or(false)
}

fn is_kitty_terminal() -> bool {
    static FLAG: OnceCell<bool> = OnceCell::new();
    *FLAG.get_or_init(|| {
        if env_truthy("WALLFEED_DISABLE_KITTY") {
            return false;
        }
        if env_truthy("WALLFEED_FORCE_KITTY") {
            return true;
        }
        if running_inside_tmux() {
            return false;
        }
        if env::var("KITTY_WINDOW_ID")
            .map(|v| !v.is_empty())
            .unwrap_or(false)
        {
            return true;
        }
        if env::var("WEZTERM_PANE")
            .map(|v| !v.is_empty())
            .unwrap_or(false)
        {
            return true;
        }
        env::var("TERM")
            .map(|term| {
                let lower = term.to_ascii_lowercase();
                lower.contains("kitty") || lower.contains("wezterm")
            })
            .unwrap_or(false)
    })
}

fn encode_png_for_kitty(bytes: &[u8]) -> Result<(Cow<'_, [u8]>, u32, u32)> {
    if bytes.is_empty() {
        bail!("preview image had no bytes");
    }
    let decoded = image::load_from_memory(bytes).context("decode preview image")?;
    let width = decoded.width();
    let height = decoded.height();
    if matches!(image::guess_format(bytes), Ok(ImageFormat::Png)) {
        return Ok((Cow::Borrowed(bytes), width, height));
    }
    let mut png_bytes = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .context("encode preview as png")?;
    Ok((Cow::Owned(png_bytes), width, height))
}

fn kitty_transmit_inline(bytes: &[u8], image_id: u32) -> Result<KittyImage> {
    let (png_data, px_width, px_height) = encode_png_for_kitty(bytes)?;

    let metrics = terminal_cell_metrics();
    let aspect = f64::from(px_height.max(1)) / f64::from(px_width.max(1));
    let mut cols = f64::from(MAX_IMAGE_COLS);
    let mut rows = cols * aspect * (metrics.width / metrics.height.max(1.0));
    if rows > f64::from(MAX_IMAGE_ROWS) {
        let scale = f64::from(MAX_IMAGE_ROWS) / rows;
        rows = f64::from(MAX_IMAGE_ROWS);
        cols *= scale;
    }
    let cols = (cols.round() as i32).max(1);
    let rows = (rows.round() as i32).max(1);

    let encoded = general_purpose::STANDARD.encode(png_data.as_ref());
    if encoded.is_empty() {
        bail!("failed to encode image preview");
    }

    let wrap_tmux = tmux_passthrough_enabled();
    let prefix = if wrap_tmux { "\x1bPtmux;\x1b" } else { "" };
    let suffix = if wrap_tmux { "\x1b\\" } else { "" };

    let mut chunks: Vec<String> = Vec::new();
    let mut offset = 0;
    while offset < encoded.len() {
        let end = usize::min(offset + KITTY_CHUNK_SIZE, encoded.len());
        let more = if end < encoded.len() { 1 } else { 0 };
        let mut out = String::new();
        out.push_str(prefix);
        if offset == 0 {
            out.push_str(&format!("\x1b_Ga=t,q=2,i={},f=100,m={more};", image_id));
        } else {
            out.push_str(&format!("\x1b_Ga=t,q=2,i={},m={more};", image_id));
        }
        out.push_str(&encoded[offset..end]);
        out.push_str("\x1b\\");
        out.push_str(suffix);
        chunks.push(out);
        offset = end;
    }

    Ok(KittyImage {
        id: image_id,
        cols,
        rows,
        transmit_chunks: chunks,
        transmitted: false,
        wrap_tmux,
    })
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    let mut out = String::new();
    for ch in text.chars() {
        let candidate_width = out.width() + ch.to_string().width() + 1;
        if candidate_width > width {
            break;
        }
        out.push(ch);
    }
    out.push('…');
    out
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Browse,
    Search,
}

pub struct Options {
    pub controller: feed::Controller,
    pub subreddits: Vec<String>,
    pub media: Option<media::Handle>,
    pub theme: theme::Mode,
}

pub struct Model {
    controller: feed::Controller,
    subreddits: Vec<String>,
    media: Option<media::Handle>,
    mode: theme::Mode,
    palette: Palette,
    input_mode: InputMode,
    search_input: String,
    selected: usize,
    grid_offset: usize,
    grid_cols: usize,
    grid_rows: usize,
    status_message: Option<String>,
    spinner: Spinner,
    needs_redraw: bool,
    preview: Option<KittyImage>,
    preview_notice: Option<String>,
    preview_origin: Option<(u16, u16)>,
    pending_preview: Option<(String, Receiver<Result<Vec<u8>>>)>,
    pending_download: Option<(String, Receiver<Result<PathBuf>>)>,
    kitty_deletes: Vec<String>,
    next_image_id: u32,
}

impl Model {
    pub fn new(options: Options) -> Self {
        let palette = theme::palette(options.theme);
        Self {
            controller: options.controller,
            subreddits: options.subreddits,
            media: options.media,
            mode: options.theme,
            palette,
            input_mode: InputMode::Browse,
            search_input: String::new(),
            selected: 0,
            grid_offset: 0,
            grid_cols: 1,
            grid_rows: 1,
            status_message: None,
            spinner: Spinner::new(),
            needs_redraw: true,
            preview: None,
            preview_notice: None,
            preview_origin: None,
            pending_preview: None,
            pending_download: None,
            kitty_deletes: Vec::new(),
            next_image_id: 1,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        self.controller.fetch_page(true);

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_async() {
                self.needs_redraw = true;
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.flush_inline_images(terminal.backend_mut())?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => self.needs_redraw = true,
                            Err(err) => {
                                self.status_message = Some(format!("Error: {}", err));
                                self.needs_redraw = true;
                            }
                        }
                    }
                    Event::Mouse(mouse) => {
                        self.handle_mouse(mouse);
                        self.needs_redraw = true;
                    }
                    Event::Resize(_, _) => {
                        self.needs_redraw = true;
                    }
                    _ => {}
                }
            }

            if self.poll_async() {
                self.needs_redraw = true;
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.is_busy() {
                    if self.spinner.advance() {
                        self.needs_redraw = true;
                    }
                } else {
                    self.spinner.reset();
                }
            }
        }

        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.controller.is_loading()
            || self.pending_preview.is_some()
            || self.pending_download.is_some()
    }

    fn poll_async(&mut self) -> bool {
        let mut changed = self.controller.pump();
        if changed {
            self.after_feed_change();
        }

        if let Some((id, rx)) = self.pending_preview.take() {
            match rx.try_recv() {
                Ok(result) => {
                    self.apply_preview(&id, result);
                    changed = true;
                }
                Err(TryRecvError::Empty) => {
                    self.pending_preview = Some((id, rx));
                }
                Err(TryRecvError::Disconnected) => {
                    self.preview_notice = Some("Preview worker unavailable.".into());
                    changed = true;
                }
            }
        }

        if let Some((title, rx)) = self.pending_download.take() {
            match rx.try_recv() {
                Ok(result) => {
                    match result {
                        Ok(path) => {
                            self.status_message =
                                Some(format!("Saved \"{}\" to {}", title, path.display()));
                        }
                        Err(err) => {
                            log::warn!("media: download failed: {err:#}");
                            self.status_message = Some("Download failed.".into());
                        }
                    }
                    changed = true;
                }
                Err(TryRecvError::Empty) => {
                    self.pending_download = Some((title, rx));
                }
                Err(TryRecvError::Disconnected) => {
                    self.status_message = Some("Download worker unavailable.".into());
                    changed = true;
                }
            }
        }

        changed
    }

    fn apply_preview(&mut self, id: &str, result: Result<Vec<u8>>) {
        let still_viewing = self
            .controller
            .viewing()
            .map(|item| item.id == id)
            .unwrap_or(false);
        if !still_viewing {
            return;
        }
        match result {
            Ok(bytes) => {
                let image_id = self.next_image_id;
                self.next_image_id = self.next_image_id.wrapping_add(1).max(1);
                match kitty_transmit_inline(&bytes, image_id) {
                    Ok(image) => {
                        self.queue_preview_delete();
                        self.preview = Some(image);
                        self.preview_notice = None;
                    }
                    Err(err) => {
                        log::warn!("media: preview render failed: {err:#}");
                        self.preview_notice = Some("Could not render the image inline.".into());
                    }
                }
            }
            Err(err) => {
                log::warn!("media: preview fetch failed: {err:#}");
                self.preview_notice = Some("Could not load the full image.".into());
            }
        }
    }

    fn after_feed_change(&mut self) {
        let len = self.controller.items().len();
        if len == 0 {
            self.selected = 0;
            self.grid_offset = 0;
        } else if self.selected >= len {
            self.selected = len - 1;
        }
        self.maybe_load_more();
    }

    /// Scroll-driven counterpart of the controller's top-up rule: request the
    /// next page once the selection moves into the last rows of loaded items.
    fn maybe_load_more(&mut self) {
        let len = self.controller.items().len();
        if len == 0 {
            return;
        }
        let remaining = len.saturating_sub(self.selected.saturating_add(1));
        if remaining <= self.grid_cols * GRID_PRELOAD_ROWS {
            self.controller.fetch_page(false);
        }
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if self.input_mode == InputMode::Search {
            self.handle_search_key(code);
            return Ok(false);
        }
        if self.controller.viewing().is_some() {
            return self.handle_overlay_key(code);
        }

        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(self.grid_cols as isize),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-(self.grid_cols as isize)),
            KeyCode::Char('h') | KeyCode::Left => self.move_selection(-1),
            KeyCode::Char('l') | KeyCode::Right => self.move_selection(1),
            KeyCode::Char('g') | KeyCode::Home => {
                self.selected = 0;
                self.grid_offset = 0;
            }
            KeyCode::Char('G') | KeyCode::End => {
                let len = self.controller.items().len();
                self.selected = len.saturating_sub(1);
                self.maybe_load_more();
            }
            KeyCode::Enter => self.open_overlay(),
            KeyCode::Char('s') => self.cycle_sort(),
            KeyCode::Tab => self.cycle_subreddit(1),
            KeyCode::BackTab => self.cycle_subreddit(-1),
            KeyCode::Char('/') => {
                self.search_input = self.controller.query().search.clone();
                self.input_mode = InputMode::Search;
            }
            KeyCode::Char('t') => {
                self.mode = self.mode.toggled();
                self.palette = theme::palette(self.mode);
            }
            KeyCode::Char('r') => {
                self.status_message = None;
                self.controller.refresh();
            }
            KeyCode::Char('d') => self.download_selected(),
            KeyCode::Char('o') => self.open_selected_in_browser()?,
            _ => {}
        }
        Ok(false)
    }

    fn handle_search_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc => {
                self.input_mode = InputMode::Browse;
                self.search_input = self.controller.query().search.clone();
            }
            KeyCode::Enter => {
                self.input_mode = InputMode::Browse;
                self.status_message = None;
                let text = self.search_input.trim().to_string();
                self.controller.set_query(QueryPatch::search(text));
                self.after_query_change();
            }
            KeyCode::Backspace => {
                self.search_input.pop();
            }
            KeyCode::Char(ch) => {
                self.search_input.push(ch);
            }
            _ => {}
        }
    }

    fn handle_overlay_key(&mut self, code: KeyCode) -> Result<bool> {
        match code {
            KeyCode::Esc | KeyCode::Char('q') | KeyCode::Enter => self.close_overlay(),
            KeyCode::Char('d') => self.download_viewed(),
            KeyCode::Char('o') => {
                if let Some(item) = self.controller.viewing().cloned() {
                    self.open_in_browser(&item)?;
                }
            }
            KeyCode::Char('y') => self.copy_viewed_url(),
            _ => {}
        }
        Ok(false)
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        if self.input_mode == InputMode::Search || self.controller.viewing().is_some() {
            return;
        }
        match mouse.kind {
            MouseEventKind::ScrollDown => self.move_selection(self.grid_cols as isize),
            MouseEventKind::ScrollUp => self.move_selection(-(self.grid_cols as isize)),
            _ => {}
        }
    }

    fn move_selection(&mut self, delta: isize) {
        let len = self.controller.items().len();
        if len == 0 {
            return;
        }
        let current = self.selected as isize;
        let next = (current + delta).clamp(0, len as isize - 1);
        self.selected = next as usize;
        self.maybe_load_more();
    }

    fn cycle_sort(&mut self) {
        let current = self.controller.query().sort;
        let index = SORT_CYCLE
            .iter()
            .position(|sort| *sort == current)
            .unwrap_or(0);
        let next = SORT_CYCLE[(index + 1) % SORT_CYCLE.len()];
        self.status_message = None;
        self.controller.set_query(QueryPatch::sort(next));
        self.after_query_change();
    }

    fn cycle_subreddit(&mut self, step: isize) {
        if self.subreddits.is_empty() {
            return;
        }
        let current = self.controller.query().subreddit.clone();
        let len = self.subreddits.len() as isize;
        let index = self
            .subreddits
            .iter()
            .position(|name| name.eq_ignore_ascii_case(&current))
            .unwrap_or(0) as isize;
        let next = (index + step).rem_euclid(len) as usize;
        let name = self.subreddits[next].clone();
        self.status_message = None;
        self.controller.set_query(QueryPatch::subreddit(name));
        self.after_query_change();
    }

    fn after_query_change(&mut self) {
        self.selected = 0;
        self.grid_offset = 0;
        self.close_overlay();
    }

    fn open_overlay(&mut self) {
        let Some(item) = self.controller.items().get(self.selected).cloned() else {
            return;
        };
        self.queue_preview_delete();
        self.preview_notice = None;
        self.pending_preview = None;
        if is_kitty_terminal() {
            if let Some(media) = &self.media {
                self.pending_preview = Some((item.id.clone(), media.fetch_image(&item.full_url)));
            } else {
                self.preview_notice = Some("Image workers are not available.".into());
            }
        } else {
            self.preview_notice = Some(
                "Inline preview needs a Kitty-protocol terminal; set WALLFEED_FORCE_KITTY=1 to override."
                    .into(),
            );
        }
        self.controller.select(Some(item));
    }

    fn close_overlay(&mut self) {
        self.queue_preview_delete();
        self.pending_preview = None;
        self.preview_notice = None;
        self.preview_origin = None;
        self.controller.select(None);
    }

    fn queue_preview_delete(&mut self) {
        if let Some(image) = self.preview.take() {
            self.kitty_deletes.push(image.delete_sequence());
        }
    }

    fn download_selected(&mut self) {
        let Some(item) = self.controller.items().get(self.selected).cloned() else {
            return;
        };
        self.start_download(&item);
    }

    fn download_viewed(&mut self) {
        let Some(item) = self.controller.viewing().cloned() else {
            return;
        };
        self.start_download(&item);
    }

    fn start_download(&mut self, item: &GalleryItem) {
        if self.pending_download.is_some() {
            self.status_message = Some("A download is already running.".into());
            return;
        }
        let Some(media) = &self.media else {
            self.status_message = Some("Image workers are not available.".into());
            return;
        };
        self.status_message = Some(format!("Downloading {}...", media::file_name_for(&item.full_url)));
        self.pending_download = Some((item.title.clone(), media.download(item)));
    }

    fn open_selected_in_browser(&mut self) -> Result<()> {
        let Some(item) = self.controller.items().get(self.selected).cloned() else {
            return Ok(());
        };
        self.open_in_browser(&item)
    }

    fn open_in_browser(&mut self, item: &GalleryItem) -> Result<()> {
        match webbrowser::open(&item.full_url) {
            Ok(()) => {
                self.status_message = Some("Opened in browser.".into());
            }
            Err(err) => {
                log::warn!("ui: browser open failed: {err}");
                self.status_message = Some("Could not open a browser.".into());
            }
        }
        Ok(())
    }

    fn copy_viewed_url(&mut self) {
        let Some(item) = self.controller.viewing() else {
            return;
        };
        let url = item.full_url.clone();
        match Clipboard::new().and_then(|mut clipboard| clipboard.set_text(url)) {
            Ok(()) => {
                self.status_message = Some("Image link copied.".into());
            }
            Err(err) => {
                log::warn!("ui: clipboard copy failed: {err}");
                self.status_message = Some("Clipboard is not available.".into());
            }
        }
    }

    fn draw(&mut self, frame: &mut Frame) {
        let area = frame.size();
        frame.render_widget(
            Block::default().style(Style::default().bg(self.palette.bg)),
            area,
        );

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(4),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(area);

        self.draw_header(frame, chunks[0]);
        self.draw_grid(frame, chunks[1]);
        self.draw_status(frame, chunks[2]);

        if self.controller.viewing().is_some() {
            self.draw_overlay(frame, area);
        } else {
            self.preview_origin = None;
        }
    }

    fn draw_header(&mut self, frame: &mut Frame, area: Rect) {
        let query = self.controller.query();
        let title_style = Style::default()
            .fg(self.palette.text_primary)
            .add_modifier(Modifier::BOLD);
        let label_style = Style::default().fg(self.palette.text_secondary);
        let value_style = Style::default().fg(self.palette.accent);

        let mut controls = vec![
            Span::styled("r/", label_style),
            Span::styled(query.subreddit.clone(), value_style),
            Span::styled("  sort ", label_style),
            Span::styled(query.sort.label(), value_style),
            Span::styled("  theme ", label_style),
            Span::styled(self.mode.label(), value_style),
            Span::styled("  search ", label_style),
        ];
        if self.input_mode == InputMode::Search {
            controls.push(Span::styled(
                format!("{}█", self.search_input),
                Style::default()
                    .fg(self.palette.text_primary)
                    .add_modifier(Modifier::UNDERLINED),
            ));
        } else if query.search.is_empty() {
            controls.push(Span::styled("(none)", label_style));
        } else {
            controls.push(Span::styled(query.search.clone(), value_style));
        }

        let hints = if self.input_mode == InputMode::Search {
            "enter apply · esc cancel"
        } else {
            "tab subreddit · s sort · / search · t theme · enter view · d save · r refresh · q quit"
        };

        let lines = vec![
            Line::from(Span::styled("Wallfeed — Reddit Wallpapers", title_style)),
            Line::from(controls),
            Line::from(Span::styled(hints, label_style)),
        ];
        let header = Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .borders(Borders::BOTTOM)
                    .border_style(Style::default().fg(self.palette.border_idle)),
            );
        frame.render_widget(header, area);
    }

    fn draw_grid(&mut self, frame: &mut Frame, area: Rect) {
        let cols = (area.width / CARD_WIDTH).max(1) as usize;
        let rows = (area.height / CARD_HEIGHT).max(1) as usize;
        self.grid_cols = cols;
        self.grid_rows = rows;
        self.controller.set_viewport(cols * rows);

        let items = self.controller.items();
        if items.is_empty() {
            let notice = if self.controller.is_loading() {
                format!("{} LOADING...", self.spinner.frame())
            } else {
                "No wallpapers matched this feed.".to_string()
            };
            let paragraph = Paragraph::new(notice)
                .alignment(Alignment::Center)
                .style(Style::default().fg(self.palette.text_secondary));
            let centered = centered_rect(60, 20, area);
            frame.render_widget(paragraph, centered);
            return;
        }

        let len = items.len();
        if self.selected >= len {
            self.selected = len - 1;
        }
        let selected_row = self.selected / cols;
        if selected_row < self.grid_offset {
            self.grid_offset = selected_row;
        } else if selected_row >= self.grid_offset + rows {
            self.grid_offset = selected_row + 1 - rows;
        }

        let items = self.controller.items().to_vec();
        for visible_row in 0..rows {
            let row = self.grid_offset + visible_row;
            for col in 0..cols {
                let index = row * cols + col;
                let Some(item) = items.get(index) else {
                    continue;
                };
                let x = area.x + (col as u16) * CARD_WIDTH;
                let y = area.y + (visible_row as u16) * CARD_HEIGHT;
                if x + CARD_WIDTH > area.x + area.width || y + CARD_HEIGHT > area.y + area.height {
                    continue;
                }
                let cell = Rect::new(x, y, CARD_WIDTH, CARD_HEIGHT);
                self.draw_card(frame, cell, item, index == self.selected);
            }
        }
    }

    fn draw_card(&self, frame: &mut Frame, cell: Rect, item: &GalleryItem, selected: bool) {
        let border = if selected {
            Style::default().fg(self.palette.border_focused)
        } else {
            Style::default().fg(self.palette.border_idle)
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(border)
            .style(Style::default().bg(self.palette.panel_bg));
        let inner = block.inner(cell);
        frame.render_widget(block, cell);

        let inner_width = inner.width.max(1) as usize;
        let wrapped = wrap(
            item.title.trim(),
            WrapOptions::new(inner_width).break_words(true),
        );
        let mut lines: Vec<Line> = Vec::new();
        for (index, piece) in wrapped.iter().take(2).enumerate() {
            // Two visible title lines; the second gains an ellipsis when the
            // title keeps going.
            let mut text = piece.to_string();
            if index == 1 && wrapped.len() > 2 {
                text = truncate_to_width(&format!("{text}…"), inner_width);
            }
            lines.push(Line::from(Span::styled(
                text,
                Style::default().fg(self.palette.text_primary),
            )));
        }
        while lines.len() < 2 {
            lines.push(Line::from(""));
        }
        let marker = if selected { "▸ " } else { "" };
        lines.push(Line::from(Span::styled(
            format!("{marker}[{}]", item.extension_label()),
            Style::default().fg(self.palette.text_secondary),
        )));

        let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false });
        frame.render_widget(paragraph, inner);
    }

    fn draw_status(&mut self, frame: &mut Frame, area: Rect) {
        let text = match &self.status_message {
            Some(message) => message.clone(),
            None => self.feed_summary(),
        };
        let paragraph = Paragraph::new(truncate_to_width(&text, area.width.max(1) as usize))
            .style(Style::default().fg(self.palette.text_secondary));
        frame.render_widget(paragraph, area);
    }

    fn feed_summary(&self) -> String {
        let query = self.controller.query();
        let mut summary = format!(
            "r/{} ({}) — {} wallpapers",
            query.subreddit,
            query.sort.label(),
            self.controller.items().len()
        );
        if !query.search.is_empty() {
            summary.push_str(&format!(" matching \"{}\"", query.search));
        }
        if self.controller.is_loading() {
            summary.push_str(&format!("  {} loading...", self.spinner.frame()));
        } else if self.controller.end_of_feed() {
            summary.push_str("  · end of feed");
        }
        summary
    }

    fn draw_overlay(&mut self, frame: &mut Frame, area: Rect) {
        let Some(item) = self.controller.viewing().cloned() else {
            return;
        };
        let overlay = centered_rect(84, 85, area);
        frame.render_widget(Clear, overlay);

        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.palette.border_focused))
            .style(Style::default().bg(self.palette.overlay_scrim))
            .title(Span::styled(
                truncate_to_width(&item.title, overlay.width.saturating_sub(4) as usize),
                Style::default()
                    .fg(self.palette.text_primary)
                    .add_modifier(Modifier::BOLD),
            ));
        let inner = block.inner(overlay);
        frame.render_widget(block, overlay);

        let sections = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(2)])
            .split(inner);
        let image_area = sections[0];
        let footer = sections[1];

        self.preview_origin = None;
        if let Some(image) = &self.preview {
            let cols = image.cols.clamp(1, i32::from(image_area.width.max(1))) as u16;
            let rows = image.rows.clamp(1, i32::from(image_area.height.max(1))) as u16;
            let x = image_area.x + image_area.width.saturating_sub(cols) / 2;
            let y = image_area.y + image_area.height.saturating_sub(rows) / 2;
            self.preview_origin = Some((x, y));
        } else {
            let notice = match &self.preview_notice {
                Some(notice) => notice.clone(),
                None => format!("{} Fetching full image...", self.spinner.frame()),
            };
            let lines = vec![
                Line::from(Span::styled(
                    notice,
                    Style::default().fg(self.palette.text_secondary),
                )),
                Line::from(""),
                Line::from(Span::styled(
                    truncate_to_width(&item.full_url, image_area.width.max(1) as usize),
                    Style::default().fg(self.palette.text_secondary),
                )),
            ];
            let paragraph = Paragraph::new(lines)
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true });
            let centered = centered_rect(90, 40, image_area);
            frame.render_widget(paragraph, centered);
        }

        let mut footer_lines = vec![Line::from(Span::styled(
            "d download · o open in browser · y copy link · esc close",
            Style::default().fg(self.palette.accent),
        ))];
        if self.pending_download.is_some() {
            footer_lines.push(Line::from(Span::styled(
                format!("{} downloading...", self.spinner.frame()),
                Style::default().fg(self.palette.text_secondary),
            )));
        } else {
            footer_lines.push(Line::from(Span::styled(
                format!("[{}] {}", item.extension_label(), media::file_name_for(&item.full_url)),
                Style::default().fg(self.palette.text_secondary),
            )));
        }
        let paragraph = Paragraph::new(footer_lines).alignment(Alignment::Center);
        frame.render_widget(paragraph, footer);
    }

    fn flush_inline_images(&mut self, backend: &mut CrosstermBackend<Stdout>) -> Result<()> {
        for sequence in self.kitty_deletes.drain(..) {
            backend.execute(Print(sequence))?;
        }
        if let (Some(image), Some((x, y))) = (self.preview.as_mut(), self.preview_origin) {
            image.ensure_transmitted(backend)?;
            backend.execute(MoveTo(x, y))?;
            backend.execute(Print(image.placement_sequence()))?;
        }
        backend.flush()?;
        Ok(())
    }
}
