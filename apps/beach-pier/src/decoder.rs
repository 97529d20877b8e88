//! Redraw event decoding.
//!
//! The editor sends `redraw` notifications whose params are a list of
//! batches shaped `[kind, args, args, ...]`; the editor coalesces several
//! events of one kind into a single batch. [`EventDecoder`] applies every
//! argument tuple in order to a private working grid and publishes it only
//! when a `flush` arrives, so consumers of [`EventDecoder::grid`] never see a
//! half-applied update.

use rmpv::Value;
use tracing::trace;

use crate::grid::{
    resolve_color, CursorShape, GridState, HighlightAttrs, ModeStyle, PRIMARY_GRID,
};

/// Side effects of a batch that the presentation layer reacts to.
#[derive(Clone, Debug, PartialEq)]
pub enum UiEvent {
    /// The working grid was published.
    Flush,
    /// Mode changed; the cursor blink cycle restarts with this style.
    CursorStyle { mode: String, style: ModeStyle },
    FontChanged { font: String, size: Option<f32> },
    LineSpace(i64),
}

#[derive(Debug, Default)]
pub struct EventDecoder {
    working: GridState,
    committed: GridState,
    flushes: u64,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The grid as of the most recent `flush`.
    pub fn grid(&self) -> &GridState {
        &self.committed
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    /// Applies the params of one `redraw` notification.
    pub fn apply_redraw(&mut self, params: &[Value]) -> Vec<UiEvent> {
        let mut events = Vec::new();
        for batch in params {
            self.apply_batch(batch, &mut events);
        }
        events
    }

    /// Applies a single `[kind, args...]` batch.
    pub fn apply_batch(&mut self, batch: &Value, events: &mut Vec<UiEvent>) {
        let Some(items) = batch.as_array() else {
            return;
        };
        let Some((kind, tuples)) = items.split_first() else {
            return;
        };
        let Some(kind) = kind.as_str() else {
            return;
        };

        match kind {
            "flush" => {
                self.committed = self.working.clone();
                self.flushes += 1;
                events.push(UiEvent::Flush);
                return;
            }
            "busy_start" => {
                self.working.set_cursor_visible(false);
                return;
            }
            "busy_stop" => {
                self.working.set_cursor_visible(true);
                return;
            }
            _ => {}
        }

        for tuple in tuples {
            let args = tuple.as_array().map(Vec::as_slice).unwrap_or(&[]);
            match kind {
                "grid_resize" => self.grid_resize(args),
                "grid_line" => self.grid_line(args),
                "grid_scroll" => self.grid_scroll(args),
                "grid_cursor_goto" => self.grid_cursor_goto(args),
                "grid_clear" => self.grid_clear(args),
                "default_colors_set" => self.default_colors_set(args),
                "hl_attr_define" => self.hl_attr_define(args),
                "mode_info_set" => self.mode_info_set(args),
                "mode_change" => self.mode_change(args, events),
                "option_set" => self.option_set(args, events),
                "win_viewport" | "hl_group_set" | "chdir" => {}
                other => trace!(kind = other, "ignoring redraw event"),
            }
        }
    }

    fn grid_resize(&mut self, args: &[Value]) {
        let (Some(grid), Some(width), Some(height)) =
            (arg_u64(args, 0), arg_usize(args, 1), arg_usize(args, 2))
        else {
            return;
        };
        if grid != PRIMARY_GRID {
            return;
        }
        self.working.resize(height, width);
    }

    fn grid_line(&mut self, args: &[Value]) {
        let (Some(grid), Some(row), Some(col_start)) =
            (arg_u64(args, 0), arg_usize(args, 1), arg_usize(args, 2))
        else {
            return;
        };
        if grid != PRIMARY_GRID || row >= self.working.rows() {
            return;
        }
        let Some(runs) = args.get(3).and_then(Value::as_array) else {
            return;
        };

        let mut col = col_start;
        let mut hl_id = 0u64;
        for run in runs {
            let (text, repeat) = match run {
                Value::Array(parts) => {
                    let text = parts.first().and_then(Value::as_str).unwrap_or("");
                    if let Some(id) = parts.get(1).and_then(Value::as_u64) {
                        hl_id = id;
                    }
                    let repeat = parts.get(2).and_then(Value::as_u64).unwrap_or(1);
                    (text, repeat)
                }
                Value::String(text) => (text.as_str().unwrap_or(""), 1),
                _ => continue,
            };
            let room = self.working.cols().saturating_sub(col) as u64;
            for _ in 0..repeat.min(room) {
                self.working.put(row, col, text, hl_id);
                col = col.saturating_add(1);
            }
        }
    }

    fn grid_scroll(&mut self, args: &[Value]) {
        let Some(grid) = arg_u64(args, 0) else {
            return;
        };
        if grid != PRIMARY_GRID {
            return;
        }
        let (Some(top), Some(bottom), Some(left), Some(right), Some(rows)) = (
            arg_usize(args, 1),
            arg_usize(args, 2),
            arg_usize(args, 3),
            arg_usize(args, 4),
            arg_i64(args, 5),
        ) else {
            return;
        };
        self.working.scroll(top, bottom, left, right, rows);
    }

    fn grid_cursor_goto(&mut self, args: &[Value]) {
        let (Some(grid), Some(row), Some(col)) =
            (arg_u64(args, 0), arg_usize(args, 1), arg_usize(args, 2))
        else {
            return;
        };
        if grid != PRIMARY_GRID {
            return;
        }
        self.working.goto(row, col);
    }

    fn grid_clear(&mut self, args: &[Value]) {
        if arg_u64(args, 0).is_some_and(|grid| grid != PRIMARY_GRID) {
            return;
        }
        self.working.clear();
    }

    fn default_colors_set(&mut self, args: &[Value]) {
        let fg = resolve_color(arg_i64(args, 0));
        let bg = resolve_color(arg_i64(args, 1));
        self.working.highlights_mut().set_defaults(fg, bg);
    }

    fn hl_attr_define(&mut self, args: &[Value]) {
        let Some(id) = arg_u64(args, 0) else {
            return;
        };
        let mut attrs = HighlightAttrs::default();
        if let Some(map) = args.get(1).and_then(Value::as_map) {
            for (key, value) in map {
                match key.as_str() {
                    Some("foreground") => attrs.fg = resolve_color(value.as_i64()),
                    Some("background") => attrs.bg = resolve_color(value.as_i64()),
                    Some("bold") => attrs.bold = value.as_bool().unwrap_or(false),
                    Some("italic") => attrs.italic = value.as_bool().unwrap_or(false),
                    Some("underline") => attrs.underline = value.as_bool().unwrap_or(false),
                    Some("reverse") => attrs.reverse = value.as_bool().unwrap_or(false),
                    _ => {}
                }
            }
        }
        self.working.highlights_mut().define(id, attrs);
    }

    fn mode_info_set(&mut self, args: &[Value]) {
        let enabled = args.first().and_then(Value::as_bool).unwrap_or(false);
        if !enabled {
            return;
        }
        let Some(infos) = args.get(1).and_then(Value::as_array) else {
            return;
        };
        let styles = infos.iter().map(parse_mode_style).collect();
        self.working.set_mode_styles(styles);
    }

    fn mode_change(&mut self, args: &[Value], events: &mut Vec<UiEvent>) {
        let Some(mode) = args.first().and_then(Value::as_str) else {
            return;
        };
        let index = arg_usize(args, 1).unwrap_or(0);
        let style = self.working.set_mode(mode, index);
        events.push(UiEvent::CursorStyle {
            mode: mode.to_string(),
            style,
        });
    }

    fn option_set(&mut self, args: &[Value], events: &mut Vec<UiEvent>) {
        match args.first().and_then(Value::as_str) {
            Some("guifont") => {
                let value = args.get(1).and_then(Value::as_str).unwrap_or("");
                let (font, size) = parse_guifont(value);
                events.push(UiEvent::FontChanged { font, size });
            }
            Some("linespace") => {
                if let Some(space) = arg_i64(args, 1) {
                    events.push(UiEvent::LineSpace(space));
                }
            }
            _ => {}
        }
    }
}

fn parse_mode_style(info: &Value) -> ModeStyle {
    let mut style = ModeStyle::default();
    let Some(map) = info.as_map() else {
        return style;
    };
    for (key, value) in map {
        match key.as_str() {
            Some("cursor_shape") => {
                style.shape = value.as_str().map(CursorShape::parse).unwrap_or_default();
            }
            Some("cell_percentage") => {
                style.cell_percentage = value.as_u64().unwrap_or(0) as u32;
            }
            Some("blinkwait") => style.blink_wait_ms = value.as_u64().unwrap_or(0),
            Some("blinkon") => style.blink_on_ms = value.as_u64().unwrap_or(0),
            Some("blinkoff") => style.blink_off_ms = value.as_u64().unwrap_or(0),
            Some("name") => style.name = value.as_str().map(str::to_string),
            Some("short_name") => style.short_name = value.as_str().map(str::to_string),
            _ => {}
        }
    }
    style
}

/// Splits `Family Name:h13:b,Fallback:h12` into the first family and its
/// point size.
pub fn parse_guifont(value: &str) -> (String, Option<f32>) {
    let first = value.split(',').next().unwrap_or("").trim();
    let mut parts = first.split(':');
    let font = parts.next().unwrap_or("").replace('_', " ");
    let size = parts
        .filter_map(|part| part.strip_prefix('h'))
        .find_map(|size| size.parse::<f32>().ok());
    (font, size)
}

fn arg_u64(args: &[Value], index: usize) -> Option<u64> {
    args.get(index).and_then(Value::as_u64)
}

fn arg_usize(args: &[Value], index: usize) -> Option<usize> {
    arg_u64(args, index).map(|value| value as usize)
}

fn arg_i64(args: &[Value], index: usize) -> Option<i64> {
    args.get(index).and_then(Value::as_i64)
}
