//! Canonical screen state for one editor session.
//!
//! [`GridState`] is plain data plus transition logic: the decoder mutates it
//! in response to redraw events and nothing here performs I/O. Only the
//! primary grid is modeled.

pub mod highlight;
pub mod mode;
pub mod width;

pub use highlight::{resolve_color, DefaultColors, HighlightAttrs, HighlightTable, Rgb};
pub use mode::{CursorShape, ModeStyle};
pub use width::is_double_width;

/// Grid id the editor uses for the global grid when `ext_multigrid` is off.
pub const PRIMARY_GRID: u64 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    pub text: String,
    pub fg: Rgb,
    pub bg: Rgb,
    pub hl_id: u64,
    /// The next column belongs to this glyph and must not be drawn on its own.
    pub double_width: bool,
}

impl Cell {
    pub fn blank(defaults: DefaultColors) -> Self {
        Self {
            text: " ".to_string(),
            fg: defaults.fg,
            bg: defaults.bg,
            hl_id: 0,
            double_width: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor {
    pub row: usize,
    pub col: usize,
    pub visible: bool,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            row: 0,
            col: 0,
            visible: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GridState {
    rows: usize,
    cols: usize,
    cells: Vec<Cell>,
    cursor: Cursor,
    mode: String,
    mode_index: usize,
    highlights: HighlightTable,
    mode_styles: Vec<ModeStyle>,
}

impl Default for GridState {
    fn default() -> Self {
        Self::new()
    }
}

impl GridState {
    /// An empty 0x0 grid; the first `grid_resize` gives it dimensions.
    pub fn new() -> Self {
        Self {
            rows: 0,
            cols: 0,
            cells: Vec::new(),
            cursor: Cursor::default(),
            mode: String::new(),
            mode_index: 0,
            highlights: HighlightTable::new(),
            mode_styles: Vec::new(),
        }
    }

    pub fn with_size(rows: usize, cols: usize) -> Self {
        let mut grid = Self::new();
        grid.resize(rows, cols);
        grid
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn mode_index(&self) -> usize {
        self.mode_index
    }

    pub fn highlights(&self) -> &HighlightTable {
        &self.highlights
    }

    pub fn highlights_mut(&mut self) -> &mut HighlightTable {
        &mut self.highlights
    }

    pub fn mode_styles(&self) -> &[ModeStyle] {
        &self.mode_styles
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.cells.get(row * self.cols + col)
    }

    pub fn row(&self, row: usize) -> Option<&[Cell]> {
        if row >= self.rows {
            return None;
        }
        let start = row * self.cols;
        Some(&self.cells[start..start + self.cols])
    }

    /// Row contents as text, skipping the placeholder half of wide glyphs.
    pub fn row_text(&self, row: usize) -> Option<String> {
        let cells = self.row(row)?;
        let mut text = String::with_capacity(cells.len());
        let mut skip_next = false;
        for cell in cells {
            if skip_next {
                skip_next = false;
                continue;
            }
            text.push_str(&cell.text);
            skip_next = cell.double_width;
        }
        Some(text)
    }

    /// Reinitializes the matrix to blank cells; prior content is discarded.
    pub fn resize(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.cells = vec![Cell::blank(self.highlights.defaults()); rows * cols];
        self.clamp_cursor();
    }

    /// Blanks every cell, keeping the current dimensions.
    pub fn clear(&mut self) {
        let blank = Cell::blank(self.highlights.defaults());
        for cell in &mut self.cells {
            cell.clone_from(&blank);
        }
    }

    /// Writes one cell with the resolved colors of `hl_id`. Out of bounds
    /// writes are dropped and reported as `false`.
    pub fn put(&mut self, row: usize, col: usize, text: &str, hl_id: u64) -> bool {
        if row >= self.rows || col >= self.cols {
            return false;
        }
        let (fg, bg) = self.highlights.resolve(hl_id).paint_colors();
        let cell = &mut self.cells[row * self.cols + col];
        cell.text.clear();
        cell.text.push_str(text);
        cell.fg = fg;
        cell.bg = bg;
        cell.hl_id = hl_id;
        cell.double_width = is_double_width(text);
        true
    }

    /// Moves the rectangle `[top, bottom) x [left, right)` vertically.
    ///
    /// Positive `delta` moves content up and blanks rows at the bottom of the
    /// region; negative moves it down and blanks rows at the top.
    pub fn scroll(&mut self, top: usize, bottom: usize, left: usize, right: usize, delta: i64) {
        let bottom = bottom.min(self.rows);
        let right = right.min(self.cols);
        if delta == 0 || top >= bottom || left >= right {
            return;
        }

        let height = bottom - top;
        let shift = delta.unsigned_abs() as usize;
        let blank = Cell::blank(self.highlights.defaults());

        if shift >= height {
            for row in top..bottom {
                self.blank_span(row, left, right, &blank);
            }
            return;
        }

        if delta > 0 {
            for row in top..bottom - shift {
                self.copy_span(row + shift, row, left, right);
            }
            for row in bottom - shift..bottom {
                self.blank_span(row, left, right, &blank);
            }
        } else {
            for row in (top + shift..bottom).rev() {
                self.copy_span(row - shift, row, left, right);
            }
            for row in top..top + shift {
                self.blank_span(row, left, right, &blank);
            }
        }
    }

    /// Places the cursor, converting the editor's logical column into a
    /// visual one: each double-width cell before the target counts twice.
    pub fn goto(&mut self, row: usize, col: usize) {
        let row = row.min(self.rows.saturating_sub(1));
        let mut visual = 0usize;
        if let Some(cells) = self.row(row) {
            for cell in cells.iter().take(col) {
                visual += if cell.double_width { 2 } else { 1 };
            }
            visual += col.saturating_sub(cells.len());
        } else {
            visual = col;
        }
        self.cursor.row = row;
        self.cursor.col = visual.min(self.cols.saturating_sub(1));
    }

    pub fn set_cursor_visible(&mut self, visible: bool) {
        self.cursor.visible = visible;
    }

    pub fn set_mode_styles(&mut self, styles: Vec<ModeStyle>) {
        self.mode_styles = styles;
    }

    pub fn mode_style(&self, index: usize) -> Option<&ModeStyle> {
        self.mode_styles.get(index)
    }

    /// Records the active mode and returns the cursor style it selects.
    pub fn set_mode(&mut self, name: &str, index: usize) -> ModeStyle {
        self.mode.clear();
        self.mode.push_str(name);
        self.mode_index = index;
        self.mode_style(index)
            .cloned()
            .unwrap_or_else(|| ModeStyle::inferred(name))
    }

    fn clamp_cursor(&mut self) {
        self.cursor.row = self.cursor.row.min(self.rows.saturating_sub(1));
        self.cursor.col = self.cursor.col.min(self.cols.saturating_sub(1));
    }

    fn copy_span(&mut self, from_row: usize, to_row: usize, left: usize, right: usize) {
        for col in left..right {
            let src = self.cells[from_row * self.cols + col].clone();
            self.cells[to_row * self.cols + col] = src;
        }
    }

    fn blank_span(&mut self, row: usize, left: usize, right: usize, blank: &Cell) {
        for col in left..right {
            self.cells[row * self.cols + col].clone_from(blank);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill_rows(grid: &mut GridState) {
        for row in 0..grid.rows() {
            let glyph = char::from(b'a' + row as u8).to_string();
            for col in 0..grid.cols() {
                grid.put(row, col, &glyph, 0);
            }
        }
    }

    fn column(grid: &GridState, col: usize) -> String {
        (0..grid.rows())
            .map(|row| grid.cell(row, col).unwrap().text.clone())
            .collect()
    }

    #[test]
    fn resize_blanks_and_clamps_cursor() {
        let mut grid = GridState::with_size(10, 20);
        grid.put(2, 2, "x", 0);
        grid.goto(9, 19);
        grid.resize(4, 5);

        assert_eq!((grid.rows(), grid.cols()), (4, 5));
        assert_eq!(grid.cell(2, 2).unwrap().text, " ");
        assert_eq!((grid.cursor().row, grid.cursor().col), (3, 4));
    }

    #[test]
    fn clear_keeps_dimensions() {
        let mut grid = GridState::with_size(3, 3);
        fill_rows(&mut grid);
        grid.clear();
        assert_eq!((grid.rows(), grid.cols()), (3, 3));
        assert_eq!(grid.row_text(1).unwrap(), "   ");
    }

    #[test]
    fn put_out_of_bounds_is_dropped() {
        let mut grid = GridState::with_size(2, 2);
        assert!(!grid.put(2, 0, "x", 0));
        assert!(!grid.put(0, 2, "x", 0));
        assert!(grid.put(1, 1, "x", 0));
    }

    #[test]
    fn scroll_up_blanks_bottom_of_region() {
        let mut grid = GridState::with_size(5, 2);
        fill_rows(&mut grid);
        grid.scroll(1, 4, 0, 2, 1);
        assert_eq!(column(&grid, 0), "acd e");
        assert_eq!(column(&grid, 1), "acd e");
    }

    #[test]
    fn scroll_down_blanks_top_of_region() {
        let mut grid = GridState::with_size(5, 1);
        fill_rows(&mut grid);
        grid.scroll(0, 5, 0, 1, -2);
        assert_eq!(column(&grid, 0), "  abc");
    }

    #[test]
    fn scroll_respects_column_bounds() {
        let mut grid = GridState::with_size(3, 3);
        fill_rows(&mut grid);
        grid.scroll(0, 3, 1, 2, 1);
        assert_eq!(grid.row_text(0).unwrap(), "aba");
        assert_eq!(grid.row_text(2).unwrap(), "c c");
    }

    #[test]
    fn zero_delta_scroll_is_noop() {
        let mut grid = GridState::with_size(4, 3);
        fill_rows(&mut grid);
        let before: Vec<_> = (0..4).map(|r| grid.row_text(r).unwrap()).collect();
        grid.scroll(0, 4, 0, 3, 0);
        let after: Vec<_> = (0..4).map(|r| grid.row_text(r).unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn scroll_then_inverse_restores_all_but_vacated_rows() {
        let mut grid = GridState::with_size(6, 1);
        fill_rows(&mut grid);
        grid.scroll(0, 6, 0, 1, 2);
        grid.scroll(0, 6, 0, 1, -2);
        assert_eq!(column(&grid, 0), "  cdef");
    }

    #[test]
    fn oversized_scroll_blanks_whole_region() {
        let mut grid = GridState::with_size(3, 1);
        fill_rows(&mut grid);
        grid.scroll(0, 3, 0, 1, 7);
        assert_eq!(column(&grid, 0), "   ");
    }

    #[test]
    fn goto_counts_wide_cells_twice() {
        let mut grid = GridState::with_size(2, 10);
        grid.put(0, 0, "中", 0);
        grid.put(0, 1, "a", 0);
        grid.goto(0, 2);
        assert_eq!(grid.cursor().col, 3);

        grid.goto(1, 4);
        assert_eq!(grid.cursor().col, 4);
    }

    #[test]
    fn goto_clamps_to_grid() {
        let mut grid = GridState::with_size(3, 4);
        grid.goto(10, 10);
        assert_eq!((grid.cursor().row, grid.cursor().col), (2, 3));
    }

    #[test]
    fn mode_falls_back_to_inferred_shape() {
        let mut grid = GridState::new();
        let style = grid.set_mode("insert", 3);
        assert_eq!(style.shape, CursorShape::Vertical);
        assert_eq!(grid.mode(), "insert");
        assert_eq!(grid.mode_index(), 3);

        grid.set_mode_styles(vec![ModeStyle::default(), ModeStyle {
            shape: CursorShape::Horizontal,
            cell_percentage: 25,
            ..ModeStyle::default()
        }]);
        let style = grid.set_mode("normal", 1);
        assert_eq!(style.shape, CursorShape::Horizontal);
        assert_eq!(style.cell_percentage, 25);
    }

    #[test]
    fn row_text_skips_wide_placeholder() {
        let mut grid = GridState::with_size(1, 4);
        grid.put(0, 0, "中", 0);
        grid.put(0, 1, "", 0);
        grid.put(0, 2, "x", 0);
        assert_eq!(grid.row_text(0).unwrap(), "中x ");
    }
}
