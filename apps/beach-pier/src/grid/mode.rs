use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CursorShape {
    #[default]
    Block,
    Horizontal,
    Vertical,
}

impl CursorShape {
    pub fn parse(value: &str) -> Self {
        match value {
            "horizontal" => CursorShape::Horizontal,
            "vertical" => CursorShape::Vertical,
            _ => CursorShape::Block,
        }
    }

    /// Shape used when the editor never sent a style for a mode.
    pub fn for_mode_name(mode: &str) -> Self {
        match mode {
            "normal" | "visual" | "select" => CursorShape::Block,
            "insert" => CursorShape::Vertical,
            "replace" => CursorShape::Horizontal,
            name if name.starts_with("cmdline") => CursorShape::Horizontal,
            _ => CursorShape::Block,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CursorShape::Block => "block",
            CursorShape::Horizontal => "horizontal",
            CursorShape::Vertical => "vertical",
        }
    }
}

/// Cursor parameters for one entry of `mode_info_set`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModeStyle {
    pub name: Option<String>,
    pub short_name: Option<String>,
    pub shape: CursorShape,
    pub cell_percentage: u32,
    pub blink_wait_ms: u64,
    pub blink_on_ms: u64,
    pub blink_off_ms: u64,
}

impl ModeStyle {
    pub fn inferred(mode: &str) -> Self {
        Self {
            shape: CursorShape::for_mode_name(mode),
            ..Self::default()
        }
    }

    /// Visible and hidden phase lengths, or `None` when the cursor should not
    /// blink. Each phase uses its own duration.
    pub fn blink_phases(&self) -> Option<(Duration, Duration)> {
        if self.blink_on_ms == 0 || self.blink_off_ms == 0 {
            return None;
        }
        Some((
            Duration::from_millis(self.blink_on_ms),
            Duration::from_millis(self.blink_off_ms),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_inferred_from_mode_names() {
        assert_eq!(CursorShape::for_mode_name("normal"), CursorShape::Block);
        assert_eq!(CursorShape::for_mode_name("visual"), CursorShape::Block);
        assert_eq!(CursorShape::for_mode_name("insert"), CursorShape::Vertical);
        assert_eq!(CursorShape::for_mode_name("replace"), CursorShape::Horizontal);
        assert_eq!(CursorShape::for_mode_name("cmdline_normal"), CursorShape::Horizontal);
        assert_eq!(CursorShape::for_mode_name("operator"), CursorShape::Block);
    }

    #[test]
    fn blink_needs_both_phases() {
        let mut style = ModeStyle {
            blink_on_ms: 250,
            ..ModeStyle::default()
        };
        assert_eq!(style.blink_phases(), None);

        style.blink_off_ms = 400;
        assert_eq!(
            style.blink_phases(),
            Some((Duration::from_millis(250), Duration::from_millis(400)))
        );
    }
}
