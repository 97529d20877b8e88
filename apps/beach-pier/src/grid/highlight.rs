use std::collections::HashMap;
use std::fmt;

/// 24-bit color as sent by the editor in `rgb` mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rgb(pub u32);

impl Rgb {
    pub const WHITE: Rgb = Rgb(0x00ff_ffff);
    pub const BLACK: Rgb = Rgb(0x0000_0000);

    pub fn to_hex(self) -> String {
        format!("#{:06x}", self.0 & 0x00ff_ffff)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.0 & 0x00ff_ffff)
    }
}

/// Normalizes a raw editor color.
///
/// `None` and `-1` mean "inherit the default". Other negative values are the
/// editor's signed 24-bit encoding and are shifted back into range.
pub fn resolve_color(raw: Option<i64>) -> Option<Rgb> {
    match raw {
        None | Some(-1) => None,
        Some(value) if value < 0 => Some(Rgb(((value + 0x100_0000) & 0x00ff_ffff) as u32)),
        Some(value) => Some(Rgb((value & 0x00ff_ffff) as u32)),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DefaultColors {
    pub fg: Rgb,
    pub bg: Rgb,
}

impl Default for DefaultColors {
    fn default() -> Self {
        Self {
            fg: Rgb::WHITE,
            bg: Rgb::BLACK,
        }
    }
}

/// One `hl_attr_define` entry. Missing colors stay `None` so they keep
/// tracking the defaults when those change later.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HighlightAttrs {
    pub fg: Option<Rgb>,
    pub bg: Option<Rgb>,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub reverse: bool,
}

/// Highlight attributes with every color filled in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedHighlight {
    pub fg: Rgb,
    pub bg: Rgb,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub reverse: bool,
}

impl ResolvedHighlight {
    /// Colors as they should be painted, with `reverse` applied.
    pub fn paint_colors(&self) -> (Rgb, Rgb) {
        if self.reverse {
            (self.bg, self.fg)
        } else {
            (self.fg, self.bg)
        }
    }
}

/// Highlight id to attributes. Id 0 always resolves to the defaults; entries
/// are added or overwritten, never removed.
#[derive(Clone, Debug, Default)]
pub struct HighlightTable {
    defaults: DefaultColors,
    entries: HashMap<u64, HighlightAttrs>,
}

impl HighlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defaults(&self) -> DefaultColors {
        self.defaults
    }

    pub fn set_defaults(&mut self, fg: Option<Rgb>, bg: Option<Rgb>) {
        let fallback = DefaultColors::default();
        self.defaults = DefaultColors {
            fg: fg.unwrap_or(fallback.fg),
            bg: bg.unwrap_or(fallback.bg),
        };
    }

    pub fn define(&mut self, id: u64, attrs: HighlightAttrs) {
        if id == 0 {
            return;
        }
        self.entries.insert(id, attrs);
    }

    pub fn get(&self, id: u64) -> Option<&HighlightAttrs> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unknown ids resolve like id 0.
    pub fn resolve(&self, id: u64) -> ResolvedHighlight {
        match self.entries.get(&id) {
            Some(attrs) if id != 0 => ResolvedHighlight {
                fg: attrs.fg.unwrap_or(self.defaults.fg),
                bg: attrs.bg.unwrap_or(self.defaults.bg),
                bold: attrs.bold,
                italic: attrs.italic,
                underline: attrs.underline,
                reverse: attrs.reverse,
            },
            _ => ResolvedHighlight {
                fg: self.defaults.fg,
                bg: self.defaults.bg,
                bold: false,
                italic: false,
                underline: false,
                reverse: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minus_one_inherits_default() {
        assert_eq!(resolve_color(Some(-1)), None);
        assert_eq!(resolve_color(None), None);
    }

    #[test]
    fn negative_colors_wrap_into_24_bits() {
        let color = resolve_color(Some(-7)).unwrap();
        assert_eq!(color, Rgb(0x1000000 - 7));
        assert_eq!(color.to_hex(), "#fffff9");
    }

    #[test]
    fn positive_colors_format_as_six_hex_digits() {
        assert_eq!(resolve_color(Some(0x00ff00)).unwrap().to_hex(), "#00ff00");
        assert_eq!(resolve_color(Some(0)).unwrap().to_string(), "#000000");
    }

    #[test]
    fn missing_colors_follow_current_defaults() {
        let mut table = HighlightTable::new();
        table.define(
            3,
            HighlightAttrs {
                fg: Some(Rgb(0x112233)),
                bold: true,
                ..HighlightAttrs::default()
            },
        );
        table.set_defaults(Some(Rgb(0xaaaaaa)), Some(Rgb(0x101010)));

        let resolved = table.resolve(3);
        assert_eq!(resolved.fg, Rgb(0x112233));
        assert_eq!(resolved.bg, Rgb(0x101010));
        assert!(resolved.bold);

        table.set_defaults(None, Some(Rgb(0x202020)));
        assert_eq!(table.resolve(3).bg, Rgb(0x202020));
        assert_eq!(table.resolve(0).fg, Rgb::WHITE);
    }

    #[test]
    fn id_zero_cannot_be_redefined() {
        let mut table = HighlightTable::new();
        table.define(
            0,
            HighlightAttrs {
                fg: Some(Rgb(0x123456)),
                ..HighlightAttrs::default()
            },
        );
        assert!(table.is_empty());
        assert_eq!(table.resolve(0).fg, table.defaults().fg);
    }

    #[test]
    fn reverse_swaps_paint_colors() {
        let mut table = HighlightTable::new();
        table.define(
            9,
            HighlightAttrs {
                fg: Some(Rgb(0x010101)),
                bg: Some(Rgb(0x020202)),
                reverse: true,
                ..HighlightAttrs::default()
            },
        );
        assert_eq!(table.resolve(9).paint_colors(), (Rgb(0x020202), Rgb(0x010101)));
    }
}
