use unicode_width::UnicodeWidthChar;

/// Private-use planes that icon fonts (Nerd Fonts, Powerline) draw across two
/// cells even though Unicode leaves their width ambiguous.
const ICON_RANGES: &[(char, char)] = &[
    ('\u{e000}', '\u{f8ff}'),
    ('\u{f0000}', '\u{ffffd}'),
    ('\u{100000}', '\u{10fffd}'),
];

/// Whether a glyph occupies two grid columns, judged by its first codepoint.
pub fn is_double_width(glyph: &str) -> bool {
    glyph.chars().next().is_some_and(is_wide_char)
}

pub fn is_wide_char(ch: char) -> bool {
    UnicodeWidthChar::width(ch) == Some(2)
        || ICON_RANGES
            .iter()
            .any(|&(start, end)| (start..=end).contains(&ch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cjk_is_wide_and_ascii_is_not() {
        assert!(is_double_width("中"));
        assert!(is_double_width("\u{4e2d}"));
        assert!(!is_double_width("A"));
        assert!(!is_double_width(" "));
        assert!(!is_double_width(""));
    }

    #[test]
    fn kana_hangul_and_emoji_are_wide() {
        for ch in ['あ', 'カ', '한', '😀'] {
            assert_eq!(UnicodeWidthChar::width(ch), Some(2), "{ch}");
            assert!(is_wide_char(ch), "{ch}");
        }
        assert!(!is_double_width("é"));
        assert!(!is_double_width("─"));
    }

    #[test]
    fn icon_font_glyphs_are_wide() {
        assert_ne!(UnicodeWidthChar::width('\u{e0b0}'), Some(2));
        assert!(is_double_width("\u{e0b0}"));
        assert!(is_double_width("\u{f8ff}"));
        assert!(is_double_width("\u{f0001}"));
        assert!(is_double_width("\u{10fffd}"));
    }
}
