//! Mouse and scroll translation into editor key notation.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    /// Browser `MouseEvent.button` numbering.
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(MouseButton::Left),
            1 => Some(MouseButton::Middle),
            2 => Some(MouseButton::Right),
            _ => None,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            MouseButton::Left => "Left",
            MouseButton::Middle => "Middle",
            MouseButton::Right => "Right",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MouseAction {
    Press,
    Drag,
    Release,
}

impl MouseAction {
    /// Anything other than `press` or `drag` counts as a release.
    pub fn parse(action: &str) -> Self {
        match action {
            "press" => MouseAction::Press,
            "drag" => MouseAction::Drag,
            _ => MouseAction::Release,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            MouseAction::Press => "Mouse",
            MouseAction::Drag => "Drag",
            MouseAction::Release => "Release",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    /// Unrecognised directions scroll down.
    pub fn parse(direction: &str) -> Self {
        match direction {
            "up" => ScrollDirection::Up,
            "left" => ScrollDirection::Left,
            "right" => ScrollDirection::Right,
            _ => ScrollDirection::Down,
        }
    }
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScrollDirection::Up => "Up",
            ScrollDirection::Down => "Down",
            ScrollDirection::Left => "Left",
            ScrollDirection::Right => "Right",
        };
        f.write_str(name)
    }
}

/// `<LeftMouse><col,row>` and friends. `None` for buttons the editor has no
/// notation for.
pub fn mouse_input(button: i64, action: &str, row: i64, col: i64) -> Option<String> {
    let button = MouseButton::from_index(button)?;
    let action = MouseAction::parse(action);
    Some(format!("<{}{}><{col},{row}>", button.prefix(), action.suffix()))
}

pub fn scroll_input(direction: &str, row: i64, col: i64) -> String {
    format!("<ScrollWheel{}><{col},{row}>", ScrollDirection::parse(direction))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_and_right_buttons() {
        assert_eq!(mouse_input(0, "press", 3, 10).as_deref(), Some("<LeftMouse><10,3>"));
        assert_eq!(mouse_input(0, "drag", 4, 11).as_deref(), Some("<LeftDrag><11,4>"));
        assert_eq!(mouse_input(0, "release", 4, 11).as_deref(), Some("<LeftRelease><11,4>"));
        assert_eq!(mouse_input(2, "press", 0, 0).as_deref(), Some("<RightMouse><0,0>"));
        assert_eq!(mouse_input(2, "drag", 1, 2).as_deref(), Some("<RightDrag><2,1>"));
    }

    #[test]
    fn unknown_action_is_release() {
        assert_eq!(mouse_input(2, "up", 5, 6).as_deref(), Some("<RightRelease><6,5>"));
    }

    #[test]
    fn middle_button() {
        assert_eq!(mouse_input(1, "press", 2, 2).as_deref(), Some("<MiddleMouse><2,2>"));
    }

    #[test]
    fn unknown_button_sends_nothing() {
        assert_eq!(mouse_input(4, "press", 0, 0), None);
        assert_eq!(mouse_input(-1, "press", 0, 0), None);
    }

    #[test]
    fn scroll_directions() {
        assert_eq!(scroll_input("up", 7, 1), "<ScrollWheelUp><1,7>");
        assert_eq!(scroll_input("down", 7, 1), "<ScrollWheelDown><1,7>");
        assert_eq!(scroll_input("left", 0, 9), "<ScrollWheelLeft><9,0>");
        assert_eq!(scroll_input("right", 0, 9), "<ScrollWheelRight><9,0>");
        assert_eq!(scroll_input("sideways", 0, 0), "<ScrollWheelDown><0,0>");
    }
}
