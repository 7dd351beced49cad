//! Logical key names to terminal control sequences.
//!
//! Browsers and other frontends report keys by name (`ArrowUp`, `F5`, ...);
//! the process on the PTY expects the byte sequence a real terminal would
//! emit. Unmapped keys yield `None` and the caller sends nothing.

/// Translate a key name plus modifier set into its control sequence.
///
/// Key and modifier names are matched case-insensitively. `Ctrl` combined
/// with an arrow selects the distinct `ESC [1;5X` variant; `Shift`+`Tab`
/// becomes the reverse-tab sequence.
pub fn map_special_key(key: &str, modifiers: &[String]) -> Option<&'static str> {
    let k = key.to_ascii_lowercase();
    let ctrl = modifiers.iter().any(|m| m.eq_ignore_ascii_case("ctrl"));
    let shift = modifiers.iter().any(|m| m.eq_ignore_ascii_case("shift"));

    if ctrl {
        match k.as_str() {
            "arrowup" => return Some("\x1b[1;5A"),
            "arrowdown" => return Some("\x1b[1;5B"),
            "arrowright" => return Some("\x1b[1;5C"),
            "arrowleft" => return Some("\x1b[1;5D"),
            _ => {}
        }
    }

    if shift && k == "tab" {
        return Some("\x1b[Z");
    }

    match k.as_str() {
        "arrowup" => Some("\x1b[A"),
        "arrowdown" => Some("\x1b[B"),
        "arrowright" => Some("\x1b[C"),
        "arrowleft" => Some("\x1b[D"),
        "enter" => Some("\r"),
        "escape" => Some("\x1b"),
        "tab" => Some("\t"),
        "backspace" => Some("\x7f"),
        "delete" => Some("\x1b[3~"),
        "home" => Some("\x1b[H"),
        "end" => Some("\x1b[F"),
        "pageup" => Some("\x1b[5~"),
        "pagedown" => Some("\x1b[6~"),
        "f1" => Some("\x1bOP"),
        "f2" => Some("\x1bOQ"),
        "f3" => Some("\x1bOR"),
        "f4" => Some("\x1bOS"),
        "f5" => Some("\x1b[15~"),
        "f6" => Some("\x1b[17~"),
        "f7" => Some("\x1b[18~"),
        "f8" => Some("\x1b[19~"),
        "f9" => Some("\x1b[20~"),
        "f10" => Some("\x1b[21~"),
        "f11" => Some("\x1b[23~"),
        "f12" => Some("\x1b[24~"),
        _ => None,
    }
}
