/// Control-key shortcuts. These bypass the two-step submit rule and are sent
/// as single keystrokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKey {
    /// Ctrl-C
    Interrupt,
    /// Ctrl-D
    Eof,
    /// Ctrl-Z
    Suspend,
    /// A literal `q` (pager exit).
    LiteralQ,
    /// Bare submit keystroke.
    Submit,
    /// Bare escape.
    Escape,
}

impl ControlKey {
    /// The multiplexer key name for `send-keys`.
    pub fn key_name(&self) -> &'static str {
        match self {
            ControlKey::Interrupt => "C-c",
            ControlKey::Eof => "C-d",
            ControlKey::Suspend => "C-z",
            ControlKey::LiteralQ => "q",
            ControlKey::Submit => "Enter",
            ControlKey::Escape => "Escape",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_names_match_tmux_vocabulary() {
        assert_eq!(ControlKey::Interrupt.key_name(), "C-c");
        assert_eq!(ControlKey::Eof.key_name(), "C-d");
        assert_eq!(ControlKey::Suspend.key_name(), "C-z");
        assert_eq!(ControlKey::LiteralQ.key_name(), "q");
        assert_eq!(ControlKey::Submit.key_name(), "Enter");
        assert_eq!(ControlKey::Escape.key_name(), "Escape");
    }
}
