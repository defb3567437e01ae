use aily_core::types::{HostId, SessionName};
use aily_host::ControlKey;

/// A recognised `!` command from a thread message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New {
        name: SessionName,
        host: Option<HostId>,
    },
    Kill {
        name: SessionName,
    },
    Sessions,
    Key(ControlKey),
    /// Recognised command word with unusable arguments; the reason is posted
    /// back to the thread.
    Invalid(String),
}

/// Parse the first token of the first line, case-sensitive. `None` means
/// the text is not a recognised command and should be injected verbatim.
pub fn parse(text: &str) -> Option<Command> {
    let first_line = text.lines().next().unwrap_or("");
    let mut tokens = first_line.split_whitespace();
    let word = tokens.next()?;
    if !word.starts_with('!') {
        return None;
    }

    match word {
        "!new" => {
            let Some(raw_name) = tokens.next() else {
                return Some(Command::Invalid("usage: !new <name> [host]".into()));
            };
            let name = match SessionName::parse(raw_name) {
                Ok(n) => n,
                Err(e) => return Some(Command::Invalid(e.to_string())),
            };
            let host = tokens.next().map(HostId::from);
            Some(Command::New { name, host })
        }
        "!kill" => {
            let Some(raw_name) = tokens.next() else {
                return Some(Command::Invalid("usage: !kill <name>".into()));
            };
            match SessionName::parse(raw_name) {
                Ok(name) => Some(Command::Kill { name }),
                Err(e) => Some(Command::Invalid(e.to_string())),
            }
        }
        "!sessions" => Some(Command::Sessions),
        "!c" => Some(Command::Key(ControlKey::Interrupt)),
        "!d" => Some(Command::Key(ControlKey::Eof)),
        "!z" => Some(Command::Key(ControlKey::Suspend)),
        "!q" => Some(Command::Key(ControlKey::LiteralQ)),
        "!enter" => Some(Command::Key(ControlKey::Submit)),
        "!esc" => Some(Command::Key(ControlKey::Escape)),
        // unrecognised !word: treated as text to inject
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse("restart the build"), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn commands_match_first_token_of_first_line() {
        assert_eq!(parse("!sessions"), Some(Command::Sessions));
        assert_eq!(parse("!c and more"), Some(Command::Key(ControlKey::Interrupt)));
        // command word on a later line does not count
        assert_eq!(parse("hello\n!sessions"), None);
    }

    #[test]
    fn commands_are_case_sensitive() {
        assert_eq!(parse("!Sessions"), None);
        assert_eq!(parse("!KILL x"), None);
    }

    #[test]
    fn new_parses_name_and_optional_host() {
        assert_eq!(
            parse("!new deploy-1"),
            Some(Command::New {
                name: SessionName::parse("deploy-1").unwrap(),
                host: None
            })
        );
        assert_eq!(
            parse("!new deploy-1 build-host"),
            Some(Command::New {
                name: SessionName::parse("deploy-1").unwrap(),
                host: Some(HostId::from("build-host"))
            })
        );
    }

    #[test]
    fn malformed_arguments_are_invalid_not_injected() {
        assert!(matches!(parse("!new"), Some(Command::Invalid(_))));
        assert!(matches!(parse("!new bad.name"), Some(Command::Invalid(_))));
        assert!(matches!(parse("!kill"), Some(Command::Invalid(_))));
    }

    #[test]
    fn keystroke_shortcuts_map() {
        assert_eq!(parse("!enter"), Some(Command::Key(ControlKey::Submit)));
        assert_eq!(parse("!esc"), Some(Command::Key(ControlKey::Escape)));
        assert_eq!(parse("!q"), Some(Command::Key(ControlKey::LiteralQ)));
        assert_eq!(parse("!d"), Some(Command::Key(ControlKey::Eof)));
        assert_eq!(parse("!z"), Some(Command::Key(ControlKey::Suspend)));
    }

    #[test]
    fn unknown_bang_word_injects_as_text() {
        assert_eq!(parse("!frobnicate"), None);
    }
}
