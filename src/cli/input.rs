//! Line-oriented operator commands
//!
//! In list mode each line is a short command; in prompt mode the whole
//! line is the submitted text.

use crate::selector::{Direction, Event, Mode, PromptKind, SelectorFlowContext};

/// Decode one input line against the current mode.
///
/// Returns `None` for lines that are not a command.
#[must_use]
pub fn parse_line(context: &SelectorFlowContext, line: &str) -> Option<Event> {
    let line = line.trim_end_matches(['\r', '\n']);

    if context.mode == Mode::Prompt {
        return Some(match line.trim() {
            "/cancel" => Event::PromptCancel,
            "/quit" => Event::Quit,
            _ => Event::PromptSubmit {
                text: unescape_newlines(line),
            },
        });
    }

    let command = line.trim();
    match command {
        "" | "y" => Some(Event::Confirm {
            override_text: None,
        }),
        "j" | "down" => Some(Event::Navigate(Direction::Down)),
        "k" | "up" => Some(Event::Navigate(Direction::Up)),
        "e" | "edit" => Some(Event::OpenPrompt(PromptKind::Edit)),
        "r" | "refine" => Some(Event::OpenPrompt(PromptKind::Refine)),
        "c" | "cancel" => Some(Event::CancelGeneration),
        "q" | "quit" => Some(Event::Quit),
        _ => command
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .map(Event::ChooseIndex),
    }
}

/// Turn the two-character sequence `\n` into a newline.
fn unescape_newlines(text: &str) -> String {
    text.replace("\\n", "\n")
}
