//! Rich CLI display for the candidate selector
//!
//! Renders selector views as human-readable terminal output.
//! All output goes to stderr so stdout remains clean for piping.

use colored::Colorize;

use crate::selector::{
    AbortReason, Confirmation, ListMode, Mode, PromptKind, SelectorResult, SelectorView, SlotRow,
    SlotStatus,
};

const TEXT_WIDTH: usize = 200;

/// Truncate `text` to at most `max` characters, marking the cut with `...`.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn format_row(row: &SlotRow) -> String {
    let marker = if row.selected {
        "›".cyan().bold().to_string()
    } else {
        " ".to_string()
    };
    let label = format!("{}. {}", row.index + 1, row.model_label);

    let body = match row.status {
        SlotStatus::Pending => "generating...".dimmed().to_string(),
        SlotStatus::Ready => {
            let first_line = row.text.lines().next().unwrap_or_default();
            let mut text = truncate(first_line, TEXT_WIDTH);
            if row.text.lines().nth(1).is_some() {
                text.push_str(" ¶");
            }
            if row.is_partial {
                format!("{} {}", text, "…".dimmed())
            } else if row.selected {
                text.bold().to_string()
            } else {
                text
            }
        }
        SlotStatus::Error => {
            let error = row.error.as_deref().unwrap_or("failed");
            format!("{} {}", "✗".red().bold(), truncate(error, 100).red())
        }
    };

    let mut stats = Vec::new();
    if row.edited {
        stats.push("edited".to_string());
    }
    if let Some(cost) = row.cost {
        stats.push(format!("${cost:.4}"));
    }
    if let Some(ms) = row.duration_ms {
        #[allow(clippy::cast_precision_loss)]
        let secs = ms as f64 / 1000.0;
        stats.push(format!("{secs:.1}s"));
    }
    let stats = if stats.is_empty() {
        String::new()
    } else {
        format!(" {}", format!("({})", stats.join(" | ")).dimmed())
    };

    format!("{marker} {} {body}{stats}", label.bold())
}

/// Format the whole view as a multi-line block
#[must_use]
pub fn format_view(view: &SelectorView) -> String {
    let mut lines = Vec::new();

    let title = match view.list_mode {
        ListMode::Initial => "Commit message candidates",
        ListMode::Refined => "Refined candidates",
    };
    let progress = if view.is_generating {
        format!("{}/{} ready, generating", view.ready_count, view.total_slots)
    } else {
        format!("{}/{} ready", view.ready_count, view.total_slots)
    };
    lines.push(format!(
        "\n{} {} {}",
        "===".bold().cyan(),
        title.bold().cyan(),
        progress.dimmed()
    ));
    if let Some(hint) = &view.guide_hint {
        lines.push(format!("  {} {hint}", "Guide:".dimmed()));
    }
    lines.push("─".repeat(50).dimmed().to_string());

    lines.extend(view.rows.iter().map(format_row));

    for failure in &view.failures {
        lines.push(format!("  {} {}", "⚠".yellow().bold(), truncate(failure, 100)));
    }
    if let Some(quota) = &view.quota {
        lines.push(format!(
            "  {} {}/{} remaining",
            "Quota:".dimmed(),
            quota.remaining,
            quota.limit
        ));
    }

    lines.push("─".repeat(50).dimmed().to_string());
    match (&view.mode, &view.prompt) {
        (Mode::Prompt, Some(prompt)) => {
            let heading = match prompt.kind {
                PromptKind::Edit => "Edit message",
                PromptKind::Refine => "Refine guidance",
            };
            lines.push(format!("  {}", heading.bold()));
            if !prompt.target_text.is_empty() {
                lines.push(format!("  {}", truncate(&prompt.target_text, TEXT_WIDTH).dimmed()));
            }
            lines.push(
                "  type the text (\\n for newlines), or /cancel"
                    .dimmed()
                    .to_string(),
            );
        }
        _ => lines.push(
            "  [enter] accept  [j/k] move  [1-9] pick  [e]dit  [r]efine  [c]ancel  [q]uit"
                .dimmed()
                .to_string(),
        ),
    }

    lines.join("\n")
}

/// Render the view to stderr
pub fn render_view(view: &SelectorView) {
    eprintln!("{}", format_view(view));
}

/// Render how the session ended to stderr
pub fn render_result(result: &SelectorResult) {
    eprintln!("{}", "─".repeat(50).dimmed());
    match result {
        SelectorResult::Confirm(confirmation) => render_confirmation(confirmation),
        SelectorResult::Abort(AbortReason::Exit) => {
            eprintln!("  {}", "ABORTED".yellow().bold());
        }
        SelectorResult::Abort(AbortReason::Failed(error)) => {
            eprintln!("  {} {}", "FAILED".red().bold(), error.to_string().red());
        }
    }
    eprintln!();
}

fn render_confirmation(confirmation: &Confirmation) {
    let model = confirmation
        .selected_candidate
        .model
        .as_deref()
        .unwrap_or("unknown model");
    let edited = if confirmation.edited { " (edited)" } else { "" };
    eprintln!("  {} {}{edited}", "CONFIRMED".green().bold(), model.bold());

    if let Some(cost) = confirmation.total_cost {
        eprintln!("  {} ${cost:.4} total", "Stats:".dimmed());
    }
}
