//! Output formatting for decoded records and library items.
//!
//! Supports multiple output formats: Markdown, JSON, and table view.

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use crate::domain::models::epoch_to_datetime;
use crate::domain::{DomainRecord, MergedItem, MessageRole, StoredItem};

use super::consumer::ApplyStats;
use super::interceptor::InterceptStats;

/// Output format options.
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    /// Human-readable Markdown format.
    #[default]
    Markdown,
    /// JSON format for programmatic use.
    Json,
    /// Compact table listing.
    Table,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            _ => Err(format!("Unknown format: {s}. Use: markdown, json, table")),
        }
    }
}

/// Formats any serializable value as pretty JSON.
///
/// # Errors
/// Returns error if serialization fails.
pub fn format_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

fn format_time(secs: Option<i64>) -> String {
    epoch_to_datetime(secs).map_or_else(
        || "-".to_string(),
        |dt| dt.format("%Y-%m-%d %H:%M").to_string(),
    )
}

fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "👤 **User**",
        MessageRole::Assistant => "🤖 **Assistant**",
        MessageRole::Unknown => "❓ **Unknown**",
    }
}

/// Formats decoded records as Markdown.
pub fn format_records_markdown(records: &[DomainRecord]) -> String {
    let mut out = String::new();

    for record in records {
        let title = if record.title().is_empty() {
            record.id().to_string()
        } else {
            format!("{} ({})", record.title(), record.id())
        };
        out.push_str(&format!("# {title}\n\n**Event:** {}\n", record.kind()));

        match record {
            DomainRecord::ChatParsed(chat) => {
                out.push_str(&format!("**Created:** {}\n", format_time(chat.created_at)));
                out.push_str(&format!("**Messages:** {}\n\n---\n\n", chat.messages.len()));
                for message in &chat.messages {
                    out.push_str(&format!("### {}\n\n", role_label(message.role)));
                    out.push_str(&message.content);
                    out.push_str("\n\n---\n\n");
                }
            }
            DomainRecord::LibraryItem(item) => {
                out.push_str(&format!("**Type:** {}\n", item.kind.as_str()));
                out.push_str(&format!("**Created:** {}\n\n", format_time(item.created_at)));
            }
            DomainRecord::PromptCreated(prompt) | DomainRecord::PromptUpdated(prompt) => {
                out.push_str(&format!("**Created:** {}\n", format_time(prompt.created_at)));
                out.push_str(&format!("**Updated:** {}\n", format_time(prompt.updated_at)));
                if let Some(meta) = &prompt.metadata {
                    out.push_str(&format!("**Metadata:** `{meta}`\n"));
                }
                out.push('\n');
            }
            DomainRecord::PromptDeleted { .. } => out.push('\n'),
        }
    }

    out
}

/// Formats decoded records as a compact table.
pub fn format_records_table(records: &[DomainRecord]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Event", "ID", "Title"]);

    for record in records {
        table.add_row(vec![
            record.kind().to_string(),
            record.id().to_string(),
            truncate(record.title(), 40),
        ]);
    }

    table.to_string()
}

/// Formats reconciled scan results.
pub fn format_merged_table(items: &[MergedItem]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Created", "Type", "API", "Title"]);

    for item in items {
        table.add_row(vec![
            item.id.clone(),
            format_time(item.created_at),
            item.kind.as_str().to_string(),
            if item.is_enriched() { "✓" } else { "-" }.to_string(),
            truncate(&item.title, 40),
        ]);
    }

    table.to_string()
}

/// Formats stored library items.
pub fn format_stored_table(items: &[StoredItem]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Updated", "Type", "Msgs", "Title"]);

    for item in items {
        table.add_row(vec![
            item.id.clone(),
            format_time(item.updated_at.or(item.created_at)),
            item.kind.as_str().to_string(),
            item.messages.len().to_string(),
            truncate(&item.title, 40),
        ]);
    }

    table.to_string()
}

/// Formats replay counters for display.
pub fn format_replay_stats(intercept: &InterceptStats, applied: &ApplyStats) -> String {
    format!(
        "{}\n  Exchanges: {} ({} unmatched)\n  Records published: {}\n  Unrecognized: {}\n  Failed: {}\n  Chats saved: {}\n  Prompts saved: {}\n  Prompts deleted: {}\n  Store errors: {}",
        "📊 Replay".bold(),
        intercept.observed.to_string().cyan(),
        intercept.unmatched,
        intercept.published.to_string().green(),
        intercept.unrecognized.to_string().yellow(),
        intercept.failed.to_string().red(),
        applied.chats.to_string().cyan(),
        applied.prompts_saved.to_string().cyan(),
        applied.prompts_deleted.to_string().cyan(),
        applied.errors.to_string().red()
    )
}

/// Truncates a string to max length with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    let s = s.lines().next().unwrap_or(s);
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatMessage, ChatTranscript, ItemKind};

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world!", 8), "hello...");
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
    }

    #[test]
    fn test_output_format_from_str() {
        assert!(matches!(
            "markdown".parse::<OutputFormat>(),
            Ok(OutputFormat::Markdown)
        ));
        assert!(matches!(
            "json".parse::<OutputFormat>(),
            Ok(OutputFormat::Json)
        ));
        assert!(matches!(
            "table".parse::<OutputFormat>(),
            Ok(OutputFormat::Table)
        ));
        assert!("invalid".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_markdown_lists_messages() {
        let record = DomainRecord::ChatParsed(ChatTranscript {
            id: "c1".into(),
            title: "Hello".into(),
            created_at: Some(0),
            messages: vec![ChatMessage {
                role: MessageRole::Assistant,
                content: "Hi!".into(),
            }],
        });
        let md = format_records_markdown(&[record]);
        assert!(md.starts_with("# Hello (c1)"));
        assert!(md.contains("🤖 **Assistant**"));
        assert!(md.contains("1970-01-01 00:00"));
    }

    #[test]
    fn test_merged_table_marks_enriched_rows() {
        let item = MergedItem {
            id: "a".into(),
            title: "A".into(),
            created_at: Some(1),
            updated_at: Some(1),
            metadata: None,
            kind: ItemKind::Conversation,
        };
        assert!(format_merged_table(&[item]).contains('✓'));
    }
}
