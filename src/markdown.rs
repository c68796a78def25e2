//! Append-only markdown sink
//!
//! Renders each memory as a block appended to `daily/<YYYY-MM-DD>.md` and,
//! when the memory carries a project tag, to `projects/<project>.md`. The
//! sink never reads existing blocks back; files are created with a header
//! when absent. This layer is the always-available one, so it must not
//! depend on anything but local disk.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::Result;
use crate::types::Memory;

/// Markdown writer for the daily and per-project logs
#[derive(Debug, Clone)]
pub struct MarkdownSink {
    daily_dir: PathBuf,
    projects_dir: PathBuf,
}

impl MarkdownSink {
    pub fn new(config: &Config) -> Self {
        Self {
            daily_dir: config.daily_dir(),
            projects_dir: config.projects_dir(),
        }
    }

    /// Append the rendered block for `memory` to the daily log and, if the
    /// memory belongs to a project, to that project's log.
    pub fn append(&self, memory: &Memory) -> Result<()> {
        let block = render_block(memory);
        let day = memory.created.format("%Y-%m-%d").to_string();

        let daily_path = self.daily_dir.join(format!("{}.md", day));
        append_with_header(&daily_path, &format!("# Memory Log — {}\n\n", day), &block)?;

        if let Some(project) = memory.project.as_deref() {
            let project_path = self.projects_dir.join(format!("{}.md", safe_name(project)));
            append_with_header(
                &project_path,
                &format!("# Project: {}\n\n", project),
                &block,
            )?;
        }

        Ok(())
    }
}

/// Render one memory as its markdown block.
///
/// The block layout is a stable contract consumed by humans and by the
/// session tooling; optional lines appear only when the field is set.
pub fn render_block(memory: &Memory) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "## [{}] {}\n",
        memory.memory_type.to_uppercase(),
        memory.summary
    ));
    out.push_str(&format!("- **ID:** `{}`\n", memory.id));

    let stars = "★".repeat(memory.importance.clamp(0, 10) as usize);
    out.push_str(&format!(
        "- **Importance:** {} ({}/10)\n",
        stars, memory.importance
    ));
    out.push_str(&format!(
        "- **Time:** {}\n",
        memory.created.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    ));

    if let Some(project) = memory.project.as_deref() {
        out.push_str(&format!("- **Project:** {}\n", project));
    }
    if !memory.entities.is_empty() {
        let shown: Vec<&str> = memory.entities.iter().take(8).map(String::as_str).collect();
        out.push_str(&format!("- **Entities:** {}\n", shown.join(", ")));
    }
    if !memory.tags.is_empty() {
        let tagged: Vec<String> = memory.tags.iter().map(|t| format!("#{}", t)).collect();
        out.push_str(&format!("- **Tags:** {}\n", tagged.join(", ")));
    }
    out.push_str(&format!("- **Confidence:** {}\n", memory.confidence));
    if let Some(days) = memory.decay_days {
        out.push_str(&format!("- **Expires:** {} days\n", days));
    }
    if let Some(prev) = memory.supersedes.as_deref() {
        out.push_str(&format!("- **Supersedes:** `{}`\n", prev));
    }
    if let Some(channel) = memory.source_channel.as_deref() {
        match memory.source_message_id.as_deref() {
            Some(msg) => out.push_str(&format!("- **Source:** {} ({})\n", channel, msg)),
            None => out.push_str(&format!("- **Source:** {}\n", channel)),
        }
    }

    out.push_str(&format!("\n{}\n\n---\n\n", memory.content));
    out
}

fn append_with_header(path: &Path, header: &str, block: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let is_new = !path.exists();
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if is_new {
        file.write_all(header.as_bytes())?;
    }
    file.write_all(block.as_bytes())?;
    Ok(())
}

/// Keep project filenames on one path segment.
fn safe_name(project: &str) -> String {
    project
        .chars()
        .map(|c| if c == '/' || c == '\\' { '-' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn sample_memory() -> Memory {
        Memory {
            id: "abc-123".to_string(),
            content: "Decided to use Postgres over MySQL".to_string(),
            summary: "Decided to use Postgres".to_string(),
            memory_type: "decision".to_string(),
            importance: 3,
            confidence: 0.8,
            decay_days: None,
            project: None,
            tags: vec![],
            entities: vec![],
            created: Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap(),
            updated: Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap(),
            session_id: None,
            source: None,
            source_channel: None,
            source_message_id: None,
            supersedes: None,
        }
    }

    #[test]
    fn block_format_is_stable() {
        let block = render_block(&sample_memory());
        assert_eq!(
            block,
            "## [DECISION] Decided to use Postgres\n\
             - **ID:** `abc-123`\n\
             - **Importance:** ★★★ (3/10)\n\
             - **Time:** 2026-08-01T12:00:00Z\n\
             - **Confidence:** 0.8\n\
             \n\
             Decided to use Postgres over MySQL\n\
             \n\
             ---\n\
             \n"
        );
    }

    #[test]
    fn optional_lines_render_when_set() {
        let mut memory = sample_memory();
        memory.project = Some("eva".to_string());
        memory.entities = vec!["postgres".into(), "mysql".into()];
        memory.tags = vec!["infra".into()];
        memory.decay_days = Some(30);
        memory.supersedes = Some("old-id".into());
        memory.source_channel = Some("slack".into());
        memory.source_message_id = Some("m42".into());

        let block = render_block(&memory);
        assert!(block.contains("- **Project:** eva\n"));
        assert!(block.contains("- **Entities:** postgres, mysql\n"));
        assert!(block.contains("- **Tags:** #infra\n"));
        assert!(block.contains("- **Expires:** 30 days\n"));
        assert!(block.contains("- **Supersedes:** `old-id`\n"));
        assert!(block.contains("- **Source:** slack (m42)\n"));
    }

    #[test]
    fn entities_line_caps_at_eight() {
        let mut memory = sample_memory();
        memory.entities = (0..12).map(|i| format!("e{}", i)).collect();
        let block = render_block(&memory);
        assert!(block.contains("e7"));
        assert!(!block.contains("e8,"));
        assert!(!block.contains("e11"));
    }

    #[test]
    fn daily_file_gets_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_store(dir.path(), "t");
        config.ensure_dirs().unwrap();
        let sink = MarkdownSink::new(&config);

        let memory = sample_memory();
        sink.append(&memory).unwrap();
        sink.append(&memory).unwrap();

        let path = config.daily_dir().join("2026-08-01.md");
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.matches("# Memory Log — 2026-08-01").count(), 1);
        assert_eq!(text.matches("## [DECISION]").count(), 2);
    }

    #[test]
    fn project_log_is_written_when_project_set() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_store(dir.path(), "t");
        config.ensure_dirs().unwrap();
        let sink = MarkdownSink::new(&config);

        let mut memory = sample_memory();
        memory.project = Some("eva/core".to_string());
        sink.append(&memory).unwrap();

        let path = config.projects_dir().join("eva-core.md");
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("# Project: eva/core\n"));
        assert!(text.contains("## [DECISION]"));
    }
}
