use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::filter::{Page, category_label, due_label};
use crate::store::{Notice, NoticeLevel};
use crate::task::{Category, Priority, Session, Task};

pub const EMPTY_LIST: &str = "No tasks found";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, page, categories, today))]
    pub fn print_task_page(
        &self,
        page: &Page<&Task>,
        first_row: usize,
        categories: &[Category],
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        self.write_task_page(out, page, first_row, categories, today)
    }

    /// Rows are numbered from `first_row` so numbers stay stable across pages.
    pub fn write_task_page<W: Write>(
        &self,
        mut out: W,
        page: &Page<&Task>,
        first_row: usize,
        categories: &[Category],
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        if page.total_items == 0 {
            writeln!(out, "{EMPTY_LIST}")?;
            writeln!(out, "Create a new task to get started.")?;
            return Ok(());
        }

        let headers = vec![
            "#".to_string(),
            "Done".to_string(),
            "Task".to_string(),
            "Category".to_string(),
            "Priority".to_string(),
            "Due".to_string(),
        ];

        let mut rows = Vec::with_capacity(page.items.len());
        for (offset, task) in page.items.iter().enumerate() {
            let row = self.paint(&(first_row + offset).to_string(), "33");
            let done = if task.completed { "[x]" } else { "[ ]" }.to_string();
            let title = if task.completed {
                self.paint(&task.title, "9")
            } else {
                task.title.clone()
            };
            let category = category_label(task, categories).to_string();
            let priority = self.paint_priority(task.priority);
            let due = if task.is_overdue(today) {
                self.paint(&format!("{} !", due_label(task)), "31")
            } else {
                due_label(task)
            };

            rows.push(vec![row, done, title, category, priority, due]);
        }

        write_table(&mut out, headers, rows)?;
        writeln!(
            out,
            "page {}/{} ({} tasks)",
            page.number, page.total_pages, page.total_items
        )?;
        Ok(())
    }

    #[tracing::instrument(skip(self, task, categories, today))]
    pub fn print_task_info(
        &self,
        task: &Task,
        categories: &[Category],
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        writeln!(
            out,
            "description {}",
            task.description.clone().unwrap_or_default()
        )?;
        writeln!(
            out,
            "status      {}",
            if task.completed { "completed" } else { "pending" }
        )?;
        writeln!(out, "priority    {}", task.priority)?;
        writeln!(out, "category    {}", category_label(task, categories))?;
        writeln!(out, "due         {}", due_label(task))?;
        if task.is_overdue(today) {
            writeln!(out, "            {}", self.paint("overdue", "31"))?;
        }
        writeln!(out, "position    {}", task.position)?;
        writeln!(out, "created     {}", task.created_at.format("%Y-%m-%d %H:%M UTC"))?;

        Ok(())
    }

    pub fn print_categories(&self, categories: &[Category]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if categories.is_empty() {
            writeln!(out, "No categories yet")?;
            return Ok(());
        }
        let rows = categories
            .iter()
            .map(|c| vec![c.name.clone(), c.id.to_string()])
            .collect();
        write_table(&mut out, vec!["Name".to_string(), "Id".to_string()], rows)
    }

    pub fn print_session(&self, session: Option<&Session>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        match session {
            Some(session) => {
                let name = session
                    .profile
                    .display_name()
                    .map(|name| format!(" ({name})"))
                    .unwrap_or_default();
                writeln!(out, "{}{name}", session.email)?;
                writeln!(out, "user id {}", session.user_id)?;
            }
            None => writeln!(out, "not signed in")?,
        }
        Ok(())
    }

    /// Success notices go to stdout, errors to stderr.
    pub fn print_notices(&self, notices: &[Notice]) -> anyhow::Result<()> {
        for notice in notices {
            match notice.level {
                NoticeLevel::Success => {
                    writeln!(io::stdout().lock(), "{}", self.paint(&notice.message, "32"))?
                }
                NoticeLevel::Error => writeln!(io::stderr().lock(), "{}", notice.message)?,
            }
        }
        Ok(())
    }

    fn paint_priority(&self, priority: Priority) -> String {
        let label = match priority {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        };
        match priority {
            Priority::High => self.paint(label, "31"),
            Priority::Medium => self.paint(label, "33"),
            Priority::Low => label.to_string(),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate() {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    use super::{EMPTY_LIST, Renderer, strip_ansi};
    use crate::filter::{UNCATEGORIZED, paginate};
    use crate::task::{Priority, Task, TaskDraft};

    fn render(tasks: &[Task], today: NaiveDate) -> String {
        let refs: Vec<&Task> = tasks.iter().collect();
        let page = paginate(&refs, 1, 10);
        let mut buf = Vec::new();
        Renderer::plain()
            .write_task_page(&mut buf, &page, 1, &[], today)
            .expect("render");
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn empty_list_has_its_own_state() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).expect("date");
        let text = render(&[], today);
        assert!(text.starts_with(EMPTY_LIST));
    }

    #[test]
    fn rows_show_fallback_labels_and_overdue_marker() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).expect("date");
        let late = Task::from_draft(
            TaskDraft {
                title: "file taxes".to_string(),
                description: None,
                due_date: NaiveDate::from_ymd_opt(2026, 3, 1),
                priority: Priority::High,
                category_id: Some(Uuid::new_v4()),
                user_id: Uuid::nil(),
                position: 0,
            },
            Utc::now(),
        );
        let mut undated = late.clone();
        undated.id = Uuid::new_v4();
        undated.title = "someday".to_string();
        undated.due_date = None;

        let text = render(&[late, undated], today);
        assert!(text.contains(UNCATEGORIZED));
        assert!(text.contains("2026-03-01 !"));
        assert!(text.contains("No due date"));
        assert!(text.contains("page 1/1 (2 tasks)"));
    }

    #[test]
    fn strips_color_codes_for_width() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m"), "red");
    }
}
