use std::cmp::Ordering;
use std::str::FromStr;

use tracing::trace;
use uuid::Uuid;

use crate::error::AppError;
use crate::task::{
  Category,
  Priority,
  Task
};

pub const UNCATEGORIZED: &str =
  "Uncategorized";
pub const NO_DUE_DATE: &str =
  "No due date";

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default,
)]
pub enum StatusFilter {
  #[default]
  All,
  Completed,
  Pending
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default,
)]
pub enum CategoryFilter {
  #[default]
  All,
  Only(Uuid)
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default,
)]
pub enum PriorityFilter {
  #[default]
  All,
  Only(Priority)
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default,
)]
pub enum SortOrder {
  #[default]
  Manual,
  Due,
  Priority,
  Title,
  Created
}

#[derive(
  Debug, Clone, PartialEq, Eq, Default,
)]
pub struct FilterState {
  pub search:   String,
  pub status:   StatusFilter,
  pub category: CategoryFilter,
  pub priority: PriorityFilter,
  pub sort:     SortOrder
}

/// A single retain condition. Every
/// active selector contributes one.
#[derive(Debug, Clone)]
pub enum Pred {
  TitleContains(String),
  Completed(bool),
  CategoryEq(Uuid),
  PriorityEq(Priority)
}

impl Pred {
  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    match self {
      | Pred::TitleContains(needle) => {
        fold_text(&task.title)
          .contains(needle.as_str())
      }
      | Pred::Completed(flag) => {
        task.completed == *flag
      }
      | Pred::CategoryEq(id) => {
        task.category_id == Some(*id)
      }
      | Pred::PriorityEq(priority) => {
        task.priority == *priority
      }
    }
  }
}

impl FilterState {
  pub fn reset(&mut self) {
    *self = FilterState::default();
  }

  pub fn predicates(&self) -> Vec<Pred> {
    let mut preds = Vec::new();

    let needle = fold_text(&self.search);
    if !needle.is_empty() {
      preds
        .push(Pred::TitleContains(needle));
    }

    match self.status {
      | StatusFilter::All => {}
      | StatusFilter::Completed => {
        preds.push(Pred::Completed(true))
      }
      | StatusFilter::Pending => {
        preds.push(Pred::Completed(false))
      }
    }

    if let CategoryFilter::Only(id) =
      self.category
    {
      preds.push(Pred::CategoryEq(id));
    }

    if let PriorityFilter::Only(priority) =
      self.priority
    {
      preds
        .push(Pred::PriorityEq(priority));
    }

    preds
  }
}

/// Projects the collection through the
/// filter state. The input order is kept
/// unless a sort other than manual is set.
#[tracing::instrument(skip_all, fields(total = tasks.len()))]
pub fn visible_tasks<'a>(
  tasks: &'a [Task],
  state: &FilterState
) -> Vec<&'a Task> {
  let preds = state.predicates();
  let mut out: Vec<&Task> = tasks
    .iter()
    .filter(|task| {
      preds.iter().all(|p| p.matches(task))
    })
    .collect();

  sort_visible(&mut out, state.sort);

  trace!(
    visible = out.len(),
    "filter pipeline applied"
  );
  out
}

fn sort_visible(
  tasks: &mut [&Task],
  order: SortOrder
) {
  match order {
    | SortOrder::Manual => {}
    | SortOrder::Due => {
      tasks.sort_by(|a, b| {
        cmp_due(a, b)
      })
    }
    | SortOrder::Priority => {
      tasks.sort_by(|a, b| {
        b.priority
          .rank()
          .cmp(&a.priority.rank())
      })
    }
    | SortOrder::Title => {
      tasks.sort_by(|a, b| {
        fold_text(&a.title)
          .cmp(&fold_text(&b.title))
      })
    }
    | SortOrder::Created => {
      tasks.sort_by_key(|t| t.created_at)
    }
  }
}

fn cmp_due(
  a: &Task,
  b: &Task
) -> Ordering {
  match (a.due_date, b.due_date) {
    | (Some(x), Some(y)) => x.cmp(&y),
    | (Some(_), None) => Ordering::Less,
    | (None, Some(_)) => {
      Ordering::Greater
    }
    | (None, None) => Ordering::Equal
  }
}

/// Accent- and case-insensitive form
/// used for search matching. Only
/// accented Latin letters are
/// transliterated; other scripts and
/// symbols are kept as they are.
pub fn fold_text(input: &str) -> String {
  let mut out =
    String::with_capacity(input.len());
  for ch in input.trim().chars() {
    if is_combining_mark(ch) {
      continue;
    }
    match latin_base(ch) {
      | Some(ascii) => out.push_str(ascii),
      | None => out.push(ch)
    }
  }
  out.to_lowercase()
}

fn latin_base(
  ch: char
) -> Option<&'static str> {
  let accented_latin = matches!(
    ch as u32,
    0x00C0..=0x00D6
      | 0x00D8..=0x00F6
      | 0x00F8..=0x024F
      | 0x1E00..=0x1EFF
  );
  if !accented_latin {
    return None;
  }
  deunicode::deunicode_char(ch)
    .filter(|ascii| !ascii.is_empty())
}

/// Combining diacritics, as left behind
/// by decomposed input (`e` + U+0301).
fn is_combining_mark(ch: char) -> bool {
  matches!(
    ch as u32,
    0x0300..=0x036F
      | 0x1AB0..=0x1AFF
      | 0x1DC0..=0x1DFF
      | 0x20D0..=0x20FF
      | 0xFE20..=0xFE2F
  )
}

pub fn category_label<'a>(
  task: &Task,
  categories: &'a [Category]
) -> &'a str {
  task
    .category_id
    .and_then(|id| {
      categories
        .iter()
        .find(|c| c.id == id)
    })
    .map(|c| c.name.as_str())
    .unwrap_or(UNCATEGORIZED)
}

pub fn due_label(task: &Task) -> String {
  task
    .due_date
    .map(|d| {
      d.format("%Y-%m-%d").to_string()
    })
    .unwrap_or_else(|| {
      NO_DUE_DATE.to_string()
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
  pub number:      usize,
  pub total_pages: usize,
  pub total_items: usize,
  pub items:       Vec<T>
}

/// Slices a 1-based page out of `items`.
/// Pages past the end come back empty.
pub fn paginate<T: Clone>(
  items: &[T],
  page: usize,
  page_size: usize
) -> Page<T> {
  let size = page_size.max(1);
  let number = page.max(1);
  let total_pages =
    items.len().div_ceil(size).max(1);
  let start = (number - 1)
    .saturating_mul(size)
    .min(items.len());
  let end =
    start.saturating_add(size).min(items.len());

  Page {
    number,
    total_pages,
    total_items: items.len(),
    items: items[start..end].to_vec()
  }
}

impl FromStr for StatusFilter {
  type Err = AppError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "all" => Ok(StatusFilter::All),
      | "completed" | "done" => {
        Ok(StatusFilter::Completed)
      }
      | "pending" | "open" => {
        Ok(StatusFilter::Pending)
      }
      | other => {
        Err(AppError::Validation(format!(
          "unknown status filter: \
           {other}"
        )))
      }
    }
  }
}

impl FromStr for PriorityFilter {
  type Err = AppError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    if s.trim().eq_ignore_ascii_case("all")
    {
      return Ok(PriorityFilter::All);
    }
    s.parse::<Priority>()
      .map(PriorityFilter::Only)
  }
}

impl FromStr for SortOrder {
  type Err = AppError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "manual" | "position" => {
        Ok(SortOrder::Manual)
      }
      | "due" | "due_date" => {
        Ok(SortOrder::Due)
      }
      | "priority" => {
        Ok(SortOrder::Priority)
      }
      | "title" => Ok(SortOrder::Title),
      | "created" | "created_at" => {
        Ok(SortOrder::Created)
      }
      | other => {
        Err(AppError::Validation(format!(
          "unknown sort order: {other}"
        )))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    Duration,
    NaiveDate,
    TimeZone,
    Utc
  };
  use uuid::Uuid;

  use super::{
    CategoryFilter,
    FilterState,
    PriorityFilter,
    SortOrder,
    StatusFilter,
    UNCATEGORIZED,
    category_label,
    fold_text,
    paginate,
    visible_tasks
  };
  use crate::task::{
    Category,
    Priority,
    Task,
    TaskDraft
  };

  fn task(
    title: &str,
    position: i64
  ) -> Task {
    let now = Utc
      .with_ymd_and_hms(
        2026, 2, 16, 5, 0, 0
      )
      .unwrap();
    Task::from_draft(
      TaskDraft {
        title: title.to_string(),
        description: None,
        due_date: None,
        priority: Priority::Low,
        category_id: None,
        user_id: Uuid::nil(),
        position
      },
      now + Duration::minutes(position)
    )
  }

  fn titles(tasks: &[&Task]) -> Vec<String> {
    tasks
      .iter()
      .map(|t| t.title.clone())
      .collect()
  }

  #[test]
  fn default_state_keeps_input_order() {
    let tasks = vec![
      task("c", 0),
      task("a", 1),
      task("b", 2),
    ];
    let out = visible_tasks(
      &tasks,
      &FilterState::default()
    );
    assert_eq!(titles(&out), vec![
      "c", "a", "b"
    ]);
  }

  #[test]
  fn search_is_case_insensitive_substring()
  {
    let tasks = vec![
      task("Buy groceries", 0),
      task("Call mom", 1),
      task("Grocery list", 2),
    ];
    let state = FilterState {
      search: "groc".to_string(),
      ..FilterState::default()
    };
    let out =
      visible_tasks(&tasks, &state);
    assert_eq!(titles(&out), vec![
      "Buy groceries",
      "Grocery list"
    ]);
  }

  #[test]
  fn search_ignores_accents_and_description()
  {
    let mut dessert =
      task("Crème brûlée", 0);
    dessert.description =
      Some("plain".to_string());
    let mut other = task("Shopping", 1);
    other.description =
      Some("creme fraiche".to_string());
    let tasks = vec![dessert, other];

    let state = FilterState {
      search: "CREME".to_string(),
      ..FilterState::default()
    };
    let out =
      visible_tasks(&tasks, &state);
    assert_eq!(titles(&out), vec![
      "Crème brûlée"
    ]);
  }

  #[test]
  fn predicates_commute() {
    let work = Uuid::new_v4();
    let mut a = task("report a", 0);
    a.category_id = Some(work);
    a.priority = Priority::High;
    let mut b = task("report b", 1);
    b.category_id = Some(work);
    b.completed = true;
    b.priority = Priority::High;
    let mut c = task("misc", 2);
    c.priority = Priority::High;
    let tasks = vec![a, b, c];

    let state = FilterState {
      search: "report".to_string(),
      status: StatusFilter::Pending,
      category: CategoryFilter::Only(
        work
      ),
      priority: PriorityFilter::Only(
        Priority::High
      ),
      sort: SortOrder::Manual
    };

    let forward = state.predicates();
    let mut backward = forward.clone();
    backward.reverse();

    let apply = |preds: &[super::Pred]| {
      tasks
        .iter()
        .filter(|t| {
          preds.iter().all(|p| p.matches(t))
        })
        .map(|t| t.id)
        .collect::<Vec<_>>()
    };

    assert_eq!(
      apply(&forward),
      apply(&backward)
    );
    assert_eq!(apply(&forward).len(), 1);
  }

  #[test]
  fn empty_result_is_not_an_error() {
    let tasks = vec![task("a", 0)];
    let state = FilterState {
      status: StatusFilter::Completed,
      ..FilterState::default()
    };
    assert!(
      visible_tasks(&tasks, &state)
        .is_empty()
    );
  }

  #[test]
  fn due_sort_puts_undated_last_and_is_stable()
   {
    let mut a = task("a", 0);
    let b = task("b", 1);
    let mut c = task("c", 2);
    let d = task("d", 3);
    a.due_date =
      NaiveDate::from_ymd_opt(2026, 5, 1);
    c.due_date =
      NaiveDate::from_ymd_opt(2026, 4, 1);
    let tasks = vec![a, b, c, d];

    let state = FilterState {
      sort: SortOrder::Due,
      ..FilterState::default()
    };
    let out =
      visible_tasks(&tasks, &state);
    assert_eq!(titles(&out), vec![
      "c", "a", "b", "d"
    ]);
  }

  #[test]
  fn reapplying_state_is_idempotent() {
    let tasks = vec![
      task("alpha", 0),
      task("beta", 1),
    ];
    let state = FilterState {
      search: "a".to_string(),
      sort: SortOrder::Title,
      ..FilterState::default()
    };
    let first = titles(&visible_tasks(
      &tasks, &state
    ));
    let second = titles(&visible_tasks(
      &tasks, &state
    ));
    assert_eq!(first, second);
  }

  #[test]
  fn unresolved_category_is_uncategorized()
  {
    let now = Utc::now();
    let work = Category::new(
      "Work".to_string(),
      Uuid::nil(),
      now
    );
    let mut known = task("a", 0);
    known.category_id = Some(work.id);
    let mut dangling = task("b", 1);
    dangling.category_id =
      Some(Uuid::new_v4());

    let cats = vec![work];
    assert_eq!(
      category_label(&known, &cats),
      "Work"
    );
    assert_eq!(
      category_label(&dangling, &cats),
      UNCATEGORIZED
    );
  }

  #[test]
  fn pagination_counts_pages() {
    let items: Vec<u32> =
      (0..23).collect();
    let last = paginate(&items, 3, 10);
    assert_eq!(last.total_pages, 3);
    assert_eq!(last.items, vec![
      20, 21, 22
    ]);

    let past = paginate(&items, 9, 10);
    assert!(past.items.is_empty());

    let empty: Vec<u32> = vec![];
    assert_eq!(
      paginate(&empty, 1, 10).total_pages,
      1
    );
  }

  #[test]
  fn non_latin_search_is_not_transliterated()
  {
    let tasks = vec![
      task("Dong Hai trip", 0),
      task("unicorn party", 1),
      task("東京旅行", 2),
      task("🦄 sticker order", 3),
    ];

    let search = |text: &str| {
      let state = FilterState {
        search: text.to_string(),
        ..FilterState::default()
      };
      titles(&visible_tasks(&tasks, &state))
    };

    assert_eq!(search("東"), vec!["東京旅行"]);
    assert_eq!(search("🦄"), vec![
      "🦄 sticker order"
    ]);
    assert_eq!(search("unicorn"), vec![
      "unicorn party"
    ]);
  }

  #[test]
  fn folding_strips_latin_accents_only() {
    assert_eq!(
      fold_text("Crème Brûlée"),
      "creme brulee"
    );
    assert_eq!(
      fold_text("Cre\u{300}me"),
      "creme"
    );
    assert_eq!(fold_text("Straße"), "strasse");
    assert_eq!(fold_text("東京"), "東京");
  }
}
