use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::{AppError, AppResult};
use crate::task::Task;

/// Removes the element at `from` and reinserts it at `to`.
pub fn move_item<T>(items: &mut Vec<T>, from: usize, to: usize) -> AppResult<()> {
    let len = items.len();
    if from >= len || to >= len {
        return Err(AppError::Validation(format!(
            "cannot move row {} to row {}: list has {len} rows",
            from + 1,
            to + 1
        )));
    }
    if from == to {
        return Ok(());
    }
    let item = items.remove(from);
    items.insert(to, item);
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderPlan {
    /// Full collection order after the move.
    pub order: Vec<Uuid>,
    /// New position per task, equal to its index in `order`.
    pub positions: Vec<(Uuid, i64)>,
}

/// Computes the new manual order of the whole collection after moving one
/// row of the visible list. Hidden tasks keep their slots; the slots held by
/// visible tasks are refilled in the moved order.
///
/// Returns `None` when `from == to`.
pub fn plan_reorder(
    collection: &[Task],
    visible: &[Uuid],
    from: usize,
    to: usize,
) -> AppResult<Option<ReorderPlan>> {
    let mut moved = visible.to_vec();
    move_item(&mut moved, from, to)?;
    if from == to {
        return Ok(None);
    }

    let in_view: HashSet<Uuid> = visible.iter().copied().collect();
    let known: HashSet<Uuid> = collection.iter().map(|t| t.id).collect();
    if let Some(missing) = visible.iter().find(|id| !known.contains(id)) {
        return Err(AppError::NotFound(format!(
            "task {missing} is not in the collection"
        )));
    }

    let mut refill = moved.into_iter();
    let order: Vec<Uuid> = collection
        .iter()
        .map(|task| {
            if in_view.contains(&task.id) {
                refill.next().unwrap_or(task.id)
            } else {
                task.id
            }
        })
        .collect();

    let positions = order
        .iter()
        .enumerate()
        .map(|(idx, id)| (*id, idx as i64))
        .collect();

    Ok(Some(ReorderPlan { order, positions }))
}

/// Rearranges `tasks` to the plan's order and rewrites their positions.
pub fn apply_plan(tasks: &mut Vec<Task>, plan: &ReorderPlan) {
    let mut by_id: HashMap<Uuid, Task> = tasks.drain(..).map(|t| (t.id, t)).collect();
    for (id, position) in &plan.positions {
        if let Some(mut task) = by_id.remove(id) {
            task.position = *position;
            tasks.push(task);
        }
    }
    // anything the plan did not mention stays at the end
    let mut rest: Vec<Task> = by_id.into_values().collect();
    crate::task::sort_manual(&mut rest);
    tasks.extend(rest);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReorderOutcome {
    pub attempted: usize,
    pub failed: Vec<(Uuid, String)>,
}

impl ReorderOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.attempted - self.failed.len()
    }
}

/// Writes every position individually. A failed write does not stop the
/// rest, and nothing is rolled back.
#[tracing::instrument(skip(backend, positions), fields(owner = %owner, count = positions.len()))]
pub async fn persist_positions<B: Backend>(
    backend: &B,
    owner: Uuid,
    positions: &[(Uuid, i64)],
) -> ReorderOutcome {
    let mut outcome = ReorderOutcome {
        attempted: positions.len(),
        failed: Vec::new(),
    };

    for (id, position) in positions {
        match backend.set_task_position(*id, owner, *position).await {
            Ok(()) => debug!(task = %id, position, "position persisted"),
            Err(err) => {
                warn!(task = %id, position, error = %err, "failed to persist position");
                outcome.failed.push((*id, err.to_string()));
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    use super::{apply_plan, move_item, plan_reorder};
    use crate::task::{Priority, Task, TaskDraft};

    fn tasks(n: i64) -> Vec<Task> {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                Task::from_draft(
                    TaskDraft {
                        title: format!("t{i}"),
                        description: None,
                        due_date: None,
                        priority: Priority::Low,
                        category_id: None,
                        user_id: Uuid::nil(),
                        position: i,
                    },
                    base + Duration::seconds(i),
                )
            })
            .collect()
    }

    fn titles(tasks: &[Task]) -> Vec<String> {
        tasks.iter().map(|t| t.title.clone()).collect()
    }

    #[test]
    fn move_is_not_a_swap() {
        let mut items = vec![0, 1, 2, 3];
        move_item(&mut items, 3, 1).unwrap();
        assert_eq!(items, vec![0, 3, 1, 2]);

        move_item(&mut items, 0, 3).unwrap();
        assert_eq!(items, vec![3, 1, 2, 0]);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut items = vec![0, 1];
        assert!(move_item(&mut items, 2, 0).is_err());
        assert_eq!(items, vec![0, 1]);
    }

    #[test]
    fn plan_reassigns_contiguous_positions() {
        let mut all = tasks(4);
        let visible: Vec<Uuid> = all.iter().map(|t| t.id).collect();

        let plan = plan_reorder(&all, &visible, 3, 1).unwrap().expect("plan");
        apply_plan(&mut all, &plan);

        assert_eq!(titles(&all), vec!["t0", "t3", "t1", "t2"]);
        let positions: Vec<i64> = all.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn same_index_is_a_no_op() {
        let all = tasks(3);
        let visible: Vec<Uuid> = all.iter().map(|t| t.id).collect();
        assert!(plan_reorder(&all, &visible, 1, 1).unwrap().is_none());
    }

    #[test]
    fn hidden_tasks_keep_their_slots() {
        let mut all = tasks(5);
        // visible: t0, t2, t4 (t1 and t3 filtered out)
        let visible = vec![all[0].id, all[2].id, all[4].id];

        let plan = plan_reorder(&all, &visible, 2, 0).unwrap().expect("plan");
        apply_plan(&mut all, &plan);

        assert_eq!(titles(&all), vec!["t4", "t1", "t0", "t3", "t2"]);
        assert!(all.iter().enumerate().all(|(i, t)| t.position == i as i64));
    }
}
