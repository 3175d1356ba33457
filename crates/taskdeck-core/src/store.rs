use chrono::NaiveDate;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::{AppError, AppResult};
use crate::filter::{FilterState, SortOrder, fold_text, visible_tasks};
use crate::reorder::{ReorderOutcome, apply_plan, persist_positions, plan_reorder};
use crate::task::{
    Category, Priority, Profile, Session, Task, TaskDraft, TaskPatch, sort_manual,
    validate_category_name,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A transient message for the user, produced by an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Fields the user supplies when creating a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub priority: Priority,
    pub category_id: Option<Uuid>,
}

/// Application state for one view: the signed-in session, the task and
/// category snapshots, the filter state and pending notices.
///
/// Every mutation goes through a method here. Remote failures leave the
/// snapshots untouched and leave a notice behind.
pub struct AppState<B: Backend> {
    backend: B,
    session: Option<Session>,
    tasks: Vec<Task>,
    categories: Vec<Category>,
    filters: FilterState,
    notices: Vec<Notice>,
    session_tx: watch::Sender<Option<Session>>,
}

impl<B: Backend> AppState<B> {
    pub fn new(backend: B) -> Self {
        let (session_tx, _) = watch::channel(None);
        Self {
            backend,
            session: None,
            tasks: Vec::new(),
            categories: Vec::new(),
            filters: FilterState::default(),
            notices: Vec::new(),
            session_tx,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Receives every session change (sign in, registration, sign out).
    pub fn subscribe_session(&self) -> watch::Receiver<Option<Session>> {
        self.session_tx.subscribe()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    pub fn set_filters(&mut self, filters: FilterState) {
        debug!(?filters, "filter state changed");
        self.filters = filters;
    }

    pub fn reset_filters(&mut self) {
        self.filters.reset();
    }

    pub fn visible(&self) -> Vec<&Task> {
        visible_tasks(&self.tasks, &self.filters)
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        self.notices.push(Notice {
            level,
            message: message.into(),
        });
    }

    fn fail<T>(&mut self, err: AppError) -> AppResult<T> {
        warn!(kind = err.kind(), error = %err, "operation failed");
        self.notify(NoticeLevel::Error, err.to_string());
        Err(err)
    }

    fn set_session(&mut self, session: Option<Session>) {
        self.session = session.clone();
        self.session_tx.send_replace(session);
    }

    fn owner(&self) -> AppResult<Uuid> {
        self.session
            .as_ref()
            .map(|s| s.user_id)
            .ok_or_else(|| AppError::Auth("no active session".to_string()))
    }

    fn require_owner(&mut self) -> AppResult<Uuid> {
        match self.owner() {
            Ok(owner) => Ok(owner),
            Err(err) => self.fail(err),
        }
    }

    #[instrument(skip(self))]
    pub async fn restore_session(&mut self) -> AppResult<Option<Session>> {
        match self.backend.get_session().await {
            Ok(session) => {
                self.set_session(session.clone());
                Ok(session)
            }
            Err(err) => self.fail(err.into()),
        }
    }

    #[instrument(skip(self, password))]
    pub async fn sign_in(&mut self, email: &str, password: &str) -> AppResult<Session> {
        if email.trim().is_empty() || password.is_empty() {
            return self.fail(AppError::Validation(
                "email and password are required".to_string(),
            ));
        }
        match self.backend.authenticate(email, password).await {
            Ok(session) => {
                info!(user = %session.user_id, "session started");
                self.set_session(Some(session.clone()));
                self.notify(NoticeLevel::Success, format!("signed in as {}", session.email));
                Ok(session)
            }
            Err(err) => self.fail(err.into()),
        }
    }

    #[instrument(skip(self, password, profile))]
    pub async fn register(
        &mut self,
        email: &str,
        password: &str,
        profile: Profile,
    ) -> AppResult<Session> {
        if !email.contains('@') {
            return self.fail(AppError::Validation(format!("invalid email address: {email}")));
        }
        if password.len() < 6 {
            return self.fail(AppError::Validation(
                "password must be at least 6 characters".to_string(),
            ));
        }
        match self.backend.register(email, password, &profile).await {
            Ok(session) => {
                self.set_session(Some(session.clone()));
                self.notify(NoticeLevel::Success, format!("registered {}", session.email));
                Ok(session)
            }
            Err(err) => self.fail(err.into()),
        }
    }

    #[instrument(skip(self))]
    pub async fn sign_out(&mut self) -> AppResult<()> {
        let Some(session) = self.session.clone() else {
            return Ok(());
        };
        if let Err(err) = self.backend.sign_out(&session).await {
            return self.fail(err.into());
        }
        self.set_session(None);
        self.tasks.clear();
        self.categories.clear();
        self.reset_filters();
        self.notify(NoticeLevel::Success, "signed out");
        Ok(())
    }

    /// Fetches tasks and categories for the signed-in user.
    #[instrument(skip(self))]
    pub async fn load(&mut self) -> AppResult<()> {
        let owner = self.require_owner()?;

        let mut tasks = match self.backend.fetch_tasks(owner).await {
            Ok(tasks) => tasks,
            Err(err) => return self.fail(err.into()),
        };
        let categories = match self.backend.fetch_categories(owner).await {
            Ok(categories) => categories,
            Err(err) => return self.fail(err.into()),
        };

        sort_manual(&mut tasks);
        debug!(tasks = tasks.len(), categories = categories.len(), "view loaded");
        self.tasks = tasks;
        self.categories = categories;
        Ok(())
    }

    pub fn find_task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Resolves a 1-based row of the visible list or a task id prefix.
    ///
    /// A numeric token is a row when that row exists; otherwise it is tried
    /// as an id prefix.
    pub fn resolve_task(&self, token: &str) -> AppResult<Uuid> {
        let token = token.trim();
        let row = token.parse::<usize>().ok();
        if let Some(row) = row {
            let visible = self.visible();
            if let Some(task) = row.checked_sub(1).and_then(|idx| visible.get(idx)) {
                return Ok(task.id);
            }
        }

        let lower = token.to_ascii_lowercase();
        let mut hits = self
            .tasks
            .iter()
            .filter(|t| t.id.to_string().starts_with(&lower));
        match (hits.next(), hits.next(), row) {
            (Some(task), None, _) => Ok(task.id),
            (Some(_), Some(_), _) => Err(AppError::Validation(format!(
                "task id prefix {token} is ambiguous"
            ))),
            (None, _, Some(row)) => Err(AppError::NotFound(format!(
                "no row {row} in the current list ({} rows)",
                self.visible().len()
            ))),
            (None, _, None) => Err(AppError::NotFound(format!("no task matches {token}"))),
        }
    }

    /// Matches a category by id or by case-insensitive name.
    pub fn resolve_category(&self, token: &str) -> AppResult<Uuid> {
        if let Ok(id) = token.trim().parse::<Uuid>()
            && self.categories.iter().any(|c| c.id == id)
        {
            return Ok(id);
        }
        let wanted = fold_text(token);
        self.categories
            .iter()
            .find(|c| fold_text(&c.name) == wanted)
            .map(|c| c.id)
            .ok_or_else(|| AppError::NotFound(format!("no category named {}", token.trim())))
    }

    #[instrument(skip(self, input), fields(title = %input.title))]
    pub async fn create_task(&mut self, input: NewTask) -> AppResult<Task> {
        let owner = self.require_owner()?;
        let draft = TaskDraft {
            title: input.title.trim().to_string(),
            description: input.description.filter(|d| !d.trim().is_empty()),
            due_date: input.due_date,
            priority: input.priority,
            category_id: input.category_id,
            user_id: owner,
            position: self.next_position(),
        };
        if let Err(err) = draft.validate() {
            return self.fail(err);
        }

        match self.backend.create_task(draft).await {
            Ok(task) => {
                self.tasks.push(task.clone());
                sort_manual(&mut self.tasks);
                self.notify(NoticeLevel::Success, format!("created \"{}\"", task.title));
                Ok(task)
            }
            Err(err) => self.fail(err.into()),
        }
    }

    fn next_position(&self) -> i64 {
        self.tasks
            .iter()
            .map(|t| t.position)
            .max()
            .map_or(0, |max| max + 1)
    }

    #[instrument(skip(self, patch))]
    pub async fn update_task(&mut self, id: Uuid, mut patch: TaskPatch) -> AppResult<Task> {
        self.require_owner()?;
        if let Some(title) = patch.title.as_mut() {
            *title = title.trim().to_string();
        }
        if let Err(err) = patch.validate() {
            return self.fail(err);
        }
        if self.find_task(id).is_none() {
            return self.fail(AppError::NotFound(format!("task {id} no longer exists")));
        }
        if patch.is_empty() {
            return self.fail(AppError::Validation("nothing to update".to_string()));
        }

        if let Err(err) = self.backend.update_task(id, &patch).await {
            return self.fail(err.into());
        }

        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            return self.fail(AppError::NotFound(format!("task {id} no longer exists")));
        };
        task.apply_patch(&patch);
        let updated = task.clone();
        if patch.position.is_some() {
            sort_manual(&mut self.tasks);
        }
        self.notify(NoticeLevel::Success, format!("updated \"{}\"", updated.title));
        Ok(updated)
    }

    pub async fn set_completed(&mut self, id: Uuid, completed: bool) -> AppResult<Task> {
        self.update_task(id, TaskPatch::completed(completed)).await
    }

    pub async fn toggle_completed(&mut self, id: Uuid) -> AppResult<Task> {
        let Some(current) = self.find_task(id).map(|t| t.completed) else {
            return self.fail(AppError::NotFound(format!("task {id} no longer exists")));
        };
        self.set_completed(id, !current).await
    }

    #[instrument(skip(self))]
    pub async fn delete_task(&mut self, id: Uuid) -> AppResult<()> {
        self.require_owner()?;
        let Some(title) = self.find_task(id).map(|t| t.title.clone()) else {
            return self.fail(AppError::NotFound(format!("task {id} no longer exists")));
        };

        if let Err(err) = self.backend.delete_task(id).await {
            return self.fail(err.into());
        }

        self.tasks.retain(|t| t.id != id);
        self.notify(NoticeLevel::Success, format!("deleted \"{title}\""));
        Ok(())
    }

    /// Moves row `from` of the visible list to row `to` (both 0-based).
    ///
    /// The local order changes before any write is sent. Each position is
    /// then written on its own; failures are counted, not rolled back.
    ///
    /// Only the manual order can be rearranged; a sorted view has no slots
    /// to move a task into.
    #[instrument(skip(self))]
    pub async fn reorder_visible(&mut self, from: usize, to: usize) -> AppResult<ReorderOutcome> {
        let owner = self.require_owner()?;
        if self.filters.sort != SortOrder::Manual {
            return self.fail(AppError::Validation(
                "tasks can only be moved in manual order; drop --sort to reorder".to_string(),
            ));
        }
        let visible: Vec<Uuid> = self.visible().iter().map(|t| t.id).collect();

        let plan = match plan_reorder(&self.tasks, &visible, from, to) {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                debug!("source equals destination; nothing to do");
                return Ok(ReorderOutcome::default());
            }
            Err(err) => return self.fail(err),
        };

        apply_plan(&mut self.tasks, &plan);

        let outcome = persist_positions(&self.backend, owner, &plan.positions).await;
        if outcome.is_success() {
            self.notify(NoticeLevel::Success, "task order saved");
        } else {
            warn!(
                failed = outcome.failed.len(),
                attempted = outcome.attempted,
                "reorder partially persisted"
            );
            self.notify(
                NoticeLevel::Error,
                format!(
                    "could not save the new order: {} of {} position updates failed",
                    outcome.failed.len(),
                    outcome.attempted
                ),
            );
        }
        Ok(outcome)
    }

    #[instrument(skip(self))]
    pub async fn create_category(&mut self, name: &str) -> AppResult<Category> {
        let owner = self.require_owner()?;
        let name = match validate_category_name(name) {
            Ok(name) => name,
            Err(err) => return self.fail(err),
        };

        match self.backend.create_category(owner, &name).await {
            Ok(category) => {
                self.categories.push(category.clone());
                self.notify(NoticeLevel::Success, format!("created category \"{name}\""));
                Ok(category)
            }
            Err(err) => self.fail(err.into()),
        }
    }
}
