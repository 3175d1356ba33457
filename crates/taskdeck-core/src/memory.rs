use std::collections::HashSet;

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::backend::{Backend, BackendResult};
use crate::datastore::normalize_email;
use crate::error::BackendError;
use crate::task::{Category, Profile, Session, Task, TaskDraft, TaskPatch, sort_manual};

/// Backend held entirely in memory, with knobs to make calls fail.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: Mutex<MemoryData>,
}

#[derive(Debug, Default)]
struct MemoryData {
    tasks: Vec<Task>,
    categories: Vec<Category>,
    accounts: Vec<(String, String, Session)>,
    session: Option<Session>,
    offline: bool,
    failing_positions: HashSet<Uuid>,
    position_writes: Vec<(Uuid, i64)>,
}

impl MemoryData {
    fn check_online(&self) -> BackendResult<()> {
        if self.offline {
            return Err(BackendError::Remote("backend unreachable".to_string()));
        }
        Ok(())
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with a remote error while set.
    pub fn set_offline(&self, offline: bool) {
        self.data.lock().offline = offline;
    }

    /// Position writes for `id` fail; other writes go through.
    pub fn fail_position_writes_for(&self, id: Uuid) {
        self.data.lock().failing_positions.insert(id);
    }

    /// Successful position writes, in call order.
    pub fn position_writes(&self) -> Vec<(Uuid, i64)> {
        self.data.lock().position_writes.clone()
    }

    pub fn seed_task(&self, task: Task) {
        self.data.lock().tasks.push(task);
    }

    /// Drops a task behind the client's back.
    pub fn remove_task(&self, id: Uuid) {
        self.data.lock().tasks.retain(|t| t.id != id);
    }

    pub fn stored_tasks(&self) -> Vec<Task> {
        self.data.lock().tasks.clone()
    }
}

impl Backend for InMemoryBackend {
    async fn fetch_tasks(&self, owner: Uuid) -> BackendResult<Vec<Task>> {
        let data = self.data.lock();
        data.check_online()?;
        let mut tasks: Vec<Task> = data
            .tasks
            .iter()
            .filter(|t| t.user_id == owner)
            .cloned()
            .collect();
        sort_manual(&mut tasks);
        Ok(tasks)
    }

    async fn create_task(&self, draft: TaskDraft) -> BackendResult<Task> {
        let mut data = self.data.lock();
        data.check_online()?;
        let task = Task::from_draft(draft, Utc::now());
        data.tasks.push(task.clone());
        Ok(task)
    }

    async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> BackendResult<()> {
        let mut data = self.data.lock();
        data.check_online()?;
        let task = data
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| BackendError::NotFound(format!("task {id}")))?;
        task.apply_patch(patch);
        Ok(())
    }

    async fn delete_task(&self, id: Uuid) -> BackendResult<()> {
        let mut data = self.data.lock();
        data.check_online()?;
        let before = data.tasks.len();
        data.tasks.retain(|t| t.id != id);
        if data.tasks.len() == before {
            return Err(BackendError::NotFound(format!("task {id}")));
        }
        Ok(())
    }

    async fn set_task_position(
        &self,
        id: Uuid,
        owner: Uuid,
        position: i64,
    ) -> BackendResult<()> {
        let mut data = self.data.lock();
        data.check_online()?;
        if data.failing_positions.contains(&id) {
            return Err(BackendError::Remote(format!("injected failure for task {id}")));
        }
        let task = data
            .tasks
            .iter_mut()
            .find(|t| t.id == id && t.user_id == owner)
            .ok_or_else(|| BackendError::NotFound(format!("task {id} for owner {owner}")))?;
        task.position = position;
        data.position_writes.push((id, position));
        Ok(())
    }

    async fn fetch_categories(&self, owner: Uuid) -> BackendResult<Vec<Category>> {
        let data = self.data.lock();
        data.check_online()?;
        Ok(data
            .categories
            .iter()
            .filter(|c| c.user_id == owner)
            .cloned()
            .collect())
    }

    async fn create_category(&self, owner: Uuid, name: &str) -> BackendResult<Category> {
        let mut data = self.data.lock();
        data.check_online()?;
        let category = Category::new(name.to_string(), owner, Utc::now());
        data.categories.push(category.clone());
        Ok(category)
    }

    async fn authenticate(&self, email: &str, password: &str) -> BackendResult<Session> {
        let mut data = self.data.lock();
        data.check_online()?;
        let email = normalize_email(email);
        let session = data
            .accounts
            .iter()
            .find(|(e, p, _)| *e == email && p == password)
            .map(|(_, _, s)| s.clone())
            .ok_or_else(|| BackendError::Auth("invalid email or password".to_string()))?;
        data.session = Some(session.clone());
        Ok(session)
    }

    async fn register(
        &self,
        email: &str,
        password: &str,
        profile: &Profile,
    ) -> BackendResult<Session> {
        let mut data = self.data.lock();
        data.check_online()?;
        let email = normalize_email(email);
        if data.accounts.iter().any(|(e, _, _)| *e == email) {
            return Err(BackendError::Auth(format!(
                "an account for {email} already exists"
            )));
        }
        let session = Session {
            user_id: Uuid::new_v4(),
            email: email.clone(),
            access_token: None,
            profile: profile.clone(),
        };
        data.accounts
            .push((email, password.to_string(), session.clone()));
        data.session = Some(session.clone());
        Ok(session)
    }

    async fn sign_out(&self, _session: &Session) -> BackendResult<()> {
        self.data.lock().session = None;
        Ok(())
    }

    async fn get_session(&self) -> BackendResult<Option<Session>> {
        Ok(self.data.lock().session.clone())
    }
}
