use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{Backend, BackendResult};
use crate::error::BackendError;
use crate::task::{Category, Profile, Session, Task, TaskDraft, TaskPatch, sort_manual};

#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    pub categories_path: PathBuf,
    pub users_path: PathBuf,
    pub session: SessionFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    id: Uuid,
    email: String,
    salt: String,
    password_hash: String,
    #[serde(default)]
    profile: Profile,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join("tasks.data");
        let categories_path = data_dir.join("categories.data");
        let users_path = data_dir.join("users.data");
        let session = SessionFile::new(data_dir.join("session.data"));

        for path in [&tasks_path, &categories_path, &users_path, &session.path] {
            if !path.exists() {
                fs::write(path, "")?;
            }
        }

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            categories = %categories_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            tasks_path,
            categories_path,
            users_path,
            session,
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn load_tasks(&self) -> anyhow::Result<Vec<Task>> {
        load_jsonl(&self.tasks_path).context("failed to load tasks.data")
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn save_tasks(&self, tasks: &[Task]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.tasks_path, tasks).context("failed to save tasks.data")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_categories(&self) -> anyhow::Result<Vec<Category>> {
        load_jsonl(&self.categories_path).context("failed to load categories.data")
    }

    #[tracing::instrument(skip(self, categories))]
    pub fn save_categories(&self, categories: &[Category]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.categories_path, categories)
            .context("failed to save categories.data")
    }

    fn load_users(&self) -> anyhow::Result<Vec<UserRecord>> {
        load_jsonl(&self.users_path).context("failed to load users.data")
    }

    fn save_users(&self, users: &[UserRecord]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.users_path, users).context("failed to save users.data")
    }
}

/// The signed-in session, kept between invocations.
#[derive(Debug, Clone)]
pub struct SessionFile {
    pub path: PathBuf,
}

impl SessionFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[tracing::instrument(skip(self))]
    pub fn load(&self) -> anyhow::Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading {}", self.path.display()))?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let session = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {}", self.path.display()))?;
        Ok(Some(session))
    }

    #[tracing::instrument(skip(self, session), fields(user = %session.user_id))]
    pub fn save(&self, session: &Session) -> anyhow::Result<()> {
        let payload = serde_json::to_string(session)?;
        write_atomic(&self.path, payload.as_bytes())
    }

    #[tracing::instrument(skip(self))]
    pub fn clear(&self) -> anyhow::Result<()> {
        write_atomic(&self.path, b"")
    }
}

/// File-backed backend. Accounts live in `users.data`; passwords are kept as
/// salted SHA-256 digests.
#[derive(Debug)]
pub struct LocalBackend {
    store: DataStore,
    lock: Mutex<()>,
}

impl LocalBackend {
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            store: DataStore::open(data_dir)?,
            lock: Mutex::new(()),
        })
    }

    fn modify_tasks<R>(
        &self,
        f: impl FnOnce(&mut Vec<Task>) -> BackendResult<R>,
    ) -> BackendResult<R> {
        let _guard = self.lock.lock();
        let mut tasks = self.store.load_tasks()?;
        let out = f(&mut tasks)?;
        self.store.save_tasks(&tasks)?;
        Ok(out)
    }
}

impl Backend for LocalBackend {
    #[tracing::instrument(skip(self))]
    async fn fetch_tasks(&self, owner: Uuid) -> BackendResult<Vec<Task>> {
        let _guard = self.lock.lock();
        let mut tasks: Vec<Task> = self
            .store
            .load_tasks()?
            .into_iter()
            .filter(|t| t.user_id == owner)
            .collect();
        sort_manual(&mut tasks);
        debug!(count = tasks.len(), "fetched tasks");
        Ok(tasks)
    }

    #[tracing::instrument(skip(self, draft), fields(owner = %draft.user_id))]
    async fn create_task(&self, draft: TaskDraft) -> BackendResult<Task> {
        let task = Task::from_draft(draft, Utc::now());
        self.modify_tasks(|tasks| {
            tasks.push(task.clone());
            Ok(())
        })?;
        debug!(id = %task.id, "created task");
        Ok(task)
    }

    #[tracing::instrument(skip(self, patch))]
    async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> BackendResult<()> {
        self.modify_tasks(|tasks| {
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| BackendError::NotFound(format!("task {id}")))?;
            task.apply_patch(patch);
            Ok(())
        })
    }

    #[tracing::instrument(skip(self))]
    async fn delete_task(&self, id: Uuid) -> BackendResult<()> {
        self.modify_tasks(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.id != id);
            if tasks.len() == before {
                return Err(BackendError::NotFound(format!("task {id}")));
            }
            Ok(())
        })
    }

    #[tracing::instrument(skip(self))]
    async fn set_task_position(
        &self,
        id: Uuid,
        owner: Uuid,
        position: i64,
    ) -> BackendResult<()> {
        self.modify_tasks(|tasks| {
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id && t.user_id == owner)
                .ok_or_else(|| BackendError::NotFound(format!("task {id} for owner {owner}")))?;
            task.position = position;
            Ok(())
        })
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_categories(&self, owner: Uuid) -> BackendResult<Vec<Category>> {
        let _guard = self.lock.lock();
        let categories = self
            .store
            .load_categories()?
            .into_iter()
            .filter(|c| c.user_id == owner)
            .collect();
        Ok(categories)
    }

    #[tracing::instrument(skip(self))]
    async fn create_category(&self, owner: Uuid, name: &str) -> BackendResult<Category> {
        let _guard = self.lock.lock();
        let mut categories = self.store.load_categories()?;
        let category = Category::new(name.to_string(), owner, Utc::now());
        categories.push(category.clone());
        self.store.save_categories(&categories)?;
        Ok(category)
    }

    #[tracing::instrument(skip(self, password))]
    async fn authenticate(&self, email: &str, password: &str) -> BackendResult<Session> {
        let _guard = self.lock.lock();
        let email = normalize_email(email);
        let user = self
            .store
            .load_users()?
            .into_iter()
            .find(|u| u.email == email)
            .filter(|u| u.password_hash == hash_password(&u.salt, password))
            .ok_or_else(|| BackendError::Auth("invalid email or password".to_string()))?;

        let session = Session {
            user_id: user.id,
            email: user.email,
            access_token: None,
            profile: user.profile,
        };
        self.store.session.save(&session)?;
        info!(user = %session.user_id, "signed in");
        Ok(session)
    }

    #[tracing::instrument(skip(self, password, profile))]
    async fn register(
        &self,
        email: &str,
        password: &str,
        profile: &Profile,
    ) -> BackendResult<Session> {
        let _guard = self.lock.lock();
        let email = normalize_email(email);
        let mut users = self.store.load_users()?;
        if users.iter().any(|u| u.email == email) {
            return Err(BackendError::Auth(format!(
                "an account for {email} already exists"
            )));
        }

        let salt = Uuid::new_v4().simple().to_string();
        let user = UserRecord {
            id: Uuid::new_v4(),
            email: email.clone(),
            password_hash: hash_password(&salt, password),
            salt,
            profile: profile.clone(),
        };
        users.push(user.clone());
        self.store.save_users(&users)?;

        let session = Session {
            user_id: user.id,
            email,
            access_token: None,
            profile: user.profile,
        };
        self.store.session.save(&session)?;
        info!(user = %session.user_id, "registered account");
        Ok(session)
    }

    #[tracing::instrument(skip(self, session), fields(user = %session.user_id))]
    async fn sign_out(&self, session: &Session) -> BackendResult<()> {
        self.store.session.clear()?;
        Ok(())
    }

    async fn get_session(&self) -> BackendResult<Option<Session>> {
        Ok(self.store.session.load()?)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record: T = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(record);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, records))]
fn save_jsonl_atomic<T: Serialize>(path: &Path, records: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = records.len(), "saving jsonl atomically");

    let mut payload = String::new();
    for record in records {
        payload.push_str(&serde_json::to_string(record)?);
        payload.push('\n');
    }
    write_atomic(path, payload.as_bytes())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
