use std::path::Path;

use anyhow::{Context, anyhow};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::datastore::LocalBackend;
use crate::error::BackendError;
use crate::remote::{RemoteBackend, RemoteSettings};
use crate::task::{Category, Profile, Session, Task, TaskDraft, TaskPatch};

pub type BackendResult<T> = Result<T, BackendError>;

/// Persistence and authentication collaborator.
///
/// Futures are driven on a single-threaded runtime, so implementations are
/// not required to be `Send`.
#[allow(async_fn_in_trait)]
pub trait Backend {
    async fn fetch_tasks(&self, owner: Uuid) -> BackendResult<Vec<Task>>;

    /// The backend assigns the identifier.
    async fn create_task(&self, draft: TaskDraft) -> BackendResult<Task>;

    async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> BackendResult<()>;

    async fn delete_task(&self, id: Uuid) -> BackendResult<()>;

    /// Only touches the task when it belongs to `owner`.
    async fn set_task_position(&self, id: Uuid, owner: Uuid, position: i64)
    -> BackendResult<()>;

    async fn fetch_categories(&self, owner: Uuid) -> BackendResult<Vec<Category>>;

    async fn create_category(&self, owner: Uuid, name: &str) -> BackendResult<Category>;

    async fn authenticate(&self, email: &str, password: &str) -> BackendResult<Session>;

    async fn register(
        &self,
        email: &str,
        password: &str,
        profile: &Profile,
    ) -> BackendResult<Session>;

    async fn sign_out(&self, session: &Session) -> BackendResult<()>;

    async fn get_session(&self) -> BackendResult<Option<Session>>;
}

/// Backend picked at runtime from configuration.
#[derive(Debug)]
pub enum AnyBackend {
    Local(LocalBackend),
    Remote(RemoteBackend),
}

impl AnyBackend {
    #[tracing::instrument(skip(cfg, data_dir))]
    pub fn from_config(cfg: &Config, data_dir: &Path) -> anyhow::Result<Self> {
        let kind = cfg.get("backend").unwrap_or_else(|| "local".to_string());
        match kind.to_ascii_lowercase().as_str() {
            "local" => {
                let backend = LocalBackend::open(data_dir).with_context(|| {
                    format!("failed to open local datastore at {}", data_dir.display())
                })?;
                info!(data_dir = %data_dir.display(), "using local backend");
                Ok(AnyBackend::Local(backend))
            }
            "remote" => {
                let settings = RemoteSettings::from_config(cfg)?;
                info!(url = %settings.base_url, "using remote backend");
                Ok(AnyBackend::Remote(RemoteBackend::new(settings, data_dir)?))
            }
            other => Err(anyhow!(
                "invalid backend setting: {other} (expected local or remote)"
            )),
        }
    }
}

macro_rules! delegate {
    ($self:ident, $method:ident($($arg:expr),*)) => {
        match $self {
            AnyBackend::Local(inner) => inner.$method($($arg),*).await,
            AnyBackend::Remote(inner) => inner.$method($($arg),*).await,
        }
    };
}

impl Backend for AnyBackend {
    async fn fetch_tasks(&self, owner: Uuid) -> BackendResult<Vec<Task>> {
        delegate!(self, fetch_tasks(owner))
    }

    async fn create_task(&self, draft: TaskDraft) -> BackendResult<Task> {
        delegate!(self, create_task(draft))
    }

    async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> BackendResult<()> {
        delegate!(self, update_task(id, patch))
    }

    async fn delete_task(&self, id: Uuid) -> BackendResult<()> {
        delegate!(self, delete_task(id))
    }

    async fn set_task_position(
        &self,
        id: Uuid,
        owner: Uuid,
        position: i64,
    ) -> BackendResult<()> {
        delegate!(self, set_task_position(id, owner, position))
    }

    async fn fetch_categories(&self, owner: Uuid) -> BackendResult<Vec<Category>> {
        delegate!(self, fetch_categories(owner))
    }

    async fn create_category(&self, owner: Uuid, name: &str) -> BackendResult<Category> {
        delegate!(self, create_category(owner, name))
    }

    async fn authenticate(&self, email: &str, password: &str) -> BackendResult<Session> {
        delegate!(self, authenticate(email, password))
    }

    async fn register(
        &self,
        email: &str,
        password: &str,
        profile: &Profile,
    ) -> BackendResult<Session> {
        delegate!(self, register(email, password, profile))
    }

    async fn sign_out(&self, session: &Session) -> BackendResult<()> {
        delegate!(self, sign_out(session))
    }

    async fn get_session(&self) -> BackendResult<Option<Session>> {
        delegate!(self, get_session())
    }
}
