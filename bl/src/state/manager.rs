//! StateManager - actor that owns the GraphStore
//!
//! Processes commands via channels for serialized access to persistent state.

use std::path::Path;

use async_trait::async_trait;
use eyre::Context;
use taskgraph::{EpicOptions, GraphStore, Item, ItemStatus, Session, SessionStatus, TaskOptions};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::messages::{StateCommand, StateError, StateResponse};
use crate::planner::PlanSink;

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Open the store at `path` scoped to `project` and spawn the actor
    pub fn open(path: impl AsRef<Path>, project: &str) -> eyre::Result<Self> {
        debug!(path = %path.as_ref().display(), %project, "open: called");
        let store = GraphStore::open(path.as_ref(), project)
            .context(format!("Failed to open task graph at {}", path.as_ref().display()))?;
        Ok(Self::spawn(store))
    }

    /// Spawn a new StateManager actor owning `store`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(store: GraphStore) -> Self {
        debug!(project = %store.project(), "spawn: called");
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(actor_loop(store, rx));

        info!("StateManager spawned");

        Self { tx }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Item writes ===

    pub async fn create_epic(&self, title: &str, options: EpicOptions) -> StateResponse<String> {
        debug!(%title, "create_epic: called");
        let title = title.to_string();
        self.request(|reply| StateCommand::CreateEpic { title, options, reply })
            .await
    }

    pub async fn create_task(&self, title: &str, options: TaskOptions) -> StateResponse<String> {
        debug!(%title, parent_id = ?options.parent_id, deps = %options.depends_on.len(), "create_task: called");
        let title = title.to_string();
        self.request(|reply| StateCommand::CreateTask { title, options, reply })
            .await
    }

    pub async fn add_dependency(&self, item_id: &str, depends_on_id: &str) -> StateResponse<()> {
        debug!(%item_id, %depends_on_id, "add_dependency: called");
        let (item_id, depends_on_id) = (item_id.to_string(), depends_on_id.to_string());
        self.request(|reply| StateCommand::AddDependency {
            item_id,
            depends_on_id,
            reply,
        })
        .await
    }

    pub async fn update_status(&self, id: &str, status: ItemStatus) -> StateResponse<()> {
        debug!(%id, %status, "update_status: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::UpdateStatus { id, status, reply })
            .await
    }

    pub async fn reopen(&self, id: &str) -> StateResponse<()> {
        debug!(%id, "reopen: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::Reopen { id, reply }).await
    }

    pub async fn delete_item(&self, id: &str) -> StateResponse<()> {
        debug!(%id, "delete_item: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::DeleteItem { id, reply }).await
    }

    /// Mark the epic done iff it has children and all of them are done
    pub async fn update_epic_status_if_complete(&self, epic_id: &str) -> StateResponse<bool> {
        debug!(%epic_id, "update_epic_status_if_complete: called");
        let epic_id = epic_id.to_string();
        self.request(|reply| StateCommand::UpdateEpicStatusIfComplete { epic_id, reply })
            .await
    }

    /// Cancel a superseded epic and its unfinished tasks
    pub async fn cancel_epic(&self, epic_id: &str) -> StateResponse<bool> {
        debug!(%epic_id, "cancel_epic: called");
        let epic_id = epic_id.to_string();
        self.request(|reply| StateCommand::CancelEpic { epic_id, reply }).await
    }

    // === Item reads ===

    pub async fn get_item(&self, id: &str) -> StateResponse<Option<Item>> {
        debug!(%id, "get_item: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::GetItem { id, reply }).await
    }

    pub async fn dependencies(&self, item_id: &str) -> StateResponse<Vec<String>> {
        debug!(%item_id, "dependencies: called");
        let item_id = item_id.to_string();
        self.request(|reply| StateCommand::Dependencies { item_id, reply })
            .await
    }

    pub async fn list_tasks(&self, epic_id: &str) -> StateResponse<Vec<Item>> {
        debug!(%epic_id, "list_tasks: called");
        let epic_id = epic_id.to_string();
        self.request(|reply| StateCommand::ListTasks { epic_id, reply }).await
    }

    pub async fn ready_tasks(&self, epic_id: Option<&str>) -> StateResponse<Vec<Item>> {
        debug!(?epic_id, "ready_tasks: called");
        let epic_id = epic_id.map(str::to_string);
        self.request(|reply| StateCommand::ReadyTasks { epic_id, reply }).await
    }

    pub async fn incomplete_tasks(&self, epic_id: Option<&str>) -> StateResponse<Vec<Item>> {
        debug!(?epic_id, "incomplete_tasks: called");
        let epic_id = epic_id.map(str::to_string);
        self.request(|reply| StateCommand::IncompleteTasks { epic_id, reply })
            .await
    }

    pub async fn active_epics(&self) -> StateResponse<Vec<Item>> {
        debug!("active_epics: called");
        self.request(|reply| StateCommand::ActiveEpics { reply }).await
    }

    /// (completed, total) child tasks of an epic
    pub async fn compute_epic_progress(&self, epic_id: &str) -> StateResponse<(u32, u32)> {
        debug!(%epic_id, "compute_epic_progress: called");
        let epic_id = epic_id.to_string();
        self.request(|reply| StateCommand::ComputeEpicProgress { epic_id, reply })
            .await
    }

    // === Session ledger ===

    pub async fn create_session(&self, arch_doc: &str, checkpoint_path: Option<&str>) -> StateResponse<Session> {
        debug!(%arch_doc, ?checkpoint_path, "create_session: called");
        let arch_doc = arch_doc.to_string();
        let checkpoint_path = checkpoint_path.map(str::to_string);
        self.request(|reply| StateCommand::CreateSession {
            arch_doc,
            checkpoint_path,
            reply,
        })
        .await
    }

    pub async fn update_session_progress(&self, id: &str, iteration: u32, total_cost: f64) -> StateResponse<()> {
        debug!(%id, %iteration, %total_cost, "update_session_progress: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::UpdateSessionProgress {
            id,
            iteration,
            total_cost,
            reply,
        })
        .await
    }

    pub async fn set_session_status(&self, id: &str, status: SessionStatus) -> StateResponse<()> {
        debug!(%id, %status, "set_session_status: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::SetSessionStatus { id, status, reply })
            .await
    }

    pub async fn get_session(&self, id: &str) -> StateResponse<Option<Session>> {
        debug!(%id, "get_session: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::GetSession { id, reply }).await
    }

    /// Most recent running or stopped session for `arch_doc`
    pub async fn latest_active_session(&self, arch_doc: &str) -> StateResponse<Option<Session>> {
        debug!(%arch_doc, "latest_active_session: called");
        let arch_doc = arch_doc.to_string();
        self.request(|reply| StateCommand::LatestActiveSession { arch_doc, reply })
            .await
    }

    /// Shutdown the StateManager
    pub async fn shutdown(&self) -> Result<(), StateError> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

#[async_trait]
impl PlanSink for StateManager {
    async fn create_epic(&self, title: &str, options: EpicOptions) -> StateResponse<String> {
        StateManager::create_epic(self, title, options).await
    }

    async fn create_task(&self, title: &str, options: TaskOptions) -> StateResponse<String> {
        StateManager::create_task(self, title, options).await
    }
}

async fn actor_loop(store: GraphStore, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::CreateEpic { title, options, reply } => {
                debug!(%title, "actor_loop: CreateEpic command");
                let _ = reply.send(store.create_epic(&title, options).map_err(Into::into));
            }

            StateCommand::CreateTask { title, options, reply } => {
                debug!(%title, "actor_loop: CreateTask command");
                let _ = reply.send(store.create_task(&title, options).map_err(Into::into));
            }

            StateCommand::AddDependency {
                item_id,
                depends_on_id,
                reply,
            } => {
                debug!(%item_id, %depends_on_id, "actor_loop: AddDependency command");
                let _ = reply.send(store.add_dependency(&item_id, &depends_on_id).map_err(Into::into));
            }

            StateCommand::UpdateStatus { id, status, reply } => {
                debug!(%id, %status, "actor_loop: UpdateStatus command");
                let _ = reply.send(store.update_status(&id, status).map_err(Into::into));
            }

            StateCommand::Reopen { id, reply } => {
                debug!(%id, "actor_loop: Reopen command");
                let _ = reply.send(store.reopen(&id).map_err(Into::into));
            }

            StateCommand::DeleteItem { id, reply } => {
                debug!(%id, "actor_loop: DeleteItem command");
                let _ = reply.send(store.delete_item(&id).map_err(Into::into));
            }

            StateCommand::UpdateEpicStatusIfComplete { epic_id, reply } => {
                debug!(%epic_id, "actor_loop: UpdateEpicStatusIfComplete command");
                let _ = reply.send(store.update_epic_status_if_complete(&epic_id).map_err(Into::into));
            }

            StateCommand::CancelEpic { epic_id, reply } => {
                debug!(%epic_id, "actor_loop: CancelEpic command");
                let _ = reply.send(store.cancel_epic(&epic_id).map_err(Into::into));
            }

            StateCommand::GetItem { id, reply } => {
                debug!(%id, "actor_loop: GetItem command");
                let _ = reply.send(store.get_item(&id).map_err(Into::into));
            }

            StateCommand::Dependencies { item_id, reply } => {
                debug!(%item_id, "actor_loop: Dependencies command");
                let _ = reply.send(store.dependencies(&item_id).map_err(Into::into));
            }

            StateCommand::ListTasks { epic_id, reply } => {
                debug!(%epic_id, "actor_loop: ListTasks command");
                let _ = reply.send(store.list_tasks(&epic_id).map_err(Into::into));
            }

            StateCommand::ReadyTasks { epic_id, reply } => {
                debug!(?epic_id, "actor_loop: ReadyTasks command");
                let _ = reply.send(store.ready_tasks(epic_id.as_deref()).map_err(Into::into));
            }

            StateCommand::IncompleteTasks { epic_id, reply } => {
                debug!(?epic_id, "actor_loop: IncompleteTasks command");
                let _ = reply.send(store.incomplete_tasks(epic_id.as_deref()).map_err(Into::into));
            }

            StateCommand::ActiveEpics { reply } => {
                debug!("actor_loop: ActiveEpics command");
                let _ = reply.send(store.active_epics().map_err(Into::into));
            }

            StateCommand::ComputeEpicProgress { epic_id, reply } => {
                debug!(%epic_id, "actor_loop: ComputeEpicProgress command");
                let _ = reply.send(store.compute_epic_progress(&epic_id).map_err(Into::into));
            }

            StateCommand::CreateSession {
                arch_doc,
                checkpoint_path,
                reply,
            } => {
                debug!(%arch_doc, "actor_loop: CreateSession command");
                let _ = reply.send(
                    store
                        .create_session(&arch_doc, checkpoint_path.as_deref())
                        .map_err(Into::into),
                );
            }

            StateCommand::UpdateSessionProgress {
                id,
                iteration,
                total_cost,
                reply,
            } => {
                debug!(%id, %iteration, "actor_loop: UpdateSessionProgress command");
                let _ = reply.send(
                    store
                        .update_session_progress(&id, iteration, total_cost)
                        .map_err(Into::into),
                );
            }

            StateCommand::SetSessionStatus { id, status, reply } => {
                debug!(%id, %status, "actor_loop: SetSessionStatus command");
                let _ = reply.send(store.set_session_status(&id, status).map_err(Into::into));
            }

            StateCommand::GetSession { id, reply } => {
                debug!(%id, "actor_loop: GetSession command");
                let _ = reply.send(store.get_session(&id).map_err(Into::into));
            }

            StateCommand::LatestActiveSession { arch_doc, reply } => {
                debug!(%arch_doc, "actor_loop: LatestActiveSession command");
                let _ = reply.send(store.latest_active_session(&arch_doc).map_err(Into::into));
            }

            StateCommand::Shutdown => {
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn memory_manager() -> StateManager {
        StateManager::spawn(GraphStore::open_in_memory("test").unwrap())
    }

    #[tokio::test]
    async fn test_state_manager_item_crud() {
        let manager = memory_manager();

        let epic = manager.create_epic("Epic", EpicOptions::default()).await.unwrap();
        let task = manager
            .create_task("Task", TaskOptions::default().with_parent(&epic))
            .await
            .unwrap();

        let item = manager.get_item(&task).await.unwrap().unwrap();
        assert_eq!(item.parent_id.as_deref(), Some(epic.as_str()));

        manager.update_status(&task, ItemStatus::InProgress).await.unwrap();
        manager.update_status(&task, ItemStatus::Done).await.unwrap();
        assert_eq!(manager.compute_epic_progress(&epic).await.unwrap(), (1, 1));
        assert!(manager.update_epic_status_if_complete(&epic).await.unwrap());

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_state_manager_cancel_epic() {
        let manager = memory_manager();

        let epic = manager.create_epic("Old plan", EpicOptions::default()).await.unwrap();
        let task = manager
            .create_task("Task", TaskOptions::default().with_parent(&epic))
            .await
            .unwrap();

        assert!(manager.cancel_epic(&epic).await.unwrap());
        assert!(!manager.cancel_epic(&epic).await.unwrap());
        assert_eq!(manager.get_item(&task).await.unwrap().unwrap().status, ItemStatus::Canceled);
        assert!(manager.active_epics().await.unwrap().is_empty());
        assert!(manager.cancel_epic("epic-missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_state_manager_surfaces_store_errors() {
        let manager = memory_manager();

        let err = manager.update_status("task-missing", ItemStatus::Done).await.unwrap_err();
        assert!(err.is_not_found());

        let err = manager.create_epic("   ", EpicOptions::default()).await.unwrap_err();
        assert!(matches!(err, StateError::Store(ref e) if e.is_validation()));
    }

    #[tokio::test]
    async fn test_state_manager_channel_error_after_shutdown() {
        let manager = memory_manager();
        manager.shutdown().await.unwrap();
        tokio::task::yield_now().await;

        // The actor may still be draining; wait for the receiver to close
        let mut closed = false;
        for _ in 0..50 {
            if let Err(StateError::ChannelError) = manager.active_epics().await {
                closed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(closed);
    }

    #[tokio::test]
    async fn test_state_manager_open_on_disk() {
        let temp = tempdir().unwrap();
        let manager = StateManager::open(temp.path().join("graph.db"), "proj").unwrap();

        let session = manager.create_session("ARCH.md", None).await.unwrap();
        manager.update_session_progress(&session.id, 2, 1.5).await.unwrap();

        let latest = manager.latest_active_session("ARCH.md").await.unwrap().unwrap();
        assert_eq!(latest.iteration, 2);
        assert_eq!(latest.total_cost, 1.5);
    }
}
