//! Lifecycle of one daemon-managed container.
//!
//! `Unborn -> Created -> Running -> Exited -> Removed`. Operations that need a
//! daemon-side id fail with [`ClientError::NotLaunched`] before `create`, and
//! nothing but `remove` may be skipped on an error path.

use daemon_wire::{decode, render, LogLine};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::api::DaemonApi;
use crate::error::{ClientError, Result};
use crate::modem::Modem;
use crate::spec::ContainerSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unborn,
    Created,
    Running,
    Exited(i64),
    Removed,
}

/// What `wait` observed once the container stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    pub exit_code: i64,
    pub logs: Vec<LogLine>,
}

impl WaitOutcome {
    pub fn rendered_logs(&self) -> String {
        render(&self.logs)
    }
}

#[derive(Debug)]
pub struct Container {
    modem: Modem,
    api: DaemonApi,
    spec: ContainerSpec,
    id: Option<String>,
    state: LifecycleState,
}

impl Container {
    pub fn new(modem: Modem, api: DaemonApi, spec: ContainerSpec) -> Self {
        Self {
            modem,
            api,
            spec,
            id: None,
            state: LifecycleState::Unborn,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn modem(&self) -> &Modem {
        &self.modem
    }

    /// Ask the daemon to create the container. On failure the container
    /// stays `Unborn`.
    pub async fn create(&mut self) -> Result<&str> {
        if self.state != LifecycleState::Unborn {
            return Err(ClientError::Usage(format!(
                "container already created (state {:?})",
                self.state
            )));
        }
        let created = self.api.create(&self.modem, &self.spec).await?;
        debug!(container = %created.id, image = self.spec.image(), "container created");
        self.state = LifecycleState::Created;
        Ok(self.id.insert(created.id).as_str())
    }

    /// Start the container, creating it first when needed.
    ///
    /// If creation succeeds and starting fails, the container is left
    /// `Created` with its id set; the caller still owes a `remove`.
    pub async fn start(&mut self) -> Result<()> {
        match self.state {
            LifecycleState::Unborn => {
                self.create().await?;
            }
            LifecycleState::Created => {}
            other => {
                return Err(ClientError::Usage(format!(
                    "container cannot be started from state {other:?}"
                )))
            }
        }
        let id = self.require_id("start")?.to_string();
        self.api.start(&self.modem, &id).await?;
        info!(container = %id, image = self.spec.image(), "container started");
        self.state = LifecycleState::Running;
        Ok(())
    }

    /// Block until the container exits, then collect and decode its logs.
    pub async fn wait(&mut self) -> Result<WaitOutcome> {
        let id = self.require_id("wait")?.to_string();
        match self.state {
            LifecycleState::Running | LifecycleState::Exited(_) => {}
            LifecycleState::Created => return Err(ClientError::NotLaunched { operation: "wait" }),
            other => {
                return Err(ClientError::Usage(format!(
                    "cannot wait on container in state {other:?}"
                )))
            }
        }

        let exit_code = self.api.wait(&self.modem, &id).await?;
        self.state = LifecycleState::Exited(exit_code);
        debug!(container = %id, exit_code, "container exited");

        let logs = self.logs().await?;
        Ok(WaitOutcome { exit_code, logs })
    }

    pub async fn logs(&self) -> Result<Vec<LogLine>> {
        let id = self.require_id("read logs")?;
        let raw = self.api.logs(&self.modem, id).await?;
        Ok(decode(&raw)?)
    }

    /// SIGKILL the container.
    pub async fn kill(&mut self) -> Result<()> {
        let id = self.require_live_id("kill")?;
        self.api.kill(&self.modem, id).await
    }

    pub async fn stop(&mut self, grace: Duration) -> Result<()> {
        let id = self.require_live_id("stop")?;
        self.api.stop(&self.modem, id, grace).await
    }

    /// Delete the daemon-side container. Must be called once per created
    /// container; a second call is a usage error.
    pub async fn remove(&mut self, force: bool) -> Result<()> {
        let id = self.require_live_id("remove")?.to_string();
        self.api.remove(&self.modem, &id, force).await?;
        debug!(container = %id, "container removed");
        self.state = LifecycleState::Removed;
        Ok(())
    }

    /// Detached handle able to kill or remove this container over its own
    /// connection.
    pub fn handle(&self) -> Option<ContainerHandle> {
        self.id.as_ref().map(|id| ContainerHandle {
            id: id.clone(),
            socket_path: self.modem.socket_path().to_path_buf(),
            api: self.api.clone(),
        })
    }

    /// Replace a dead connection. A live one is left alone.
    pub async fn reconnect(&mut self) -> Result<()> {
        if !self.modem.is_connected() {
            self.modem.connect().await?;
        }
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        Ok(self.modem.disconnect().await?)
    }

    fn require_id(&self, operation: &'static str) -> Result<&str> {
        self.id
            .as_deref()
            .ok_or(ClientError::NotLaunched { operation })
    }

    fn require_live_id(&self, operation: &'static str) -> Result<&str> {
        if self.state == LifecycleState::Removed {
            return Err(ClientError::Usage(format!(
                "cannot {operation}: container already removed"
            )));
        }
        self.require_id(operation)
    }
}

/// Kill/remove access to a container by id, independent of the connection
/// owned by its [`Container`]. Each call opens and closes its own connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    id: String,
    socket_path: PathBuf,
    api: DaemonApi,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, socket_path: impl AsRef<Path>, api: DaemonApi) -> Self {
        Self {
            id: id.into(),
            socket_path: socket_path.as_ref().to_path_buf(),
            api,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn kill(&self) -> Result<()> {
        let mut modem = Modem::open(&self.socket_path).await?;
        let result = self.api.kill(&modem, &self.id).await;
        let _ = modem.disconnect().await;
        result
    }

    pub async fn remove(&self, force: bool) -> Result<()> {
        let mut modem = Modem::open(&self.socket_path).await?;
        let result = self.api.remove(&modem, &self.id, force).await;
        let _ = modem.disconnect().await;
        result
    }
}
