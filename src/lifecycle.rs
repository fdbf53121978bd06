//! Starting and stopping device clients from a control context.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::{Command, DeviceClient};
use crate::device::DeviceVariant;
use crate::supervisor::ConnectionState;
use crate::transport::Transport;

/// Owner's side of a running [`DeviceClient`].
pub struct ClientHandle {
    variant: DeviceVariant,
    cancel: CancellationToken,
    initialized: watch::Receiver<bool>,
    state: watch::Receiver<ConnectionState>,
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl ClientHandle {
    /// Run `client` on its own task.
    pub fn spawn<T: Transport + 'static>(client: DeviceClient<T>) -> Self {
        let variant = client.variant();
        let cancel = client.cancel_token();
        let initialized = client.initialized();
        let state = client.state_receiver();
        let commands = client.command_sender();
        let task = tokio::spawn(client.run());
        Self { variant, cancel, initialized, state, commands, task }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the client has looked for its device, successfully or not.
    pub async fn wait_initialized(&self) {
        let mut initialized = self.initialized.clone();
        // An error means the worker is gone, which is just as final.
        let _ = initialized.wait_for(|ready| *ready).await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Queue a function 6 write of `value` to `register`.
    ///
    /// Fails right away for devices that only stream (the shunt), and once the
    /// client has stopped.
    pub async fn write_register(&self, register: u16, value: u16) -> anyhow::Result<()> {
        if !self.variant.solicited() {
            anyhow::bail!("{:?} does not accept register writes", self.variant);
        }
        self.commands
            .send(Command::WriteRegister { register, value })
            .await
            .map_err(|_| anyhow::anyhow!("device client is not running"))
    }

    /// Stop the client and wait for it to release its transport.
    ///
    /// Safe to call at any point, even before the client has finished looking
    /// for its device: teardown waits for initialization first, so it never runs
    /// ahead of the device handle being set up.
    pub async fn stop(self) {
        self.cancel.cancel();
        self.wait_initialized().await;
        if let Err(err) = self.task.await {
            error!("device task failed: {err}");
        }
    }

    /// Wait for the client to finish on its own.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            error!("device task failed: {err}");
        }
    }
}

/// Holds at most one running client, replacing a process-wide "current
/// device" with an owned value.
#[derive(Default)]
pub struct DeviceRunner {
    active: Option<ClientHandle>,
}

impl DeviceRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.active.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn handle(&self) -> Option<&ClientHandle> {
        self.active.as_ref()
    }

    /// Start a client built by `build`, unless one is already running.
    /// Returns whether a new client was started.
    pub fn start<T, F>(&mut self, build: F) -> bool
    where
        T: Transport + 'static,
        F: FnOnce() -> DeviceClient<T>,
    {
        if self.is_running() {
            info!("Device instance is already running.");
            return false;
        }
        self.active = Some(ClientHandle::spawn(build()));
        info!("Device instance started.");
        true
    }

    /// Stop the running client, if any. Returns whether there was one.
    pub async fn stop(&mut self) -> bool {
        match self.active.take() {
            Some(handle) => {
                handle.stop().await;
                info!("Device instance stopped.");
                true
            }
            None => {
                warn!("No active device instance to stop.");
                false
            }
        }
    }
}
