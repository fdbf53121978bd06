//! Connection lifecycle of a single peripheral.
//!
//! ```text
//! Disconnected -> Connecting -> Ready -> Disconnected
//!                     |           |
//!                     +-> Failed <+
//! ```
//!
//! The initial connect gets a bounded number of attempts with a fixed delay in
//! between. A session that drops once it is established gets exactly one quiet
//! reconnect attempt; if that fails too the client gives up.

use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConfiguredDevice;
use crate::error::{ClientError, TransportError};
use crate::transport::{Candidate, Discovery, Transport};

pub const MAX_RECONNECT_ATTEMPTS: u32 = 15;
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: MAX_RECONNECT_ATTEMPTS, delay: RECONNECT_DELAY }
    }
}

/// Failed connection attempts since the last successful connect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryCounter(u32);

impl RetryCounter {
    pub fn get(&self) -> u32 {
        self.0
    }

    fn increment(&mut self, max: u32) {
        self.0 = (self.0 + 1).min(max);
    }

    fn reset(&mut self) {
        self.0 = 0;
    }
}

/// How a connect attempt sequence ended, short of a terminal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connected {
    Ready,
    Cancelled,
}

#[derive(Debug)]
pub struct ConnectionSupervisor {
    state: watch::Sender<ConnectionState>,
    retries: RetryCounter,
    policy: RetryPolicy,
    /// The transport holds a device handle that has to be released.
    linked: bool,
}

impl ConnectionSupervisor {
    pub fn new(policy: RetryPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { state, retries: RetryCounter::default(), policy, linked: false }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn retries(&self) -> RetryCounter {
        self.retries
    }

    fn set_state(&mut self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "connection state changed");
        }
    }

    /// Find the configured device on the transport.
    ///
    /// A device that can't be found at all is a configuration problem: the
    /// candidates that were seen are logged for the operator and the client
    /// fails straight away, without using any of its retry budget.
    pub async fn discover<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        device: &ConfiguredDevice,
        alias_prefixes: &[&str],
    ) -> Result<(), ClientError> {
        self.set_state(ConnectionState::Connecting);
        self.linked = true;
        match transport.discover(device).await {
            Ok(Discovery::Found) => Ok(()),
            Ok(Discovery::NotFound { candidates }) => {
                error!(
                    alias = %device.alias,
                    address = %device.address,
                    "Device not found, please check the details provided."
                );
                log_candidates(&candidates, alias_prefixes);
                self.set_state(ConnectionState::Failed);
                Err(ClientError::Configuration {
                    alias: device.alias.clone(),
                    address: device.address.clone(),
                })
            }
            Err(err) => {
                error!("Discovery failed: {err}");
                self.set_state(ConnectionState::Failed);
                Err(ClientError::Discovery(err))
            }
        }
    }

    /// Connect with the full retry budget.
    pub async fn connect<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        cancel: &CancellationToken,
    ) -> Result<Connected, ClientError> {
        self.set_state(ConnectionState::Connecting);
        loop {
            if cancel.is_cancelled() {
                return Ok(Connected::Cancelled);
            }

            info!(
                "Attempting to connect, try {}/{}...",
                self.retries.get() + 1,
                self.policy.max_attempts
            );
            let result = tokio::select! {
                result = transport.connect() => result,
                () = cancel.cancelled() => return Ok(Connected::Cancelled),
            };

            match result {
                Ok(()) => {
                    self.retries.reset();
                    self.set_state(ConnectionState::Ready);
                    info!("Connected successfully!");
                    return Ok(Connected::Ready);
                }
                Err(err) => {
                    self.retries.increment(self.policy.max_attempts);
                    if self.retries.get() >= self.policy.max_attempts {
                        error!("Max reconnect attempts reached. Could not establish connection.");
                        self.set_state(ConnectionState::Failed);
                        return Err(ClientError::ReconnectExhausted {
                            attempts: self.retries.get(),
                            source: err,
                        });
                    }
                    warn!(
                        "Connection failed with error: {err}. Retrying in {} seconds...",
                        self.policy.delay.as_secs()
                    );
                    tokio::select! {
                        () = sleep(self.policy.delay) => {}
                        () = cancel.cancelled() => return Ok(Connected::Cancelled),
                    }
                }
            }
        }
    }

    /// A single reconnect attempt after an established session was lost.
    pub async fn reconnect<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        cause: TransportError,
        cancel: &CancellationToken,
    ) -> Result<Connected, ClientError> {
        error!("Connection failed: {cause}");
        self.set_state(ConnectionState::Connecting);
        let result = tokio::select! {
            result = transport.connect() => result,
            () = cancel.cancelled() => return Ok(Connected::Cancelled),
        };
        match result {
            Ok(()) => {
                self.retries.reset();
                self.set_state(ConnectionState::Ready);
                info!("Reconnected successfully!");
                Ok(Connected::Ready)
            }
            Err(err) => {
                self.set_state(ConnectionState::Failed);
                Err(ClientError::FatalReconnect(err))
            }
        }
    }

    /// Release the transport and go to `Disconnected`.
    pub async fn disconnect<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        if self.state() == ConnectionState::Disconnected && !self.linked {
            return;
        }
        self.release(transport).await;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Release the transport, keeping the current state. Safe to call more than
    /// once; the transport is only told to disconnect the first time.
    pub async fn release<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        if !self.linked {
            return;
        }
        self.linked = false;
        if let Err(err) = transport.disconnect().await {
            warn!("Failed to disconnect: {err}");
        }
    }
}

fn log_candidates(candidates: &[Candidate], alias_prefixes: &[&str]) {
    for candidate in candidates {
        let Some(alias) = candidate.alias.as_deref() else {
            continue;
        };
        if alias_prefixes.iter().any(|prefix| alias.starts_with(prefix)) {
            info!("Possible device found! ======> {alias} > [{}]", candidate.address);
        }
    }
}
