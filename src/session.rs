// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Bring-up of the D-Bus session to the audio server.

use crate::config::ServerConfig;
use eqswitch_pulse::{PulseConnection, PulseError};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to execute {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("Failed to load {module}: {reason}")]
    ModuleLoad { module: String, reason: String },
    #[error("PulseAudio error: {0}")]
    Pulse(#[from] PulseError),
}

impl From<zbus::Error> for SessionError {
    fn from(e: zbus::Error) -> Self {
        Self::Pulse(e.into())
    }
}

/// The audio server operations bring-up is made of.
#[allow(async_fn_in_trait)]
pub trait ServerControl {
    type Session;

    /// Whether the server process is up.
    async fn is_running(&self) -> Result<bool, SessionError>;

    /// Load the D-Bus protocol module unless it is loaded already.
    async fn ensure_module(&self) -> Result<(), SessionError>;

    /// The server's D-Bus address, or `None` while it is not published yet.
    async fn lookup_address(&self) -> Result<Option<String>, SessionError>;

    async fn connect(&self, address: &str) -> Result<Self::Session, SessionError>;
}

/// Controls a PulseAudio server through its CLI tools and D-Bus.
#[derive(Debug, Clone)]
pub struct PulseControl {
    server: ServerConfig,
}

impl PulseControl {
    pub fn new(server: ServerConfig) -> Self {
        Self { server }
    }

    async fn module_loaded(&self) -> Result<bool, SessionError> {
        let output = Command::new(&self.server.pactl)
            .args(["list", "modules", "short"])
            .output()
            .await
            .map_err(|e| SessionError::Spawn(self.server.pactl.clone(), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("pactl list modules failed: {}", stderr.trim());
            return Ok(false);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(module_listed(&stdout, &self.server.module))
    }
}

/// Whether `module` appears in `pactl list modules short` output.
///
/// Each line is `<index>\t<name>\t<arguments>...`.
fn module_listed(listing: &str, module: &str) -> bool {
    listing
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(module))
}

impl ServerControl for PulseControl {
    type Session = PulseConnection;

    async fn is_running(&self) -> Result<bool, SessionError> {
        let status = Command::new(&self.server.binary)
            .arg("--check")
            .status()
            .await
            .map_err(|e| SessionError::Spawn(self.server.binary.clone(), e))?;
        Ok(status.success())
    }

    async fn ensure_module(&self) -> Result<(), SessionError> {
        if self.module_loaded().await? {
            debug!("{} already loaded", self.server.module);
            return Ok(());
        }

        info!("Loading {} into the server", self.server.module);
        let output = Command::new(&self.server.pactl)
            .args(["load-module", &self.server.module])
            .output()
            .await
            .map_err(|e| SessionError::Spawn(self.server.pactl.clone(), e))?;

        if output.status.success() {
            return Ok(());
        }

        // Someone else may have loaded it in the meantime.
        if self.module_loaded().await? {
            debug!("{} was loaded concurrently", self.server.module);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(SessionError::ModuleLoad {
            module: self.server.module.clone(),
            reason: stderr.trim().to_string(),
        })
    }

    async fn lookup_address(&self) -> Result<Option<String>, SessionError> {
        let session_bus = zbus::Connection::session().await?;
        Ok(eqswitch_pulse::lookup_address(&session_bus).await?)
    }

    async fn connect(&self, address: &str) -> Result<Self::Session, SessionError> {
        Ok(PulseConnection::connect(address).await?)
    }
}

/// Steps of the bring-up sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BringUp {
    WaitServer,
    EnsureModule,
    ResolveAddress,
    Connect(String),
}

/// Produces sessions, waiting as long as it takes for the server.
pub struct SessionManager<C> {
    control: C,
    retry_interval: Duration,
}

impl<C: ServerControl> SessionManager<C> {
    pub fn new(control: C, retry_interval: Duration) -> Self {
        Self {
            control,
            retry_interval,
        }
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    /// Run the full bring-up sequence and return a fresh session.
    ///
    /// "Not ready" states are retried forever at a fixed interval; every
    /// other failure is returned.
    pub async fn ensure_session(&self) -> Result<C::Session, SessionError> {
        let mut step = BringUp::WaitServer;
        loop {
            step = match step {
                BringUp::WaitServer => {
                    if self.control.is_running().await? {
                        BringUp::EnsureModule
                    } else {
                        info!("pulseaudio is not running, retry...");
                        tokio::time::sleep(self.retry_interval).await;
                        BringUp::WaitServer
                    }
                }
                BringUp::EnsureModule => {
                    self.control.ensure_module().await?;
                    BringUp::ResolveAddress
                }
                BringUp::ResolveAddress => match self.control.lookup_address().await? {
                    Some(address) => {
                        info!("Got pulseaudio server address: {}", address);
                        BringUp::Connect(address)
                    }
                    None => {
                        warn!("Cannot look up pulseaudio server address yet, retry...");
                        tokio::time::sleep(self.retry_interval).await;
                        BringUp::ResolveAddress
                    }
                },
                BringUp::Connect(address) => return self.control.connect(&address).await,
            };
        }
    }
}
