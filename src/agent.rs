// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The long-running agent: session lifecycle plus the port change loop.

use crate::activator::{ActivationError, ProfileActivator};
use crate::debounce::Debouncer;
use crate::equalizer::Equalizer;
use crate::session::{ServerControl, SessionError, SessionManager};
use crate::subscriber::{self, AudioSession, SubscriberError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zbus::zvariant::OwnedObjectPath;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error(transparent)]
    Subscriber(#[from] SubscriberError),
    #[error("Activation failed: {0}")]
    Activation(#[from] ActivationError),
}

/// Owns the session manager and the activator for the process lifetime.
pub struct Agent<C, E> {
    sessions: SessionManager<C>,
    activator: ProfileActivator<E>,
}

impl<C, E> Agent<C, E>
where
    C: ServerControl,
    C::Session: AudioSession,
    E: Equalizer,
{
    pub fn new(sessions: SessionManager<C>, activator: ProfileActivator<E>) -> Self {
        Self {
            sessions,
            activator,
        }
    }

    pub fn activator(&self) -> &ProfileActivator<E> {
        &self.activator
    }

    /// Connect, react to port changes, and start over after every
    /// disconnect. Only returns on a fatal error.
    pub async fn run(&self) -> Result<(), AgentError> {
        self.activator.prepare()?;
        loop {
            let session = self.sessions.ensure_session().await?;
            info!("Connected to pulseaudio");
            self.run_session(&session).await?;
            warn!("Disconnected from pulseaudio, try to reconnect...");
        }
    }

    /// Serve one session until it is lost.
    ///
    /// Nothing from this session, pending changes included, outlives it.
    pub async fn run_session(&self, session: &C::Session) -> Result<(), AgentError> {
        let changes = subscriber::startup(session, &self.activator).await?;
        dispatch_changes(session, changes, &self.activator).await
    }
}

/// Debounced port change loop.
///
/// The dispatch branch is only polled once no notification is ready, so a
/// burst is fully drained into the debouncer before the single activation
/// runs. Returns when the change feed closes.
pub async fn dispatch_changes<S, E>(
    session: &S,
    mut changes: mpsc::UnboundedReceiver<OwnedObjectPath>,
    activator: &ProfileActivator<E>,
) -> Result<(), AgentError>
where
    S: AudioSession,
    E: Equalizer,
{
    let mut debouncer = Debouncer::new();
    loop {
        tokio::select! {
            biased;

            change = changes.recv() => match change {
                Some(port) => {
                    if debouncer.notify(port) {
                        debug!("Scheduled port change dispatch");
                    }
                }
                None => {
                    if let Some(port) = debouncer.fire() {
                        debug!("Dropping pending change to {} from the lost session", port.as_str());
                    }
                    return Ok(());
                }
            },

            _ = std::future::ready(()), if debouncer.is_pending() => {
                if let Some(port) = debouncer.fire() {
                    apply_port_change(session, &port, activator).await?;
                }
            }
        }
    }
}

async fn apply_port_change<S, E>(
    session: &S,
    port: &OwnedObjectPath,
    activator: &ProfileActivator<E>,
) -> Result<(), AgentError>
where
    S: AudioSession,
    E: Equalizer,
{
    debug!("apply_requested_port_change: {}", port.as_str());
    let Some(identity) = subscriber::resolve_port(session, port).await? else {
        return Ok(());
    };
    info!("Change detected! New output port is {}", identity);
    activator.activate(&identity.device, &identity.port).await?;
    Ok(())
}
