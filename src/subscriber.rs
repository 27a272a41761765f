// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Device and port resolution on an established session.

use crate::activator::{ActivationError, ProfileActivator};
use crate::equalizer::Equalizer;
use crate::profile::ProfileIdentity;
use eqswitch_pulse::{PulseConnection, PulseError};
use futures::StreamExt;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zbus::zvariant::OwnedObjectPath;

#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("PulseAudio error: {0}")]
    Pulse(#[from] PulseError),
    #[error("Activation failed: {0}")]
    Activation(#[from] ActivationError),
}

/// What the agent needs from a live audio server session.
///
/// Object paths handed out are only meaningful within the session that
/// produced them.
#[allow(async_fn_in_trait)]
pub trait AudioSession {
    async fn fallback_device(&self) -> Result<OwnedObjectPath, PulseError>;

    async fn device_name(&self, device: &OwnedObjectPath) -> Result<String, PulseError>;

    /// `None` when the device has no ports.
    async fn active_port(
        &self,
        device: &OwnedObjectPath,
    ) -> Result<Option<OwnedObjectPath>, PulseError>;

    async fn port_name(&self, port: &OwnedObjectPath) -> Result<String, PulseError>;

    /// Register for active port changes on every device.
    ///
    /// The receiver yields the new port of each change and closes when the
    /// session is lost.
    async fn subscribe_port_changes(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<OwnedObjectPath>, PulseError>;
}

impl AudioSession for PulseConnection {
    async fn fallback_device(&self) -> Result<OwnedObjectPath, PulseError> {
        self.fallback_sink().await
    }

    async fn device_name(&self, device: &OwnedObjectPath) -> Result<String, PulseError> {
        PulseConnection::device_name(self, device).await
    }

    async fn active_port(
        &self,
        device: &OwnedObjectPath,
    ) -> Result<Option<OwnedObjectPath>, PulseError> {
        PulseConnection::active_port(self, device).await
    }

    async fn port_name(&self, port: &OwnedObjectPath) -> Result<String, PulseError> {
        PulseConnection::port_name(self, port).await
    }

    async fn subscribe_port_changes(
        &self,
    ) -> Result<mpsc::UnboundedReceiver<OwnedObjectPath>, PulseError> {
        // Open the stream first so no signal slips through after registering.
        let mut messages = self.messages();
        self.listen_for_port_changes().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("PulseAudio connection error: {}", e);
                        break;
                    }
                };
                if let Some(port) = eqswitch_pulse::decode_active_port_updated(&message) {
                    debug!("on_port_change: received event for {}", port.as_str());
                    if tx.send(port).is_err() {
                        break;
                    }
                }
            }
            debug!("PulseAudio message stream ended");
        });

        Ok(rx)
    }
}

/// Resolve the fallback device and activate the profile of its active port.
///
/// A device without ports is left alone. Returns the activated slot.
pub async fn configure_fallback_device<S, E>(
    session: &S,
    activator: &ProfileActivator<E>,
) -> Result<Option<PathBuf>, SubscriberError>
where
    S: AudioSession,
    E: Equalizer,
{
    let device = session.fallback_device().await?;
    let device_name = session.device_name(&device).await?;

    let Some(port) = session.active_port(&device).await? else {
        info!("Current device '{}' has no ports", device_name);
        return Ok(None);
    };
    let port_name = session.port_name(&port).await?;

    Ok(Some(activator.activate(&device_name, &port_name).await?))
}

/// Per-session startup: subscribe, then activate the current profile.
///
/// Changes reported while the initial activation runs are buffered in the
/// returned receiver.
pub async fn startup<S, E>(
    session: &S,
    activator: &ProfileActivator<E>,
) -> Result<mpsc::UnboundedReceiver<OwnedObjectPath>, SubscriberError>
where
    S: AudioSession,
    E: Equalizer,
{
    let changes = session.subscribe_port_changes().await?;
    info!("Listening for port changes");
    configure_fallback_device(session, activator).await?;
    Ok(changes)
}

/// Resolve a port object to the identity of its profile.
///
/// Ports whose path has no parent device are reported as `None`.
pub async fn resolve_port<S: AudioSession>(
    session: &S,
    port: &OwnedObjectPath,
) -> Result<Option<ProfileIdentity>, SubscriberError> {
    let Some(device) = eqswitch_pulse::device_path_of(port) else {
        warn!("Ignoring port {} without a parent device", port.as_str());
        return Ok(None);
    };

    let device_name = session.device_name(&device).await?;
    let port_name = session.port_name(port).await?;
    Ok(Some(ProfileIdentity::new(device_name, port_name)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::activator::tests::FakeEqualizer;
    use crate::profile::ProfileStore;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;

    pub(crate) fn path(s: &str) -> OwnedObjectPath {
        OwnedObjectPath::try_from(s).unwrap()
    }

    /// In-memory audio server session.
    ///
    /// `events` are queued on the change feed at subscription time and the
    /// feed is closed afterwards, which looks like a disconnect.
    pub(crate) struct FakeSession {
        pub fallback: OwnedObjectPath,
        pub names: HashMap<String, String>,
        pub active_ports: HashMap<String, OwnedObjectPath>,
        pub events: RefCell<Vec<OwnedObjectPath>>,
        pub calls: RefCell<Vec<&'static str>>,
    }

    impl FakeSession {
        /// A server whose objects live below `root` (a per-session prefix).
        pub fn new(root: &str) -> Self {
            Self {
                fallback: path(&format!("{}/sink0", root)),
                names: HashMap::new(),
                active_ports: HashMap::new(),
                events: RefCell::new(Vec::new()),
                calls: RefCell::new(Vec::new()),
            }
        }

        pub fn with_object(mut self, object: &str, name: &str) -> Self {
            self.names.insert(object.to_string(), name.to_string());
            self
        }

        pub fn with_active_port(mut self, device: &str, port: &str) -> Self {
            self.active_ports.insert(device.to_string(), path(port));
            self
        }

        pub fn with_events(self, events: &[&str]) -> Self {
            *self.events.borrow_mut() = events.iter().map(|e| path(e)).collect();
            self
        }

        fn name_of(&self, object: &OwnedObjectPath) -> Result<String, PulseError> {
            self.names.get(object.as_str()).cloned().ok_or_else(|| {
                PulseError::Dbus(zbus::Error::Failure(format!(
                    "no such object {}",
                    object.as_str()
                )))
            })
        }
    }

    impl AudioSession for FakeSession {
        async fn fallback_device(&self) -> Result<OwnedObjectPath, PulseError> {
            self.calls.borrow_mut().push("fallback");
            Ok(self.fallback.clone())
        }

        async fn device_name(&self, device: &OwnedObjectPath) -> Result<String, PulseError> {
            self.name_of(device)
        }

        async fn active_port(
            &self,
            device: &OwnedObjectPath,
        ) -> Result<Option<OwnedObjectPath>, PulseError> {
            Ok(self.active_ports.get(device.as_str()).cloned())
        }

        async fn port_name(&self, port: &OwnedObjectPath) -> Result<String, PulseError> {
            self.name_of(port)
        }

        async fn subscribe_port_changes(
            &self,
        ) -> Result<mpsc::UnboundedReceiver<OwnedObjectPath>, PulseError> {
            self.calls.borrow_mut().push("subscribe");
            let (tx, rx) = mpsc::unbounded_channel();
            for event in self.events.borrow_mut().drain(..) {
                let _ = tx.send(event);
            }
            Ok(rx)
        }
    }

    /// Laptop sink with speaker and headphone ports below `root`.
    pub(crate) fn laptop(root: &str) -> FakeSession {
        FakeSession::new(root)
            .with_object(&format!("{}/sink0", root), "alsa_output.analog-stereo")
            .with_object(&format!("{}/sink0/port0", root), "analog-output-speaker")
            .with_object(&format!("{}/sink0/port1", root), "analog-output-headphones")
            .with_active_port(&format!("{}/sink0", root), &format!("{}/sink0/port0", root))
    }

    pub(crate) fn activator(dir: &Path) -> ProfileActivator<FakeEqualizer> {
        let live = dir.join("pulse").join("equalizerrc");
        let activator = ProfileActivator::new(
            ProfileStore::new(dir.join("profiles")),
            &live,
            FakeEqualizer::new(&live, "default"),
        );
        activator.prepare().unwrap();
        activator
    }

    #[tokio::test]
    async fn test_startup_activates_fallback_port() {
        let dir = tempfile::tempdir().unwrap();
        let activator = activator(dir.path());
        let session = laptop("/org/pulseaudio/core1");

        startup(&session, &activator).await.unwrap();

        let expected = activator.store().slot_path(&ProfileIdentity::new(
            "alsa_output.analog-stereo",
            "analog-output-speaker",
        ));
        assert_eq!(fs::read_link(activator.live_config()).unwrap(), expected);
        assert_eq!(*session.calls.borrow(), vec!["subscribe", "fallback"]);
    }

    #[tokio::test]
    async fn test_startup_without_ports_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let activator = activator(dir.path());
        let session = FakeSession::new("/org/pulseaudio/core1")
            .with_object("/org/pulseaudio/core1/sink0", "null-sink");

        startup(&session, &activator).await.unwrap();

        assert!(activator.equalizer().calls.borrow().is_empty());
        assert!(!activator.live_config().exists());
        assert!(!activator.store().root().exists());
        assert_eq!(*session.calls.borrow(), vec!["subscribe", "fallback"]);
    }

    #[tokio::test]
    async fn test_change_during_startup_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let activator = activator(dir.path());
        let session =
            laptop("/org/pulseaudio/core1").with_events(&["/org/pulseaudio/core1/sink0/port1"]);

        let mut changes = startup(&session, &activator).await.unwrap();

        assert_eq!(
            changes.try_recv().unwrap(),
            path("/org/pulseaudio/core1/sink0/port1")
        );
        assert_eq!(*session.calls.borrow(), vec!["subscribe", "fallback"]);
    }

    #[tokio::test]
    async fn test_resolve_port_uses_names() {
        let first = laptop("/org/pulseaudio/core1");
        let second = laptop("/org/pulseaudio/core1/reconnected");

        let a = resolve_port(&first, &path("/org/pulseaudio/core1/sink0/port1"))
            .await
            .unwrap();
        let b = resolve_port(
            &second,
            &path("/org/pulseaudio/core1/reconnected/sink0/port1"),
        )
        .await
        .unwrap();

        assert_eq!(
            a,
            Some(ProfileIdentity::new(
                "alsa_output.analog-stereo",
                "analog-output-headphones"
            ))
        );
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_resolve_port_without_device() {
        let session = laptop("/org/pulseaudio/core1");
        assert_eq!(resolve_port(&session, &path("/port0")).await.unwrap(), None);
    }
}
