// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! PulseAudio D-Bus protocol definitions for eqswitch.
//!
//! PulseAudio does not publish its control objects on the session bus. The
//! session bus only carries a small lookup service that tells clients where
//! the server's own peer-to-peer D-Bus socket lives. This crate wraps both
//! halves: the lookup proxy and the peer connection used for property reads
//! and signal subscription.

use tracing::debug;
use zbus::message::Type as MessageType;
use zbus::zvariant::{OwnedObjectPath, OwnedValue};
use zbus::{proxy, Connection, Message, MessageStream};

/// Well-known session bus name of the server lookup service.
pub const LOOKUP_SERVICE: &str = "org.PulseAudio1";

/// Object path of the server lookup service.
pub const LOOKUP_PATH: &str = "/org/pulseaudio/server_lookup1";

/// Interface carrying the `Address` property of the lookup service.
pub const LOOKUP_INTERFACE: &str = "org.PulseAudio.ServerLookup1";

/// Object path of the core object on the peer connection.
pub const CORE_PATH: &str = "/org/pulseaudio/core1";

/// Core interface name.
pub const CORE_INTERFACE: &str = "org.PulseAudio.Core1";

/// Device (sink/source) interface name.
pub const DEVICE_INTERFACE: &str = "org.PulseAudio.Core1.Device";

/// Device port interface name.
pub const PORT_INTERFACE: &str = "org.PulseAudio.Core1.DevicePort";

/// Member name of the active port change signal.
pub const ACTIVE_PORT_UPDATED: &str = "ActivePortUpdated";

/// Error name returned by the bus when the lookup service is not registered.
pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";

const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Error types for PulseAudio protocol operations.
#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),
    #[error("Unexpected property value: {0}")]
    Value(#[from] zbus::zvariant::Error),
}

/// Proxy for the server lookup service on the session bus.
#[proxy(
    interface = "org.PulseAudio.ServerLookup1",
    default_service = "org.PulseAudio1",
    default_path = "/org/pulseaudio/server_lookup1"
)]
trait ServerLookup {
    #[zbus(property)]
    fn address(&self) -> zbus::Result<String>;
}

/// Whether `err` means the lookup service has no owner on the bus yet.
pub fn is_service_unknown(err: &zbus::Error) -> bool {
    match err {
        zbus::Error::MethodError(name, _, _) => name.as_str() == SERVICE_UNKNOWN,
        zbus::Error::FDO(e) => matches!(**e, zbus::fdo::Error::ServiceUnknown(_)),
        _ => false,
    }
}

/// Ask the session bus lookup service for the server's D-Bus address.
///
/// Returns `Ok(None)` while the lookup service is not registered, which
/// happens for a short while after the server starts or the protocol module
/// gets loaded.
pub async fn lookup_address(session_bus: &Connection) -> Result<Option<String>, PulseError> {
    let proxy = ServerLookupProxy::builder(session_bus)
        .cache_properties(zbus::proxy::CacheProperties::No)
        .build()
        .await?;

    match proxy.address().await {
        Ok(address) => Ok(Some(address)),
        Err(e) if is_service_unknown(&e) => {
            debug!("{} not registered yet: {}", LOOKUP_SERVICE, e);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Derive the owning device's object path from a port path.
///
/// Port objects are always nested one level below their device, e.g.
/// `/org/pulseaudio/core1/sink0/port1` belongs to `/org/pulseaudio/core1/sink0`.
pub fn device_path_of(port: &OwnedObjectPath) -> Option<OwnedObjectPath> {
    let (parent, _) = port.as_str().rsplit_once('/')?;
    if parent.is_empty() {
        return None;
    }
    OwnedObjectPath::try_from(parent).ok()
}

/// Decode an `ActivePortUpdated` signal into the new port's object path.
///
/// Any other message yields `None`.
pub fn decode_active_port_updated(msg: &Message) -> Option<OwnedObjectPath> {
    let header = msg.header();
    if header.message_type() != MessageType::Signal {
        return None;
    }
    if header.interface().map(|i| i.as_str()) != Some(DEVICE_INTERFACE) {
        return None;
    }
    if header.member().map(|m| m.as_str()) != Some(ACTIVE_PORT_UPDATED) {
        return None;
    }
    msg.body().deserialize::<OwnedObjectPath>().ok()
}

/// Peer-to-peer connection to the server's D-Bus socket.
#[derive(Debug, Clone)]
pub struct PulseConnection {
    conn: Connection,
}

impl PulseConnection {
    /// Open a peer-to-peer connection to `address`.
    pub async fn connect(address: &str) -> Result<Self, PulseError> {
        let conn = zbus::connection::Builder::address(address)?
            .p2p()
            .build()
            .await?;
        debug!("Opened PulseAudio D-Bus connection at {}", address);
        Ok(Self { conn })
    }

    /// Stream of every message arriving on the connection.
    ///
    /// The stream ends once the server closes the socket.
    pub fn messages(&self) -> MessageStream {
        MessageStream::from(&self.conn)
    }

    async fn property<T>(&self, path: &str, interface: &str, name: &str) -> Result<T, PulseError>
    where
        T: TryFrom<OwnedValue, Error = zbus::zvariant::Error>,
    {
        let reply = self
            .conn
            .call_method(
                None::<&str>,
                path,
                Some(PROPERTIES_INTERFACE),
                "Get",
                &(interface, name),
            )
            .await?;
        let body = reply.body();
        let value: OwnedValue = body.deserialize()?;
        Ok(T::try_from(value)?)
    }

    /// Object path of the fallback (default) sink.
    pub async fn fallback_sink(&self) -> Result<OwnedObjectPath, PulseError> {
        self.property(CORE_PATH, CORE_INTERFACE, "FallbackSink").await
    }

    /// Name of the device at `device`.
    pub async fn device_name(&self, device: &OwnedObjectPath) -> Result<String, PulseError> {
        self.property(device.as_str(), DEVICE_INTERFACE, "Name").await
    }

    /// Active port of the device at `device`.
    ///
    /// The server answers with an error reply when the device has no ports,
    /// which is reported as `Ok(None)`. Transport failures stay errors.
    pub async fn active_port(
        &self,
        device: &OwnedObjectPath,
    ) -> Result<Option<OwnedObjectPath>, PulseError> {
        match self
            .property::<OwnedObjectPath>(device.as_str(), DEVICE_INTERFACE, "ActivePort")
            .await
        {
            Ok(port) => Ok(Some(port)),
            Err(PulseError::Dbus(zbus::Error::MethodError(name, detail, _))) => {
                debug!(
                    "{} has no active port ({}: {})",
                    device.as_str(),
                    name.as_str(),
                    detail.unwrap_or_default()
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Name of the port at `port`.
    pub async fn port_name(&self, port: &OwnedObjectPath) -> Result<String, PulseError> {
        self.property(port.as_str(), PORT_INTERFACE, "Name").await
    }

    /// Ask the core object to deliver `ActivePortUpdated` for every device.
    pub async fn listen_for_port_changes(&self) -> Result<(), PulseError> {
        let signal = format!("{}.{}", DEVICE_INTERFACE, ACTIVE_PORT_UPDATED);
        let objects: Vec<OwnedObjectPath> = Vec::new();
        self.conn
            .call_method(
                None::<&str>,
                CORE_PATH,
                Some(CORE_INTERFACE),
                "ListenForSignal",
                &(signal.as_str(), objects),
            )
            .await?;
        Ok(())
    }
}
