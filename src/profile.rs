// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Profile identities and their slots on disk.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// File name of the settings file inside every profile directory.
pub const PROFILE_FILE_NAME: &str = "equalizerrc";

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProfileError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The (device name, port name) pair a profile is keyed by.
///
/// Object paths are per-session and never part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileIdentity {
    pub device: String,
    pub port: String,
}

impl ProfileIdentity {
    pub fn new(device: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for ProfileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' on '{}'", self.port, self.device)
    }
}

/// Turn a device or port name into a single path component.
///
/// Separators are replaced and the special names `""`, `.` and `..` get a
/// `_` prefix, so a name always stays inside its parent directory.
fn path_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\0' { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => format!("_{}", cleaned),
        _ => cleaned,
    }
}

/// Maps profile identities to settings files under one root directory.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic slot path: `<root>/<device>/<port>/equalizerrc`.
    pub fn slot_path(&self, identity: &ProfileIdentity) -> PathBuf {
        self.root
            .join(path_component(&identity.device))
            .join(path_component(&identity.port))
            .join(PROFILE_FILE_NAME)
    }

    /// Return the slot for `identity`, creating it with `seed` if it is new.
    ///
    /// An existing slot is never rewritten.
    pub fn ensure_slot(
        &self,
        identity: &ProfileIdentity,
        seed: &[u8],
    ) -> Result<PathBuf, ProfileError> {
        let slot = self.slot_path(identity);
        if slot.exists() {
            debug!("Profile for {} exists at {:?}", identity, slot);
            return Ok(slot);
        }

        if let Some(dir) = slot.parent() {
            fs::create_dir_all(dir).map_err(|e| ProfileError::io(dir, e))?;
        }
        fs::write(&slot, seed).map_err(|e| ProfileError::io(&slot, e))?;
        info!("Created new profile for {} at {:?}", identity, slot);
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_path_layout() {
        let store = ProfileStore::new("/profiles");
        let id = ProfileIdentity::new("alsa_output.pci-0000_00_1f.3.analog-stereo", "analog-output-headphones");
        assert_eq!(
            store.slot_path(&id),
            PathBuf::from(
                "/profiles/alsa_output.pci-0000_00_1f.3.analog-stereo/analog-output-headphones/equalizerrc"
            )
        );
    }

    #[test]
    fn test_slot_path_stays_inside_root() {
        let store = ProfileStore::new("/profiles");
        let id = ProfileIdentity::new("..", "a/../../b");
        let slot = store.slot_path(&id);
        assert_eq!(slot, PathBuf::from("/profiles/_../a_.._.._b/equalizerrc"));

        let empty = ProfileIdentity::new("", ".");
        assert_eq!(
            store.slot_path(&empty),
            PathBuf::from("/profiles/_/_./equalizerrc")
        );
    }

    #[test]
    fn test_ensure_slot_seeds_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("profiles"));
        let id = ProfileIdentity::new("sink", "speaker");

        let slot = store.ensure_slot(&id, b"first").unwrap();
        assert_eq!(fs::read_to_string(&slot).unwrap(), "first");

        let again = store.ensure_slot(&id, b"second").unwrap();
        assert_eq!(again, slot);
        assert_eq!(fs::read_to_string(&slot).unwrap(), "first");
    }
}
