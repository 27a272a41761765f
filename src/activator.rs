// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Switching the live equalizer configuration to a profile.
//!
//! The equalizer engine only ever reads and writes one fixed path. That path
//! is a symlink into the profile tree, so switching profiles is a pointer
//! swap and the engine needs no knowledge of profiles at all.

use crate::equalizer::{Equalizer, EqualizerError};
use crate::profile::{ProfileError, ProfileIdentity, ProfileStore};
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("Equalizer error: {0}")]
    Equalizer(#[from] EqualizerError),
    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),
    #[error("IO error on live config {path:?}: {source}")]
    LiveConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ActivationError {
    fn live(path: &Path, source: io::Error) -> Self {
        Self::LiveConfig {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Points the live configuration at the profile of a device/port pair.
pub struct ProfileActivator<E> {
    store: ProfileStore,
    live_config: PathBuf,
    equalizer: E,
}

impl<E: Equalizer> ProfileActivator<E> {
    pub fn new(store: ProfileStore, live_config: impl Into<PathBuf>, equalizer: E) -> Self {
        Self {
            store,
            live_config: live_config.into(),
            equalizer,
        }
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    pub fn live_config(&self) -> &Path {
        &self.live_config
    }

    pub fn equalizer(&self) -> &E {
        &self.equalizer
    }

    /// Make sure the directory holding the live path exists.
    pub fn prepare(&self) -> Result<(), ActivationError> {
        if let Some(dir) = self.live_config.parent() {
            fs::create_dir_all(dir).map_err(|e| ActivationError::live(dir, e))?;
        }
        Ok(())
    }

    /// Switch the live configuration to the profile of `device`/`port`.
    ///
    /// Steps are not rolled back when a later one fails.
    pub async fn activate(&self, device: &str, port: &str) -> Result<PathBuf, ActivationError> {
        let identity = ProfileIdentity::new(device, port);
        debug!("Activating profile for {}", identity);

        // Persist the current settings into whatever profile is live now.
        self.equalizer.dump_settings().await?;
        let current = fs::read(&self.live_config)
            .map_err(|e| ActivationError::live(&self.live_config, e))?;

        match fs::remove_file(&self.live_config) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(ActivationError::live(&self.live_config, e)),
        }

        let slot = self.store.ensure_slot(&identity, &current)?;
        symlink(&slot, &self.live_config)
            .map_err(|e| ActivationError::live(&self.live_config, e))?;

        self.equalizer.apply_settings().await?;
        info!("Activated equalizer profile for {}", identity);
        Ok(slot)
    }
}
