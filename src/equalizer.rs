// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! External equalizer engine control.

use crate::config::EqualizerConfig;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum EqualizerError {
    #[error("Failed to execute {0}: {1}")]
    SpawnFailed(String, std::io::Error),
}

/// The two hooks the profile switch needs from the equalizer engine.
#[allow(async_fn_in_trait)]
pub trait Equalizer {
    /// Write the engine's live settings to the live configuration path.
    async fn dump_settings(&self) -> Result<(), EqualizerError>;

    /// Reload the engine's settings from the live configuration path.
    async fn apply_settings(&self) -> Result<(), EqualizerError>;
}

/// Drives an equalizer engine through its command line interface.
///
/// A non-zero exit status is logged and otherwise ignored; only a program
/// that cannot be started at all is an error.
#[derive(Debug, Clone)]
pub struct CommandEqualizer {
    program: String,
    dump_args: Vec<String>,
    apply_args: Vec<String>,
}

impl CommandEqualizer {
    pub fn new(config: &EqualizerConfig) -> Self {
        Self {
            program: config.program.clone(),
            dump_args: config.dump_args.clone(),
            apply_args: config.apply_args.clone(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<(), EqualizerError> {
        let cmdline = format!("{} {}", self.program, args.join(" "));
        debug!("Running {}", cmdline);

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                error!("Failed to execute {}: {}", self.program, e);
                EqualizerError::SpawnFailed(self.program.clone(), e)
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                "{} exited with {}: {}",
                cmdline,
                output.status,
                stderr.trim()
            );
        }

        Ok(())
    }
}

impl Equalizer for CommandEqualizer {
    async fn dump_settings(&self) -> Result<(), EqualizerError> {
        self.run(&self.dump_args).await
    }

    async fn apply_settings(&self) -> Result<(), EqualizerError> {
        self.run(&self.apply_args).await
    }
}
