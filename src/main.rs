// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! eqswitch agent - switches equalizer profiles when the output port changes.

use eqswitch::activator::ProfileActivator;
use eqswitch::config::ConfigError;
use eqswitch::equalizer::CommandEqualizer;
use eqswitch::profile::ProfileStore;
use eqswitch::session::{PulseControl, SessionManager};
use eqswitch::{Agent, ConfigManager};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("eqswitch=info".parse()?)
                .add_directive("zbus=warn".parse()?),
        )
        .init();

    info!("eqswitch starting...");

    // Load configuration
    let config_manager = ConfigManager::new()?;
    let config = config_manager.load()?;
    let profile_dir = config.profile_dir.clone().ok_or(ConfigError::NoConfigDir)?;
    let live_config = config.live_config.clone().ok_or(ConfigError::NoConfigDir)?;

    info!(
        "Profiles in {:?}, live config at {:?}",
        profile_dir, live_config
    );

    let activator = ProfileActivator::new(
        ProfileStore::new(profile_dir),
        live_config,
        CommandEqualizer::new(&config.equalizer),
    );
    let sessions = SessionManager::new(
        PulseControl::new(config.server.clone()),
        config.retry_interval(),
    );
    let agent = Agent::new(sessions, activator);

    // Handle shutdown signals
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        result = agent.run() => {
            if let Err(e) = result {
                error!("Fatal error: {}", e);
                return Err(e.into());
            }
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
        }
    }

    info!("eqswitch stopped");
    Ok(())
}
