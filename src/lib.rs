// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! eqswitch - per-port equalizer profiles for PulseAudio.
//!
//! The agent keeps a D-Bus session to the PulseAudio server, listens for
//! active port changes, and points the equalizer's live configuration at the
//! profile stored for the current device and port.

pub mod activator;
pub mod agent;
pub mod config;
pub mod debounce;
pub mod equalizer;
pub mod profile;
pub mod session;
pub mod subscriber;

pub use agent::{Agent, AgentError};
pub use config::{AgentConfig, ConfigManager};
