//! Device-side update agent.
//!
//! Polls a client portal for active releases, downloads the newest candidate
//! from the update authority and installs it only after the artifact hash
//! matches and the authority's signature verifies against a locally
//! configured public key.

pub mod agent;
pub mod config;
pub mod error;
pub mod installer;
pub mod source;
pub mod state;
pub mod verifier;
pub mod version;

pub use agent::{CheckOutcome, CheckReport, Rejection, UpdateAgent};
pub use config::AgentConfig;
pub use error::{AgentError, AgentResult};
pub use installer::{InstallOutcome, Installer, ScriptInstaller};
pub use source::{HttpUpdateSource, UpdateSource};
pub use state::VersionStore;
pub use verifier::{Verdict, Verifier};
pub use version::{is_newer, parse_version};
