//! Configuration paths for Archivist
//!
//! The catalog lives in the archive (`<root>/_metadata`); the action catalog
//! lives in the Archivist home (`$ARCHIVIST_HOME`, default `~/.archivist`).

use std::path::{Path, PathBuf};

use anyhow::Result;
use archivist::database::METADATA_DIR;
use archivist::identify::{ActionCatalog, SiegfriedIdentifier};
use archivist_logging::archivist_home;
use tracing::warn;

use super::error::HelpfulError;

pub const ACTIONS_FILE: &str = "actions.toml";

/// Identifier program, overriding `sf` on the PATH.
pub const SIEGFRIED_ENV: &str = "ARCHIVIST_SIEGFRIED";
/// Signature file handed to the identifier.
pub const SIGNATURE_ENV: &str = "ARCHIVIST_SIGNATURE";

/// Log directory for commands that change an archive.
pub fn logs_dir(root: &Path) -> PathBuf {
    root.join(METADATA_DIR).join("logs")
}

/// Default action catalog: `$ARCHIVIST_HOME/actions.toml`.
pub fn default_actions_path() -> Result<PathBuf> {
    Ok(archivist_home()?.join(ACTIONS_FILE))
}

/// Siegfried as configured through the environment.
pub fn identifier() -> SiegfriedIdentifier {
    let mut identifier = SiegfriedIdentifier::default();
    if let Some(program) = std::env::var_os(SIEGFRIED_ENV).filter(|v| !v.is_empty()) {
        identifier.program = PathBuf::from(program);
    }
    identifier.signature_file = std::env::var_os(SIGNATURE_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    identifier
}

/// Load the action catalog.
///
/// An explicit path must exist. A missing default catalog yields an empty one,
/// so every file falls back to a manual action.
pub fn load_actions(explicit: Option<&Path>) -> Result<ActionCatalog> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => (default_actions_path()?, false),
    };
    if !path.exists() {
        if required {
            return Err(HelpfulError::actions_unavailable(&path, "File does not exist").into());
        }
        warn!(
            "No action catalog at {}, every file will need a manual action",
            path.display()
        );
        return Ok(ActionCatalog::default());
    }
    ActionCatalog::load(&path)
        .map_err(|err| HelpfulError::actions_unavailable(&path, &err.to_string()).into())
}
