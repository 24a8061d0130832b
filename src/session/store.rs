//! Versioned on-disk session state.
//!
//! The token and the device id live in one TOML file that is always replaced
//! atomically (temp file, fsync, rename), so a half-written session can never
//! be read back.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Session, new_device_id};
use crate::error::ClientError;

pub const STATE_FILE: &str = "session.toml";
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedState {
    // Absent in files written before versioning.
    #[serde(default)]
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

/// Persists and restores the [`Session`] across client restarts.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store backed by `<dir>/session.toml`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Restores the persisted session. Fails closed: any read, parse or
    /// version problem yields `None`.
    pub fn load(&self) -> Option<Session> {
        let state = match self.read_state() {
            Ok(Some(state)) => state,
            Ok(None) => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable session state");
                return None;
            }
        };
        match (state.token, state.device_id) {
            (Some(token), Some(device_id)) if !token.is_empty() && !device_id.is_empty() => {
                Some(Session { token, device_id })
            }
            (Some(_), None) => {
                warn!(path = %self.path.display(), "session token without device id, ignoring");
                None
            }
            _ => None,
        }
    }

    /// Persists token and device id together in one atomic write.
    pub fn save(&self, session: &Session) -> Result<(), ClientError> {
        self.write_state(&PersistedState {
            version: STATE_VERSION,
            device_id: Some(session.device_id.clone()),
            token: Some(session.token.clone()),
        })?;
        debug!(path = %self.path.display(), "session saved");
        Ok(())
    }

    /// Removes the token. The device id is kept since it identifies the
    /// device, not the session.
    ///
    /// A state file written by a newer client is left untouched and reported
    /// as an error.
    pub fn clear(&self) -> Result<(), ClientError> {
        let device_id = self.read_for_update()?.device_id;
        if device_id.is_none() && !self.path.exists() {
            return Ok(());
        }
        self.write_state(&PersistedState {
            version: STATE_VERSION,
            device_id,
            token: None,
        })?;
        debug!(path = %self.path.display(), "session cleared");
        Ok(())
    }

    /// Returns the persisted device id, generating and persisting one on
    /// first use. An existing token is preserved.
    pub fn device_id(&self) -> Result<String, ClientError> {
        let state = self.read_for_update()?;
        if let Some(id) = state.device_id.as_ref().filter(|id| !id.is_empty()) {
            return Ok(id.clone());
        }
        let id = new_device_id();
        self.write_state(&PersistedState {
            version: STATE_VERSION,
            device_id: Some(id.clone()),
            token: state.token,
        })?;
        debug!(device_id = %id, "generated device id");
        Ok(id)
    }

    fn read_state(&self) -> Result<Option<PersistedState>, ClientError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(None);
        }
        let state: PersistedState = toml::from_str(&contents)?;
        if state.version > STATE_VERSION {
            return Err(ClientError::Config(format!(
                "session state version {} is newer than supported version {STATE_VERSION}",
                state.version
            )));
        }
        Ok(Some(state))
    }

    // Base for a rewrite. Only a file that does not parse is replaced; a newer
    // version or an unreadable file is an error.
    fn read_for_update(&self) -> Result<PersistedState, ClientError> {
        match self.read_state() {
            Ok(state) => Ok(state.unwrap_or_default()),
            Err(ClientError::TomlDe(e)) => {
                warn!(path = %self.path.display(), error = %e, "replacing corrupt session state");
                Ok(PersistedState::default())
            }
            Err(e) => Err(e),
        }
    }

    fn write_state(&self, state: &PersistedState) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string(state)?;
        let tmp_path = self.path.with_extension("toml.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
