mod store;

pub use store::{SessionStore, STATE_FILE, STATE_VERSION};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The client's proof of authentication plus its stable device identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub device_id: String,
}

impl Session {
    pub fn new(token: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            device_id: device_id.into(),
        }
    }
}

/// Generates a fresh device identifier.
///
/// The backend may use it to correlate logins; it is metadata, not a
/// security boundary.
pub fn new_device_id() -> String {
    format!("device_{}", Uuid::new_v4().simple())
}
