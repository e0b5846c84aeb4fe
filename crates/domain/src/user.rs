//! Local user records exchanged with the host's user store

use serde::{Deserialize, Serialize};

/// A local account as the host's user store reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Host-side user identifier
    pub id: String,
    /// Login name, unique within the host
    pub username: String,
    /// Account email, when the host tracks one
    pub email: Option<String>,
    /// Display name shown in the host UI
    pub display_name: Option<String>,
}

/// Attributes for provisioning a new local account from claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    /// Desired login name (already de-duplicated by the caller)
    pub username: String,
    /// Account email derived from the claims
    pub email: Option<String>,
    /// Display name derived from the claims
    pub display_name: Option<String>,
    /// Nickname derived from the claims
    pub nickname: Option<String>,
}
