//! Authenticated user identity

use serde::{Deserialize, Serialize};

/// A user resolved from a transport-level token.
///
/// The `tag` is the stable identifier the charging domain uses to associate
/// transactions with a user; it never changes even when tokens rotate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Internal user ID
    pub id: String,
    /// Stable user tag used by the charging-session domain
    pub tag: String,
}

impl User {
    pub fn new(id: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag: tag.into(),
        }
    }
}
