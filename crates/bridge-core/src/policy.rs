//! Command execution policy
//!
//! Allow/deny lists over command identifiers, checked before any side
//! effect. Deny always wins; a non-empty allow list turns the policy into
//! an allowlist.

use crate::config::CommandRestrictions;

/// Why a command was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Listed in the deny list.
    Denied,
    /// Allow list is active and the command is not on it.
    NotAllowlisted,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Denied => "Denied by settings",
            Self::NotAllowlisted => "Not allowlisted by settings",
        }
    }
}

/// Policy over command identifiers.
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    allow: Vec<String>,
    deny: Vec<String>,
}

impl CommandPolicy {
    pub fn new(restrictions: &CommandRestrictions) -> Self {
        Self {
            allow: restrictions.allow.clone(),
            deny: restrictions.deny.clone(),
        }
    }

    /// Check whether a command may run.
    pub fn check(&self, command: &str) -> Result<(), DenyReason> {
        if self.deny.iter().any(|c| c == command) {
            return Err(DenyReason::Denied);
        }
        if !self.allow.is_empty() && !self.allow.iter().any(|c| c == command) {
            return Err(DenyReason::NotAllowlisted);
        }
        Ok(())
    }
}
