//! Identifier Policy: whether a caller-supplied id is forced on insert.

use std::str::FromStr;

use crate::error::StaError;
use crate::model::Id;

/// Deployment-wide id generation mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdGenerationMode {
    /// The store always assigns; supplied ids are ignored.
    #[default]
    ServerGeneratedOnly,
    /// Supplied ids are used when they fit the key space.
    ServerAndClientGenerated,
}

impl FromStr for IdGenerationMode {
    type Err = StaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        match s.trim().to_ascii_lowercase().as_str() {
            "servergeneratedonly" | "server_generated_only" => Ok(Self::ServerGeneratedOnly),
            "serverandclientgenerated" | "server_and_client_generated" => {
                Ok(Self::ServerAndClientGenerated)
            }
            other => Err(StaError::configuration(format!(
                "unknown id generation mode '{other}'"
            ))),
        }
    }
}

/// The decision for one insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdAssignment {
    /// Let the key sequence pick.
    StoreAssigned,
    /// Write this key explicitly.
    Forced(i64),
}

/// Pure decision object consulted once per insert.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdPolicy {
    mode: IdGenerationMode,
}

impl IdPolicy {
    // ---
    pub fn new(mode: IdGenerationMode) -> Self {
        Self { mode }
    }

    /// Total: ids that can not be keys (non-numeric text, zero, negative)
    /// fall back to store assignment.
    pub fn assign(&self, supplied: Option<&Id>) -> IdAssignment {
        // ---
        if self.mode == IdGenerationMode::ServerGeneratedOnly {
            return IdAssignment::StoreAssigned;
        }
        match supplied.and_then(Id::as_key) {
            Some(key) if key > 0 => IdAssignment::Forced(key),
            _ => IdAssignment::StoreAssigned,
        }
    }
}
