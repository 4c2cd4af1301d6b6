//! Strongly-typed identifiers for reconciliation entities.
//!
//! All identifiers are:
//! - **Strongly typed**: a scheduling ID can never be passed where an
//!   operation's correlation ID is expected
//! - **Lexicographically sortable**: ULIDs encode creation time and sort naturally
//! - **Globally unique**: no coordination required for generation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// Unique identifier of a reconciliation.
///
/// Every reconciliation of a `(cluster, configVersion)` pair gets exactly one
/// scheduling ID; all operations of that reconciliation carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchedulingId(Ulid);

impl SchedulingId {
    /// Generates a new unique scheduling ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates a scheduling ID from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for SchedulingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SchedulingId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid scheduling ID '{s}': {e}"),
            })
    }
}

/// Unique identifier of a single component operation within a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Ulid);

impl CorrelationId {
    /// Generates a new unique correlation ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates a correlation ID from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid correlation ID '{s}': {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduling_id_roundtrip() {
        let id = SchedulingId::generate();
        let parsed: SchedulingId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn correlation_id_roundtrip() {
        let id = CorrelationId::generate();
        let parsed: CorrelationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn invalid_id_rejected() {
        let err = "definitely-not-a-ulid".parse::<SchedulingId>().unwrap_err();
        assert!(err.to_string().contains("invalid scheduling ID"));
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = CorrelationId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn ids_are_sortable_by_creation() {
        let first = SchedulingId::generate();
        let second = SchedulingId::generate();
        assert!(first <= second);
    }
}
