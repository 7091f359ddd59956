// Engine configuration

use crate::clock::ActorId;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const DEFAULT_RETENTION_FLOOR: usize = 256;

// Slots above a requested position must stay addressable
const MAX_POSITION_LIMIT: u32 = u32::MAX / 2;

/// Bounds enforced by operation validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Largest accepted |delta| for counter and scalar adjustments
    pub max_abs_delta: u64,

    /// Largest slot a PlaceEntity may request
    pub max_position: u32,

    /// Longest counter / field name in bytes
    pub max_name_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_abs_delta: 1_000_000,
            max_position: 4096,
            max_name_len: 64,
        }
    }
}

/// Per-replica engine configuration.
///
/// Every replica of a session must agree on `members` and `limits`; `actor` is
/// the only field that differs between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Local participant
    pub actor: ActorId,

    /// All participants of the session, local actor included
    pub members: BTreeSet<ActorId>,

    /// Number of most recently applied operations kept in the concurrency
    /// buffer even after they became causally stable
    #[serde(default = "default_retention_floor")]
    pub retention_floor: usize,

    #[serde(default)]
    pub limits: Limits,
}

fn default_retention_floor() -> usize {
    DEFAULT_RETENTION_FLOOR
}

impl EngineConfig {
    pub fn new(actor: ActorId, members: impl IntoIterator<Item = ActorId>) -> Self {
        EngineConfig {
            actor,
            members: members.into_iter().collect(),
            retention_floor: DEFAULT_RETENTION_FLOOR,
            limits: Limits::default(),
        }
    }

    pub fn with_retention_floor(mut self, retention_floor: usize) -> Self {
        self.retention_floor = retention_floor;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.members.is_empty() {
            return Err(ConfigError::NoMembers);
        }
        if !self.members.contains(&self.actor) {
            return Err(ConfigError::LocalActorNotMember(self.actor));
        }
        if self.limits.max_abs_delta == 0 {
            return Err(ConfigError::ZeroLimit {
                name: "max_abs_delta",
            });
        }
        if self.limits.max_name_len == 0 {
            return Err(ConfigError::ZeroLimit {
                name: "max_name_len",
            });
        }
        if self.limits.max_position > MAX_POSITION_LIMIT {
            return Err(ConfigError::PositionLimitTooLarge(
                self.limits.max_position,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"actor": 2, "members": [1, 2, 3]}"#).unwrap();

        assert_eq!(config.actor, ActorId(2));
        assert_eq!(config.members.len(), 3);
        assert_eq!(config.retention_floor, DEFAULT_RETENTION_FLOOR);
        assert_eq!(config.limits, Limits::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_local_actor_must_be_member() {
        let config = EngineConfig::new(ActorId(9), [ActorId(1), ActorId(2)]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::LocalActorNotMember(ActorId(9)))
        );

        let empty = EngineConfig::new(ActorId(1), []);
        assert_eq!(empty.validate(), Err(ConfigError::NoMembers));
    }

    #[test]
    fn test_position_limit_must_leave_headroom() {
        let limits = |max_position| Limits {
            max_position,
            ..Limits::default()
        };
        let config = EngineConfig::new(ActorId(1), [ActorId(1)]);

        assert_eq!(
            config.clone().with_limits(limits(u32::MAX)).validate(),
            Err(ConfigError::PositionLimitTooLarge(u32::MAX))
        );
        assert!(config
            .with_limits(limits(MAX_POSITION_LIMIT))
            .validate()
            .is_ok());
    }
}
