//! Chat-platform identifier types.
//!
//! Every object on the platform (guild, channel, role, user) is addressed by a
//! 64-bit snowflake. Each kind gets its own newtype so a channel id can never be
//! passed where a role id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when parsing an identifier from text fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} id: {value:?}")]
pub struct ParseIdError {
    kind: &'static str,
    value: String,
}

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Returns the raw snowflake value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map(Self).map_err(|_| ParseIdError {
                    kind: $kind,
                    value: s.to_string(),
                })
            }
        }
    };
}

snowflake_id!(
    /// A guild (community). Channel-group numbers are unique per guild.
    GuildId,
    "guild"
);

snowflake_id!(
    /// A voice, text or category channel.
    ChannelId,
    "channel"
);

snowflake_id!(
    /// A role used for access control.
    RoleId,
    "role"
);

snowflake_id!(
    /// A platform user (member of a guild).
    UserId,
    "user"
);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let user: UserId = "  81384788765712384 ".parse().unwrap();
        assert_eq!(user, UserId(81_384_788_765_712_384));
        assert_eq!(user.to_string(), "81384788765712384");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = "abc".parse::<ChannelId>().unwrap_err();
        assert_eq!(err.to_string(), "invalid channel id: \"abc\"");
    }

    #[test]
    fn test_serde_is_transparent() {
        let json = serde_json::to_string(&GuildId(42)).unwrap();
        assert_eq!(json, "42");
        let role: RoleId = serde_json::from_str("7").unwrap();
        assert_eq!(role.get(), 7);
    }
}
