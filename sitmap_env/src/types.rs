//! Common types for the Sitmap environment abstraction.

use serde::{Deserialize, Serialize};

/// Identifier of a communication channel (group chat, net, radio circuit).
///
/// Every piece of engine state is scoped by channel; channels never share
/// observations, baselines, preferences or live jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub i64);

impl ChannelId {
    /// Creates a ChannelId from its raw value.
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for ChannelId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_display_and_ordering() {
        let a = ChannelId::new(-100);
        let b = ChannelId::from(7);

        assert_eq!(a.to_string(), "-100");
        assert!(a < b);
        assert_eq!(b.as_i64(), 7);
    }
}
