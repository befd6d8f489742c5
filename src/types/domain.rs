//! The independent state partitions, each with its own command log.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A partition of session state with its own append-only command log.
///
/// The declaration order is the tie-break rank used when two commands from
/// different domains carry the same timestamp: a crew mutation lands before
/// the clock mutation it funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Characters,
    Crews,
    Clocks,
}

impl Domain {
    /// Every domain in merge rank order.
    pub const ALL: [Domain; 3] = [Domain::Characters, Domain::Crews, Domain::Clocks];

    /// The wire name used as the `<domain>` prefix of a command type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Characters => "characters",
            Domain::Crews => "crews",
            Domain::Clocks => "clocks",
        }
    }

    /// Parses a wire name back into a domain.
    pub fn from_wire(name: &str) -> Option<Domain> {
        Domain::ALL.into_iter().find(|domain| domain.as_str() == name)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_rank_order() {
        assert!(Domain::Characters < Domain::Crews);
        assert!(Domain::Crews < Domain::Clocks);
    }

    #[test]
    fn test_wire_names() {
        for domain in Domain::ALL {
            assert_eq!(Domain::from_wire(domain.as_str()), Some(domain));
        }
        assert_eq!(Domain::from_wire("factions"), None);
        assert_eq!(
            serde_json::to_string(&Domain::Clocks).unwrap(),
            "\"clocks\""
        );
    }
}
