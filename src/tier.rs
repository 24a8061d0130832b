use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Quota tiers sold through the checkout flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    S,
    M,
    L,
}

impl Tier {
    /// Word quota granted by the tier.
    pub fn quota_words(self) -> u64 {
        match self {
            Tier::S => 200_000,
            Tier::M => 500_000,
            Tier::L => 1_200_000,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tier::S => "Starter",
            Tier::M => "Medium",
            Tier::L => "Large",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::S => "S",
            Tier::M => "M",
            Tier::L => "L",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S" => Ok(Tier::S),
            "M" => Ok(Tier::M),
            "L" => Ok(Tier::L),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}
