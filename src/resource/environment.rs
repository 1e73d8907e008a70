//! Deployment environments

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the three environments a resource copy can live in.
///
/// There is no ambient "current environment": every read and write names the
/// environment it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development
    Localhost,
    /// Staging, where administrators iterate
    Staging,
    /// Production, written only by promotion and rollback
    Production,
}

impl Environment {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Localhost => "localhost",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "localhost" => Ok(Environment::Localhost),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{}'", other)),
        }
    }
}
