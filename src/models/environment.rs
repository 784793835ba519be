use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ParseError;

/// Authority environment (`ambiente`) a document was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Environment {
    #[serde(rename = "00")]
    Test,
    #[serde(rename = "01")]
    Production,
}

impl Environment {
    pub fn code(&self) -> &'static str {
        match self {
            Environment::Test => "00",
            Environment::Production => "01",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Environment {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "00" | "test" => Ok(Environment::Test),
            "01" | "production" => Ok(Environment::Production),
            other => Err(ParseError::new("environment", other)),
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
