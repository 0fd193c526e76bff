//! Placeholder dialects for driver-ready SQL.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FaylError;

/// The positional-parameter syntax of the target driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placeholder {
    /// `?, ?, ?` (MySQL, SQLite)
    #[default]
    Question,
    /// `$1, $2, $3` (PostgreSQL)
    Dollar,
    /// `:1, :2, :3` (Oracle)
    Colon,
    /// `@p1, @p2, @p3` (SQL Server)
    #[serde(rename = "atp", alias = "at")]
    AtP,
}

impl Placeholder {
    /// Render the placeholder for the 1-based argument `index`.
    pub fn render(&self, index: usize) -> String {
        match self {
            Placeholder::Question => "?".to_string(),
            Placeholder::Dollar => format!("${}", index),
            Placeholder::Colon => format!(":{}", index),
            Placeholder::AtP => format!("@p{}", index),
        }
    }

    /// Pick the usual dialect for a driver name or a connection URL scheme.
    pub fn for_driver(driver: &str) -> Option<Self> {
        let scheme = driver.split(':').next().unwrap_or(driver).to_ascii_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" | "pgx" => Some(Placeholder::Dollar),
            "mysql" | "mariadb" | "sqlite" | "sqlite3" => Some(Placeholder::Question),
            "mssql" | "sqlserver" => Some(Placeholder::AtP),
            "oracle" | "godror" => Some(Placeholder::Colon),
            _ => None,
        }
    }

    /// SQL Server and Oracle have no `LIMIT`; they page with `OFFSET … FETCH`.
    pub(crate) fn uses_fetch_clause(&self) -> bool {
        matches!(self, Placeholder::AtP | Placeholder::Colon)
    }

    /// SQL Server rejects `OFFSET … FETCH` without an `ORDER BY`.
    pub(crate) fn fetch_needs_order(&self) -> bool {
        matches!(self, Placeholder::AtP)
    }

    /// Oracle rejects `AS` before a table alias.
    pub(crate) fn aliases_with_as(&self) -> bool {
        !matches!(self, Placeholder::Colon)
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Placeholder::Question => "question",
            Placeholder::Dollar => "dollar",
            Placeholder::Colon => "colon",
            Placeholder::AtP => "atp",
        };
        f.write_str(name)
    }
}

impl FromStr for Placeholder {
    type Err = FaylError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "question" | "?" => Ok(Placeholder::Question),
            "dollar" | "$" => Ok(Placeholder::Dollar),
            "colon" | ":" => Ok(Placeholder::Colon),
            "atp" | "at" | "@" => Ok(Placeholder::AtP),
            other => Err(FaylError::Config(format!(
                "unknown placeholder '{}'. Expected: question, dollar, colon, or atp",
                other
            ))),
        }
    }
}
