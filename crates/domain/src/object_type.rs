use std::str::FromStr;

use privsync_core::AppError;
use serde::{Deserialize, Deserializer, Serialize};

/// Kinds of database objects privileges can be granted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    /// A whole database.
    Database,
    /// A schema.
    Schema,
    /// Tables, views and foreign tables.
    Table,
    /// Sequences.
    Sequence,
    /// Functions.
    Function,
    /// Procedures.
    Procedure,
    /// Functions and procedures alike.
    Routine,
    /// Types.
    Type,
    /// Domains.
    Domain,
    /// Foreign-data wrappers.
    ForeignDataWrapper,
    /// Foreign servers.
    ForeignServer,
    /// Columns of a single table.
    Column,
}

impl ObjectType {
    /// Returns the stable lowercase name of the object type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Schema => "schema",
            Self::Table => "table",
            Self::Sequence => "sequence",
            Self::Function => "function",
            Self::Procedure => "procedure",
            Self::Routine => "routine",
            Self::Type => "type",
            Self::Domain => "domain",
            Self::ForeignDataWrapper => "foreign_data_wrapper",
            Self::ForeignServer => "foreign_server",
            Self::Column => "column",
        }
    }

    /// Returns all known object types.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[ObjectType] = &[
            ObjectType::Database,
            ObjectType::Schema,
            ObjectType::Table,
            ObjectType::Sequence,
            ObjectType::Function,
            ObjectType::Procedure,
            ObjectType::Routine,
            ObjectType::Type,
            ObjectType::Domain,
            ObjectType::ForeignDataWrapper,
            ObjectType::ForeignServer,
            ObjectType::Column,
        ];

        ALL
    }

    /// Returns the SQL keyword naming a single object of this type in a GRANT target.
    #[must_use]
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            Self::Database => "DATABASE",
            Self::Schema => "SCHEMA",
            Self::Table | Self::Column => "TABLE",
            Self::Sequence => "SEQUENCE",
            Self::Function => "FUNCTION",
            Self::Procedure => "PROCEDURE",
            Self::Routine => "ROUTINE",
            Self::Type => "TYPE",
            Self::Domain => "DOMAIN",
            Self::ForeignDataWrapper => "FOREIGN DATA WRAPPER",
            Self::ForeignServer => "FOREIGN SERVER",
        }
    }

    /// Returns the plural keyword used in `ALL <PLURAL> IN SCHEMA`, when PostgreSQL has one.
    #[must_use]
    pub fn schema_wide_keyword(&self) -> Option<&'static str> {
        match self {
            Self::Table => Some("TABLES"),
            Self::Sequence => Some("SEQUENCES"),
            Self::Function => Some("FUNCTIONS"),
            Self::Procedure => Some("PROCEDURES"),
            Self::Routine => Some("ROUTINES"),
            _ => None,
        }
    }

    /// Returns whether objects of this type live inside a schema.
    #[must_use]
    pub fn is_schema_resident(&self) -> bool {
        !matches!(
            self,
            Self::Database | Self::Schema | Self::ForeignDataWrapper | Self::ForeignServer
        )
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .to_lowercase();

        match normalized.as_str() {
            "database" => Ok(Self::Database),
            "schema" => Ok(Self::Schema),
            "table" => Ok(Self::Table),
            "sequence" => Ok(Self::Sequence),
            "function" => Ok(Self::Function),
            "procedure" => Ok(Self::Procedure),
            "routine" => Ok(Self::Routine),
            "type" => Ok(Self::Type),
            "domain" => Ok(Self::Domain),
            "foreign_data_wrapper" => Ok(Self::ForeignDataWrapper),
            "foreign_server" => Ok(Self::ForeignServer),
            "column" => Ok(Self::Column),
            _ => Err(AppError::Validation(format!(
                "unknown object type '{value}' (expected one of: {})",
                Self::all()
                    .iter()
                    .map(Self::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for ObjectType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::from_str(value.as_str()).map_err(serde::de::Error::custom)
    }
}
