use privsync_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// Quotes an identifier for interpolation into PostgreSQL statements.
///
/// The identifier is wrapped in double quotes and every embedded double quote
/// is doubled, so the result always denotes exactly the given name.
#[must_use]
pub fn quote_identifier(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for character in identifier.chars() {
        if character == '"' {
            quoted.push('"');
        }
        quoted.push(character);
    }
    quoted.push('"');
    quoted
}

/// Quotes each part of a dotted name separately and joins them with `.`.
///
/// Distinct paths never render alike, even when a part contains a dot.
#[must_use]
pub fn quote_qualified<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(".")
}

/// Validated database identifier (role, database, schema, object or column name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier(NonEmptyString);

impl Identifier {
    /// Creates an identifier, rejecting empty names and NUL characters.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.contains('\0') {
            return Err(AppError::Validation(format!(
                "identifier '{}' must not contain NUL characters",
                value.escape_default()
            )));
        }

        Ok(Self(NonEmptyString::new(value)?))
    }

    /// Returns the raw, unquoted name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the name quoted for SQL.
    #[must_use]
    pub fn quoted(&self) -> String {
        quote_identifier(self.as_str())
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Object name, optionally qualified by its schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectName {
    schema: Option<Identifier>,
    name: Identifier,
}

impl ObjectName {
    /// Creates a schema-qualified object name.
    #[must_use]
    pub fn qualified(schema: Identifier, name: Identifier) -> Self {
        Self {
            schema: Some(schema),
            name,
        }
    }

    /// Creates an object name living outside any schema.
    #[must_use]
    pub fn unqualified(name: Identifier) -> Self {
        Self { schema: None, name }
    }

    /// Parses a `schema.name` reference, splitting at the first dot.
    pub fn parse_qualified(value: &str) -> AppResult<Self> {
        let Some((schema, name)) = value.split_once('.') else {
            return Err(AppError::InvalidScope(format!(
                "object '{value}' must be schema-qualified as 'schema.name' when no schema is given"
            )));
        };

        Ok(Self::qualified(Identifier::new(schema)?, Identifier::new(name)?))
    }

    /// Returns the schema, if the name is qualified.
    #[must_use]
    pub fn schema(&self) -> Option<&Identifier> {
        self.schema.as_ref()
    }

    /// Returns the unqualified object name.
    #[must_use]
    pub fn name(&self) -> &Identifier {
        &self.name
    }

    /// Returns the name quoted for SQL, each part quoted separately.
    #[must_use]
    pub fn quoted(&self) -> String {
        quote_qualified(
            self.schema
                .iter()
                .map(Identifier::as_str)
                .chain(std::iter::once(self.name.as_str())),
        )
    }
}

impl std::fmt::Display for ObjectName {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(formatter, "{schema}.{}", self.name),
            None => write!(formatter, "{}", self.name),
        }
    }
}
