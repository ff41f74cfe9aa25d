//! Object selection: which objects a statement applies to and how they are rendered.

use privsync_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use crate::{Identifier, ObjectName, ObjectType};

/// Concrete set of objects a grant or revoke applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Scope {
    /// The named database itself.
    WholeDatabase {
        /// Database name.
        database: Identifier,
    },
    /// The named schema, or every object of the type inside it.
    WholeSchema {
        /// Schema name.
        schema: Identifier,
    },
    /// An explicit list of objects, in declaration order.
    ExplicitObjects {
        /// Objects to target.
        objects: Vec<ObjectName>,
    },
}

impl Scope {
    /// Returns a short variant name for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WholeDatabase { .. } => "whole database",
            Self::WholeSchema { .. } => "whole schema",
            Self::ExplicitObjects { .. } => "explicit objects",
        }
    }
}

/// Rendered `ON` clause of a GRANT or REVOKE statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetClause(String);

impl TargetClause {
    /// Returns the clause text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for TargetClause {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Maps an object type and scope to the SQL target clause.
///
/// Fails with [`AppError::InvalidScope`] when the scope variant is not legal
/// for the object type, when an explicit list is empty, or when object names
/// are qualified inconsistently with the object type.
pub fn resolve_target(object_type: ObjectType, scope: &Scope) -> AppResult<TargetClause> {
    let clause = match (object_type, scope) {
        (ObjectType::Database, Scope::WholeDatabase { database }) => {
            format!("DATABASE {}", database.quoted())
        }
        (ObjectType::Schema, Scope::WholeSchema { schema }) => {
            format!("SCHEMA {}", schema.quoted())
        }
        (_, Scope::WholeSchema { schema }) => {
            let Some(plural) = object_type.schema_wide_keyword() else {
                return Err(incompatible(object_type, scope));
            };
            format!("ALL {plural} IN SCHEMA {}", schema.quoted())
        }
        (ObjectType::Database | ObjectType::Schema, _) | (_, Scope::WholeDatabase { .. }) => {
            return Err(incompatible(object_type, scope));
        }
        (_, Scope::ExplicitObjects { objects }) => {
            validate_explicit_objects(object_type, objects)?;
            format!(
                "{} {}",
                object_type.sql_keyword(),
                objects
                    .iter()
                    .map(ObjectName::quoted)
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        }
    };

    Ok(TargetClause(clause))
}

fn validate_explicit_objects(object_type: ObjectType, objects: &[ObjectName]) -> AppResult<()> {
    if objects.is_empty() {
        return Err(AppError::InvalidScope(format!(
            "explicit object list for object type '{object_type}' must not be empty"
        )));
    }

    if object_type == ObjectType::Column && objects.len() != 1 {
        return Err(AppError::InvalidScope(format!(
            "object type 'column' targets exactly one table, got {}",
            objects.len()
        )));
    }

    for object in objects {
        match (object_type.is_schema_resident(), object.schema()) {
            (true, None) => {
                return Err(AppError::InvalidScope(format!(
                    "object '{object}' of type '{object_type}' must be schema-qualified"
                )));
            }
            (false, Some(_)) => {
                return Err(AppError::InvalidScope(format!(
                    "object '{object}' of type '{object_type}' cannot be schema-qualified"
                )));
            }
            _ => {}
        }
    }

    Ok(())
}

fn incompatible(object_type: ObjectType, scope: &Scope) -> AppError {
    AppError::InvalidScope(format!(
        "scope '{}' is not valid for object type '{object_type}'",
        scope.kind()
    ))
}
