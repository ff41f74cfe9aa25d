use privsync_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use crate::{
    Identifier, ObjectName, ObjectType, PrivilegeList, Scope, TargetClause, normalize_privileges,
    resolve_target,
};

/// Declared grant configuration as read from a grant file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrantConfig {
    /// Role receiving the privileges.
    pub role: String,
    /// Database name; required for `database` grants.
    #[serde(default)]
    pub database: Option<String>,
    /// Schema name; selects the whole schema or qualifies `objects`.
    #[serde(default)]
    pub schema: Option<String>,
    /// Explicit object names, in declaration order.
    #[serde(default)]
    pub objects: Option<Vec<String>>,
    /// Column names for `column` grants, in declaration order.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    /// Object type, matched case-insensitively.
    pub object_type: ObjectType,
    /// Privilege keywords, in declaration order. Empty means "ensure nothing is granted".
    #[serde(default)]
    pub privileges: Vec<String>,
    /// Whether the role may grant the privileges onwards.
    #[serde(default)]
    pub with_grant_option: bool,
}

/// Inputs for building a [`GrantSpec`] from already-structured values.
#[derive(Debug, Clone)]
pub struct GrantSpecInput {
    /// Role receiving the privileges.
    pub role: String,
    /// Object type.
    pub object_type: ObjectType,
    /// Object selection.
    pub scope: Scope,
    /// Column names, only for `column` grants.
    pub columns: Vec<String>,
    /// Raw privilege keywords.
    pub privileges: Vec<String>,
    /// Whether to append `WITH GRANT OPTION`.
    pub with_grant_option: bool,
}

/// Validated desired-state description of one role's privileges on one object set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantSpec {
    role: Identifier,
    database: Option<Identifier>,
    object_type: ObjectType,
    scope: Scope,
    columns: Vec<Identifier>,
    privileges: PrivilegeList,
    with_grant_option: bool,
    target: TargetClause,
}

impl GrantSpec {
    /// Creates a validated grant spec.
    pub fn new(input: GrantSpecInput) -> AppResult<Self> {
        let role = Identifier::new(input.role)
            .map_err(|error| AppError::Validation(format!("invalid role: {error}")))?;
        let privileges = normalize_privileges(input.object_type, &input.privileges)?;
        let target = resolve_target(input.object_type, &input.scope)?;
        let columns = validate_columns(input.object_type, input.columns)?;
        let database = match &input.scope {
            Scope::WholeDatabase { database } => Some(database.clone()),
            _ => None,
        };

        Ok(Self {
            role,
            database,
            object_type: input.object_type,
            scope: input.scope,
            columns,
            privileges,
            with_grant_option: input.with_grant_option,
            target,
        })
    }

    /// Builds a grant spec from declared configuration.
    ///
    /// Field requirements depend on the object type: `database` grants need
    /// `database`, `schema` grants need `schema`, schema-resident objects need
    /// `schema` unless `objects` are listed as `schema.name`, and foreign
    /// wrappers and servers take plain names in `objects`.
    pub fn from_config(config: GrantConfig) -> AppResult<Self> {
        let object_type = config.object_type;
        let scope = scope_from_config(&config)?;

        let mut spec = Self::new(GrantSpecInput {
            role: config.role,
            object_type,
            scope,
            columns: config.columns.unwrap_or_default(),
            privileges: config.privileges,
            with_grant_option: config.with_grant_option,
        })?;

        if let Some(database) = config.database {
            spec.database = Some(
                Identifier::new(database)
                    .map_err(|error| AppError::Validation(format!("invalid database: {error}")))?,
            );
        }

        Ok(spec)
    }

    /// Returns the grantee role.
    #[must_use]
    pub fn role(&self) -> &Identifier {
        &self.role
    }

    /// Returns the database the grant is declared for, if any.
    #[must_use]
    pub fn database(&self) -> Option<&Identifier> {
        self.database.as_ref()
    }

    /// Returns the object type.
    #[must_use]
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Returns the object selection.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Returns the columns of a `column` grant; empty otherwise.
    #[must_use]
    pub fn columns(&self) -> &[Identifier] {
        self.columns.as_slice()
    }

    /// Returns the normalized privileges in declaration order.
    #[must_use]
    pub fn privileges(&self) -> &PrivilegeList {
        &self.privileges
    }

    /// Returns whether `WITH GRANT OPTION` is requested.
    #[must_use]
    pub fn with_grant_option(&self) -> bool {
        self.with_grant_option
    }

    /// Returns the resolved target clause.
    #[must_use]
    pub fn target(&self) -> &TargetClause {
        &self.target
    }

    /// Returns the object identities a verification must find, when they are
    /// known without reading the catalog. Schema-wide scopes return `None`.
    ///
    /// Identities are rendered with every part quoted, as by [`crate::quote_qualified`].
    #[must_use]
    pub fn expected_objects(&self) -> Option<Vec<String>> {
        match (&self.scope, self.object_type) {
            (Scope::WholeDatabase { database }, _) => Some(vec![database.quoted()]),
            (Scope::WholeSchema { schema }, ObjectType::Schema) => Some(vec![schema.quoted()]),
            (Scope::WholeSchema { .. }, _) => None,
            (Scope::ExplicitObjects { objects }, ObjectType::Column) => Some(
                objects
                    .iter()
                    .flat_map(|table| {
                        self.columns
                            .iter()
                            .map(move |column| format!("{}.{}", table.quoted(), column.quoted()))
                    })
                    .collect(),
            ),
            (Scope::ExplicitObjects { objects }, _) => {
                Some(objects.iter().map(ObjectName::quoted).collect())
            }
        }
    }

    /// Returns whether both specs cover privileges of the same role on a common
    /// object, so that the revoke of one would strip what the other grants.
    ///
    /// Object lists are compared as sets. A schema-wide spec overlaps every
    /// explicit object of a compatible type in that schema, and table specs
    /// overlap column specs on the same table.
    #[must_use]
    pub fn overlaps(&self, other: &GrantSpec) -> bool {
        if self.role != other.role || !share_catalog(self.object_type, other.object_type) {
            return false;
        }

        match (&self.scope, &other.scope) {
            (Scope::WholeDatabase { database }, Scope::WholeDatabase { database: other }) => {
                database == other
            }
            (Scope::WholeSchema { schema }, Scope::WholeSchema { schema: other }) => {
                schema == other
            }
            (Scope::WholeSchema { schema }, Scope::ExplicitObjects { objects })
            | (Scope::ExplicitObjects { objects }, Scope::WholeSchema { schema }) => objects
                .iter()
                .any(|object| object.schema() == Some(schema)),
            (
                Scope::ExplicitObjects { objects },
                Scope::ExplicitObjects {
                    objects: other_objects,
                },
            ) => {
                let shares_object = objects.iter().any(|object| other_objects.contains(object));
                let both_columns = self.object_type == ObjectType::Column
                    && other.object_type == ObjectType::Column;
                shares_object
                    && (!both_columns
                        || self.columns.iter().any(|column| other.columns.contains(column)))
            }
            _ => false,
        }
    }
}

/// Whether revoking on one object type can touch privileges granted on the other.
fn share_catalog(left: ObjectType, right: ObjectType) -> bool {
    use ObjectType::{Column, Domain, Function, Procedure, Routine, Table, Type};

    left == right
        || matches!(
            (left, right),
            (Table, Column)
                | (Column, Table)
                | (Routine, Function | Procedure)
                | (Function | Procedure, Routine)
                | (Type, Domain)
                | (Domain, Type)
        )
}

fn scope_from_config(config: &GrantConfig) -> AppResult<Scope> {
    let object_type = config.object_type;

    match object_type {
        ObjectType::Database => {
            reject_field(object_type, "schema", config.schema.is_some())?;
            reject_field(object_type, "objects", config.objects.is_some())?;
            let database = required_field(object_type, "database", config.database.as_deref())?;
            Ok(Scope::WholeDatabase {
                database: Identifier::new(database)?,
            })
        }
        ObjectType::Schema => {
            reject_field(object_type, "objects", config.objects.is_some())?;
            let schema = required_field(object_type, "schema", config.schema.as_deref())?;
            Ok(Scope::WholeSchema {
                schema: Identifier::new(schema)?,
            })
        }
        ObjectType::ForeignDataWrapper | ObjectType::ForeignServer => {
            reject_field(object_type, "schema", config.schema.is_some())?;
            let objects = config.objects.as_deref().ok_or_else(|| {
                AppError::Validation(format!(
                    "'objects' is required for object type '{object_type}'"
                ))
            })?;
            let objects = objects
                .iter()
                .map(|object| Identifier::new(object.as_str()).map(ObjectName::unqualified))
                .collect::<AppResult<Vec<_>>>()?;
            Ok(Scope::ExplicitObjects { objects })
        }
        _ => match (&config.objects, &config.schema) {
            (Some(objects), schema) => Ok(Scope::ExplicitObjects {
                objects: qualify_objects(objects, schema.as_deref())?,
            }),
            (None, Some(schema)) => Ok(Scope::WholeSchema {
                schema: Identifier::new(schema.as_str())?,
            }),
            (None, None) => Err(AppError::Validation(format!(
                "object type '{object_type}' requires 'schema' or 'objects'"
            ))),
        },
    }
}

fn qualify_objects(objects: &[String], schema: Option<&str>) -> AppResult<Vec<ObjectName>> {
    let schema = schema.map(Identifier::new).transpose()?;

    objects
        .iter()
        .map(|object| match &schema {
            Some(schema) => Ok(ObjectName::qualified(
                schema.clone(),
                Identifier::new(object.as_str())?,
            )),
            None => ObjectName::parse_qualified(object.as_str()),
        })
        .collect()
}

fn validate_columns(object_type: ObjectType, columns: Vec<String>) -> AppResult<Vec<Identifier>> {
    match (object_type, columns.is_empty()) {
        (ObjectType::Column, true) => Err(AppError::Validation(
            "object type 'column' requires a non-empty 'columns' list".to_owned(),
        )),
        (ObjectType::Column, false) => {
            let mut validated: Vec<Identifier> = Vec::with_capacity(columns.len());
            for column in columns {
                let column = Identifier::new(column)?;
                if !validated.contains(&column) {
                    validated.push(column);
                }
            }
            Ok(validated)
        }
        (_, true) => Ok(Vec::new()),
        (_, false) => Err(AppError::Validation(format!(
            "'columns' is only valid for object type 'column', not '{object_type}'"
        ))),
    }
}

fn required_field<'a>(
    object_type: ObjectType,
    field: &str,
    value: Option<&'a str>,
) -> AppResult<&'a str> {
    value.ok_or_else(|| {
        AppError::Validation(format!(
            "'{field}' is required for object type '{object_type}'"
        ))
    })
}

fn reject_field(object_type: ObjectType, field: &str, present: bool) -> AppResult<()> {
    if present {
        return Err(AppError::InvalidScope(format!(
            "'{field}' is not valid for object type '{object_type}'"
        )));
    }

    Ok(())
}
