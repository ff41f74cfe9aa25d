use std::iter::once;
use std::str::FromStr;

use privsync_domain::{Privilege, quote_qualified};
use sqlx::FromRow;
use sqlx::postgres::PgArguments;
use sqlx::query::QueryAs;
use tracing::debug;

use super::*;

#[derive(Debug, FromRow)]
pub(super) struct PrivilegeRow {
    pub(super) schema_name: Option<String>,
    pub(super) object_name: String,
    pub(super) column_name: Option<String>,
    pub(super) privilege_type: Option<String>,
    pub(super) is_grantable: Option<bool>,
}

impl PrivilegeRow {
    /// Quoted dotted identity, matching the form grant specs expect.
    pub(super) fn object_identity(&self) -> String {
        quote_qualified(
            self.schema_name
                .as_deref()
                .into_iter()
                .chain(once(self.object_name.as_str()))
                .chain(self.column_name.as_deref()),
        )
    }
}

/// Catalog relation holding the ACLs of one object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct CatalogSource {
    pub(super) relation: &'static str,
    pub(super) schema: Option<&'static str>,
    pub(super) name: &'static str,
    pub(super) column: Option<&'static str>,
    pub(super) acl: &'static str,
    pub(super) filter: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum CatalogBind {
    Text(String),
    TextArray(Vec<String>),
}

/// Privilege lookup query with its parameters after the role name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct CatalogQuery {
    pub(super) sql: String,
    pub(super) binds: Vec<CatalogBind>,
}

const TABLE_RELATION: &str =
    "pg_class AS obj INNER JOIN pg_namespace AS ns ON ns.oid = obj.relnamespace";
const ROUTINE_RELATION: &str =
    "pg_proc AS obj INNER JOIN pg_namespace AS ns ON ns.oid = obj.pronamespace";
const TYPE_RELATION: &str =
    "pg_type AS obj INNER JOIN pg_namespace AS ns ON ns.oid = obj.typnamespace";

pub(super) fn catalog_source(object_type: ObjectType) -> CatalogSource {
    match object_type {
        ObjectType::Database => CatalogSource {
            relation: "pg_database AS obj",
            schema: None,
            name: "obj.datname::text",
            column: None,
            acl: "COALESCE(obj.datacl, acldefault('d', obj.datdba))",
            filter: "TRUE",
        },
        ObjectType::Schema => CatalogSource {
            relation: "pg_namespace AS obj",
            schema: None,
            name: "obj.nspname::text",
            column: None,
            acl: "COALESCE(obj.nspacl, acldefault('n', obj.nspowner))",
            filter: "TRUE",
        },
        ObjectType::Table => CatalogSource {
            relation: TABLE_RELATION,
            schema: Some("ns.nspname::text"),
            name: "obj.relname::text",
            column: None,
            acl: "COALESCE(obj.relacl, acldefault('r', obj.relowner))",
            filter: "obj.relkind IN ('r', 'p', 'v', 'm', 'f')",
        },
        ObjectType::Sequence => CatalogSource {
            relation: TABLE_RELATION,
            schema: Some("ns.nspname::text"),
            name: "obj.relname::text",
            column: None,
            acl: "COALESCE(obj.relacl, acldefault('s', obj.relowner))",
            filter: "obj.relkind = 'S'",
        },
        ObjectType::Function | ObjectType::Procedure | ObjectType::Routine => CatalogSource {
            relation: ROUTINE_RELATION,
            schema: Some("ns.nspname::text"),
            name: "obj.proname::text",
            column: None,
            acl: "COALESCE(obj.proacl, acldefault('f', obj.proowner))",
            filter: match object_type {
                ObjectType::Function => "obj.prokind IN ('f', 'a', 'w')",
                ObjectType::Procedure => "obj.prokind = 'p'",
                _ => "TRUE",
            },
        },
        ObjectType::Type | ObjectType::Domain => CatalogSource {
            relation: TYPE_RELATION,
            schema: Some("ns.nspname::text"),
            name: "obj.typname::text",
            column: None,
            acl: "COALESCE(obj.typacl, acldefault('T', obj.typowner))",
            filter: if object_type == ObjectType::Domain {
                "obj.typtype = 'd'"
            } else {
                "TRUE"
            },
        },
        ObjectType::ForeignDataWrapper => CatalogSource {
            relation: "pg_foreign_data_wrapper AS obj",
            schema: None,
            name: "obj.fdwname::text",
            column: None,
            acl: "COALESCE(obj.fdwacl, acldefault('F', obj.fdwowner))",
            filter: "TRUE",
        },
        ObjectType::ForeignServer => CatalogSource {
            relation: "pg_foreign_server AS obj",
            schema: None,
            name: "obj.srvname::text",
            column: None,
            acl: "COALESCE(obj.srvacl, acldefault('S', obj.srvowner))",
            filter: "TRUE",
        },
        ObjectType::Column => CatalogSource {
            relation: "pg_attribute AS obj \
                INNER JOIN pg_class AS tbl ON tbl.oid = obj.attrelid \
                INNER JOIN pg_namespace AS ns ON ns.oid = tbl.relnamespace",
            schema: Some("ns.nspname::text"),
            name: "tbl.relname::text",
            column: Some("obj.attname::text"),
            acl: "COALESCE(obj.attacl, '{}'::aclitem[])",
            filter: "obj.attnum > 0 AND NOT obj.attisdropped",
        },
    }
}

/// Builds the lookup of `role` privileges (bound as `$1`) on the selected objects.
pub(super) fn build_privilege_query(
    object_type: ObjectType,
    scope: &Scope,
    columns: &[Identifier],
) -> AppResult<CatalogQuery> {
    let source = catalog_source(object_type);
    let mut binds = Vec::new();

    let selector = match scope {
        Scope::WholeDatabase { database } if object_type == ObjectType::Database => {
            binds.push(CatalogBind::Text(database.as_str().to_owned()));
            format!("{} = $2", source.name)
        }
        Scope::WholeSchema { schema } if object_type == ObjectType::Schema => {
            binds.push(CatalogBind::Text(schema.as_str().to_owned()));
            format!("{} = $2", source.name)
        }
        Scope::WholeSchema { schema } => {
            let schema_column = source
                .schema
                .filter(|_| object_type.schema_wide_keyword().is_some());
            let Some(schema_column) = schema_column else {
                return Err(unsupported_scope(object_type, scope));
            };
            binds.push(CatalogBind::Text(schema.as_str().to_owned()));
            format!("{schema_column} = $2")
        }
        Scope::ExplicitObjects { objects } => match source.schema {
            Some(schema_column) => {
                let mut schemas = Vec::with_capacity(objects.len());
                let mut names = Vec::with_capacity(objects.len());
                for object in objects {
                    let Some(schema) = object.schema() else {
                        return Err(AppError::InvalidScope(format!(
                            "{} '{}' must be schema-qualified",
                            object_type.as_str(),
                            object
                        )));
                    };
                    schemas.push(schema.as_str().to_owned());
                    names.push(object.name().as_str().to_owned());
                }
                binds.push(CatalogBind::TextArray(schemas));
                binds.push(CatalogBind::TextArray(names));
                format!(
                    "({schema_column}, {}) IN (SELECT * FROM UNNEST($2::text[], $3::text[]))",
                    source.name
                )
            }
            None if matches!(
                object_type,
                ObjectType::ForeignDataWrapper | ObjectType::ForeignServer
            ) =>
            {
                binds.push(CatalogBind::TextArray(
                    objects
                        .iter()
                        .map(|object| object.name().as_str().to_owned())
                        .collect(),
                ));
                format!("{} = ANY($2)", source.name)
            }
            None => return Err(unsupported_scope(object_type, scope)),
        },
        _ => return Err(unsupported_scope(object_type, scope)),
    };

    let mut condition = format!("{} AND {selector}", source.filter);
    if object_type == ObjectType::Column {
        if columns.is_empty() {
            return Err(AppError::InvalidScope(
                "column privileges require at least one column".to_owned(),
            ));
        }
        binds.push(CatalogBind::TextArray(
            columns.iter().map(|column| column.as_str().to_owned()).collect(),
        ));
        condition.push_str(&format!(" AND obj.attname::text = ANY(${})", binds.len() + 1));
    }

    let sql = format!(
        r#"
            SELECT {schema} AS schema_name,
                {name} AS object_name,
                {column} AS column_name,
                grants.privilege_type,
                grants.is_grantable
            FROM {relation}
            LEFT JOIN LATERAL (
                SELECT acl.privilege_type, acl.is_grantable
                FROM aclexplode({acl}) AS acl
                INNER JOIN pg_roles AS grantee
                    ON grantee.oid = acl.grantee
                WHERE grantee.rolname = $1
            ) AS grants ON TRUE
            WHERE {condition}
            ORDER BY schema_name, object_name, column_name, grants.privilege_type
            "#,
        schema = source.schema.unwrap_or("NULL::text"),
        name = source.name,
        column = source.column.unwrap_or("NULL::text"),
        relation = source.relation,
        acl = source.acl,
    );

    Ok(CatalogQuery { sql, binds })
}

fn unsupported_scope(object_type: ObjectType, scope: &Scope) -> AppError {
    AppError::InvalidScope(format!(
        "cannot read {} privileges for a {} scope",
        object_type.as_str(),
        scope.kind()
    ))
}

fn bind_all<'q>(
    mut query: QueryAs<'q, Postgres, PrivilegeRow, PgArguments>,
    binds: &'q [CatalogBind],
) -> QueryAs<'q, Postgres, PrivilegeRow, PgArguments> {
    for bind in binds {
        query = match bind {
            CatalogBind::Text(value) => query.bind(value.as_str()),
            CatalogBind::TextArray(values) => query.bind(values.as_slice()),
        };
    }
    query
}

impl PostgresGrantConnection<'_> {
    pub(super) async fn read_current_privileges_impl(
        &mut self,
        role: &Identifier,
        object_type: ObjectType,
        scope: &Scope,
        columns: &[Identifier],
    ) -> AppResult<CurrentPrivilegeState> {
        let query = build_privilege_query(object_type, scope, columns)?;

        let rows = bind_all(
            sqlx::query_as::<_, PrivilegeRow>(query.sql.as_str()).bind(role.as_str()),
            query.binds.as_slice(),
        )
        .fetch_all(&mut *self.connection)
        .await
        .map_err(|error| statement_error(query.sql.trim(), error))?;

        let mut state = CurrentPrivilegeState::new();
        for row in rows {
            let object = row.object_identity();
            state.track_object(object.as_str());
            let Some(privilege_type) = row.privilege_type else {
                continue;
            };

            match Privilege::from_str(privilege_type.as_str()) {
                Ok(privilege) if privilege.is_legal_for(object_type) => {
                    state.record(object, privilege, row.is_grantable.unwrap_or(false));
                }
                _ => debug!(
                    object = %object,
                    privilege_type = %privilege_type,
                    "skipping catalog privilege outside the managed vocabulary"
                ),
            }
        }

        debug!(
            role = %role,
            object_type = object_type.as_str(),
            objects = state.object_count(),
            "read current privileges"
        );

        Ok(state)
    }
}
