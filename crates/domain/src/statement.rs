//! GRANT and REVOKE statement compilation.

use privsync_core::{AppError, AppResult};

use crate::{GrantSpec, Identifier};

/// Compiles the GRANT statement for a spec.
///
/// Privileges are joined by a bare comma in declaration order. `ALL
/// PRIVILEGES` is emitted verbatim. Fails when the spec grants nothing.
pub fn compile_grant(spec: &GrantSpec) -> AppResult<String> {
    if spec.privileges().is_empty() {
        return Err(AppError::InvalidPrivilege(format!(
            "cannot compile a GRANT without privileges for role '{}' on {}",
            spec.role(),
            spec.target()
        )));
    }

    let column_list = column_list(spec.columns());
    let privileges = spec
        .privileges()
        .iter()
        .map(|privilege| match &column_list {
            Some(columns) => format!("{privilege} {columns}"),
            None => privilege.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",");

    let mut statement = format!(
        "GRANT {privileges} ON {} TO {}",
        spec.target(),
        spec.role().quoted()
    );
    if spec.with_grant_option() {
        statement.push_str(" WITH GRANT OPTION");
    }

    Ok(statement)
}

/// Compiles the REVOKE statement for a spec.
///
/// Revocation is always total for the target, independent of the privileges
/// the spec declares.
pub fn compile_revoke(spec: &GrantSpec) -> AppResult<String> {
    let all_privileges = match column_list(spec.columns()) {
        Some(columns) => format!("ALL PRIVILEGES {columns}"),
        None => "ALL PRIVILEGES".to_owned(),
    };

    Ok(format!(
        "REVOKE {all_privileges} ON {} FROM {}",
        spec.target(),
        spec.role().quoted()
    ))
}

fn column_list(columns: &[Identifier]) -> Option<String> {
    if columns.is_empty() {
        return None;
    }

    Some(format!(
        "({})",
        columns
            .iter()
            .map(Identifier::quoted)
            .collect::<Vec<_>>()
            .join(", ")
    ))
}
