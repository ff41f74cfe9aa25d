use std::path::Path;

use privsync_core::{AppError, AppResult};
use privsync_domain::{GrantConfig, GrantSpec};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GrantFile {
    grants: Vec<GrantConfig>,
}

/// Reads and validates every grant declared in a JSON grant file.
pub(crate) fn load_grant_file(path: &Path) -> AppResult<Vec<GrantSpec>> {
    let contents = std::fs::read_to_string(path).map_err(|error| {
        AppError::Validation(format!(
            "failed to read grant file '{}': {error}",
            path.display()
        ))
    })?;

    parse_grant_file(contents.as_str())
}

/// Validates a grant file document, rejecting it as a whole on the first bad entry.
pub(crate) fn parse_grant_file(contents: &str) -> AppResult<Vec<GrantSpec>> {
    let file = serde_json::from_str::<GrantFile>(contents)
        .map_err(|error| AppError::Validation(format!("invalid grant file: {error}")))?;

    if file.grants.is_empty() {
        return Err(AppError::Validation(
            "grant file declares no grants".to_owned(),
        ));
    }

    let mut specs: Vec<GrantSpec> = Vec::with_capacity(file.grants.len());

    for (index, config) in file.grants.into_iter().enumerate() {
        let entry = index + 1;
        let spec = GrantSpec::from_config(config).map_err(|error| with_entry(error, entry))?;

        // A later revoke would strip what an overlapping earlier grant applied.
        if let Some(previous) = specs.iter().position(|previous| previous.overlaps(&spec)) {
            return Err(AppError::Validation(format!(
                "grant #{entry} overlaps grant #{} for role '{}' on {}",
                previous + 1,
                spec.role(),
                spec.target()
            )));
        }

        specs.push(spec);
    }

    Ok(specs)
}

fn with_entry(error: AppError, entry: usize) -> AppError {
    match error {
        AppError::Validation(message) => AppError::Validation(format!("grant #{entry}: {message}")),
        AppError::InvalidScope(message) => {
            AppError::InvalidScope(format!("grant #{entry}: {message}"))
        }
        AppError::InvalidPrivilege(message) => {
            AppError::InvalidPrivilege(format!("grant #{entry}: {message}"))
        }
        other => other,
    }
}
