//! Privilege vocabulary and normalization of requested privilege keywords.

use std::collections::BTreeSet;
use std::str::FromStr;

use privsync_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use crate::ObjectType;

/// Privilege keywords understood by PostgreSQL GRANT and REVOKE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Privilege {
    /// `SELECT`
    Select,
    /// `INSERT`
    Insert,
    /// `UPDATE`
    Update,
    /// `DELETE`
    Delete,
    /// `TRUNCATE`
    Truncate,
    /// `REFERENCES`
    References,
    /// `TRIGGER`
    Trigger,
    /// `CREATE`
    Create,
    /// `CONNECT`
    Connect,
    /// `TEMPORARY`
    Temporary,
    /// `EXECUTE`
    Execute,
    /// `USAGE`
    Usage,
    /// `ALL PRIVILEGES`, every privilege legal for the object type.
    AllPrivileges,
}

impl Privilege {
    /// Returns the SQL keyword for this privilege.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::References => "REFERENCES",
            Self::Trigger => "TRIGGER",
            Self::Create => "CREATE",
            Self::Connect => "CONNECT",
            Self::Temporary => "TEMPORARY",
            Self::Execute => "EXECUTE",
            Self::Usage => "USAGE",
            Self::AllPrivileges => "ALL PRIVILEGES",
        }
    }

    /// Returns the concrete privileges legal for an object type, excluding `ALL PRIVILEGES`.
    #[must_use]
    pub fn allowed_for(object_type: ObjectType) -> &'static [Self] {
        match object_type {
            ObjectType::Database => &[Self::Create, Self::Connect, Self::Temporary],
            ObjectType::Schema => &[Self::Create, Self::Usage],
            ObjectType::Table => &[
                Self::Select,
                Self::Insert,
                Self::Update,
                Self::Delete,
                Self::Truncate,
                Self::References,
                Self::Trigger,
            ],
            ObjectType::Sequence => &[Self::Usage, Self::Select, Self::Update],
            ObjectType::Function | ObjectType::Procedure | ObjectType::Routine => {
                &[Self::Execute]
            }
            ObjectType::Type
            | ObjectType::Domain
            | ObjectType::ForeignDataWrapper
            | ObjectType::ForeignServer => &[Self::Usage],
            ObjectType::Column => &[
                Self::Select,
                Self::Insert,
                Self::Update,
                Self::References,
            ],
        }
    }

    /// Returns whether the privilege may be granted on the object type.
    #[must_use]
    pub fn is_legal_for(&self, object_type: ObjectType) -> bool {
        *self == Self::AllPrivileges || Self::allowed_for(object_type).contains(self)
    }
}

impl std::fmt::Display for Privilege {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for Privilege {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase();

        match normalized.as_str() {
            "SELECT" => Ok(Self::Select),
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            "TRUNCATE" => Ok(Self::Truncate),
            "REFERENCES" => Ok(Self::References),
            "TRIGGER" => Ok(Self::Trigger),
            "CREATE" => Ok(Self::Create),
            "CONNECT" => Ok(Self::Connect),
            "TEMPORARY" | "TEMP" => Ok(Self::Temporary),
            "EXECUTE" => Ok(Self::Execute),
            "USAGE" => Ok(Self::Usage),
            "ALL PRIVILEGES" | "ALL" => Ok(Self::AllPrivileges),
            _ => Err(AppError::InvalidPrivilege(format!(
                "unknown privilege '{value}'"
            ))),
        }
    }
}

/// Ordered, duplicate-free privilege sequence.
///
/// Order is the caller's declaration order and is preserved into the compiled
/// GRANT statement. Use [`same_privileges`] for order-insensitive comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeList(Vec<Privilege>);

impl PrivilegeList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a privilege unless it is already present. Returns whether it was added.
    pub fn push(&mut self, privilege: Privilege) -> bool {
        if self.0.contains(&privilege) {
            return false;
        }

        self.0.push(privilege);
        true
    }

    /// Returns the privileges in declaration order.
    #[must_use]
    pub fn as_slice(&self) -> &[Privilege] {
        self.0.as_slice()
    }

    /// Returns whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of privileges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the list holds the privilege.
    #[must_use]
    pub fn contains(&self, privilege: Privilege) -> bool {
        self.0.contains(&privilege)
    }

    /// Returns whether the list is the `ALL PRIVILEGES` macro.
    #[must_use]
    pub fn is_all_privileges(&self) -> bool {
        self.0.as_slice() == [Privilege::AllPrivileges]
    }

    /// Iterates privileges in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Privilege> {
        self.0.iter()
    }
}

impl FromIterator<Privilege> for PrivilegeList {
    fn from_iter<T: IntoIterator<Item = Privilege>>(iter: T) -> Self {
        let mut list = Self::new();
        for privilege in iter {
            list.push(privilege);
        }
        list
    }
}

/// Order-insensitive equality of two privilege sequences.
#[must_use]
pub fn same_privileges(left: &[Privilege], right: &[Privilege]) -> bool {
    left.iter().collect::<BTreeSet<_>>() == right.iter().collect::<BTreeSet<_>>()
}

/// Expands `ALL PRIVILEGES` to the concrete vocabulary of the object type.
///
/// Only used to compare desired privileges with catalog state. Compiled
/// statements always carry the macro verbatim.
#[must_use]
pub fn expand_all_privileges(object_type: ObjectType, privileges: &PrivilegeList) -> PrivilegeList {
    if privileges.is_all_privileges() {
        return Privilege::allowed_for(object_type).iter().copied().collect();
    }

    privileges.clone()
}

/// Canonicalizes requested privilege keywords for an object type.
///
/// Keywords are trimmed and uppercased, aliases resolved and repeats dropped
/// (first occurrence wins). Fails when a keyword is unknown, illegal for the
/// object type, or when `ALL PRIVILEGES` is combined with other keywords.
pub fn normalize_privileges<S: AsRef<str>>(
    object_type: ObjectType,
    raw_privileges: &[S],
) -> AppResult<PrivilegeList> {
    let mut privileges = PrivilegeList::new();

    for raw in raw_privileges {
        let privilege = Privilege::from_str(raw.as_ref())?;
        if !privilege.is_legal_for(object_type) {
            return Err(AppError::InvalidPrivilege(format!(
                "privilege '{privilege}' is not valid for object type '{object_type}' (allowed: {})",
                describe_allowed(object_type)
            )));
        }
        privileges.push(privilege);
    }

    if privileges.contains(Privilege::AllPrivileges) && privileges.len() > 1 {
        return Err(AppError::InvalidPrivilege(format!(
            "'ALL PRIVILEGES' cannot be combined with other privileges for object type '{object_type}'"
        )));
    }

    Ok(privileges)
}

fn describe_allowed(object_type: ObjectType) -> String {
    Privilege::allowed_for(object_type)
        .iter()
        .map(Privilege::as_str)
        .chain(std::iter::once(Privilege::AllPrivileges.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}
