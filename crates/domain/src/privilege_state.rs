use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Privilege, PrivilegeList};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct HeldPrivileges {
    privileges: PrivilegeList,
    grantable: PrivilegeList,
}

/// Privileges a role currently holds, keyed by object identity.
///
/// Identities are quoted dotted paths (`"schema"."table"`,
/// `"schema"."table"."column"`, or a single quoted name for databases,
/// schemas, wrappers and servers). Objects in scope on which the role holds
/// nothing map to an empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentPrivilegeState {
    objects: BTreeMap<String, HeldPrivileges>,
}

impl CurrentPrivilegeState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an object, holding no privileges unless some are recorded.
    pub fn track_object(&mut self, object: impl Into<String>) {
        self.objects.entry(object.into()).or_default();
    }

    /// Records a privilege held on an object, and whether the role may grant it onwards.
    pub fn record(&mut self, object: impl Into<String>, privilege: Privilege, grantable: bool) {
        let held = self.objects.entry(object.into()).or_default();
        held.privileges.push(privilege);
        if grantable {
            held.grantable.push(privilege);
        }
    }

    /// Returns the privileges held on an object, if the object was seen.
    #[must_use]
    pub fn privileges_for(&self, object: &str) -> Option<&PrivilegeList> {
        self.objects.get(object).map(|held| &held.privileges)
    }

    /// Returns the privileges held with grant option on an object, if the object was seen.
    #[must_use]
    pub fn grantable_for(&self, object: &str) -> Option<&PrivilegeList> {
        self.objects.get(object).map(|held| &held.grantable)
    }

    /// Iterates objects and their privileges in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PrivilegeList)> {
        self.objects
            .iter()
            .map(|(object, held)| (object.as_str(), &held.privileges))
    }

    /// Returns the number of objects seen.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}
