//! Grant domain: identifiers, object selection, privileges and statement compilation.

#![forbid(unsafe_code)]

mod grant_spec;
mod identifier;
mod object_type;
mod privilege;
mod privilege_state;
mod statement;
mod target;

pub use grant_spec::{GrantConfig, GrantSpec, GrantSpecInput};
pub use identifier::{Identifier, ObjectName, quote_identifier, quote_qualified};
pub use object_type::ObjectType;
pub use privilege::{
    Privilege, PrivilegeList, expand_all_privileges, normalize_privileges, same_privileges,
};
pub use privilege_state::CurrentPrivilegeState;
pub use statement::{compile_grant, compile_revoke};
pub use target::{Scope, TargetClause, resolve_target};
