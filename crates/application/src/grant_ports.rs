use async_trait::async_trait;
use privsync_core::AppResult;
use privsync_domain::{CurrentPrivilegeState, Identifier, ObjectType, Scope};

/// Port for executing SQL statements over a caller-owned connection.
#[async_trait]
pub trait SqlExecutor: Send {
    /// Executes one statement and returns the number of affected rows.
    async fn execute(&mut self, statement: &str) -> AppResult<u64>;
}

/// Open transaction scope. Dropping it without [`ExecutorTransaction::commit`] rolls back.
#[async_trait]
pub trait ExecutorTransaction: SqlExecutor {
    /// Commits every statement executed in this scope.
    async fn commit(&mut self) -> AppResult<()>;
}

/// Port for connections that can open a transaction scope.
#[async_trait]
pub trait TransactionalExecutor: Send {
    /// Opens a transaction borrowing the connection until it ends.
    async fn begin<'a>(&'a mut self) -> AppResult<Box<dyn ExecutorTransaction + 'a>>;
}

/// Port for reading the privileges a role currently holds from the catalogs.
#[async_trait]
pub trait PrivilegeStateReader: Send {
    /// Reads current privileges of `role` on the objects selected by `scope`.
    ///
    /// Returns an empty state when the role or the objects do not exist.
    async fn read_current_privileges(
        &mut self,
        role: &Identifier,
        object_type: ObjectType,
        scope: &Scope,
        columns: &[Identifier],
    ) -> AppResult<CurrentPrivilegeState>;
}
