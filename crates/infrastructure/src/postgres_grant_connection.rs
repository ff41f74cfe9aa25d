use async_trait::async_trait;

use privsync_application::{
    ExecutorTransaction, PrivilegeStateReader, SqlExecutor, TransactionalExecutor,
};
use privsync_core::{AppError, AppResult};
use privsync_domain::{CurrentPrivilegeState, Identifier, ObjectType, Scope};

use sqlx::{Connection, PgConnection, Postgres, Transaction};
use tracing::debug;

mod privilege_state;


/// PostgreSQL connection adapter for grant reconciliation.
///
/// Borrows a caller-owned connection for the duration of one reconcile call.
pub struct PostgresGrantConnection<'c> {
    connection: &'c mut PgConnection,
}

impl<'c> PostgresGrantConnection<'c> {
    /// Wraps a borrowed connection.
    #[must_use]
    pub fn new(connection: &'c mut PgConnection) -> Self {
        Self { connection }
    }

    /// Returns the name of the database the connection is attached to.
    pub async fn current_database(&mut self) -> AppResult<String> {
        const STATEMENT: &str = "SELECT current_database()";

        sqlx::query_scalar::<_, String>(STATEMENT)
            .fetch_one(&mut *self.connection)
            .await
            .map_err(|error| statement_error(STATEMENT, error))
    }
}

#[async_trait]
impl<'c> SqlExecutor for PostgresGrantConnection<'c> {
    async fn execute(&mut self, statement: &str) -> AppResult<u64> {
        debug!(statement, "executing statement");

        sqlx::query(statement)
            .execute(&mut *self.connection)
            .await
            .map(|result| result.rows_affected())
            .map_err(|error| statement_error(statement, error))
    }
}

#[async_trait]
impl<'c> TransactionalExecutor for PostgresGrantConnection<'c> {
    async fn begin<'a>(&'a mut self) -> AppResult<Box<dyn ExecutorTransaction + 'a>> {
        let transaction = self
            .connection
            .begin()
            .await
            .map_err(|error| statement_error("BEGIN", error))?;

        Ok(Box::new(PostgresGrantTransaction {
            transaction: Some(transaction),
        }))
    }
}

#[async_trait]
impl<'c> PrivilegeStateReader for PostgresGrantConnection<'c> {
    async fn read_current_privileges(
        &mut self,
        role: &Identifier,
        object_type: ObjectType,
        scope: &Scope,
        columns: &[Identifier],
    ) -> AppResult<CurrentPrivilegeState> {
        self.read_current_privileges_impl(role, object_type, scope, columns)
            .await
    }
}

/// Open transaction on a borrowed connection. Rolls back when dropped uncommitted.
struct PostgresGrantTransaction<'t> {
    transaction: Option<Transaction<'t, Postgres>>,
}

impl<'t> PostgresGrantTransaction<'t> {
    fn open(&mut self) -> AppResult<&mut Transaction<'t, Postgres>> {
        self.transaction.as_mut().ok_or_else(|| {
            AppError::Internal("transaction was already committed".to_owned())
        })
    }
}

#[async_trait]
impl<'t> SqlExecutor for PostgresGrantTransaction<'t> {
    async fn execute(&mut self, statement: &str) -> AppResult<u64> {
        debug!(statement, "executing statement in transaction");
        let transaction = self.open()?;

        sqlx::query(statement)
            .execute(&mut **transaction)
            .await
            .map(|result| result.rows_affected())
            .map_err(|error| statement_error(statement, error))
    }
}

#[async_trait]
impl<'t> ExecutorTransaction for PostgresGrantTransaction<'t> {
    async fn commit(&mut self) -> AppResult<()> {
        let Some(transaction) = self.transaction.take() else {
            return Err(AppError::Internal(
                "transaction was already committed".to_owned(),
            ));
        };

        transaction
            .commit()
            .await
            .map_err(|error| statement_error("COMMIT", error))
    }
}

/// Maps a driver error into the reconciliation error taxonomy.
pub(crate) fn statement_error(statement: &str, error: sqlx::Error) -> AppError {
    match error {
        sqlx::Error::Database(database_error) => AppError::SqlExecution {
            statement: statement.to_owned(),
            message: match database_error.code() {
                Some(code) => format!("{database_error} (SQLSTATE {code})"),
                None => database_error.to_string(),
            },
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Configuration(_) => {
            AppError::Connection(format!("failed to run `{statement}`: {error}"))
        }
        other => AppError::Internal(format!("failed to run `{statement}`: {other}")),
    }
}
