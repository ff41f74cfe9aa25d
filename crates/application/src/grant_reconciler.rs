use privsync_core::{AppError, AppResult};
use privsync_domain::{
    GrantSpec, Privilege, PrivilegeList, compile_grant, compile_revoke, expand_all_privileges,
    same_privileges,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{PrivilegeStateReader, SqlExecutor, TransactionalExecutor};

/// Lifecycle of one grant target within a single reconciler call.
///
/// The reconciler never reads the state a target was in before the call. Each
/// call revokes everything first, so it enters `Reconciling` and reports the
/// state the call itself left the target in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantState {
    /// Nothing is granted to the role on the target.
    Absent,
    /// Previous privileges were revoked and the desired grant is pending.
    Reconciling,
    /// The desired privileges are granted.
    Applied,
}

impl GrantState {
    /// Enters reconciliation from any state.
    #[must_use]
    pub fn begin_reconcile(self) -> Self {
        Self::Reconciling
    }

    /// Leaves reconciliation once the grant step finished.
    pub fn finish_reconcile(self, granted: bool) -> AppResult<Self> {
        match self {
            Self::Reconciling if granted => Ok(Self::Applied),
            Self::Reconciling => Ok(Self::Absent),
            other => Err(AppError::Internal(format!(
                "cannot finish reconciliation from state '{}'",
                other.as_str()
            ))),
        }
    }

    /// Drops every privilege from any state.
    #[must_use]
    pub fn remove(self) -> Self {
        Self::Absent
    }

    /// Returns a stable name for logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Reconciling => "reconciling",
            Self::Applied => "applied",
        }
    }
}

/// Statements a reconciliation issues, compiled before any of them runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    /// Total revoke for the target.
    pub revoke: String,
    /// Grant of the desired privileges; `None` for an empty grant.
    pub grant: Option<String>,
}

impl ReconcilePlan {
    /// Returns statements in execution order.
    #[must_use]
    pub fn statements(&self) -> Vec<&str> {
        std::iter::once(self.revoke.as_str())
            .chain(self.grant.as_deref())
            .collect()
    }
}

/// Outcome of a successful reconcile or removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Grantee role.
    pub role: String,
    /// Target clause.
    pub target: String,
    /// State this call left the target in.
    pub state: GrantState,
    /// Statements executed, in order.
    pub statements: Vec<String>,
}

/// Difference between desired and actual privileges on one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectDrift {
    /// Object identity.
    pub object: String,
    /// Whether the catalog knows the object at all.
    pub found: bool,
    /// Desired privileges the role does not hold.
    pub missing: Vec<Privilege>,
    /// Privileges the role holds beyond the desired set.
    pub unexpected: Vec<Privilege>,
    /// Desired privileges held without the requested grant option.
    pub grant_option_missing: Vec<Privilege>,
    /// Desired privileges held with a grant option the spec does not request.
    pub grant_option_unexpected: Vec<Privilege>,
}

/// Verification result for one grant spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    /// Grantee role.
    pub role: String,
    /// Target clause.
    pub target: String,
    /// Number of objects compared.
    pub objects_checked: usize,
    /// Objects whose privileges differ from the spec.
    pub drift: Vec<ObjectDrift>,
}

impl DriftReport {
    /// Returns whether every object holds exactly the desired privileges.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.drift.is_empty()
    }
}

/// Application service converging database privileges to grant specs.
///
/// Every call revokes all privileges on the target and then grants the
/// desired set, so repeated calls converge regardless of prior state. The
/// connection is borrowed per call and never retained.
#[derive(Debug, Clone, Default)]
pub struct GrantReconciler;

impl GrantReconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Compiles the statements a reconciliation of `spec` issues.
    pub fn plan(&self, spec: &GrantSpec) -> AppResult<ReconcilePlan> {
        let revoke = compile_revoke(spec)?;
        let grant = if spec.privileges().is_empty() {
            None
        } else {
            Some(compile_grant(spec)?)
        };

        Ok(ReconcilePlan { revoke, grant })
    }

    /// Revokes everything on the target and grants the desired privileges in one transaction.
    pub async fn reconcile(
        &self,
        connection: &mut dyn TransactionalExecutor,
        spec: &GrantSpec,
    ) -> AppResult<ReconcileReport> {
        let plan = self.plan(spec)?;
        let mut transaction = connection
            .begin()
            .await
            .map_err(|error| with_context(error, spec, "BEGIN"))?;

        let report = self.apply_plan(&mut *transaction, spec, &plan).await?;

        transaction
            .commit()
            .await
            .map_err(|error| with_context(error, spec, "COMMIT"))?;

        info!(
            role = %spec.role(),
            target = %spec.target(),
            state = report.state.as_str(),
            statements = report.statements.len(),
            "grant reconciled"
        );

        Ok(report)
    }

    /// Same as [`GrantReconciler::reconcile`] for executors without transactions.
    ///
    /// A failing GRANT after a successful REVOKE leaves the role with no
    /// privileges on the target.
    pub async fn reconcile_without_transaction(
        &self,
        executor: &mut dyn SqlExecutor,
        spec: &GrantSpec,
    ) -> AppResult<ReconcileReport> {
        let plan = self.plan(spec)?;
        let report = self.apply_plan(executor, spec, &plan).await?;

        info!(
            role = %spec.role(),
            target = %spec.target(),
            state = report.state.as_str(),
            "grant reconciled without transaction"
        );

        Ok(report)
    }

    /// Revokes every privilege of the spec's role on its target.
    pub async fn remove(
        &self,
        connection: &mut dyn TransactionalExecutor,
        spec: &GrantSpec,
    ) -> AppResult<ReconcileReport> {
        let revoke = compile_revoke(spec)?;
        let mut transaction = connection
            .begin()
            .await
            .map_err(|error| with_context(error, spec, "BEGIN"))?;

        execute_statement(&mut *transaction, spec, revoke.as_str()).await?;

        transaction
            .commit()
            .await
            .map_err(|error| with_context(error, spec, "COMMIT"))?;

        info!(role = %spec.role(), target = %spec.target(), "grant removed");

        Ok(ReconcileReport {
            role: spec.role().to_string(),
            target: spec.target().to_string(),
            state: GrantState::Applied.remove(),
            statements: vec![revoke],
        })
    }

    /// Reads current privileges and compares them with the spec.
    pub async fn verify(
        &self,
        reader: &mut dyn PrivilegeStateReader,
        spec: &GrantSpec,
    ) -> AppResult<DriftReport> {
        let state = reader
            .read_current_privileges(
                spec.role(),
                spec.object_type(),
                spec.scope(),
                spec.columns(),
            )
            .await?;

        let desired = expand_all_privileges(spec.object_type(), spec.privileges());
        let desired_grantable = if spec.with_grant_option() {
            desired.clone()
        } else {
            PrivilegeList::new()
        };
        let no_privileges = PrivilegeList::new();

        let mut objects: Vec<String> = spec.expected_objects().unwrap_or_default();
        for (object, _) in state.iter() {
            if !objects.iter().any(|known| known == object) {
                objects.push(object.to_owned());
            }
        }

        let mut drift = Vec::new();
        for object in &objects {
            let Some(actual) = state.privileges_for(object) else {
                if !desired.is_empty() {
                    drift.push(ObjectDrift {
                        object: object.clone(),
                        found: false,
                        missing: desired.as_slice().to_vec(),
                        unexpected: Vec::new(),
                        grant_option_missing: Vec::new(),
                        grant_option_unexpected: Vec::new(),
                    });
                }
                continue;
            };
            let grantable = state.grantable_for(object).unwrap_or(&no_privileges);

            if same_privileges(actual.as_slice(), desired.as_slice())
                && same_privileges(grantable.as_slice(), desired_grantable.as_slice())
            {
                continue;
            }

            drift.push(ObjectDrift {
                object: object.clone(),
                found: true,
                missing: difference(&desired, |privilege| !actual.contains(privilege)),
                unexpected: difference(actual, |privilege| !desired.contains(privilege)),
                grant_option_missing: difference(&desired_grantable, |privilege| {
                    actual.contains(privilege) && !grantable.contains(privilege)
                }),
                grant_option_unexpected: difference(grantable, |privilege| {
                    desired.contains(privilege) && !desired_grantable.contains(privilege)
                }),
            });
        }

        debug!(
            role = %spec.role(),
            target = %spec.target(),
            objects_checked = objects.len(),
            drifted = drift.len(),
            "grant verified"
        );

        Ok(DriftReport {
            role: spec.role().to_string(),
            target: spec.target().to_string(),
            objects_checked: objects.len(),
            drift,
        })
    }

    async fn apply_plan<E>(
        &self,
        executor: &mut E,
        spec: &GrantSpec,
        plan: &ReconcilePlan,
    ) -> AppResult<ReconcileReport>
    where
        E: SqlExecutor + ?Sized,
    {
        // The revoke below clears whatever was held, so every call starts from Absent.
        let mut state = GrantState::Absent.begin_reconcile();
        let mut statements = Vec::with_capacity(2);

        execute_statement(executor, spec, plan.revoke.as_str()).await?;
        statements.push(plan.revoke.clone());

        if let Some(grant) = &plan.grant {
            execute_statement(executor, spec, grant.as_str()).await?;
            statements.push(grant.clone());
        }
        state = state.finish_reconcile(plan.grant.is_some())?;

        Ok(ReconcileReport {
            role: spec.role().to_string(),
            target: spec.target().to_string(),
            state,
            statements,
        })
    }
}

fn difference(
    privileges: &PrivilegeList,
    keep: impl Fn(Privilege) -> bool,
) -> Vec<Privilege> {
    privileges
        .iter()
        .copied()
        .filter(|privilege| keep(*privilege))
        .collect()
}

async fn execute_statement<E>(executor: &mut E, spec: &GrantSpec, statement: &str) -> AppResult<u64>
where
    E: SqlExecutor + ?Sized,
{
    debug!(role = %spec.role(), target = %spec.target(), statement, "executing grant statement");

    executor.execute(statement).await.map_err(|error| {
        warn!(
            role = %spec.role(),
            target = %spec.target(),
            statement,
            error = %error,
            "grant statement failed"
        );
        with_context(error, spec, statement)
    })
}

fn with_context(error: AppError, spec: &GrantSpec, statement: &str) -> AppError {
    let context = format!("role '{}', target {}", spec.role(), spec.target());
    match error {
        AppError::SqlExecution { statement, message } => AppError::SqlExecution {
            statement,
            message: format!("{message} ({context})"),
        },
        AppError::Connection(message) => {
            AppError::Connection(format!("{message} ({context}, statement `{statement}`)"))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests;
