use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use privsync_core::{AppError, AppResult};
use privsync_domain::{
    CurrentPrivilegeState, GrantConfig, GrantSpec, Identifier, ObjectName, ObjectType, Privilege,
    Scope, resolve_target,
};

use crate::{ExecutorTransaction, PrivilegeStateReader, SqlExecutor, TransactionalExecutor};

use super::{GrantReconciler, GrantState};

type GrantKey = (String, String);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct HeldGrant {
    privileges: Vec<Privilege>,
    grant_option: bool,
}

impl HeldGrant {
    fn plain(privileges: Vec<Privilege>) -> Self {
        Self {
            privileges,
            grant_option: false,
        }
    }
}

type Grants = BTreeMap<GrantKey, HeldGrant>;

/// Simulated database tracking privileges per (target clause, quoted role).
#[derive(Default)]
struct FakeDatabase {
    grants: Grants,
    schema_tables: Vec<String>,
    executed: Vec<String>,
    commits: usize,
    fail_prefix: Option<&'static str>,
}

impl FakeDatabase {
    fn with_tables(tables: &[&str]) -> Self {
        Self {
            schema_tables: tables.iter().map(|table| (*table).to_owned()).collect(),
            ..Self::default()
        }
    }

    fn privileges(&self, target: &str, role: &str) -> Vec<Privilege> {
        self.grants
            .get(&(target.to_owned(), format!("\"{role}\"")))
            .map(|held| held.privileges.clone())
            .unwrap_or_default()
    }
}

fn apply_statement(grants: &mut Grants, statement: &str) -> AppResult<()> {
    if let Some(rest) = statement.strip_prefix("REVOKE ALL PRIVILEGES ON ") {
        let Some((target, role)) = rest.rsplit_once(" FROM ") else {
            return Err(AppError::Internal(format!("unparsable revoke: {statement}")));
        };
        grants.remove(&(target.to_owned(), role.to_owned()));
        return Ok(());
    }

    let Some(rest) = statement.strip_prefix("GRANT ") else {
        return Err(AppError::Internal(format!("unexpected statement: {statement}")));
    };
    let (rest, grant_option) = match rest.strip_suffix(" WITH GRANT OPTION") {
        Some(rest) => (rest, true),
        None => (rest, false),
    };
    let Some((privileges, rest)) = rest.split_once(" ON ") else {
        return Err(AppError::Internal(format!("unparsable grant: {statement}")));
    };
    let Some((target, role)) = rest.rsplit_once(" TO ") else {
        return Err(AppError::Internal(format!("unparsable grant: {statement}")));
    };

    let object_type = if target.starts_with("DATABASE") {
        ObjectType::Database
    } else {
        ObjectType::Table
    };
    let entry = grants
        .entry((target.to_owned(), role.to_owned()))
        .or_default();
    entry.grant_option |= grant_option;
    for keyword in privileges.split(',') {
        let privilege = Privilege::from_str(keyword)?;
        let expanded = if privilege == Privilege::AllPrivileges {
            Privilege::allowed_for(object_type).to_vec()
        } else {
            vec![privilege]
        };
        for privilege in expanded {
            if !entry.privileges.contains(&privilege) {
                entry.privileges.push(privilege);
            }
        }
    }

    Ok(())
}

fn check_failure(fail_prefix: Option<&'static str>, statement: &str) -> AppResult<()> {
    match fail_prefix {
        Some(prefix) if statement.starts_with(prefix) => Err(AppError::SqlExecution {
            statement: statement.to_owned(),
            message: "permission denied".to_owned(),
        }),
        _ => Ok(()),
    }
}

#[async_trait]
impl SqlExecutor for FakeDatabase {
    async fn execute(&mut self, statement: &str) -> AppResult<u64> {
        check_failure(self.fail_prefix, statement)?;
        apply_statement(&mut self.grants, statement)?;
        self.executed.push(statement.to_owned());
        Ok(0)
    }
}

struct FakeTransaction<'a> {
    database: &'a mut FakeDatabase,
    staged: Grants,
    executed: Vec<String>,
}

#[async_trait]
impl<'a> SqlExecutor for FakeTransaction<'a> {
    async fn execute(&mut self, statement: &str) -> AppResult<u64> {
        check_failure(self.database.fail_prefix, statement)?;
        apply_statement(&mut self.staged, statement)?;
        self.executed.push(statement.to_owned());
        Ok(0)
    }
}

#[async_trait]
impl<'a> ExecutorTransaction for FakeTransaction<'a> {
    async fn commit(&mut self) -> AppResult<()> {
        self.database.grants = std::mem::take(&mut self.staged);
        self.database.executed.append(&mut self.executed);
        self.database.commits += 1;
        Ok(())
    }
}

#[async_trait]
impl TransactionalExecutor for FakeDatabase {
    async fn begin<'a>(&'a mut self) -> AppResult<Box<dyn ExecutorTransaction + 'a>> {
        let staged = self.grants.clone();
        Ok(Box::new(FakeTransaction {
            database: self,
            staged,
            executed: Vec::new(),
        }))
    }
}

#[async_trait]
impl PrivilegeStateReader for FakeDatabase {
    async fn read_current_privileges(
        &mut self,
        role: &Identifier,
        object_type: ObjectType,
        scope: &Scope,
        _columns: &[Identifier],
    ) -> AppResult<CurrentPrivilegeState> {
        let target = resolve_target(object_type, scope)?;
        let held = self
            .grants
            .get(&(target.to_string(), role.quoted()))
            .cloned()
            .unwrap_or_default();

        let objects = match scope {
            Scope::WholeDatabase { database } => vec![database.quoted()],
            Scope::WholeSchema { .. } => self.schema_tables.clone(),
            Scope::ExplicitObjects { objects } => objects.iter().map(ObjectName::quoted).collect(),
        };

        let mut state = CurrentPrivilegeState::new();
        for object in objects {
            state.track_object(object.clone());
            for privilege in &held.privileges {
                state.record(object.clone(), *privilege, held.grant_option);
            }
        }
        Ok(state)
    }
}

fn table_spec(privileges: &[&str]) -> GrantSpec {
    grantable_table_spec(privileges, false)
}

fn grantable_table_spec(privileges: &[&str], with_grant_option: bool) -> GrantSpec {
    GrantSpec::from_config(GrantConfig {
        role: "bar".to_owned(),
        database: None,
        schema: Some("foo".to_owned()),
        objects: None,
        columns: None,
        object_type: ObjectType::Table,
        privileges: privileges.iter().map(|value| (*value).to_owned()).collect(),
        with_grant_option,
    })
    .unwrap_or_else(|error| panic!("invalid spec: {error}"))
}

const TABLES_TARGET: &str = "ALL TABLES IN SCHEMA \"foo\"";
const ORDERS: &str = "\"foo\".\"orders\"";
const ITEMS: &str = "\"foo\".\"items\"";

#[test]
fn plan_compiles_revoke_before_grant() {
    let plan = GrantReconciler::new()
        .plan(&table_spec(&["SELECT", "INSERT"]))
        .unwrap_or_else(|error| panic!("plan failed: {error}"));

    assert_eq!(
        plan.statements(),
        vec![
            "REVOKE ALL PRIVILEGES ON ALL TABLES IN SCHEMA \"foo\" FROM \"bar\"",
            "GRANT SELECT,INSERT ON ALL TABLES IN SCHEMA \"foo\" TO \"bar\"",
        ]
    );
}

#[test]
fn plan_for_empty_grant_only_revokes() {
    let plan = GrantReconciler::new()
        .plan(&table_spec(&[]))
        .unwrap_or_else(|error| panic!("plan failed: {error}"));

    assert!(plan.grant.is_none());
    assert_eq!(plan.statements().len(), 1);
}

#[test]
fn state_transitions_follow_the_lifecycle() {
    let reconciling = GrantState::Applied.begin_reconcile();
    assert_eq!(reconciling, GrantState::Reconciling);
    assert!(matches!(
        reconciling.finish_reconcile(true),
        Ok(GrantState::Applied)
    ));
    assert!(matches!(
        reconciling.finish_reconcile(false),
        Ok(GrantState::Absent)
    ));
    assert!(GrantState::Absent.finish_reconcile(true).is_err());
    assert_eq!(GrantState::Reconciling.remove(), GrantState::Absent);
}

#[tokio::test]
async fn reconcile_revokes_then_grants_in_one_transaction() {
    let mut database = FakeDatabase::default();
    let report = GrantReconciler::new()
        .reconcile(&mut database, &table_spec(&["SELECT"]))
        .await
        .unwrap_or_else(|error| panic!("reconcile failed: {error}"));

    assert_eq!(report.state, GrantState::Applied);
    assert_eq!(database.commits, 1);
    assert_eq!(
        database.executed,
        vec![
            "REVOKE ALL PRIVILEGES ON ALL TABLES IN SCHEMA \"foo\" FROM \"bar\"".to_owned(),
            "GRANT SELECT ON ALL TABLES IN SCHEMA \"foo\" TO \"bar\"".to_owned(),
        ]
    );
    assert_eq!(
        database.privileges(TABLES_TARGET, "bar"),
        vec![Privilege::Select]
    );
}

#[tokio::test]
async fn reconciling_twice_is_idempotent() {
    let reconciler = GrantReconciler::new();
    let spec = table_spec(&["SELECT", "UPDATE"]);

    let mut once = FakeDatabase::default();
    let first = reconciler.reconcile(&mut once, &spec).await;
    assert!(first.is_ok());

    let mut twice = FakeDatabase::default();
    assert!(reconciler.reconcile(&mut twice, &spec).await.is_ok());
    assert!(reconciler.reconcile(&mut twice, &spec).await.is_ok());

    assert_eq!(once.grants, twice.grants);
}

#[tokio::test]
async fn reconciling_a_narrower_spec_drops_residual_privileges() {
    let reconciler = GrantReconciler::new();
    let mut database = FakeDatabase::default();

    let wide = table_spec(&["SELECT", "INSERT", "UPDATE"]);
    let narrow = table_spec(&["SELECT"]);

    assert!(reconciler.reconcile(&mut database, &wide).await.is_ok());
    assert_eq!(database.privileges(TABLES_TARGET, "bar").len(), 3);

    assert!(reconciler.reconcile(&mut database, &narrow).await.is_ok());
    assert_eq!(
        database.privileges(TABLES_TARGET, "bar"),
        vec![Privilege::Select]
    );
}

#[tokio::test]
async fn failed_revoke_aborts_before_grant() {
    let mut database = FakeDatabase {
        fail_prefix: Some("REVOKE"),
        ..FakeDatabase::default()
    };

    let result = GrantReconciler::new()
        .reconcile(&mut database, &table_spec(&["SELECT"]))
        .await;

    match result {
        Err(AppError::SqlExecution { statement, message }) => {
            assert!(statement.starts_with("REVOKE ALL PRIVILEGES"));
            assert!(message.contains("role 'bar'"));
        }
        other => panic!("expected sql execution error, got {other:?}"),
    }
    assert!(database.executed.is_empty());
    assert_eq!(database.commits, 0);
}

#[tokio::test]
async fn failed_grant_rolls_back_the_revoke() {
    let reconciler = GrantReconciler::new();
    let mut database = FakeDatabase::default();
    assert!(
        reconciler
            .reconcile(&mut database, &table_spec(&["SELECT"]))
            .await
            .is_ok()
    );

    database.fail_prefix = Some("GRANT");
    let result = reconciler
        .reconcile(&mut database, &table_spec(&["INSERT"]))
        .await;

    assert!(matches!(result, Err(AppError::SqlExecution { .. })));
    assert_eq!(database.commits, 1);
    assert_eq!(
        database.privileges(TABLES_TARGET, "bar"),
        vec![Privilege::Select]
    );
}

#[tokio::test]
async fn failed_grant_without_transaction_leaves_nothing_granted() {
    let reconciler = GrantReconciler::new();
    let mut database = FakeDatabase::default();
    assert!(
        reconciler
            .reconcile_without_transaction(&mut database, &table_spec(&["SELECT"]))
            .await
            .is_ok()
    );

    database.fail_prefix = Some("GRANT");
    let result = reconciler
        .reconcile_without_transaction(&mut database, &table_spec(&["INSERT"]))
        .await;

    assert!(result.is_err());
    assert!(database.privileges(TABLES_TARGET, "bar").is_empty());
}

#[tokio::test]
async fn empty_grant_only_revokes() {
    let reconciler = GrantReconciler::new();
    let mut database = FakeDatabase::default();
    assert!(
        reconciler
            .reconcile(&mut database, &table_spec(&["SELECT"]))
            .await
            .is_ok()
    );

    let report = reconciler
        .reconcile(&mut database, &table_spec(&[]))
        .await
        .unwrap_or_else(|error| panic!("reconcile failed: {error}"));

    assert_eq!(report.state, GrantState::Absent);
    assert_eq!(report.statements.len(), 1);
    assert!(database.privileges(TABLES_TARGET, "bar").is_empty());
}

#[tokio::test]
async fn remove_issues_only_revoke() {
    let reconciler = GrantReconciler::new();
    let mut database = FakeDatabase::default();
    let spec = table_spec(&["SELECT", "DELETE"]);
    assert!(reconciler.reconcile(&mut database, &spec).await.is_ok());

    let report = reconciler
        .remove(&mut database, &spec)
        .await
        .unwrap_or_else(|error| panic!("remove failed: {error}"));

    assert_eq!(report.state, GrantState::Absent);
    assert_eq!(
        report.statements,
        vec!["REVOKE ALL PRIVILEGES ON ALL TABLES IN SCHEMA \"foo\" FROM \"bar\"".to_owned()]
    );
    assert!(database.privileges(TABLES_TARGET, "bar").is_empty());
}

#[tokio::test]
async fn verify_reports_convergence_after_reconcile() {
    let reconciler = GrantReconciler::new();
    let mut database = FakeDatabase::with_tables(&[ORDERS, ITEMS]);
    let spec = table_spec(&["SELECT", "INSERT"]);
    assert!(reconciler.reconcile(&mut database, &spec).await.is_ok());

    let report = reconciler
        .verify(&mut database, &spec)
        .await
        .unwrap_or_else(|error| panic!("verify failed: {error}"));

    assert!(report.is_converged());
    assert_eq!(report.objects_checked, 2);
}

#[tokio::test]
async fn verify_detects_privileges_changed_by_other_actors() {
    let reconciler = GrantReconciler::new();
    let mut database = FakeDatabase::with_tables(&[ORDERS]);
    let spec = table_spec(&["SELECT"]);
    assert!(reconciler.reconcile(&mut database, &spec).await.is_ok());

    database.grants.insert(
        (TABLES_TARGET.to_owned(), "\"bar\"".to_owned()),
        HeldGrant::plain(vec![Privilege::Truncate]),
    );

    let report = reconciler
        .verify(&mut database, &spec)
        .await
        .unwrap_or_else(|error| panic!("verify failed: {error}"));

    assert!(!report.is_converged());
    assert_eq!(report.drift.len(), 1);
    assert_eq!(report.drift[0].missing, vec![Privilege::Select]);
    assert_eq!(report.drift[0].unexpected, vec![Privilege::Truncate]);
}

#[tokio::test]
async fn verify_expands_all_privileges() {
    let reconciler = GrantReconciler::new();
    let mut database = FakeDatabase::default();
    let spec = GrantSpec::from_config(GrantConfig {
        role: "bar".to_owned(),
        database: Some("foo".to_owned()),
        schema: None,
        objects: None,
        columns: None,
        object_type: ObjectType::Database,
        privileges: vec!["ALL PRIVILEGES".to_owned()],
        with_grant_option: true,
    })
    .unwrap_or_else(|error| panic!("invalid spec: {error}"));

    assert!(reconciler.reconcile(&mut database, &spec).await.is_ok());
    let report = reconciler
        .verify(&mut database, &spec)
        .await
        .unwrap_or_else(|error| panic!("verify failed: {error}"));

    assert!(report.is_converged());
    assert_eq!(report.objects_checked, 1);
}

#[tokio::test]
async fn verify_flags_missing_explicit_objects() {
    let reconciler = GrantReconciler::new();

    struct EmptyCatalog;

    #[async_trait]
    impl PrivilegeStateReader for EmptyCatalog {
        async fn read_current_privileges(
            &mut self,
            _role: &Identifier,
            _object_type: ObjectType,
            _scope: &Scope,
            _columns: &[Identifier],
        ) -> AppResult<CurrentPrivilegeState> {
            Ok(CurrentPrivilegeState::new())
        }
    }

    let spec = GrantSpec::from_config(GrantConfig {
        role: "bar".to_owned(),
        database: None,
        schema: Some("foo".to_owned()),
        objects: Some(vec!["orders".to_owned()]),
        columns: None,
        object_type: ObjectType::Table,
        privileges: vec!["SELECT".to_owned()],
        with_grant_option: false,
    })
    .unwrap_or_else(|error| panic!("invalid spec: {error}"));

    let report = reconciler
        .verify(&mut EmptyCatalog, &spec)
        .await
        .unwrap_or_else(|error| panic!("verify failed: {error}"));

    assert_eq!(report.drift.len(), 1);
    assert!(!report.drift[0].found);
    assert_eq!(report.drift[0].object, ORDERS);
}

#[tokio::test]
async fn verify_reports_missing_grant_option() {
    let reconciler = GrantReconciler::new();
    let mut database = FakeDatabase::with_tables(&[ORDERS]);
    assert!(
        reconciler
            .reconcile(&mut database, &table_spec(&["SELECT", "INSERT"]))
            .await
            .is_ok()
    );

    let report = reconciler
        .verify(&mut database, &grantable_table_spec(&["SELECT", "INSERT"], true))
        .await
        .unwrap_or_else(|error| panic!("verify failed: {error}"));

    assert_eq!(report.drift.len(), 1);
    let drift = &report.drift[0];
    assert!(drift.missing.is_empty());
    assert!(drift.unexpected.is_empty());
    assert_eq!(
        drift.grant_option_missing,
        vec![Privilege::Select, Privilege::Insert]
    );
    assert!(drift.grant_option_unexpected.is_empty());
}

#[tokio::test]
async fn verify_reports_unrequested_grant_option() {
    let reconciler = GrantReconciler::new();
    let mut database = FakeDatabase::with_tables(&[ORDERS, ITEMS]);
    let grantable = grantable_table_spec(&["SELECT"], true);
    assert!(reconciler.reconcile(&mut database, &grantable).await.is_ok());

    let converged = reconciler
        .verify(&mut database, &grantable)
        .await
        .unwrap_or_else(|error| panic!("verify failed: {error}"));
    assert!(converged.is_converged());

    let report = reconciler
        .verify(&mut database, &table_spec(&["SELECT"]))
        .await
        .unwrap_or_else(|error| panic!("verify failed: {error}"));

    assert_eq!(report.drift.len(), 2);
    assert!(report.drift.iter().all(|drift| {
        drift.missing.is_empty()
            && drift.grant_option_missing.is_empty()
            && drift.grant_option_unexpected == [Privilege::Select]
    }));
}

#[tokio::test]
async fn reconcile_reports_the_outcome_of_each_call() {
    let reconciler = GrantReconciler::new();
    let mut database = FakeDatabase::default();

    let applied = reconciler
        .reconcile(&mut database, &table_spec(&["SELECT"]))
        .await
        .unwrap_or_else(|error| panic!("reconcile failed: {error}"));
    let reapplied = reconciler
        .reconcile(&mut database, &table_spec(&["SELECT"]))
        .await
        .unwrap_or_else(|error| panic!("reconcile failed: {error}"));

    assert_eq!(applied.state, GrantState::Applied);
    assert_eq!(reapplied.state, GrantState::Applied);
    assert_eq!(reapplied.statements, applied.statements);
}
