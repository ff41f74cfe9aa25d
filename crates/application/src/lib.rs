//! Application services and ports.

#![forbid(unsafe_code)]

mod grant_ports;
mod grant_reconciler;

pub use grant_ports::{
    ExecutorTransaction, PrivilegeStateReader, SqlExecutor, TransactionalExecutor,
};
pub use grant_reconciler::{
    DriftReport, GrantReconciler, GrantState, ObjectDrift, ReconcilePlan, ReconcileReport,
};
