//! privsync command-line runtime.

#![forbid(unsafe_code)]

mod grant_file;

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use privsync_application::{DriftReport, GrantReconciler, ReconcilePlan, ReconcileReport};
use privsync_core::{AppError, AppResult};
use privsync_domain::{GrantSpec, ObjectType, Privilege};
use privsync_infrastructure::PostgresGrantConnection;

use serde::Serialize;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "privsync", version)]
#[command(about = "Converge PostgreSQL privileges to the grants declared in a file")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Print reports as JSON instead of log lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the statements reconciliation would issue, without connecting
    Plan {
        /// Grant file
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Revoke and re-grant every declared grant
    Apply {
        /// Grant file
        #[arg(short, long)]
        file: PathBuf,
        /// Read privileges back afterwards and fail on drift
        #[arg(long)]
        verify: bool,
    },
    /// Revoke every privilege the declared grants cover
    Revoke {
        /// Grant file
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Report drift between declared grants and the catalogs
    Verify {
        /// Grant file
        #[arg(short, long)]
        file: PathBuf,
    },
}

impl Command {
    fn file(&self) -> &Path {
        match self {
            Self::Plan { file }
            | Self::Apply { file, .. }
            | Self::Revoke { file }
            | Self::Verify { file } => file.as_path(),
        }
    }
}

#[derive(Debug, Clone)]
struct CliConfig {
    database_url: String,
    max_connections: u32,
}

#[derive(Debug, Serialize)]
struct PlannedGrant<'a> {
    role: &'a str,
    target: &'a str,
    statements: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct ApplyOutput {
    reconciled: Vec<ReconcileReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    verified: Vec<DriftReport>,
}

const DRIFT_EXIT_CODE: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode, AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let specs = grant_file::load_grant_file(cli.command.file())?;
    let reconciler = GrantReconciler::new();

    if matches!(cli.command, Command::Plan { .. }) {
        let plans = specs
            .iter()
            .map(|spec| reconciler.plan(spec))
            .collect::<AppResult<Vec<_>>>()?;
        print_plans(&specs, &plans, cli.json)?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = CliConfig::load()?;
    let pool = connect_pool(&config).await?;
    let mut connection = pool
        .acquire()
        .await
        .map_err(|error| AppError::Connection(format!("failed to acquire connection: {error}")))?;
    let mut adapter = PostgresGrantConnection::new(&mut connection);

    let current_database = adapter.current_database().await?;
    check_declared_databases(&specs, current_database.as_str())?;

    info!(
        database = %current_database,
        grants = specs.len(),
        "privsync connected"
    );

    match cli.command {
        Command::Plan { .. } => Ok(ExitCode::SUCCESS),
        Command::Apply { verify, .. } => {
            let mut output = ApplyOutput {
                reconciled: Vec::with_capacity(specs.len()),
                verified: Vec::new(),
            };
            for spec in &specs {
                output
                    .reconciled
                    .push(reconciler.reconcile(&mut adapter, spec).await?);
            }
            if verify {
                for spec in &specs {
                    output
                        .verified
                        .push(reconciler.verify(&mut adapter, spec).await?);
                }
            }

            if cli.json {
                print_json(&output)?;
            }
            Ok(drift_exit_code(&output.verified, cli.json))
        }
        Command::Revoke { .. } => {
            let mut reports = Vec::with_capacity(specs.len());
            for spec in &specs {
                reports.push(reconciler.remove(&mut adapter, spec).await?);
            }

            if cli.json {
                print_json(&reports)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify { .. } => {
            let mut reports = Vec::with_capacity(specs.len());
            for spec in &specs {
                reports.push(reconciler.verify(&mut adapter, spec).await?);
            }

            if cli.json {
                print_json(&reports)?;
            }
            Ok(drift_exit_code(&reports, cli.json))
        }
    }
}

impl CliConfig {
    fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let max_connections = parse_env_u32("PRIVSYNC_MAX_CONNECTIONS", 2)?;

        if max_connections == 0 {
            return Err(AppError::Validation(
                "PRIVSYNC_MAX_CONNECTIONS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            max_connections,
        })
    }
}

async fn connect_pool(config: &CliConfig) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(config.database_url.as_str())
        .await
        .map_err(|error| AppError::Connection(format!("failed to connect to database: {error}")))
}

/// Rejects grants whose declared database is not the one the connection points at.
fn check_declared_databases(specs: &[GrantSpec], current_database: &str) -> AppResult<()> {
    for spec in specs {
        if spec.object_type() == ObjectType::Database {
            continue;
        }

        if let Some(database) = spec.database()
            && database.as_str() != current_database
        {
            return Err(AppError::Validation(format!(
                "grant for role '{}' on {} declares database '{database}' but the connection uses '{current_database}'",
                spec.role(),
                spec.target()
            )));
        }
    }

    Ok(())
}

fn print_plans(specs: &[GrantSpec], plans: &[ReconcilePlan], json: bool) -> AppResult<()> {
    if json {
        let planned: Vec<PlannedGrant<'_>> = specs
            .iter()
            .zip(plans)
            .map(|(spec, plan)| PlannedGrant {
                role: spec.role().as_str(),
                target: spec.target().as_str(),
                statements: plan.statements(),
            })
            .collect();
        return print_json(&planned);
    }

    for (spec, plan) in specs.iter().zip(plans) {
        println!("-- role '{}' on {}", spec.role(), spec.target());
        for statement in plan.statements() {
            println!("{statement};");
        }
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> AppResult<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|error| AppError::Internal(format!("failed to render report: {error}")))?;
    println!("{rendered}");
    Ok(())
}

fn drift_exit_code(reports: &[DriftReport], json: bool) -> ExitCode {
    let mut drifted = 0_usize;

    for report in reports {
        if report.is_converged() {
            if !json {
                info!(
                    role = %report.role,
                    target = %report.target,
                    objects_checked = report.objects_checked,
                    "grant converged"
                );
            }
            continue;
        }

        drifted = drifted.saturating_add(1);
        if json {
            continue;
        }
        for object in &report.drift {
            warn!(
                role = %report.role,
                target = %report.target,
                object = %object.object,
                found = object.found,
                missing = %join_privileges(&object.missing),
                unexpected = %join_privileges(&object.unexpected),
                grant_option_missing = %join_privileges(&object.grant_option_missing),
                grant_option_unexpected = %join_privileges(&object.grant_option_unexpected),
                "grant drifted"
            );
        }
    }

    if drifted == 0 {
        ExitCode::SUCCESS
    } else {
        warn!(drifted, "declared grants differ from the catalogs");
        ExitCode::from(DRIFT_EXIT_CODE)
    }
}

fn join_privileges(privileges: &[Privilege]) -> String {
    privileges
        .iter()
        .map(Privilege::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
