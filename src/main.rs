use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::{Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatekeeper::actions::{
    AddonActivationParams, CreateParams, ExecutionResult, SecretRotationParams,
    TenantDeletionParams,
};
use gatekeeper::audit::AuditFilter;
use gatekeeper::config::{self, Config};
use gatekeeper::models::approval::{ActionType, ApprovalRequest, ApprovalStatus, ListFilter};
use gatekeeper::store::{MemoryStore, PgStore};
use gatekeeper::workflow::{
    ApprovalService, CreateRequest, ExecuteInput, ReviewInput, SystemClock,
};
use gatekeeper::{api, build_service, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let cfg = config::load()?;
    init_tracing(&cfg)?;

    let result = match args.command {
        Some(cli::Commands::Serve { port, in_memory }) => run_server(cfg, port, in_memory).await,
        Some(cli::Commands::Migrate) => {
            let db = connect(&cfg).await?;
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Some(cli::Commands::Approval { command }) => {
            let service = pg_service(&cfg).await?;
            handle_approval_command(&service, command).await
        }
        Some(cli::Commands::Audit { command }) => {
            let service = pg_service(&cfg).await?;
            handle_audit_command(&service, command).await
        }
        None => run_server(cfg, None, false).await,
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing(cfg: &Config) -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // Export spans over OTLP only when a collector is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "gatekeeper"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let json = cfg.json_logs();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "gatekeeper=debug,tower_http=debug".into()),
        ))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn connect(cfg: &Config) -> anyhow::Result<PgStore> {
    tracing::info!("Connecting to database...");
    PgStore::connect(&cfg.database_url, &cfg.db_settings())
        .await
        .context("failed to connect to PostgreSQL")
}

async fn pg_service(cfg: &Config) -> anyhow::Result<ApprovalService> {
    let db = Arc::new(connect(cfg).await?);
    build_service(db, Arc::new(SystemClock), cfg.deletion_policy())
}

async fn run_server(cfg: Config, port: Option<u16>, in_memory: bool) -> anyhow::Result<()> {
    let service = if in_memory {
        tracing::warn!("Running with the in-memory store; nothing survives a restart");
        build_service(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            cfg.deletion_policy(),
        )?
    } else {
        let db = connect(&cfg).await?;
        tracing::info!("Running migrations...");
        db.migrate().await?;
        build_service(Arc::new(db), Arc::new(SystemClock), cfg.deletion_policy())?
    };

    let state = Arc::new(AppState {
        service: Arc::new(service),
        admin_key: cfg.admin_key.clone(),
    });
    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(cfg.port)));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Gatekeeper listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn print_requests(rows: &[ApprovalRequest]) {
    if rows.is_empty() {
        println!("No approval requests.");
        return;
    }
    println!(
        "{:<38} {:<18} {:<10} {:<40} {}",
        "ID", "ACTION", "STATUS", "TARGET", "REQUESTED BY"
    );
    for r in rows {
        let target = if r.target_key.len() > 40 {
            format!("{}...", r.target_key.chars().take(37).collect::<String>())
        } else {
            r.target_key.clone()
        };
        println!(
            "{:<38} {:<18} {:<10} {:<40} {}",
            r.id, r.action_type, r.status, target, r.requested_by
        );
    }
}

fn print_execution(result: &ExecutionResult) {
    match result {
        ExecutionResult::SecretRotated {
            env_var,
            generated_secret,
            fingerprint,
            instructions,
            ..
        } => {
            println!("New secret (shown once, store it now):");
            println!("  {}", generated_secret.expose());
            println!("Fingerprint: {}", fingerprint);
            println!("Env var:     {}", env_var);
            for (i, step) in instructions.iter().enumerate() {
                println!("  {}. {}", i + 1, step);
            }
        }
        ExecutionResult::TenantClosed {
            tenant_id,
            lifecycle_status,
        } => println!("Tenant {} is now {}.", tenant_id, lifecycle_status),
        ExecutionResult::AddonActivated {
            tenant_id,
            addon_name,
            ..
        } => println!("{} activated for tenant {}.", addon_name, tenant_id),
    }
}

fn parse_request_id(raw: &str) -> anyhow::Result<uuid::Uuid> {
    raw.trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid request ID: {}", raw))
}

async fn handle_approval_command(
    service: &ApprovalService,
    cmd: cli::ApprovalCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::ApprovalCommands::List {
            action_type,
            status,
            target_key,
            limit,
            offset,
        } => {
            let mut filter = ListFilter::new(limit, offset);
            filter.action_type = action_type.map(|s| s.parse::<ActionType>()).transpose()?;
            filter.status = status.map(|s| s.parse::<ApprovalStatus>()).transpose()?;
            filter.target_key = target_key;
            let rows = service.list_requests(&filter).await?;
            print_requests(&rows);
        }
        cli::ApprovalCommands::Show { request_id } => {
            let row = service.get_request(parse_request_id(&request_id)?).await?;
            println!("{}", serde_json::to_string_pretty(&row)?);
        }
        cli::ApprovalCommands::CreateSecretRotation {
            secret_name,
            reason,
            actor,
        } => {
            let row = service
                .create_request(CreateRequest {
                    requested_by: actor,
                    reason,
                    params: CreateParams::SecretRotation(SecretRotationParams { secret_name }),
                })
                .await?;
            println!("Request {} created ({}).", row.id, row.status);
        }
        cli::ApprovalCommands::CreateTenantDeletion {
            tenant_id,
            cooldown_hours,
            reason,
            actor,
        } => {
            let row = service
                .create_request(CreateRequest {
                    requested_by: actor,
                    reason,
                    params: CreateParams::TenantDeletion(TenantDeletionParams {
                        tenant_id,
                        cooldown_hours,
                    }),
                })
                .await?;
            println!("Request {} created ({}).", row.id, row.status);
        }
        cli::ApprovalCommands::CreateAddonActivation {
            tenant_id,
            addon_id,
            billing_reference,
            settings,
            reason,
            actor,
        } => {
            let settings = settings
                .map(|raw| serde_json::from_str::<Map<String, Value>>(&raw))
                .transpose()
                .context("--settings must be a JSON object")?;
            let row = service
                .create_request(CreateRequest {
                    requested_by: actor,
                    reason,
                    params: CreateParams::AddonActivation(AddonActivationParams {
                        tenant_id,
                        addon_id,
                        billing_reference,
                        settings,
                    }),
                })
                .await?;
            println!("Request {} created ({}).", row.id, row.status);
        }
        cli::ApprovalCommands::Review {
            request_id,
            decision,
            notes,
            activate_now,
            billing_reference,
            actor,
        } => {
            let outcome = service
                .review_request(
                    parse_request_id(&request_id)?,
                    ReviewInput {
                        reviewer: actor,
                        decision,
                        notes,
                        activate_now,
                        billing_reference,
                    },
                )
                .await?;
            println!("Request {} is now {}.", outcome.request.id, outcome.request.status);
            if let Some(result) = &outcome.result {
                print_execution(result);
            }
        }
        cli::ApprovalCommands::Execute {
            request_id,
            confirmation,
            actor,
        } => {
            let outcome = service
                .execute_request(
                    parse_request_id(&request_id)?,
                    ExecuteInput {
                        executor: actor,
                        confirmation,
                    },
                )
                .await?;
            println!("Request {} executed.", outcome.request.id);
            print_execution(&outcome.result);
        }
    }
    Ok(())
}

async fn handle_audit_command(
    service: &ApprovalService,
    cmd: cli::AuditCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::AuditCommands::List {
            resource_id,
            limit,
            offset,
        } => {
            let resource_id = resource_id.as_deref().map(parse_request_id).transpose()?;
            let entries = service
                .list_audit(&AuditFilter::new(resource_id, limit, offset))
                .await?;
            if entries.is_empty() {
                println!("No audit entries.");
                return Ok(());
            }
            println!("{:<26} {:<50} {:<9} {}", "TIME", "ACTION", "OUTCOME", "ACTOR");
            for e in entries {
                println!(
                    "{:<26} {:<50} {:<9} {}",
                    e.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
                    e.action,
                    format!("{:?}", e.outcome).to_lowercase(),
                    e.actor_id
                );
            }
        }
    }
    Ok(())
}
