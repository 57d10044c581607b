use clap::{Parser, Subcommand};

/// Gatekeeper: two-person approval for sensitive platform actions
#[derive(Parser)]
#[command(name = "gatekeeper", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to GATEKEEPER_PORT)
        #[arg(short, long)]
        port: Option<u16>,
        /// Keep everything in process memory instead of PostgreSQL
        #[arg(long)]
        in_memory: bool,
    },

    /// Run database migrations and exit
    Migrate,

    /// Request, review and execute sensitive actions
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },

    /// Inspect the audit trail
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },
}

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// List approval requests, newest first
    List {
        #[arg(long)]
        action_type: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        target_key: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },
    /// Show one request
    Show { request_id: String },
    /// Request a platform secret rotation
    CreateSecretRotation {
        /// jwt or data_encryption (aliases accepted)
        #[arg(long)]
        secret_name: String,
        #[arg(long)]
        reason: String,
        #[arg(long, env = "GATEKEEPER_ACTOR")]
        actor: String,
    },
    /// Request a tenant deletion (soft close after a cooldown)
    CreateTenantDeletion {
        #[arg(long)]
        tenant_id: String,
        #[arg(long)]
        cooldown_hours: Option<i64>,
        #[arg(long)]
        reason: String,
        #[arg(long, env = "GATEKEEPER_ACTOR")]
        actor: String,
    },
    /// Request an add-on activation for a tenant
    CreateAddonActivation {
        #[arg(long)]
        tenant_id: String,
        #[arg(long)]
        addon_id: String,
        #[arg(long)]
        billing_reference: Option<String>,
        /// Add-on settings as a JSON object
        #[arg(long)]
        settings: Option<String>,
        #[arg(long)]
        reason: String,
        #[arg(long, env = "GATEKEEPER_ACTOR")]
        actor: String,
    },
    /// Approve or reject a pending request
    Review {
        request_id: String,
        /// approve or reject
        #[arg(long)]
        decision: String,
        #[arg(long)]
        notes: Option<String>,
        /// Add-on requests only: activate immediately on approval
        #[arg(long)]
        activate_now: bool,
        #[arg(long)]
        billing_reference: Option<String>,
        #[arg(long, env = "GATEKEEPER_ACTOR")]
        actor: String,
    },
    /// Execute an approved request
    Execute {
        request_id: String,
        /// The exact confirmation phrase, e.g. "ROTATE JWT"
        #[arg(long)]
        confirmation: String,
        #[arg(long, env = "GATEKEEPER_ACTOR")]
        actor: String,
    },
}

#[derive(Subcommand)]
pub enum AuditCommands {
    /// List audit entries, newest first
    List {
        #[arg(long)]
        resource_id: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },
}
