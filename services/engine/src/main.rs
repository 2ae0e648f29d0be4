//! OrgTrust CLI
//!
//! Runs the engine against a JSON organization snapshot: create a role
//! across selected accounts, collate managed roles, sweep the administrator
//! role matrix, or print canned principals.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use orgtrust_engine::accounts::AccountCatalog;
use orgtrust_engine::naming::roles;
use orgtrust_engine::roles::Session;
use orgtrust_engine::{
    collate, create_role, sweep, CannedPrincipals, ClientFactory, CreateRoleRequest, EngineConfig,
    InMemoryOrganization,
};

#[derive(Parser, Debug)]
#[command(name = "orgtrust", version, about)]
struct Cli {
    /// Organization snapshot to operate on
    #[arg(long, env = "ORGTRUST_SNAPSHOT")]
    snapshot: PathBuf,

    /// Engine configuration file (JSON)
    #[arg(long, env = "ORGTRUST_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, default_value = "false")]
    json: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ensure one role in every selected account, e.g. `create-role -role Deployer -admin`
    CreateRole {
        /// Flags as printed by `roles --format shell`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        args: Vec<String>,
    },
    /// Collate every managed role into the flags that would recreate it
    Roles {
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Converge administrator, auditor and Terraform state roles everywhere
    Sweep {
        /// Trust the federated Intranet roles as well
        #[arg(long, default_value = "false")]
        no_bootstrapping: bool,
    },
    /// Print the canned principal sets
    Principals {
        #[arg(long, default_value = "false")]
        no_bootstrapping: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
    Shell,
}

fn init_logging(json: bool, verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json, cli.verbose);

    let config =
        EngineConfig::load(cli.config.as_deref()).context("Failed to load engine configuration")?;
    let org = Arc::new(
        InMemoryOrganization::load(&cli.snapshot)
            .with_context(|| format!("Failed to load snapshot {}", cli.snapshot.display()))?,
    );
    let organization = org
        .describe_organization()
        .await
        .context("Failed to describe the organization")?;
    let hub = Session::hub(
        organization.management_account_id.clone(),
        roles::ORGANIZATION_ADMINISTRATOR,
    );
    let factory = Arc::new(ClientFactory::new(org.clone(), org.clone(), hub, config.clone()));

    let today = EngineConfig::today();
    let save = |org: &InMemoryOrganization| {
        org.save(&cli.snapshot)
            .with_context(|| format!("Failed to write snapshot {}", cli.snapshot.display()))
    };

    match cli.command {
        Command::CreateRole { args } => {
            let mut request = CreateRoleRequest::from_arguments(&args)?;
            request.selection = request.selection.with_implied_qualities(&config);
            let report = create_role(&factory, org.as_ref(), &request, today).await?;
            save(org.as_ref())?;
            for warning in &report.warnings {
                warn!(warning = %warning, "Selection warning");
            }
            info!(
                role = %request.role_name,
                ensured = report.role_arns.len(),
                unreachable = report.unreachable.len(),
                "Role written to snapshot"
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Roles { format } => {
            let report = collate(&factory, org.as_ref()).await?;
            for account in &report.unreachable {
                warn!(
                    account_id = %account.account_id,
                    reason = %account.reason,
                    "Account not collated"
                );
            }
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&report.roles)?),
                Format::Shell => {
                    let snapshot = cli.snapshot.display().to_string();
                    let program = format!("orgtrust --snapshot {:?}", snapshot);
                    println!("set -e -x");
                    for role in &report.roles {
                        println!("{} {}", program, role.command());
                    }
                }
                Format::Text => {
                    for (i, role) in report.roles.iter().enumerate() {
                        if i > 0 {
                            println!();
                        }
                        println!("{}", role.role_name);
                        println!("\taccount selection flags:  {}", role.selection);
                        println!("\tassume role policy flags: {}", role.assume_role_policy);
                        println!("\tpolicy attachment flags:  {}", role.policy_attachments);
                        println!("\trole ARNs:");
                        for arn in &role.role_arns {
                            println!("\t\t{}", arn);
                        }
                    }
                }
            }
        }
        Command::Sweep { no_bootstrapping } => {
            let report = sweep(Arc::clone(&factory), org.as_ref(), !no_bootstrapping, today).await?;
            save(org.as_ref())?;
            info!(
                ensured = report.ensured.len(),
                unreconciled = report.unreconciled.len(),
                "Sweep written to snapshot"
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Principals { no_bootstrapping } => {
            let canned =
                CannedPrincipals::compute(org.as_ref(), &config, !no_bootstrapping, today).await?;
            println!("{}", serde_json::to_string_pretty(&canned)?);
        }
    }

    Ok(())
}
