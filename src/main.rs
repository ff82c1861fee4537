use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tpm_trust::{
    audit::Auditor,
    config::Config,
    pki::{HttpFetcher, MemoryTrustBundle, TrustBundle, TrustChecker},
    privilege,
    telemetry,
    tpm::{ExportedTpm, KeyLocator},
};

/// TPM root of trust, simplified.
#[derive(Debug, Parser)]
#[command(name = "tpm-trust", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Audit the TPM's EK certificate against trusted manufacturer root CAs
    ///
    /// Exit codes: 0 if the TPM is trusted, 1 if it is not trusted or
    /// validation failed.
    Audit(AuditArgs),
    /// Display the current version of the cli
    Version,
}

#[derive(Debug, clap::Args)]
struct AuditArgs {
    /// Skip CRL revocation check
    #[arg(long)]
    skip_revocation_check: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding the exported EK certificate NV indices
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Trust bundle directory
    #[arg(long)]
    bundle: Option<PathBuf>,

    /// Disable every network download
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    color_eyre::install()?;
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    match cli.command {
        Command::Version => {
            println!("tpm-trust {}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        Command::Audit(args) => {
            telemetry::init_tracing(args.verbose);
            match audit(args).await {
                Ok(()) => Ok(ExitCode::SUCCESS),
                Err(e) => {
                    tracing::error!("command failed: {e:#}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

async fn audit(args: AuditArgs) -> color_eyre::Result<()> {
    let mut config = Config::load()?;
    if let Some(dir) = args.export_dir {
        config.tpm.export_dir = dir;
    }
    if let Some(dir) = args.bundle {
        config.bundle.path = dir;
    }
    if args.offline {
        config.fetcher.enabled = false;
    }
    let skip_revocation_check = args.skip_revocation_check || config.audit.skip_revocation_check;
    tracing::debug!("Loaded configuration: {:?}", config);

    let elevation = privilege::from_strategy(config.privilege.strategy, &config.tpm.export_dir);
    privilege::elevate_if_needed(elevation.as_ref())?;

    let session = ExportedTpm::open(&config.tpm.export_dir)?;
    let bundle: Arc<dyn TrustBundle> = Arc::new(MemoryTrustBundle::new(&config.bundle.path).await?);

    let fetcher = HttpFetcher::new(config.fetcher.limits())?.with_enabled(config.fetcher.enabled);
    let limits = fetcher.limits();
    let checker = TrustChecker::new(Box::new(fetcher), bundle.clone()).with_limits(limits);

    Auditor::new(KeyLocator::new(), checker, bundle)
        .run(session, skip_revocation_check)
        .await?;
    Ok(())
}
