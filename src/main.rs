//! awsvpnclient — connect to AWS Client VPN (SAML federated) from the command line
//!
//! `serve` → SAML callback server + two-phase patched OpenVPN run
//! `setup` → build the patched OpenVPN binary

mod browser;
mod callback;
mod challenge;
mod config;
mod credential;
mod error;
mod models;
mod ovpn;
mod pages;
mod session;
mod setup;
mod vpn;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::callback::CallbackServer;
use crate::config::AppConfig;
use crate::error::BUG_REPORT_URL;
use crate::vpn::TunnelOrchestrator;

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "awsvpnclient",
    about = "Connects to AWS Client VPN from the CLI without the official VPN client",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Debug logging (same as `debug: true` in awsvpnclient.yml)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Load an .ovpn profile, run the SAML callback server and connect
    #[command(visible_aliases = ["host", "start"])]
    Serve(ServeArgs),
    /// Compile the AWS-patched OpenVPN binary
    #[command(visible_alias = "build")]
    Setup(SetupArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Raw OpenVPN profile downloaded from the Client VPN self-service portal
    #[arg(long)]
    config: PathBuf,
    /// Where the formatted profile and transient auth files are written
    #[arg(long, env = "AWSVPNCLIENT_TMP_DIR")]
    config_tmp_dir: Option<PathBuf>,
    /// Give up waiting for the SAML response after this many seconds (default: wait forever)
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Args)]
struct SetupArgs {
    /// OpenVPN 2.5.1 source directory (downloaded when omitted)
    #[arg(short, long)]
    source: Option<PathBuf>,
    /// Output directory for the compiled binary
    #[arg(short, long, default_value = ".")]
    out: PathBuf,
    /// Patch applied to the OpenVPN source
    #[arg(short, long, default_value = setup::DEFAULT_PATCH)]
    patch: PathBuf,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Cmd::Serve(args) => run_serve(args, cli.verbose),
        Cmd::Setup(args) => {
            init_logging(cli.verbose);
            run_setup(args)
        }
    };
    match code {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Questions? Please visit our issue tracker: {}", BUG_REPORT_URL);
            std::process::exit(1);
        }
    }
}

fn run_serve(args: ServeArgs, verbose: bool) -> error::Result<i32> {
    let config_path = config::search_config_file()?;
    let app_config = AppConfig::load(&config_path)?;
    init_logging(verbose || app_config.debug);
    debug!(config = %config_path.display(), "loaded application config");

    let tmp_dir = args.config_tmp_dir.unwrap_or_else(std::env::temp_dir);
    debug!(
        config = %args.config.display(),
        config_out_dir = %tmp_dir.display(),
        "Parsing openvpn config and saving formatted version for openvpn"
    );
    let connection = ovpn::parse_and_format(&args.config, &tmp_dir)?;
    info!(config = %connection.filename.display(), "Parsed and formatted openvpn configuration.");

    let (server, assertions) = CallbackServer::bind(&app_config.listen_addr())?;
    match server.local_addr() {
        Some(addr) => info!("Starting HTTP server at: {}", addr),
        None => info!("Starting HTTP server at: {}", app_config.server.addr),
    }
    server.spawn();

    let status = TunnelOrchestrator::new(app_config, connection, tmp_dir, assertions)
        .with_assertion_timeout(args.timeout.map(Duration::from_secs))
        .run()?;
    Ok(status.code().unwrap_or(1))
}

fn run_setup(args: SetupArgs) -> error::Result<i32> {
    let opts = setup::SetupOptions {
        source: args.source,
        out: args.out,
        patch: args.patch,
    };
    setup::run(&opts)?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_aliases_and_flags() {
        let cli = Cli::try_parse_from([
            "awsvpnclient", "start", "--config", "work.ovpn", "--config-tmp-dir", "/tmp/x", "--timeout", "90", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Cmd::Serve(args) => {
                assert_eq!(args.config, PathBuf::from("work.ovpn"));
                assert_eq!(args.config_tmp_dir, Some(PathBuf::from("/tmp/x")));
                assert_eq!(args.timeout, Some(90));
            }
            Cmd::Setup(_) => panic!("expected serve"),
        }
    }

    #[test]
    fn test_serve_requires_config() {
        assert!(Cli::try_parse_from(["awsvpnclient", "serve"]).is_err());
    }

    #[test]
    fn test_setup_defaults() {
        let cli = Cli::try_parse_from(["awsvpnclient", "build"]).unwrap();
        match cli.command {
            Cmd::Setup(args) => {
                assert_eq!(args.out, PathBuf::from("."));
                assert_eq!(args.patch, PathBuf::from(setup::DEFAULT_PATCH));
                assert!(args.source.is_none());
            }
            Cmd::Serve(_) => panic!("expected setup"),
        }
    }
}
