//! CLI argument parsing: a `clap` derive plus `-v`-count-to-log-level wiring.

use clap::Parser;
use scope_core::config::Config;

/// Scope - real-time interactive video generation server
#[derive(Parser)]
#[command(name = "scope")]
#[command(author = "Scope Contributors")]
#[command(version)]
#[command(about = "Real-time interactive video generation server", long_about = None)]
struct Cli {
    /// Host/address to bind the HTTP control plane to.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind the HTTP control plane to.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Pipeline id to pre-warm at startup.
    #[arg(long)]
    pipeline: Option<String>,

    /// ICE server URL (repeatable). Falls back to public STUN when empty.
    #[arg(long = "ice-server")]
    ice_servers: Vec<String>,

    /// Path to a TOML config file. Defaults to the platform config directory.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more detail: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print version and git commit (if available) and exit.
    #[arg(long)]
    version_info: bool,
}

/// Fully resolved server configuration: CLI flags layered over an
/// optional config file, layered over [`Config::default`].
pub struct ResolvedConfig {
    pub core: Config,
    pub host: String,
    pub port: u16,
    pub verbosity: u8,
    pub print_version_info: bool,
}

/// Parse `std::env::args`, load the config file (if any), and overlay CLI
/// flags on top: config file values first, then any flags the caller
/// actually passed.
pub fn resolve() -> ResolvedConfig {
    let cli = Cli::parse();

    let mut core = match &cli.config {
        Some(path) => scope_core::config::Config::load_from(path).unwrap_or_else(|e| {
            eprintln!("warning: failed to load config from {}: {e}", path.display());
            Config::default()
        }),
        None => Config::load_or_default(),
    };

    if let Some(pipeline) = cli.pipeline {
        core.pipeline_id = pipeline;
    }
    if !cli.ice_servers.is_empty() {
        core.ice_servers = cli.ice_servers;
    }
    if cli.verbose > 0 {
        core.verbose_logging = true;
    }

    ResolvedConfig {
        core,
        host: cli.host,
        port: cli.port,
        verbosity: cli.verbose,
        print_version_info: cli.version_info,
    }
}

/// Build the `tracing_subscriber` `EnvFilter` directive for `-v` count.
pub fn log_level_for_verbosity(verbosity: u8) -> tracing::Level {
    match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

/// `scope-server --version-info` output.
pub fn version_info() -> String {
    let commit = option_env!("SCOPE_GIT_COMMIT")
        .map(str::to_string)
        .or_else(git_commit_hash)
        .unwrap_or_else(|| "unknown".to_string());
    format!("scope-server {} ({})", env!("CARGO_PKG_VERSION"), commit)
}

fn git_commit_hash() -> Option<String> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?;
    let hash = hash.trim();
    if hash.is_empty() {
        None
    } else {
        Some(hash.to_string())
    }
}
