//! MVR Explorer: NZ Motor Vehicle Register query dashboard
//!
//! Main entry point. Loads the MotherDuck credential, opens the Vault and
//! serves the dashboard on a local port.
//!
//! Architecture:
//! ```text
//! Browser (HTML form)
//!     │
//!     ▼
//! HTTP handlers (server) ◄──── view state → query → render
//!     │
//!     └─────► Vault (DuckDB client)
//!               │
//!               ▼
//!             MotherDuck (md:) → MVR table
//! ```

mod query;
mod render;
mod secrets;
mod server;
mod vault;
mod view;

use anyhow::Context;
use clap::Parser;
use log::{error, info};
use query::{validate_table_name, DEFAULT_TABLE};
use secrets::DEFAULT_SECRETS_PATH;
use server::AppState;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use vault::Vault;

#[derive(Parser, Debug)]
#[command(name = "mvr-explorer", version, about = "NZ Motor Vehicle Register query dashboard")]
struct Cli {
    #[arg(long, default_value = DEFAULT_SECRETS_PATH, help = "TOML file holding [motherduck] token")]
    secrets: PathBuf,
    #[arg(long, default_value = "", help = "MotherDuck database (empty for the account default)")]
    database: String,
    #[arg(long, default_value = DEFAULT_TABLE, help = "Table holding the register")]
    table: String,
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,
    #[arg(long, default_value_t = 8501)]
    port: u16,
}

/// Load the credential and connect. The credential is checked before any
/// connection is attempted.
fn open_vault(cli: &Cli) -> anyhow::Result<Vault> {
    validate_table_name(&cli.table).context("Check the --table argument")?;

    let credential = secrets::load_credential(&cli.secrets)
        .context("MotherDuck token not configured")?;
    info!("Loaded MotherDuck credential from {}", cli.secrets.display());

    Vault::connect_motherduck(&credential, &cli.database, &cli.table)
        .context("Could not open the MotherDuck connection")
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let vault = open_vault(&cli)?;
    let state = AppState {
        vault: Arc::new(vault),
        source: Arc::from("MotherDuck cloud database"),
    };
    let addr = SocketAddr::new(cli.bind, cli.port);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime
        .block_on(server::serve(state, addr))
        .with_context(|| format!("Dashboard server on {addr} failed"))
}

/// The diagnostic for a fatal error, cause chain included.
fn fatal_message(result: &anyhow::Result<()>) -> Option<String> {
    result.as_ref().err().map(|e| format!("{:#}", e))
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match fatal_message(&run(cli)) {
        Some(message) => {
            error!("{}", message);
            ExitCode::FAILURE
        }
        None => ExitCode::SUCCESS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("mvr-explorer").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let cli = cli(&[]);
        assert_eq!(cli.secrets, PathBuf::from("secrets.toml"));
        assert_eq!(cli.table, "mvr");
        assert_eq!(cli.database, "");
        assert_eq!(cli.port, 8501);
        assert_eq!(cli.bind, IpAddr::from([127, 0, 0, 1]));
    }

    #[test]
    fn startup_without_secret_file_fails_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("secrets.toml");
        let err = open_vault(&cli(&["--secrets", missing.to_str().unwrap()]))
            .err()
            .unwrap();
        let message = format!("{err:#}");
        assert!(message.contains("MotherDuck token not configured"));
        assert!(message.contains("Secret file not found"));
    }

    #[test]
    fn fatal_message_carries_the_whole_chain_once() {
        assert_eq!(fatal_message(&Ok(())), None);

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("secrets.toml");
        let result = open_vault(&cli(&["--secrets", missing.to_str().unwrap()])).map(|_| ());
        let message = fatal_message(&result).unwrap();
        assert!(message.starts_with("MotherDuck token not configured: "));
        assert_eq!(message.matches("Secret file not found").count(), 1);
    }

    #[test]
    fn startup_with_blank_token_fails_before_connecting() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[motherduck]\ntoken = ''\n").unwrap();
        let err = open_vault(&cli(&["--secrets", file.path().to_str().unwrap()]))
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("is empty"));
    }

    #[test]
    fn bad_table_name_is_rejected_first() {
        let err = open_vault(&cli(&["--table", "mvr;--"])).err().unwrap();
        assert!(format!("{err:#}").contains("Invalid table name"));
    }
}
