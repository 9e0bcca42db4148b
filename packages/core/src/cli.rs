use clap::{Parser, Subcommand};

/// Solana RPC gateway CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "solana-rpc-gateway",
    version,
    about = "Rate-limited, health-ranked Solana RPC pool with a persisted response cache"
)]
pub struct Cli {
    /// Comma-separated upstream RPC endpoints (overrides RPC_ENDPOINTS)
    #[arg(long, global = true)]
    pub endpoints: Option<String>,

    /// HTTP API port (overrides API_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// SQLite database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the HTTP API and the pool maintenance loops (default)
    Serve,
    /// Reinitialise the pool from configured endpoints and run discovery once
    ResetPool,
    /// Probe every endpoint and print the ranked list
    CheckHealth,
    /// Delete expired cache rows and old history
    Cleanup {
        /// Days of history to keep (defaults to RETENTION_DAYS)
        #[arg(long)]
        retention_days: Option<i64>,
    },
    /// Print cache and history statistics as JSON
    ExportStats,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::parse_from(["solana-rpc-gateway"]);
        assert_eq!(cli.command(), Command::Serve);
    }

    #[test]
    fn cleanup_accepts_retention_and_global_overrides() {
        let cli = Cli::parse_from([
            "solana-rpc-gateway",
            "cleanup",
            "--retention-days",
            "3",
            "--database-url",
            "sqlite::memory:",
        ]);
        assert_eq!(
            cli.command(),
            Command::Cleanup {
                retention_days: Some(3)
            }
        );
        assert_eq!(cli.database_url.as_deref(), Some("sqlite::memory:"));
    }

    #[test]
    fn subcommand_names_are_kebab_case() {
        let cli = Cli::parse_from(["solana-rpc-gateway", "--port", "9000", "check-health"]);
        assert_eq!(cli.command(), Command::CheckHealth);
        assert_eq!(cli.port, Some(9000));
        assert!(Cli::try_parse_from(["solana-rpc-gateway", "export-stats"]).is_ok());
        assert!(Cli::try_parse_from(["solana-rpc-gateway", "reset-pool"]).is_ok());
    }
}
