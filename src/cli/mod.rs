use crate::network::{NetAddress, PublicKey};
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hostcheck")]
#[command(about = "Troubleshoot reachability and configuration of storage network hosts")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevelArg>,

    /// Upper bound on a whole host test, in seconds
    #[arg(short, long, global = true)]
    pub timeout: Option<u64>,

    #[arg(long, global = true)]
    pub json: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Test every endpoint of a host")]
    Test {
        /// Host identity, e.g. ed25519:<64 hex chars>
        public_key: PublicKey,
        /// Endpoints as <host:port>/<protocol>
        #[arg(required = true)]
        addresses: Vec<NetAddress>,
        /// Explorer API used for the chain tip
        #[arg(long)]
        explorer: Option<String>,
        #[arg(long, env = "HOSTCHECK_EXPLORER_PASSWORD", hide_env_values = true)]
        explorer_password: Option<String>,
    },
    #[command(about = "Resolve a hostname the way host tests do")]
    Resolve {
        hostname: String,
        /// Fallback DNS server
        #[arg(short, long)]
        server: Option<SocketAddr>,
        /// Skip the system resolver and query the fallback server directly
        #[arg(long)]
        direct: bool,
    },
    #[command(about = "Compare two release versions")]
    Version { current: String, latest: String },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevelArg {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevelArg::Error => log::LevelFilter::Error,
            LogLevelArg::Warn => log::LevelFilter::Warn,
            LogLevelArg::Info => log::LevelFilter::Info,
            LogLevelArg::Debug => log::LevelFilter::Debug,
            LogLevelArg::Trace => log::LevelFilter::Trace,
        }
    }
}

impl Cli {
    pub fn log_filter(&self) -> log::LevelFilter {
        match (self.log_level, self.verbose) {
            (Some(level), _) => level.to_filter(),
            (None, true) => log::LevelFilter::Info,
            (None, false) => log::LevelFilter::Warn,
        }
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use crate::network::Protocol;

    #[test]
    fn test_parse_test_command() {
        let key = format!("ed25519:{}", "ab".repeat(32));
        let cli = Cli::try_parse_from([
            "hostcheck",
            "test",
            &key,
            "good.example:9984/siamux",
            "good.example:9984/quic",
            "--json",
        ])
        .unwrap();

        assert!(cli.json);
        match cli.command {
            Commands::Test { addresses, .. } => {
                assert_eq!(addresses.len(), 2);
                assert_eq!(addresses[1].protocol, Protocol::Quic);
            }
            _ => panic!("expected test command"),
        }
    }

    #[test]
    fn test_rejects_bad_arguments() {
        let key = format!("ed25519:{}", "ab".repeat(32));
        assert!(Cli::try_parse_from(["hostcheck", "test", &key]).is_err());
        assert!(Cli::try_parse_from(["hostcheck", "test", &key, "host:1/ftp"]).is_err());
        assert!(Cli::try_parse_from(["hostcheck", "test", "abc", "host:1/quic"]).is_err());
    }

    #[test]
    fn test_log_filter() {
        let cli = Cli::try_parse_from(["hostcheck", "version", "v1.0.0", "v1.0.1"]).unwrap();
        assert_eq!(cli.log_filter(), log::LevelFilter::Warn);

        let cli = Cli::try_parse_from(["hostcheck", "-v", "version", "v1.0.0", "v1.0.1"]).unwrap();
        assert_eq!(cli.log_filter(), log::LevelFilter::Info);

        let cli = Cli::try_parse_from([
            "hostcheck",
            "--log-level",
            "debug",
            "resolve",
            "example.com",
        ])
        .unwrap();
        assert_eq!(cli.log_filter(), log::LevelFilter::Debug);
    }
}
