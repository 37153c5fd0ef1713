use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Run or probe Parley protocol agent nodes.
#[derive(Parser)]
#[command(name = "parley", version, about)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a node, discover bootstrap peers and serve until Ctrl-C.
    Run {
        /// Override the listen address from the config.
        #[arg(long)]
        listen: Option<SocketAddr>,
        /// Additional bootstrap peer (repeatable).
        #[arg(long = "bootstrap")]
        bootstrap: Vec<SocketAddr>,
        /// Emit logs as JSON.
        #[arg(long)]
        json_logs: bool,
    },
    /// Run one discovery exchange with a node, print what it offers, exit.
    Discover {
        /// Address of the node to contact.
        addr: SocketAddr,
    },
    /// Check that a node answers on its echo stream.
    Ping {
        /// Address of the node to contact.
        addr: SocketAddr,
    },
    /// Print the resolved configuration.
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_bootstrap() {
        let cli = Cli::parse_from([
            "parley",
            "--config",
            "/tmp/parley.toml",
            "run",
            "--bootstrap",
            "127.0.0.1:7400",
            "--bootstrap",
            "127.0.0.1:7401",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/parley.toml")));
        match cli.command {
            Some(Commands::Run { bootstrap, listen, .. }) => {
                assert_eq!(bootstrap.len(), 2);
                assert!(listen.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_discover() {
        let cli = Cli::parse_from(["parley", "discover", "10.0.0.2:7400"]);
        assert!(matches!(cli.command, Some(Commands::Discover { .. })));
    }

    #[test]
    fn test_bad_address_rejected() {
        assert!(Cli::try_parse_from(["parley", "ping", "nowhere"]).is_err());
    }
}
