//! CLI module for Knot
//!
//! Provides commands:
//! - `serve`: Start the terminal server
//! - `hash-token`: Print the SHA-256 digest to configure a token with

use clap::{Parser, Subcommand};
use knot_core::AuthStore;

/// Knot terminal server CLI
#[derive(Parser, Debug)]
#[command(name = "knot")]
#[command(about = "Persistent remote terminal sessions over WebSocket")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server
    Serve,
    /// Print the digest of a token for `[[auth.tokens]]`
    HashToken {
        /// Raw token a client will present
        token: String,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve) => crate::server::run().await,
        Some(Commands::HashToken { token }) => {
            if token.is_empty() {
                anyhow::bail!("token must not be empty");
            }
            println!("{}", hash_token(&token));
            Ok(())
        }
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn hash_token(token: &str) -> String {
    AuthStore::hash_to_hex(&AuthStore::hash_token(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hash_token() {
        let cli = Cli::try_parse_from(["knot", "hash-token", "s3cret"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::HashToken { token }) if token == "s3cret"));
    }

    #[test]
    fn test_parse_serve_and_none() {
        let cli = Cli::try_parse_from(["knot", "serve"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve)));

        let cli = Cli::try_parse_from(["knot"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_hash_token_matches_store() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
