use clap::{Args, Parser, Subcommand};

/// tokenq: token issuing and interaction queue service
#[derive(Parser)]
#[command(name = "tokenq", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to TOKENQ_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Create the token and interaction collections if missing
    Setup,

    /// Inspect and administer tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Inspect the interaction queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Print a single token as JSON
    Get { id: String },

    /// Delete one or more tokens
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// List a page of tokens
    List(ListArgs),
}

#[derive(Args)]
pub struct ListArgs {
    /// Display index to start at; negative counts from the end
    #[arg(long, allow_hyphen_values = true, conflicts_with_all = ["start_id", "end_id"])]
    pub offset: Option<i64>,

    /// First token of the page
    #[arg(long, conflicts_with = "end_id")]
    pub start_id: Option<String>,

    /// Last token of the page
    #[arg(long)]
    pub end_id: Option<String>,

    #[arg(short, long, default_value = "10")]
    pub count: usize,

    /// List oldest tokens first
    #[arg(long)]
    pub oldest_first: bool,
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Number of interactions in `new` or `waiting`
    Size,

    /// Interactions claimed by a generator, oldest deposit first
    Waiting {
        /// Only interactions deposited at or after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_offset_parses() {
        let cli = Cli::try_parse_from(["tokenq", "token", "list", "--offset", "-1", "--count", "3"])
            .unwrap();
        match cli.command {
            Some(Commands::Token {
                command: TokenCommands::List(args),
            }) => {
                assert_eq!(args.offset, Some(-1));
                assert_eq!(args.count, 3);
                assert!(!args.oldest_first);
            }
            _ => panic!("expected token list"),
        }
    }

    #[test]
    fn test_addressing_flags_conflict() {
        assert!(Cli::try_parse_from(["tokenq", "token", "list", "--offset", "0", "--start-id", "A"]).is_err());
    }
}
