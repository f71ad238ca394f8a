use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kompressor")]
#[command(author, version, about = "Telegram bot that compresses videos, animations and audio", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bot (long polling)
    Run {
        /// Drop updates that queued up while the bot was offline
        #[arg(long)]
        drop_pending: bool,
    },

    /// Check that the configured ffmpeg binary runs and print its version
    CheckEncoder,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_none() {
        let cli = Cli::try_parse_from(["kompressor"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from(["kompressor", "run", "--drop-pending"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Run { drop_pending: true })));
    }

    #[test]
    fn test_check_encoder() {
        let cli = Cli::try_parse_from(["kompressor", "check-encoder"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::CheckEncoder)));
    }
}
