use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Dump a decrypted application bundle from an instrumented device"
)]
pub struct Cli {
    /// Bundle identifier of the application to dump
    pub identifier: String,

    /// Output directory (overrides `output_dir` from the config file)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Replace an existing dump of the same application
    #[arg(short, long)]
    pub force: bool,

    /// Bridge WebSocket URL (overrides `bridge_url`)
    #[arg(long)]
    pub bridge: Option<String>,

    /// Agent script (overrides `agent_script`)
    #[arg(long)]
    pub agent: Option<PathBuf>,

    /// Configuration file to use instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_flags() {
        let cli = Cli::parse_from(["appdump", "com.example.app", "-o", "out", "-f"]);
        assert_eq!(cli.identifier, "com.example.app");
        assert_eq!(cli.output, Some(PathBuf::from("out")));
        assert!(cli.force);
        assert!(cli.config.is_none());
    }

    #[test]
    fn identifier_is_required() {
        assert!(Cli::try_parse_from(["appdump", "--force"]).is_err());
    }
}
