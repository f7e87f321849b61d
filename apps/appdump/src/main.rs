//! appdump entry point.

mod app;
mod cli;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();

    let mut config = config::Config::load(cli.config.as_deref())?;
    config.apply_cli(&cli);
    tracing::debug!(?config, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    let report = match rt.block_on(app::run(config, cli)) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    };

    println!("dumped to {}", report.app_dir.display());
    for child in &report.children {
        if let Some(error) = &child.error {
            println!("  child {} skipped: {error}", child.pid);
        }
    }
    Ok(())
}
