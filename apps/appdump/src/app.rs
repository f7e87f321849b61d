//! One dump run against the configured bridge.

use appdump_bridge::BridgeDevice;
use appdump_session::{DumpOptions, DumpOrchestrator, DumpReport};

use crate::cli::Cli;
use crate::config::Config;

pub fn dump_options(config: &Config, cli: &Cli, agent_source: String) -> DumpOptions {
    let mut options = DumpOptions::new(cli.identifier.clone(), config.output_dir.clone(), agent_source);
    options.force = cli.force;
    options.bypass_service = config.bypass_service.clone();
    options.ops = config.ops.clone();
    options
}

pub async fn run(config: Config, cli: Cli) -> anyhow::Result<DumpReport> {
    let agent_source = std::fs::read_to_string(&config.agent_script).map_err(|e| {
        anyhow::anyhow!(
            "reading agent script {}: {e}",
            config.agent_script.display()
        )
    })?;

    let device = BridgeDevice::connect(&config.bridge_url).await?;
    tracing::info!(url = %config.bridge_url, "connected to bridge");

    let options = dump_options(&config, &cli, agent_source);
    let mut orchestrator = DumpOrchestrator::new(&device, options);
    let report = orchestrator.run().await?;

    device.client().close().await;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn options_combine_config_and_flags() {
        let mut config = Config::default();
        config.output_dir = PathBuf::from("/dumps");
        config.bypass_service = "launchd".into();
        config.ops.root = "bundleRoot".into();
        let cli = Cli::parse_from(["appdump", "com.example.app", "-f"]);

        let options = dump_options(&config, &cli, "agent".into());
        assert_eq!(options.identifier, "com.example.app");
        assert!(options.force);
        assert_eq!(options.bypass_service, "launchd");
        assert_eq!(options.ops.root, "bundleRoot");
        assert_eq!(options.app_dir(), PathBuf::from("/dumps/com.example.app"));
    }

    #[tokio::test]
    async fn missing_agent_script_fails_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.agent_script = dir.path().join("missing.js");
        config.bridge_url = "ws://127.0.0.1:1/never".into();
        let cli = Cli::parse_from(["appdump", "com.example.app"]);

        let err = run(config, cli).await.unwrap_err();
        assert!(err.to_string().contains("missing.js"));
    }
}
