mod agent;
mod config;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::agent::Agent;
use crate::config::AgentConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::load_from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("upgent={}", config.log_level).parse()?),
        )
        .init();

    let agent = Agent::new(config)?;
    agent.run().await
}
