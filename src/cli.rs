use std::path::PathBuf;

use clap::Parser;

/// vLLM Gateway: routing and load balancing for vLLM fleets
#[derive(Parser)]
#[command(name = "vllm-gateway", version, about)]
pub struct Cli {
    /// Path to the hosts/settings configuration file
    #[arg(long, env = "VLLM_GATEWAY_CONFIG", default_value = "config.yml")]
    pub config: PathBuf,

    /// Path to the groups/tokens secrets file
    #[arg(long, env = "VLLM_GATEWAY_SECRETS", default_value = "secrets.yml")]
    pub secrets: PathBuf,

    /// Port to bind
    #[arg(short, long, default_value = "9000")]
    pub port: u16,
}
