use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use config::ReasoningEffort;

/// A local gateway exposing OpenAI, Anthropic, and Ollama dialects over a
/// ChatGPT-style Responses upstream.
#[derive(Debug, Parser)]
#[command(name = "relay", version, about)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "RELAY_CONFIG", default_value = "relay.toml")]
    pub config: PathBuf,

    /// Address to listen on, overriding the configuration.
    #[arg(short, long, env = "RELAY_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Log filter, e.g. "info" or "gateway=debug,server=debug".
    #[arg(long, env = "RELAY_LOG", default_value = "info")]
    pub log: String,

    /// Log request and response payloads at debug level.
    #[arg(long)]
    pub verbose: bool,

    /// Reasoning effort override: minimal, low, medium, high, or xhigh.
    #[arg(long, env = "RELAY_REASONING_EFFORT", value_parser = parse_effort)]
    pub reasoning_effort: Option<ReasoningEffort>,
}

fn parse_effort(value: &str) -> Result<ReasoningEffort, String> {
    ReasoningEffort::parse(value)
        .ok_or_else(|| format!("invalid reasoning effort '{value}', expected minimal, low, medium, high, or xhigh"))
}
