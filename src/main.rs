use std::path::PathBuf;

use clap::Parser;
use itt_qwen::app::StartupOptions;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Settings file (defaults to $XDG_CONFIG_HOME/itt-qwen/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL of the Ollama server
    #[arg(long)]
    host: Option<String>,

    /// Vision-language model to query
    #[arg(long)]
    model: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let options = StartupOptions {
        config_path: args.config,
        host: args.host,
        model: args.model,
    };
    itt_qwen::run(&options)?;
    Ok(())
}
