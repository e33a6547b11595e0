//! Tiangong CLI - one-shot chat and image generation from the command line.

mod cli_args;
pub mod commands;

use anyhow::Result;
use clap::Parser;
use tracing::debug;

use tiangong_config::Config;

pub use cli_args::{Cli, Command};
use commands::{build_chat_client, build_image_client, chat_prompt, run_chat, run_image};

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    initialize_logging(cli.verbose)?;

    let config = Config::load(cli.config.as_deref())?;
    debug!("Configuration loaded");

    let mut stdout = std::io::stdout();
    match &cli.command {
        Command::Chat {
            stream,
            model,
            temperature,
            system,
            prompt,
        } => {
            let client = build_chat_client(&config)?;
            let prompt = chat_prompt(prompt, system.as_deref(), model.as_deref(), *temperature);
            run_chat(&client, &prompt, *stream, &mut stdout).await
        }
        Command::Image { model, prompt } => {
            let client = build_image_client(&config)?;
            run_image(&client, prompt, model.as_deref(), &mut stdout).await
        }
    }
}

fn initialize_logging(verbose: bool) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("{}={}", env!("CARGO_PKG_NAME").replace('-', "_"), level).parse()?)
        .add_directive(format!("tiangong={}", level).parse()?)
        .add_directive(format!("tiangong_config={}", level).parse()?)
        .add_directive(format!("tiangong_providers={}", level).parse()?);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    Ok(())
}
