//! CLI argument parsing for Tiangong.

use clap::{Parser, Subcommand};

#[derive(Parser, Clone, Debug)]
#[command(name = "tiangong")]
#[command(about = "Chat with and generate images from Skywork Tiangong models")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug, PartialEq)]
pub enum Command {
    /// Send a prompt to the chat model
    Chat {
        /// Print the answer as it streams in
        #[arg(long)]
        stream: bool,

        /// Override the configured chat model
        #[arg(long, value_name = "MODEL")]
        model: Option<String>,

        /// Override the configured sampling temperature
        #[arg(long, value_name = "T")]
        temperature: Option<f32>,

        /// Optional system message sent before the prompt
        #[arg(long, value_name = "TEXT")]
        system: Option<String>,

        /// The user prompt
        prompt: String,
    },

    /// Generate an image and print its URL
    Image {
        /// Override the configured image model
        #[arg(long, value_name = "MODEL")]
        model: Option<String>,

        /// Description of the image
        prompt: String,
    },
}
