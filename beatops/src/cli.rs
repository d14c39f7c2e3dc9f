//! CLI argument definitions using clap.

use beatops_rnn::activations::ActivationsConfig;
use beatops_rnn::audio::SignalConfig;
use beatops_rnn::beats::BeatConfig;
use beatops_rnn::filterbank::FilterConfig;
use beatops_rnn::rnn::RnnConfig;
use beatops_rnn::spectrogram::{DiffConfig, FramingConfig, LogConfig};
use beatops_rnn::tempo::TempoConfig;
use clap::{Parser, Subcommand};
use eyre::Result;

/// Version string reported by `--version`
pub const VERSION: &str = "BeatDetector.2014";

#[derive(Debug, Parser, PartialEq)]
#[command(name = "beat-detector")]
#[command(about = "Detect beats in audio with an ensemble of recurrent neural networks")]
#[command(version = VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand, PartialEq)]
pub enum Commands {
    /// Process one file and write the result to a file or stdout
    Single(crate::single::Args),

    /// Process several files, writing one output file per input
    Batch(crate::batch::Args),

    /// Compare detected beats with annotations
    Evaluate(crate::evaluate::Args),
}

/// Options shared by every pipeline-running subcommand.
#[derive(clap::Args, Clone, Debug, PartialEq)]
pub struct PipelineArgs {
    /// Treat the input as saved activations instead of audio
    #[arg(long, conflicts_with = "save")]
    pub load: bool,

    /// Save the activations instead of detecting beats
    #[arg(long)]
    pub save: bool,

    /// Print the resolved configuration before processing
    #[arg(short, long)]
    pub verbose: bool,

    #[command(flatten, next_help_heading = "Activations")]
    pub activations: ActivationsConfig,

    #[command(flatten, next_help_heading = "Signal")]
    pub signal: SignalConfig,

    #[command(flatten, next_help_heading = "Framing")]
    pub framing: FramingConfig,

    #[command(flatten, next_help_heading = "Filterbank")]
    pub filter: FilterConfig,

    #[command(flatten, next_help_heading = "Logarithm")]
    pub log: LogConfig,

    #[command(flatten, next_help_heading = "Difference")]
    pub diff: DiffConfig,

    #[command(flatten, next_help_heading = "Network")]
    pub rnn: RnnConfig,

    #[command(flatten, next_help_heading = "Tempo")]
    pub tempo: TempoConfig,

    #[command(flatten, next_help_heading = "Beats")]
    pub beats: BeatConfig,
}

/// Execute CLI command - separated for testing.
pub fn run(cli: Cli) -> Result<()> {
    tracing::debug!(?cli, "parsed arguments");

    match cli.command {
        Commands::Single(args) => crate::single::execute(args.try_into()?),
        Commands::Batch(args) => crate::batch::execute(args.try_into()?),
        Commands::Evaluate(args) => crate::evaluate::execute(args.try_into()?),
    }
}
