//! Single subcommand - process one file.

use crate::cli::PipelineArgs;
use crate::config::Config as PipelineConfig;
use crate::pipeline::Pipeline;
use eyre::{Context, Result};
use std::path::PathBuf;
use std::time::Instant;

/// CLI arguments for processing one file.
#[derive(clap::Args, Clone, Debug, PartialEq)]
pub struct Args {
    /// Input audio file (or activation file with --load)
    pub infile: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// Resolved configuration for processing one file.
#[derive(Debug)]
pub struct Config {
    pub infile: PathBuf,
    pub output: Option<PathBuf>,
    pub pipeline: PipelineConfig,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        Ok(Self {
            infile: args.infile,
            output: args.output,
            pipeline: args.pipeline.try_into()?,
        })
    }
}

pub fn execute(config: Config) -> Result<()> {
    config.pipeline.print_if_verbose()?;

    let mut pipeline = Pipeline::from_config(&config.pipeline)?;

    tracing::info!(input = ?config.infile.display(), "processing");
    let s = Instant::now();

    let artifact = pipeline
        .process(&config.infile)
        .wrap_err_with(|| format!("failed to process {:?}", config.infile.display()))?;

    tracing::info!(
        duration = %format!("{:.2}s", s.elapsed().as_secs_f32()),
        "processing completed"
    );

    match &config.output {
        Some(output) => {
            let mut file = std::fs::File::create(output)
                .wrap_err_with(|| format!("failed to create {:?}", output.display()))?;
            artifact
                .write(&mut file)
                .wrap_err_with(|| format!("failed to write {:?}", output.display()))?;
        }
        None => artifact
            .write(&mut std::io::stdout().lock())
            .wrap_err("failed to write to stdout")?,
    }

    Ok(())
}
