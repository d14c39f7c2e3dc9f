//! Batch subcommand - process many files with one pipeline.

use crate::cli::PipelineArgs;
use crate::config::Config as PipelineConfig;
use crate::pipeline::Pipeline;
use beatops_rnn::traits::ActivationModel;
use eyre::{Context, Result, bail};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Default suffix appended to the input file stem
pub const DEFAULT_SUFFIX: &str = ".beats.txt";

/// CLI arguments for processing several files.
#[derive(clap::Args, Clone, Debug, PartialEq)]
pub struct Args {
    /// Input audio files (or activation files with --load)
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output directory (default: next to each input)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Suffix replacing the input extension in output file names
    #[arg(long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,

    /// Stop at the first file that fails
    #[arg(long = "fail-fast")]
    pub fail_fast: bool,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// What to do when one file of a batch fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log the failure, process the remaining files and fail at the end
    #[default]
    Continue,
    /// Return the first failure
    FailFast,
}

/// Resolved configuration for batch processing.
#[derive(Debug)]
pub struct Config {
    pub files: Vec<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub suffix: String,
    pub policy: FailurePolicy,
    pub pipeline: PipelineConfig,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        let policy = if args.fail_fast {
            FailurePolicy::FailFast
        } else {
            FailurePolicy::Continue
        };

        let files = expand_inputs(args.files)?;
        check_outputs(&files, args.output.as_deref(), &args.suffix)?;

        Ok(Self {
            files,
            output_dir: args.output,
            suffix: args.suffix,
            policy,
            pipeline: args.pipeline.try_into()?,
        })
    }
}

/// Expand inputs that do not exist as files but match a glob pattern.
///
/// Matches are sorted; an entry matching nothing, or not a valid pattern, is
/// kept so that it fails like any other unreadable input.
pub fn expand_inputs(files: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::with_capacity(files.len());

    for file in files {
        if file.exists() {
            inputs.push(file);
            continue;
        }

        let pattern = file.to_string_lossy();
        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::debug!(pattern = %pattern, error = %e, "input is not a pattern");
                inputs.push(file);
                continue;
            }
        };
        let mut matches: Vec<PathBuf> = paths
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect();

        if matches.is_empty() {
            inputs.push(file);
        } else {
            matches.sort();
            tracing::debug!(pattern = %pattern, files = matches.len(), "input pattern expanded");
            inputs.append(&mut matches);
        }
    }

    Ok(inputs)
}

/// Output path for `input`: `<dir or input's parent>/<input stem><suffix>`.
pub fn output_path(input: &Path, output_dir: Option<&Path>, suffix: &str) -> PathBuf {
    let dir = output_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let stem = input.file_stem().unwrap_or(input.as_os_str());

    let mut name = stem.to_os_string();
    name.push(suffix);
    dir.join(name)
}

/// Absolute form of `path` for comparison, without touching the filesystem.
fn comparable(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Check that every input gets its own output and no output replaces an input.
///
/// # Errors
///
/// Fails when two inputs map to the same output path, e.g. equal stems in
/// different directories written to one `output_dir`, or when an output
/// path is one of the inputs.
pub fn check_outputs(files: &[PathBuf], output_dir: Option<&Path>, suffix: &str) -> Result<()> {
    let inputs: HashSet<PathBuf> = files.iter().map(|file| comparable(file)).collect();
    let mut outputs: HashMap<PathBuf, &Path> = HashMap::with_capacity(files.len());

    for input in files {
        let output = comparable(&output_path(input, output_dir, suffix));

        if inputs.contains(&output) {
            bail!(
                "output {:?} would overwrite input {:?}",
                output.display(),
                input.display()
            );
        }
        if let Some(previous) = outputs.insert(output.clone(), input) {
            bail!(
                "inputs {:?} and {:?} would both write {:?}",
                previous.display(),
                input.display(),
                output.display()
            );
        }
    }

    Ok(())
}

/// Process one file and write its artifact; the output is only created on success.
fn process_file<M: ActivationModel>(
    pipeline: &mut Pipeline<M>,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let artifact = pipeline
        .process(input)
        .wrap_err_with(|| format!("failed to process {:?}", input.display()))?;

    let mut file = std::fs::File::create(output)
        .wrap_err_with(|| format!("failed to create {:?}", output.display()))?;
    artifact
        .write(&mut file)
        .wrap_err_with(|| format!("failed to write {:?}", output.display()))?;

    Ok(())
}

/// Run `pipeline` over `files` in order, returning the written output paths.
///
/// # Errors
///
/// Output collisions are rejected before any file is processed (see
/// [`check_outputs`]). With [`FailurePolicy::FailFast`] the first failure is
/// returned. With [`FailurePolicy::Continue`] every file is attempted and an
/// error naming the number of failed files is returned at the end.
pub fn run_batch<M: ActivationModel>(
    pipeline: &mut Pipeline<M>,
    files: &[PathBuf],
    output_dir: Option<&Path>,
    suffix: &str,
    policy: FailurePolicy,
) -> Result<Vec<PathBuf>> {
    check_outputs(files, output_dir, suffix)?;

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)
            .wrap_err_with(|| format!("failed to create output directory {:?}", dir.display()))?;
    }

    let mut written = Vec::with_capacity(files.len());
    let mut failed = 0usize;

    for (i, input) in files.iter().enumerate() {
        let output = output_path(input, output_dir, suffix);
        tracing::info!(
            file = i + 1,
            total = files.len(),
            input = ?input.display(),
            output = ?output.display(),
            "processing"
        );

        match process_file(pipeline, input, &output) {
            Ok(()) => written.push(output),
            Err(e) if policy == FailurePolicy::FailFast => return Err(e),
            Err(e) => {
                tracing::error!(input = ?input.display(), error = ?e, "file failed");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} files failed", files.len());
    }

    Ok(written)
}

pub fn execute(config: Config) -> Result<()> {
    config.pipeline.print_if_verbose()?;

    let mut pipeline = Pipeline::from_config(&config.pipeline)?;

    let written = run_batch(
        &mut pipeline,
        &config.files,
        config.output_dir.as_deref(),
        &config.suffix,
        config.policy,
    )?;

    tracing::info!(files = written.len(), "batch completed");

    Ok(())
}
