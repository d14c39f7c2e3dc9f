//! Evaluate subcommand - compare detected beats with annotations.
//!
//! Detection and annotation files are paired by name: each file's extension
//! is stripped and the remaining names must be equal, so `song.beats.txt`
//! pairs with `song.beats` under the default extensions.

use crate::batch::DEFAULT_SUFFIX;
use beatops_rnn::evaluation::{DEFAULT_WINDOW, MeanEvaluation, SimpleEvaluation, evaluate_events};
use beatops_rnn::events::load_events;
use eyre::{Context, Result, bail, ensure};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default extension of annotation files
pub const DEFAULT_ANNOTATION_EXT: &str = ".beats";

/// CLI arguments for evaluation.
#[derive(clap::Args, Clone, Debug, PartialEq)]
pub struct Args {
    /// Files or directories with detected beat times
    #[arg(required = true)]
    pub detections: Vec<PathBuf>,

    /// Files or directories with annotated beat times [default: the detection paths]
    #[arg(short, long, num_args = 1.., value_name = "PATH")]
    pub annotations: Vec<PathBuf>,

    /// Extension of detection files
    #[arg(long = "det-ext", default_value = DEFAULT_SUFFIX, value_name = "EXT")]
    pub det_ext: String,

    /// Extension of annotation files
    #[arg(long = "ann-ext", default_value = DEFAULT_ANNOTATION_EXT, value_name = "EXT")]
    pub ann_ext: String,

    /// Tolerance in seconds for a detection to count as correct
    #[arg(long, default_value_t = DEFAULT_WINDOW, value_name = "SECS")]
    pub window: f64,
}

/// Resolved configuration for evaluation.
#[derive(Debug)]
pub struct Config {
    /// Detection file with its annotation file, in detection order
    pub pairs: Vec<(PathBuf, PathBuf)>,
    pub window: f64,
}

impl TryFrom<Args> for Config {
    type Error = eyre::Error;

    fn try_from(args: Args) -> Result<Self> {
        ensure!(
            args.window > 0.0,
            "evaluation window must be positive, got {}",
            args.window
        );

        let detections = collect_files(&args.detections, &args.det_ext)?;
        ensure!(
            !detections.is_empty(),
            "no detection files ending in {:?} found",
            args.det_ext
        );

        let annotation_paths = if args.annotations.is_empty() {
            &args.detections
        } else {
            &args.annotations
        };
        let annotations = collect_files(annotation_paths, &args.ann_ext)?;

        Ok(Self {
            pairs: match_files(&detections, &annotations, &args.det_ext, &args.ann_ext)?,
            window: args.window,
        })
    }
}

/// File name of `path` without `ext`, or `None` when it does not end in `ext`.
fn match_key<'p>(path: &'p Path, ext: &str) -> Option<&'p str> {
    path.file_name()?.to_str()?.strip_suffix(ext)
}

/// Files named by `paths` that end in `ext`; directories contribute their
/// entries (not recursively) in sorted order.
pub fn collect_files(paths: &[PathBuf], ext: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            let mut entries = std::fs::read_dir(path)
                .and_then(|dir| {
                    dir.map(|entry| entry.map(|e| e.path()))
                        .collect::<std::io::Result<Vec<_>>>()
                })
                .wrap_err_with(|| format!("failed to list {:?}", path.display()))?;
            entries.retain(|entry| entry.is_file() && match_key(entry, ext).is_some());
            entries.sort();
            files.append(&mut entries);
        } else if match_key(path, ext).is_some() {
            files.push(path.clone());
        }
    }

    Ok(files)
}

/// Pair each detection file with the annotation file of the same name.
///
/// # Errors
///
/// Fails when a detection has no annotation or more than one.
pub fn match_files(
    detections: &[PathBuf],
    annotations: &[PathBuf],
    det_ext: &str,
    ann_ext: &str,
) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut pairs = Vec::with_capacity(detections.len());

    for detection in detections {
        let key = match_key(detection, det_ext);
        let mut matches = annotations.iter().filter(|annotation| {
            *annotation != detection && match_key(annotation, ann_ext) == key
        });

        match (matches.next(), matches.next()) {
            (Some(annotation), None) => pairs.push((detection.clone(), annotation.clone())),
            (None, _) => bail!("no annotations found for {:?}", detection.display()),
            (Some(first), Some(second)) => bail!(
                "several annotations match {:?}: {:?} and {:?}",
                detection.display(),
                first.display(),
                second.display()
            ),
        }
    }

    Ok(pairs)
}

/// Load both event files and match them within `window` seconds.
pub fn evaluate_files(
    detections: &Path,
    annotations: &Path,
    window: f64,
) -> Result<SimpleEvaluation> {
    let detected = load_events(detections)
        .wrap_err_with(|| format!("failed to load detections {:?}", detections.display()))?;
    let annotated = load_events(annotations)
        .wrap_err_with(|| format!("failed to load annotations {:?}", annotations.display()))?;

    Ok(evaluate_events(&detected, &annotated, window))
}

/// Per-file evaluations with their sum and mean.
#[derive(Debug, Default)]
pub struct Report {
    pub files: Vec<(PathBuf, SimpleEvaluation)>,
    pub sum: SimpleEvaluation,
    pub mean: MeanEvaluation,
}

impl Report {
    /// Evaluate every pair in order.
    pub fn evaluate(pairs: &[(PathBuf, PathBuf)], window: f64) -> Result<Self> {
        let mut report = Self::default();

        for (detections, annotations) in pairs {
            let evaluation = evaluate_files(detections, annotations, window)?;
            tracing::debug!(
                detections = ?detections.display(),
                annotations = ?annotations.display(),
                fmeasure = evaluation.fmeasure(),
                "file evaluated"
            );

            report.sum.merge(&evaluation);
            report.mean.push(evaluation.clone());
            report.files.push((detections.clone(), evaluation));
        }

        Ok(report)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (path, evaluation) in &self.files {
            writeln!(f, "{}", path.display())?;
            writeln!(f, "{evaluation}")?;
        }
        writeln!(f, "sum for {} files:", self.files.len())?;
        writeln!(f, "{}", self.sum)?;
        writeln!(f, "mean for {} files:", self.files.len())?;
        write!(f, "{}", self.mean)
    }
}

pub fn execute(config: Config) -> Result<()> {
    let report = Report::evaluate(&config.pairs, config.window)?;

    println!("{report}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    fn resolve(tokens: &[&str]) -> Result<Config> {
        let tokens = ["beat-detector", "evaluate"].iter().chain(tokens);
        match Cli::parse_from(tokens).command {
            Commands::Evaluate(args) => Config::try_from(args),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    fn path(dir: &Path) -> &str {
        dir.to_str().unwrap()
    }

    #[test]
    fn evaluates_event_files() {
        let dir = tempfile::tempdir().unwrap();
        let detections = dir.path().join("song.beats.txt");
        let annotations = dir.path().join("song.beats");
        std::fs::write(&detections, "0.500\n1.010\n1.700\n").unwrap();
        std::fs::write(&annotations, "# annotated\n0.5 1\n1.0 2\n1.5 3\n").unwrap();

        let eval = evaluate_files(&detections, &annotations, DEFAULT_WINDOW).unwrap();

        assert_eq!((eval.tp, eval.fp, eval.fn_), (2, 1, 1));
    }

    #[test]
    fn missing_file_names_it() {
        let err = evaluate_files(
            Path::new("/nonexistent/det.txt"),
            Path::new("/nonexistent/ann.txt"),
            DEFAULT_WINDOW,
        )
        .unwrap_err();

        assert!(format!("{err}").contains("det.txt"));
    }

    #[test]
    fn rejects_non_positive_window() {
        let err = resolve(&["song.beats.txt", "--window", "0"]).unwrap_err();

        assert!(err.to_string().contains("window"));
    }

    #[test]
    fn pairs_directories_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let det = dir.path().join("det");
        let ann = dir.path().join("ann");
        std::fs::create_dir_all(&det).unwrap();
        std::fs::create_dir_all(&ann).unwrap();
        for name in ["b", "a"] {
            std::fs::write(det.join(format!("{name}.beats.txt")), "0.5\n").unwrap();
            std::fs::write(ann.join(format!("{name}.beats")), "0.5\n").unwrap();
        }
        std::fs::write(det.join("notes.md"), "").unwrap();

        let config = resolve(&[path(&det), "-a", path(&ann)]).unwrap();

        assert_eq!(
            config.pairs,
            vec![
                (det.join("a.beats.txt"), ann.join("a.beats")),
                (det.join("b.beats.txt"), ann.join("b.beats")),
            ]
        );
    }

    #[test]
    fn annotations_default_to_detection_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("song.beats.txt"), "0.5\n").unwrap();
        std::fs::write(dir.path().join("song.beats"), "0.5\n").unwrap();

        let config = resolve(&[path(dir.path())]).unwrap();

        assert_eq!(
            config.pairs,
            vec![(dir.path().join("song.beats.txt"), dir.path().join("song.beats"))]
        );
    }

    #[test]
    fn custom_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let det = dir.path().join("song.det");
        let ann = dir.path().join("song.txt");
        std::fs::write(&det, "0.5\n").unwrap();
        std::fs::write(&ann, "0.5\n").unwrap();

        let config = resolve(&[
            path(&det),
            "-a",
            path(&ann),
            "--det-ext",
            ".det",
            "--ann-ext",
            ".txt",
        ])
        .unwrap();

        assert_eq!(config.pairs, vec![(det, ann)]);
    }

    #[test]
    fn detection_without_annotation_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("song.beats.txt"), "0.5\n").unwrap();
        std::fs::write(dir.path().join("other.beats"), "0.5\n").unwrap();

        let err = resolve(&[path(dir.path())]).unwrap_err();

        assert!(err.to_string().contains("no annotations found"), "{err}");
    }

    #[test]
    fn ambiguous_annotations_fail() {
        let dir = tempfile::tempdir().unwrap();
        let det = dir.path().join("song.beats.txt");
        std::fs::write(&det, "0.5\n").unwrap();
        for sub in ["x", "y"] {
            std::fs::create_dir(dir.path().join(sub)).unwrap();
            std::fs::write(dir.path().join(sub).join("song.beats"), "0.5\n").unwrap();
        }

        let x = dir.path().join("x");
        let y = dir.path().join("y");
        let err = resolve(&[path(&det), "-a", path(&x), path(&y)]).unwrap_err();

        assert!(err.to_string().contains("several annotations"), "{err}");
    }

    #[test]
    fn no_detection_files_fails() {
        let dir = tempfile::tempdir().unwrap();

        assert!(resolve(&[path(dir.path())]).is_err());
    }

    #[test]
    fn report_sums_and_averages_files() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, text: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, text).unwrap();
            path
        };
        let pairs = vec![
            (
                write("a.beats.txt", "0.5\n1.0\n1.5\n"),
                write("a.beats", "0.5\n1.0\n1.5\n"),
            ),
            (write("b.beats.txt", ""), write("b.beats", "2.0\n")),
        ];

        let report = Report::evaluate(&pairs, DEFAULT_WINDOW).unwrap();

        assert_eq!(report.files.len(), 2);
        assert_eq!((report.sum.tp, report.sum.fp, report.sum.fn_), (3, 0, 1));
        assert!((report.mean.fmeasure() - 0.5).abs() < 1e-12);

        let text = report.to_string();
        assert!(text.contains("sum for 2 files:\n"), "{text}");
        assert!(text.contains("mean for 2 files:\n"), "{text}");
        assert!(text.contains("p=1.000 r=0.750"), "{text}");
    }
}
