//! Configuration types for resolved CLI arguments.
//!
//! [`Config`] is resolved once from [`PipelineArgs`] via TryFrom. The input
//! and output choices become tagged variants, each holding only the stage
//! configurations that its chain needs.

use crate::cli::PipelineArgs;
use beatops_rnn::activations::ActivationsFormat;
use beatops_rnn::audio::SignalConfig;
use beatops_rnn::beats::BeatConfig;
use beatops_rnn::error::ConfigError;
use beatops_rnn::filterbank::FilterConfig;
use beatops_rnn::rnn::RnnConfig;
use beatops_rnn::spectrogram::{DiffConfig, FramingConfig, LogConfig};
use beatops_rnn::tempo::TempoConfig;
use eyre::Result;
use serde::Serialize;

/// Stage configurations for computing activations from audio.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AudioConfig {
    pub signal: SignalConfig,
    pub framing: FramingConfig,
    pub filter: FilterConfig,
    pub log: LogConfig,
    pub diff: DiffConfig,
    pub rnn: RnnConfig,
}

/// Where the activations come from.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "mode")]
pub enum InputMode {
    /// Decode audio and run the networks
    FromAudio(AudioConfig),
    /// Read activations saved by an earlier run
    FromActivationFile { format: ActivationsFormat, fps: f32 },
}

/// What is written for every input.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "mode")]
pub enum OutputMode {
    /// Save the activations
    ToActivationFile { format: ActivationsFormat },
    /// Detect beats and write their times
    ToBeatTimestamps { tempo: TempoConfig, beats: BeatConfig },
}

/// Resolved pipeline configuration.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Config {
    pub input: InputMode,
    pub output: OutputMode,
    #[serde(skip)]
    pub verbose: bool,
}

impl Config {
    /// Print the configuration as JSON when verbose output was requested.
    pub fn print_if_verbose(&self) -> Result<()> {
        if self.verbose {
            println!("{}", serde_json::to_string_pretty(self)?);
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> eyre::Error {
    beatops_rnn::error::Error::from(ConfigError::InvalidValue {
        name,
        reason: reason.into(),
    })
    .into()
}

fn validate(args: &PipelineArgs) -> Result<()> {
    if !(args.framing.fps > 0.0) {
        return Err(invalid("fps", format!("{} is not positive", args.framing.fps)));
    }
    if args.framing.frame_sizes.is_empty() {
        return Err(invalid("frame-size", "at least one frame size is required"));
    }
    if args.framing.frame_sizes.contains(&0) {
        return Err(invalid("frame-size", "frame sizes must be positive"));
    }
    if !(args.filter.fmin > 0.0 && args.filter.fmin < args.filter.fmax) {
        return Err(invalid(
            "fmin",
            format!(
                "need 0 < fmin < fmax, got fmin={} fmax={}",
                args.filter.fmin, args.filter.fmax
            ),
        ));
    }
    if args.filter.bands == 0 {
        return Err(invalid("bands", "at least one band per octave is required"));
    }
    if !(args.tempo.min_bpm > 0.0 && args.tempo.min_bpm < args.tempo.max_bpm) {
        return Err(invalid(
            "min-bpm",
            format!(
                "need 0 < min-bpm < max-bpm, got min-bpm={} max-bpm={}",
                args.tempo.min_bpm, args.tempo.max_bpm
            ),
        ));
    }
    if !(0.0..1.0).contains(&args.diff.diff_ratio) {
        return Err(invalid("diff-ratio", format!("{} is not in [0, 1)", args.diff.diff_ratio)));
    }
    if !(0.0..1.0).contains(&args.tempo.alpha) {
        return Err(invalid("alpha", format!("{} is not in [0, 1)", args.tempo.alpha)));
    }
    if !(0.0..1.0).contains(&args.beats.look_aside) {
        return Err(invalid(
            "look-aside",
            format!("{} is not in [0, 1)", args.beats.look_aside),
        ));
    }
    if let Some(look_ahead) = args.beats.look_ahead
        && !(look_ahead > 0.0)
    {
        return Err(invalid("look-ahead", format!("{look_ahead} is not positive")));
    }

    Ok(())
}

impl TryFrom<PipelineArgs> for Config {
    type Error = eyre::Error;

    fn try_from(args: PipelineArgs) -> Result<Self> {
        validate(&args)?;

        let format = ActivationsFormat::from(&args.activations);

        let input = if args.load {
            InputMode::FromActivationFile {
                format: format.clone(),
                fps: args.framing.fps,
            }
        } else {
            InputMode::FromAudio(AudioConfig {
                signal: args.signal,
                framing: args.framing,
                filter: args.filter,
                log: args.log,
                diff: args.diff,
                rnn: args.rnn,
            })
        };

        let output = if args.save {
            OutputMode::ToActivationFile { format }
        } else {
            OutputMode::ToBeatTimestamps {
                tempo: args.tempo,
                beats: args.beats,
            }
        };

        Ok(Self {
            input,
            output,
            verbose: args.verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use beatops_rnn::error::Error;
    use clap::Parser;

    fn parse(extra: &[&str]) -> PipelineArgs {
        let tokens = ["beat-detector", "single", "input"]
            .into_iter()
            .chain(extra.iter().copied());
        match Cli::parse_from(tokens).command {
            Commands::Single(args) => args.pipeline,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    fn resolve(extra: &[&str]) -> Result<Config> {
        Config::try_from(parse(extra))
    }

    fn assert_invalid(extra: &[&str], option: &str) {
        let err = resolve(extra).unwrap_err();
        match err.downcast_ref::<Error>() {
            Some(Error::Config(ConfigError::InvalidValue { name, .. })) => {
                assert_eq!(*name, option)
            }
            _ => panic!("expected invalid {option}, got {err:?}"),
        }
    }

    #[test]
    fn defaults_compute_and_detect() {
        let config = resolve(&[]).unwrap();

        assert!(matches!(config.input, InputMode::FromAudio(_)));
        assert!(matches!(config.output, OutputMode::ToBeatTimestamps { .. }));
    }

    #[test]
    fn load_selects_activation_file_input() {
        let config = resolve(&["--load", "--fps", "50"]).unwrap();

        assert_eq!(
            config.input,
            InputMode::FromActivationFile {
                format: ActivationsFormat::Npy,
                fps: 50.0
            }
        );
        assert!(matches!(config.output, OutputMode::ToBeatTimestamps { .. }));
    }

    #[test]
    fn save_with_separator_selects_text_output() {
        let config = resolve(&["--save", "--sep", " "]).unwrap();

        assert!(matches!(config.input, InputMode::FromAudio(_)));
        assert_eq!(
            config.output,
            OutputMode::ToActivationFile {
                format: ActivationsFormat::Text { sep: " ".to_string() }
            }
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert_invalid(&["--fps", "0"], "fps");
        assert_invalid(&["--frame-size", "0"], "frame-size");
        assert_invalid(&["--fmin", "20000"], "fmin");
        assert_invalid(&["--bands", "0"], "bands");
        assert_invalid(&["--min-bpm", "300"], "min-bpm");
        assert_invalid(&["--diff-ratio", "1.0"], "diff-ratio");
        assert_invalid(&["--alpha", "1.5"], "alpha");
        assert_invalid(&["--look-aside", "1"], "look-aside");
        assert_invalid(&["--look-ahead", "0"], "look-ahead");
    }

    #[test]
    fn verbose_dump_is_json() {
        let config = resolve(&["--load"]).unwrap();
        let json: serde_json::Value = serde_json::to_value(&config).unwrap();

        assert_eq!(json["input"]["mode"], "FromActivationFile");
        assert_eq!(json["output"]["mode"], "ToBeatTimestamps");
        assert_eq!(json["output"]["tempo"]["method"], "comb");
    }
}
