//! Integration tests for the beatops CLI and pipeline.

use beatops::batch::{FailurePolicy, output_path, run_batch};
use beatops::cli::{Cli, Commands, run};
use beatops::config::Config;
use beatops::pipeline::{Artifact, Pipeline};
use beatops_rnn::activations::{Activations, ActivationsFormat};
use beatops_rnn::traits::ActivationModel;
use clap::Parser;
use ndarray::{Array1, ArrayView2, Axis};
use std::path::{Path, PathBuf};

/// Normalized feature sum per frame; peaks where the clicks are.
struct Flux;

impl ActivationModel for Flux {
    fn predict(
        &mut self,
        features: ArrayView2<'_, f32>,
    ) -> beatops_rnn::error::Result<Array1<f32>> {
        let flux = features.sum_axis(Axis(1));
        let max = flux.iter().copied().fold(0.0f32, f32::max);
        Ok(if max > 0.0 { flux / max } else { flux })
    }
}

/// Resolve pipeline options the way the CLI does.
fn config(options: &[&str]) -> Config {
    let tokens = ["beat-detector", "single", "unused"]
        .into_iter()
        .chain(options.iter().copied());
    match Cli::parse_from(tokens).command {
        Commands::Single(args) => args.pipeline.try_into().expect("valid options"),
        other => panic!("unexpected command: {other:?}"),
    }
}

/// Six seconds of 1kHz clicks every half second, starting at 0.25s.
fn write_click_track(path: &Path, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();

    let len = 6 * sample_rate as usize;
    let period = sample_rate as usize / 2;
    let offset = sample_rate as usize / 4;
    let click_len = sample_rate as usize / 100;

    for i in 0..len {
        let value = match i.checked_sub(offset).map(|t| t % period) {
            Some(t) if t < click_len => {
                let time = t as f32 / sample_rate as f32;
                let decay = 1.0 - t as f32 / click_len as f32;
                0.8 * decay * (2.0 * std::f32::consts::PI * 1000.0 * time).sin()
            }
            _ => 0.0,
        };
        writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
    }

    writer.finalize().unwrap();
}

fn beats(artifact: Artifact) -> Vec<f64> {
    match artifact {
        Artifact::Beats(beats) => beats,
        other => panic!("expected beats, got {other:?}"),
    }
}

fn write_artifact(artifact: &Artifact, path: &Path) {
    let mut file = std::fs::File::create(path).unwrap();
    artifact.write(&mut file).unwrap();
}

#[test]
fn saved_activations_reproduce_beats() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("clicks.wav");
    let act = dir.path().join("clicks.npy");
    write_click_track(&wav, 44100);

    let mut detect = Pipeline::with_models(&config(&[]), vec![Flux]).unwrap();
    let direct = beats(detect.process(&wav).unwrap());

    let mut save = Pipeline::with_models(&config(&["--save"]), vec![Flux]).unwrap();
    let saved = save.process(&wav).unwrap();
    write_artifact(&saved, &act);

    let mut load = Pipeline::<Flux>::with_models(&config(&["--load"]), Vec::new()).unwrap();
    let reloaded = beats(load.process(&act).unwrap());

    assert!(!direct.is_empty());
    assert!(direct.windows(2).all(|w| w[0] < w[1]));
    assert!(direct.iter().all(|&b| (0.0..6.0).contains(&b)));
    assert_eq!(direct, reloaded);
}

#[test]
fn saved_activations_load_back_equal() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("clicks.wav");
    let act = dir.path().join("clicks.npy");
    write_click_track(&wav, 44100);

    let mut save = Pipeline::with_models(&config(&["--save"]), vec![Flux]).unwrap();
    let saved = save.process(&wav).unwrap();
    write_artifact(&saved, &act);

    let Artifact::Activations { activations, .. } = &saved else {
        panic!("expected activations, got {saved:?}");
    };
    // six seconds at 100 fps
    assert_eq!(activations.len(), 600);

    let bytes = std::fs::read(&act).unwrap();
    let loaded = ActivationsFormat::Npy.parse(&bytes, 100.0).unwrap();
    assert_eq!(&loaded, activations);
}

#[test]
fn text_activations_keep_fps() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("clicks.wav");
    let act = dir.path().join("clicks.txt");
    write_click_track(&wav, 22050);

    let options = ["--save", "--sep", " ", "--fps", "50"];
    let mut save = Pipeline::with_models(&config(&options), vec![Flux]).unwrap();
    let saved = save.process(&wav).unwrap();
    write_artifact(&saved, &act);

    let text = std::fs::read_to_string(&act).unwrap();
    assert!(text.starts_with("# FPS:50\n"));
    assert_eq!(text.lines().count(), 1 + 300);

    let options = ["--load", "--sep", " "];
    let mut load = Pipeline::<Flux>::with_models(&config(&options), Vec::new()).unwrap();
    let reloaded = beats(load.process(&act).unwrap());
    assert!(reloaded.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn text_activations_reproduce_beats_at_fractional_fps() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("clicks.wav");
    let act = dir.path().join("clicks.txt");
    write_click_track(&wav, 44100);

    // one frame per 1024 samples
    let fps = ["--fps", "43.066406"];
    let mut detect = Pipeline::with_models(&config(&fps), vec![Flux]).unwrap();
    let direct = beats(detect.process(&wav).unwrap());

    let save_options: Vec<&str> = ["--save", "--sep", " "].into_iter().chain(fps).collect();
    let mut save = Pipeline::with_models(&config(&save_options), vec![Flux]).unwrap();
    let saved = save.process(&wav).unwrap();
    write_artifact(&saved, &act);

    let text = std::fs::read_to_string(&act).unwrap();
    let header = text.lines().next().unwrap();
    let written_fps: f32 = header.strip_prefix("# FPS:").unwrap().parse().unwrap();
    assert_eq!(written_fps, 43.066406);

    // the header overrides the default fps on load
    let options = ["--load", "--sep", " "];
    let mut load = Pipeline::<Flux>::with_models(&config(&options), Vec::new()).unwrap();
    let reloaded = beats(load.process(&act).unwrap());

    assert!(!direct.is_empty());
    assert_eq!(direct, reloaded);
}

#[test]
fn batch_writes_one_output_per_input() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let files: Vec<PathBuf> = ["a", "b", "c"]
        .iter()
        .map(|name| {
            let path = dir.path().join(format!("{name}.wav"));
            write_click_track(&path, 44100);
            path
        })
        .collect();

    let mut pipeline = Pipeline::with_models(&config(&[]), vec![Flux]).unwrap();
    let written = run_batch(
        &mut pipeline,
        &files,
        Some(out.as_path()),
        ".beats.txt",
        FailurePolicy::Continue,
    )
    .unwrap();

    let expected: Vec<PathBuf> = ["a", "b", "c"]
        .iter()
        .map(|name| out.join(format!("{name}.beats.txt")))
        .collect();
    assert_eq!(written, expected);
    for path in &expected {
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.lines().all(|line| line.split_once('.').is_some_and(|(_, ms)| ms.len() == 3)));
    }
}

#[test]
fn continue_processes_remaining_files() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.wav");
    let bad = dir.path().join("bad.wav");
    let last = dir.path().join("last.wav");
    write_click_track(&good, 44100);
    std::fs::write(&bad, b"not a wav file").unwrap();
    write_click_track(&last, 44100);

    let mut pipeline = Pipeline::with_models(&config(&[]), vec![Flux]).unwrap();
    let result = run_batch(
        &mut pipeline,
        &[good.clone(), bad.clone(), last.clone()],
        None,
        ".beats.txt",
        FailurePolicy::Continue,
    );

    let err = result.unwrap_err();
    assert!(err.to_string().contains("1 of 3 files failed"));
    assert!(output_path(&good, None, ".beats.txt").exists());
    assert!(!output_path(&bad, None, ".beats.txt").exists());
    assert!(output_path(&last, None, ".beats.txt").exists());
}

#[test]
fn fail_fast_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("bad.wav");
    let good = dir.path().join("good.wav");
    std::fs::write(&bad, b"not a wav file").unwrap();
    write_click_track(&good, 44100);

    let mut pipeline = Pipeline::with_models(&config(&[]), vec![Flux]).unwrap();
    let result = run_batch(
        &mut pipeline,
        &[bad.clone(), good.clone()],
        None,
        ".beats.txt",
        FailurePolicy::FailFast,
    );

    let err = result.unwrap_err();
    assert!(format!("{err}").contains("bad.wav"));
    assert!(!output_path(&good, None, ".beats.txt").exists());
}

fn write_pulse_activations(path: &Path) {
    let data = Array1::from_shape_fn(200, |t| if t % 50 == 20 { 1.0 } else { 0.0 });
    let mut file = std::fs::File::create(path).unwrap();
    ActivationsFormat::Npy
        .write(&Activations::new(data, 100.0), &mut file)
        .unwrap();
}

#[test]
fn batch_refuses_colliding_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let a = dir.path().join("a").join("x.npy");
    let b = dir.path().join("b").join("x.npy");
    for path in [&a, &b] {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        write_pulse_activations(path);
    }
    let original = std::fs::read(&a).unwrap();

    let mut pipeline = Pipeline::<Flux>::with_models(&config(&["--load"]), Vec::new()).unwrap();

    let same_stem = run_batch(
        &mut pipeline,
        &[a.clone(), b.clone()],
        Some(out.as_path()),
        ".beats.txt",
        FailurePolicy::Continue,
    );
    assert!(same_stem.is_err());
    assert!(!out.exists());

    let same_ext = run_batch(&mut pipeline, &[a.clone()], None, ".npy", FailurePolicy::Continue);
    assert!(same_ext.is_err());
    assert_eq!(std::fs::read(&a).unwrap(), original);
}

#[test]
fn single_load_writes_beat_file() {
    let dir = tempfile::tempdir().unwrap();
    let act = dir.path().join("pulses.npy");
    let out = dir.path().join("pulses.beats.txt");

    let data = Array1::from_shape_fn(1000, |t| {
        if t >= 20 && (t - 20) % 50 == 0 { 1.0 } else { 0.0 }
    });
    let mut file = std::fs::File::create(&act).unwrap();
    ActivationsFormat::Npy
        .write(&Activations::new(data, 100.0), &mut file)
        .unwrap();

    let cli = Cli::parse_from([
        "beat-detector",
        "single",
        act.to_str().unwrap(),
        "--load",
        "-o",
        out.to_str().unwrap(),
    ]);
    run(cli).unwrap();

    let text = std::fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 20);
    assert_eq!(lines[0], "0.200");
    assert_eq!(lines[1], "0.700");
    assert_eq!(lines[19], "9.700");
}

#[test]
fn missing_models_fail_before_reading_input() {
    let dir = tempfile::tempdir().unwrap();
    let models = dir.path().join("models");
    std::fs::create_dir(&models).unwrap();
    let out = dir.path().join("out.txt");

    let cli = Cli::parse_from([
        "beat-detector",
        "single",
        "/nonexistent/track.wav",
        "--models-dir",
        models.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
    ]);
    let err = run(cli).unwrap_err();

    assert!(err.to_string().contains("no model found matching"));
    assert!(!out.exists());
}

#[test]
fn evaluate_command_runs_over_directories() {
    let dir = tempfile::tempdir().unwrap();
    let detections = dir.path().join("detections");
    let annotations = dir.path().join("annotations");
    std::fs::create_dir(&detections).unwrap();
    std::fs::create_dir(&annotations).unwrap();
    for name in ["a", "b"] {
        std::fs::write(detections.join(format!("{name}.beats.txt")), "0.500\n1.000\n").unwrap();
        std::fs::write(annotations.join(format!("{name}.beats")), "0.51\n1.02\n").unwrap();
    }

    let cli = Cli::parse_from([
        "beat-detector",
        "evaluate",
        detections.to_str().unwrap(),
        "--annotations",
        annotations.to_str().unwrap(),
    ]);

    run(cli).unwrap();
}

#[test]
fn evaluate_command_rejects_unmatched_detections() {
    let dir = tempfile::tempdir().unwrap();
    let detections = dir.path().join("song.beats.txt");
    std::fs::write(&detections, "0.500\n").unwrap();

    let cli = Cli::parse_from(["beat-detector", "evaluate", detections.to_str().unwrap()]);
    let err = run(cli).unwrap_err();

    assert!(err.to_string().contains("no annotations found"));
}

#[test]
#[ignore = "ONNX beat models required in $BEATOPS_MODELS_DIR"]
fn detects_beats_with_onnx_models() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("clicks.wav");
    write_click_track(&wav, 44100);

    let mut pipeline = Pipeline::from_config(&config(&[])).expect("models available");
    let detected = beats(pipeline.process(&wav).unwrap());

    assert!(detected.len() >= 8);
}
