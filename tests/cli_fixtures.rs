use std::path::PathBuf;
use std::process::Command;

use serde_json::Value;
use stroke_detector::fixtures::{synth_strokes, write_wav, SynthSpec};

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_stroke_cli"))
}

fn fixture_file(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("stroke_cli_{}_{}", std::process::id(), name))
}

fn stdout_json(output: &std::process::Output) -> Value {
    let stdout = String::from_utf8(output.stdout.clone()).expect("stdout UTF-8");
    serde_json::from_str(stdout.trim()).expect("report JSON payload")
}

#[test]
fn detect_synth_succeeds() {
    let output = cli()
        .args(["detect", "--synth", "--hits", "8"])
        .output()
        .expect("failed to run stroke_cli detect");
    assert!(
        output.status.success(),
        "CLI exited with {:?}",
        output.status.code()
    );

    let json = stdout_json(&output);
    assert_eq!(json["source"], "synth");
    assert_eq!(json["stroke_count"], 8);
    assert_eq!(json["measurements"].as_array().map(Vec::len), Some(8));
    assert_eq!(json["stats"]["strokes"], 8);
}

#[test]
fn detect_synth_on_fallback_path() {
    let output = cli()
        .args(["detect", "--synth", "--hits", "4", "--path", "fallback"])
        .output()
        .expect("failed to run fallback detect");
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["path"], "fallback");
    assert_eq!(json["stroke_count"], 4);
}

#[test]
fn detect_wav_matches_expectations() {
    let spec = SynthSpec::evenly_spaced(4, 250.0, 250.0);
    let wav = temp_path("four_hits.wav");
    write_wav(&wav, &synth_strokes(&spec), spec.sample_rate).expect("write fixture wav");

    let output = cli()
        .args([
            "detect",
            "--wav",
            wav.to_str().expect("temp path UTF-8"),
            "--expect",
            &fixture_file("synth_four.expect.json"),
        ])
        .output()
        .expect("failed to run wav detect");
    let _ = std::fs::remove_file(&wav);

    assert!(
        output.status.success(),
        "CLI exited with {:?}: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );
    let json = stdout_json(&output);
    assert_eq!(json["sample_rate"], 48_000);
    assert_eq!(json["stroke_count"], 4);
}

#[test]
fn detect_reports_mismatch() {
    let output = cli()
        .args([
            "detect",
            "--synth",
            "--hits",
            "4",
            "--expect",
            &fixture_file("offbeat.expect.json"),
        ])
        .output()
        .expect("failed to run mismatch detect");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8(output.stderr).expect("stderr UTF-8");
    assert!(
        stderr.contains("\"failures\""),
        "expected diff JSON in stderr, got {stderr}"
    );
}

#[test]
fn detect_requires_a_source() {
    let output = cli()
        .arg("detect")
        .output()
        .expect("failed to run detect without source");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn metronome_renders_to_wav() {
    let wav = temp_path("click.wav");
    let output = cli()
        .args([
            "metronome",
            "--bpm",
            "120",
            "--seconds",
            "2",
            "--render",
            wav.to_str().expect("temp path UTF-8"),
        ])
        .output()
        .expect("failed to run metronome render");
    assert!(output.status.success());

    let json = stdout_json(&output);
    // Lead-in puts the first click at 50 ms, then every 500 ms up to 2 s.
    assert_eq!(json["clicks"], 4);
    assert_eq!(json["sample_rate"], 48_000);

    let rendered = stroke_detector::fixtures::load_wav(&wav).expect("rendered wav readable");
    let _ = std::fs::remove_file(&wav);
    assert_eq!(rendered.samples.len(), 96_000);
    assert!(rendered.samples.iter().any(|s| s.abs() > 0.1));
}
