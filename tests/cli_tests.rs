use std::process::Command;
use std::str;
use tempfile::TempDir;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_export_heading_model"))
}

#[test]
fn test_cli_help_message() {
    let output = cli().arg("--help").output().expect("Failed to execute --help command");

    assert!(output.status.success(), "CLI --help exited with error: {:?}", output);
    let stdout = str::from_utf8(&output.stdout).expect("stdout is not valid UTF-8");
    assert!(stdout.contains("Usage:"), "Help message should contain 'Usage:'");
    assert!(stdout.contains("--model-id"), "Help message should mention --model-id");
    assert!(stdout.contains("--output-dir"), "Help message should mention --output-dir");
    assert!(stdout.contains("--random-embedding"));
}

#[test]
fn test_cli_version_message() {
    let output = cli().arg("--version").output().expect("Failed to execute --version command");

    assert!(output.status.success());
    let stdout = str::from_utf8(&output.stdout).expect("stdout is not valid UTF-8");
    assert!(stdout.contains("0.1.0"), "Unexpected version output: {}", stdout);
}

#[test]
fn test_cli_invalid_shard_size_value() {
    let output = cli()
        .args(["--shard-size-bytes", "lots"])
        .output()
        .expect("Failed to execute command with invalid --shard-size-bytes");

    assert!(!output.status.success());
    let stderr = str::from_utf8(&output.stderr).expect("stderr is not valid UTF-8");
    assert!(stderr.contains("invalid value 'lots'"), "Stderr: {}", stderr);
}

#[test]
fn test_cli_unknown_model_fails_without_output() {
    let registry = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let output_dir = out.path().join("distilgpt2_tfjs");

    let output = cli()
        .arg("--local-registry")
        .arg(registry.path())
        .arg("--model-id")
        .arg("no-such-model")
        .arg("--output-dir")
        .arg(&output_dir)
        .output()
        .expect("Failed to execute command against empty registry");

    assert_eq!(output.status.code(), Some(1), "Output: {:?}", output);
    let stderr = str::from_utf8(&output.stderr).expect("stderr is not valid UTF-8");
    assert!(
        stderr.contains("Application error: Registry error: model 'no-such-model' not found in registry"),
        "Stderr: {}",
        stderr
    );
    assert!(!output_dir.exists());
}
