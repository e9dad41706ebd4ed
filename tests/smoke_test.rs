/// Smoke tests to verify the binary runs without panicking
use std::process::Command;

fn manpa(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "--quiet", "--"])
        .args(args)
        .output()
        .expect("Failed to execute cargo run")
}

#[test]
fn binary_shows_help() {
    let output = manpa(&["--help"]);

    assert!(
        output.status.success(),
        "Binary failed to run --help: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("manpa"), "Help output should mention manpa");
    assert!(stdout.contains("play"), "Help output should list the play command");
}

#[test]
fn binary_shows_version() {
    let output = manpa(&["--version"]);

    assert!(
        output.status.success(),
        "Binary failed to run --version: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn invalid_subcommand_fails_gracefully() {
    let output = manpa(&["nonexistent-command"]);

    // Should fail with error, not panic
    assert!(
        !output.status.success(),
        "Invalid subcommand should return error status"
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        !stderr.contains("panicked at"),
        "Invalid subcommand should not cause panic"
    );
}

#[test]
fn script_lists_builtin_story() {
    let output = manpa(&["script"]);

    assert!(
        output.status.success(),
        "script failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1-1"), "first beat should be listed");
    assert!(stdout.contains("exhale"), "trigger column should be printed");
    assert!(!stdout.contains("warning:"), "built-in script should validate cleanly");
}

#[test]
fn missing_script_file_is_an_error() {
    let output = manpa(&["script", "/nonexistent/manpa-story.toml"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Script error"), "unexpected stderr: {}", stderr);
    assert!(!stderr.contains("panicked at"));
}
