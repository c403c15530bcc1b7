//! CLI test cases.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("dredd-market").unwrap()
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

/// With no provider credentials in the environment, every provider is
/// unusable, so the run must fail with `all_providers_failed`
/// (spec.md §4.7 step 4) rather than panic or hang.
#[test]
fn test_run_without_credentials_fails_cleanly() {
    cmd()
        .env_remove("OPENAI_API_KEY")
        .env_remove("ANTHROPIC_API_KEY")
        .env_remove("GEMINI_API_KEY")
        .env_remove("GOOGLE_API_KEY")
        .arg("what is the answer?")
        .assert()
        .failure()
        .stderr(predicate::str::contains("provider").or(predicate::str::contains("Error")));
}
