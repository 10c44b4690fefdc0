//! Integration tests for the command-line surface
//!
//! Covers exit codes and the option checks done before any step runs.

mod common;

use common::TestProject;
use predicates::prelude::*;

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_help_exits_zero() {
    let project = TestProject::new();
    let output = project.run(&["--help"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(predicate::str::contains("snap").eval(&stdout));
    assert!(predicate::str::contains("classic").eval(&stdout));
    assert!(predicate::str::contains("pack").eval(&stdout));
}

#[test]
fn test_subcommand_help_lists_pipeline_flags() {
    let project = TestProject::new();
    let output = project.run(&["pack", "--help"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--until", "--thru", "--resume", "--workdir", "--sector-size"] {
        assert!(stdout.contains(flag), "missing {flag} in:\n{stdout}");
    }
}

#[test]
fn test_version_exits_zero() {
    let project = TestProject::new();
    let output = project.run(&["--version"]);
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn test_unknown_flag_exits_one() {
    let project = TestProject::new();
    let output = project.run(&["pack", "--no-such-flag"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_missing_subcommand_exits_one() {
    let project = TestProject::new();
    let output = project.run(&[]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_resume_without_workdir_exits_one() {
    let project = TestProject::new().with_pack_inputs();
    let output = project.run(&[
        "pack",
        "--gadget-dir",
        "gadget",
        "--rootfs-dir",
        "rootfs",
        "--resume",
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("--workdir"));
}

#[test]
fn test_until_and_thru_on_different_steps_exit_one() {
    let project = TestProject::new().with_pack_inputs();
    let output = project.run(&[
        "pack",
        "--gadget-dir",
        "gadget",
        "--rootfs-dir",
        "rootfs",
        "--workdir",
        "work",
        "--until",
        "make-disk",
        "--thru",
        "load-gadget-yaml",
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("cannot be combined"));
    assert!(!project.file_exists("work/ubuntu-image.json"));
}

#[test]
fn test_unknown_step_is_reported() {
    let project = TestProject::new().with_pack_inputs();
    let output = project.run(&[
        "pack",
        "--gadget-dir",
        "gadget",
        "--rootfs-dir",
        "rootfs",
        "--workdir",
        "work",
        "--until",
        "build-rootfs",
    ]);
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("Unknown step 'build-rootfs'"), "{err}");
    assert!(err.contains("make-disk"), "{err}");
    assert!(!project.file_exists("work/ubuntu-image.json"));
}

#[test]
fn test_invalid_sector_size_exits_one() {
    let project = TestProject::new().with_pack_inputs();
    let output = project.run(&[
        "pack",
        "--gadget-dir",
        "gadget",
        "--rootfs-dir",
        "rootfs",
        "--sector-size",
        "1024",
    ]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("1024"));
}

#[test]
fn test_missing_image_definition_exits_one() {
    let project = TestProject::new();
    let output = project.run(&["classic", "missing.toml"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("missing.toml"));
}
