//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Test project context
///
/// Creates a temporary directory holding build inputs and provides
/// utilities for setting up test scenarios.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
}

impl TestProject {
    /// Create a new test project in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Create a directory in the test project
    #[allow(dead_code)]
    pub fn create_dir(&self, name: &str) {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(path).expect("Failed to create directory");
    }

    /// Check if a file exists in the test project
    #[allow(dead_code)]
    pub fn file_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Read a file from the test project
    #[allow(dead_code)]
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Create a gadget tree and rootfs ready for `pack`
    #[allow(dead_code)]
    pub fn with_pack_inputs(self) -> Self {
        self.create_file("gadget/meta/gadget.toml", SAMPLE_GADGET);
        self.create_file("gadget/grubx64.efi", "efi binary");
        self.create_file("rootfs/etc/hostname", "packed\n");
        self
    }

    /// Run ubuntu-image with the project as working directory
    pub fn run(&self, args: &[&str]) -> Output {
        self.command(args)
            .output()
            .expect("Failed to execute ubuntu-image")
    }

    /// Run ubuntu-image with `tools` searched before the rest of `PATH`
    #[allow(dead_code)]
    pub fn run_with_tools(&self, tools: &Path, args: &[&str]) -> Output {
        let path = match std::env::var_os("PATH") {
            Some(path) => {
                let mut dirs = vec![tools.to_path_buf()];
                dirs.extend(std::env::split_paths(&path));
                std::env::join_paths(dirs).expect("Failed to build PATH")
            }
            None => tools.as_os_str().to_owned(),
        };
        self.command(args)
            .env("PATH", path)
            .output()
            .expect("Failed to execute ubuntu-image")
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_ubuntu-image"));
        cmd.current_dir(self.dir.path()).args(args);
        cmd
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the checkpoint in a working directory as JSON
#[allow(dead_code)]
pub fn read_checkpoint(project: &TestProject, workdir: &str) -> serde_json::Value {
    let content = project.read_file(&format!("{workdir}/ubuntu-image.json"));
    serde_json::from_str(&content).expect("Checkpoint is not valid JSON")
}

/// Sample gadget definition for testing
#[allow(dead_code)]
pub const SAMPLE_GADGET: &str = r#"
[volumes.pc]
schema = "gpt"
bootloader = "grub"

[[volumes.pc.structure]]
name = "EFI System"
type = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B"
filesystem = "vfat"
filesystem-label = "system-boot"
size = "8M"
content = [{ source = "grubx64.efi", target = "EFI/boot/" }]

[[volumes.pc.structure]]
type = "0FC63DAF-8483-4772-8E79-3D69D8477DE4"
role = "system-data"
filesystem = "ext4"
filesystem-label = "writable"
size = "16M"
"#;
