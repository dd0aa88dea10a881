//! Common test utilities for bindkeep integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't touch the
//! user's `~/.local/share/bindkeep/` store or `~/.config/bindkeep/config.kdl`.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// A test environment with an isolated store and config directory.
///
/// The `bk()` method returns a `Command` that sets `BINDKEEP_STORE` and
/// `XDG_CONFIG_HOME` per-invocation, making tests parallel-safe.
pub struct TestEnv {
    pub data_dir: TempDir,
    pub config_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            data_dir: TempDir::new().unwrap(),
            config_dir: TempDir::new().unwrap(),
        }
    }

    /// Get a Command for the bk binary using this environment's store.
    pub fn bk(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_bk"));
        cmd.env("BINDKEEP_STORE", self.store_path());
        cmd.env("XDG_CONFIG_HOME", self.config_dir.path());
        cmd.env_remove("BINDKEEP_CONFIG");
        cmd.env_remove("BINDKEEP_KEY_PREFIX");
        cmd.env_remove("BINDKEEP_SAVE_MODE");
        cmd
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.path().join("prefs.db")
    }

    pub fn data_path(&self) -> &Path {
        self.data_dir.path()
    }

    /// Path of the default config file seen by `bk`.
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.path().join("bindkeep").join("config.kdl")
    }

    /// Write the default config file.
    pub fn write_config(&self, content: &str) {
        let path = self.config_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    /// Store a value through the CLI.
    pub fn set(&self, key: &str, value: &str) {
        self.bk().args(["set", key, value]).assert().success();
    }

    /// Build a key through the CLI and return it.
    pub fn key(&self, args: &[&str]) -> String {
        let output = self.bk().arg("key").args(args).output().unwrap();
        assert!(output.status.success(), "bk key failed: {:?}", output);
        let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        json["key"].as_str().unwrap().to_string()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a command's stdout as JSON.
pub fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().unwrap();
    assert!(output.status.success(), "command failed: {:?}", output);
    serde_json::from_slice(&output.stdout).unwrap()
}
