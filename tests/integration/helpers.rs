//! Test helpers for integration tests

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// An ecosystem root holding rail.toml and one directory per workspace
pub struct TestEcosystem {
  _root: TempDir,
  pub path: PathBuf,
  workspaces: Vec<(String, String)>,
}

impl TestEcosystem {
  pub fn new() -> Result<Self> {
    let root = TempDir::new()?;
    let path = root.path().to_path_buf();
    Ok(Self {
      _root: root,
      path,
      workspaces: Vec::new(),
    })
  }

  /// Add a cargo workspace depending on `deps` (other workspaces) by path
  pub fn add_cargo(&mut self, name: &str, version: &str, deps: &[&str]) -> Result<PathBuf> {
    let dir = self.path.join(name);
    fs::create_dir_all(dir.join("src"))?;

    let mut manifest = format!(
      "[package]\nname = \"{}\"\nversion = \"{}\"\nedition = \"2021\"\n\n[dependencies]\n",
      name, version
    );
    for dep in deps {
      manifest.push_str(&format!("{} = {{ version = \"0.1.0\", path = \"../{}\" }}\n", dep, dep));
    }
    fs::write(dir.join("Cargo.toml"), manifest)?;
    fs::write(dir.join("src/lib.rs"), format!("//! {}\n", name))?;

    self.workspaces.push((name.to_string(), "cargo".to_string()));
    self.write_config()?;
    Ok(dir)
  }

  /// Rewrite rail.toml from the workspaces added so far
  pub fn write_config(&self) -> Result<()> {
    let mut config = String::from("[ecosystem]\nowner = \"acme\"\n\n[ci]\nenabled = false\n");
    for (name, kind) in &self.workspaces {
      config.push_str(&format!(
        "\n[[workspaces]]\nname = \"{}\"\npath = \"{}\"\ntype = \"{}\"\n",
        name, name, kind
      ));
    }
    fs::write(self.path.join("rail.toml"), config)?;
    Ok(())
  }

  /// Turn a workspace into a git repository with one commit
  pub fn init_repo(&self, name: &str, message: &str) -> Result<()> {
    let dir = self.path.join(name);
    git(&dir, &["init", "--initial-branch=main"])?;
    git(&dir, &["config", "user.name", "Test User"])?;
    git(&dir, &["config", "user.email", "test@example.com"])?;
    self.commit(name, message)?;
    Ok(())
  }

  pub fn commit(&self, name: &str, message: &str) -> Result<()> {
    let dir = self.path.join(name);
    git(&dir, &["add", "."])?;
    git(&dir, &["commit", "--allow-empty", "-m", message])?;
    Ok(())
  }

  pub fn tag(&self, name: &str, tag: &str) -> Result<()> {
    git(&self.path.join(name), &["tag", tag])?;
    Ok(())
  }

  pub fn read_file(&self, path: &str) -> Result<String> {
    Ok(fs::read_to_string(self.path.join(path))?)
  }

  pub fn write_file(&self, path: &str, content: &str) -> Result<()> {
    fs::write(self.path.join(path), content)?;
    Ok(())
  }
}

/// Run git command in a directory
pub fn git(cwd: &Path, args: &[&str]) -> Result<Output> {
  let output = Command::new("git")
    .current_dir(cwd)
    .args(args)
    .output()
    .context("Failed to run git command")?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    anyhow::bail!("Git command failed: git {}\n{}", args.join(" "), stderr);
  }

  Ok(output)
}

/// Run eco-rail and return its output whatever the exit status
pub fn eco_rail_output(cwd: &Path, args: &[&str]) -> Result<Output> {
  Command::new(env!("CARGO_BIN_EXE_eco-rail"))
    .current_dir(cwd)
    .args(args)
    .env("NO_COLOR", "1")
    .output()
    .context("Failed to run eco-rail")
}

/// Run eco-rail, failing when it exits non-zero
pub fn run_eco_rail(cwd: &Path, args: &[&str]) -> Result<Output> {
  let output = eco_rail_output(cwd, args)?;
  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    anyhow::bail!(
      "eco-rail command failed: eco-rail {}\nstdout: {}\nstderr: {}",
      args.join(" "),
      stdout,
      stderr
    );
  }
  Ok(output)
}
