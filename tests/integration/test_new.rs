//! Integration tests for `eco-rail new` argument and state validation

use crate::helpers::{TestEcosystem, eco_rail_output};
use anyhow::Result;

#[test]
fn test_unknown_type_leaves_ecosystem_untouched() -> Result<()> {
  let mut eco = TestEcosystem::new()?;
  eco.add_cargo("core", "0.1.0", &[])?;
  let before = eco.read_file("rail.toml")?;

  let output = eco_rail_output(&eco.path, &["new", "widget", "--type", "cobol"])?;
  assert_eq!(output.status.code(), Some(1));
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(stderr.contains("cobol"), "unexpected stderr:\n{}", stderr);

  assert_eq!(eco.read_file("rail.toml")?, before);
  assert!(!eco.path.join("widget").exists());
  Ok(())
}

#[test]
fn test_existing_directory_is_rejected() -> Result<()> {
  let mut eco = TestEcosystem::new()?;
  eco.add_cargo("core", "0.1.0", &[])?;
  std::fs::create_dir_all(eco.path.join("widget"))?;
  eco.write_file("widget/notes.txt", "keep me")?;
  let before = eco.read_file("rail.toml")?;

  let output = eco_rail_output(&eco.path, &["new", "widget", "--type", "cargo"])?;
  assert_eq!(output.status.code(), Some(3));

  assert_eq!(eco.read_file("rail.toml")?, before);
  assert_eq!(eco.read_file("widget/notes.txt")?, "keep me");
  Ok(())
}

#[test]
fn test_duplicate_name_is_rejected() -> Result<()> {
  let mut eco = TestEcosystem::new()?;
  eco.add_cargo("core", "0.1.0", &[])?;

  let output = eco_rail_output(&eco.path, &["new", "core", "--type", "cargo", "--path", "core-2"])?;
  assert_eq!(output.status.code(), Some(3));
  assert!(!eco.path.join("core-2").exists());
  Ok(())
}
