//! Integration tests for `eco-rail graph`

use crate::helpers::{TestEcosystem, eco_rail_output, run_eco_rail};
use anyhow::Result;

#[test]
fn test_graph_levels_follow_dependencies() -> Result<()> {
  let mut eco = TestEcosystem::new()?;
  eco.add_cargo("core", "0.1.0", &[])?;
  eco.add_cargo("proxy", "0.1.0", &["core"])?;
  eco.add_cargo("tools", "0.1.0", &[])?;
  eco.add_cargo("app", "0.1.0", &["proxy", "core"])?;

  let output = run_eco_rail(&eco.path, &["graph", "--json"])?;
  let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;

  let levels: Vec<Vec<String>> = serde_json::from_value(json["levels"].clone())?;
  assert_eq!(
    levels,
    vec![
      vec!["core".to_string(), "tools".to_string()],
      vec!["proxy".to_string()],
      vec!["app".to_string()],
    ]
  );
  assert_eq!(json["edges"].as_array().map(Vec::len), Some(3));

  Ok(())
}

#[test]
fn test_graph_text_and_dot_output() -> Result<()> {
  let mut eco = TestEcosystem::new()?;
  eco.add_cargo("core", "0.1.0", &[])?;
  eco.add_cargo("app", "0.1.0", &["core"])?;

  let output = run_eco_rail(&eco.path, &["graph"])?;
  let stdout = String::from_utf8_lossy(&output.stdout);
  assert!(stdout.contains("Level 0: core"), "unexpected output:\n{}", stdout);
  assert!(stdout.contains("Level 1: app"), "unexpected output:\n{}", stdout);
  assert!(stdout.contains("app -> core"), "unexpected output:\n{}", stdout);

  let output = run_eco_rail(&eco.path, &["graph", "--dot"])?;
  let stdout = String::from_utf8_lossy(&output.stdout);
  assert!(stdout.starts_with("digraph"), "unexpected output:\n{}", stdout);

  Ok(())
}

#[test]
fn test_cycle_fails_with_validation_exit_code() -> Result<()> {
  let mut eco = TestEcosystem::new()?;
  eco.add_cargo("a", "0.1.0", &["b"])?;
  eco.add_cargo("b", "0.1.0", &["a"])?;
  eco.add_cargo("c", "0.1.0", &[])?;

  let output = eco_rail_output(&eco.path, &["graph"])?;
  assert_eq!(output.status.code(), Some(3));

  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(stderr.contains("cycle"), "unexpected stderr:\n{}", stderr);
  assert!(stderr.contains('a') && stderr.contains('b'));

  Ok(())
}

#[test]
fn test_missing_config_is_a_user_error() -> Result<()> {
  let eco = TestEcosystem::new()?;
  let output = eco_rail_output(&eco.path, &["graph"])?;
  assert_eq!(output.status.code(), Some(1));
  Ok(())
}
