//! Integration tests for `eco-rail release` commands

use crate::helpers::{TestEcosystem, eco_rail_output, run_eco_rail};
use anyhow::Result;

/// core <- app, both released at v0.1.0; core then gains a feature
fn released_ecosystem() -> Result<TestEcosystem> {
  let mut eco = TestEcosystem::new()?;
  eco.add_cargo("core", "0.1.0", &[])?;
  eco.add_cargo("app", "0.1.0", &["core"])?;
  eco.add_cargo("docs", "0.1.0", &[])?;
  for name in ["core", "app", "docs"] {
    eco.init_repo(name, "chore: initial import")?;
    eco.tag(name, "v0.1.0")?;
  }
  eco.commit("core", "feat(api): add streaming endpoint")?;
  Ok(eco)
}

fn plan_json(eco: &TestEcosystem) -> Result<serde_json::Value> {
  Ok(serde_json::from_str(&eco.read_file(".rail/release-plan.json")?)?)
}

#[test]
fn test_plan_propagates_bumps_to_dependents() -> Result<()> {
  let eco = released_ecosystem()?;

  let output = run_eco_rail(&eco.path, &["release", "plan"])?;
  let stdout = String::from_utf8_lossy(&output.stdout);
  assert!(stdout.contains("core 0.1.0 -> 0.2.0"), "unexpected output:\n{}", stdout);
  assert!(stdout.contains("Unchanged: docs"), "unexpected output:\n{}", stdout);

  let plan = plan_json(&eco)?;
  let core = &plan["repos"]["core"];
  assert_eq!(core["selected_bump"], "minor");
  assert_eq!(core["next_version"], "0.2.0");
  assert_eq!(core["changelog_state"], "clean");

  let app = &plan["repos"]["app"];
  assert_eq!(app["selected_bump"], "patch");
  assert_eq!(app["next_version"], "0.1.1");
  assert_eq!(app["dependency_bump"], true);

  assert_eq!(plan["repos"]["docs"]["selected_bump"], "none");

  let changelog = eco.read_file("core/CHANGELOG.md")?;
  assert!(changelog.starts_with("# Changelog"));
  assert!(changelog.contains("## v0.2.0"));
  assert!(changelog.contains("**api**: add streaming endpoint"));
  assert!(eco.read_file("app/CHANGELOG.md")?.contains("Dependency updates"));
  assert!(!eco.path.join("docs/CHANGELOG.md").exists());

  Ok(())
}

#[test]
fn test_bump_override_for_one_workspace() -> Result<()> {
  let eco = released_ecosystem()?;

  run_eco_rail(&eco.path, &["release", "plan", "--bump", "core=major", "--bump", "docs=patch"])?;

  let plan = plan_json(&eco)?;
  assert_eq!(plan["repos"]["core"]["next_version"], "1.0.0");
  assert_eq!(plan["repos"]["docs"]["next_version"], "0.1.1");
  assert_eq!(plan["repos"]["app"]["next_version"], "0.1.1");

  let output = eco_rail_output(&eco.path, &["release", "plan", "--bump", "nope=major"])?;
  assert_eq!(output.status.code(), Some(1));

  Ok(())
}

#[test]
fn test_edited_changelog_blocks_apply_until_accepted() -> Result<()> {
  let eco = released_ecosystem()?;
  run_eco_rail(&eco.path, &["release", "plan"])?;

  let changelog = eco.read_file("core/CHANGELOG.md")?;
  eco.write_file(
    "core/CHANGELOG.md",
    &changelog.replace("add streaming endpoint", "add a streaming endpoint for large payloads"),
  )?;

  let output = run_eco_rail(&eco.path, &["release", "status", "--json"])?;
  let status: serde_json::Value = serde_json::from_slice(&output.stdout)?;
  assert_eq!(status["repos"]["core"]["changelog_state"], "dirty");
  assert_eq!(status["repos"]["app"]["changelog_state"], "clean");

  let output = eco_rail_output(&eco.path, &["release", "apply", "--dry-run"])?;
  assert_eq!(output.status.code(), Some(3));
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(stderr.contains("core"), "unexpected stderr:\n{}", stderr);

  run_eco_rail(&eco.path, &["release", "changelog", "core", "--accept"])?;
  assert_eq!(plan_json(&eco)?["repos"]["core"]["changelog_state"], "clean");
  assert!(eco.read_file("core/CHANGELOG.md")?.contains("for large payloads"));

  let output = run_eco_rail(&eco.path, &["release", "apply", "--dry-run"])?;
  let stdout = String::from_utf8_lossy(&output.stdout);
  assert!(stdout.contains("Level 0: core v0.2.0"), "unexpected output:\n{}", stdout);
  assert!(stdout.contains("Level 1: app v0.1.1"), "unexpected output:\n{}", stdout);

  Ok(())
}

#[test]
fn test_regenerate_discards_edits() -> Result<()> {
  let eco = released_ecosystem()?;
  run_eco_rail(&eco.path, &["release", "plan"])?;

  let changelog = eco.read_file("core/CHANGELOG.md")?;
  eco.write_file("core/CHANGELOG.md", &changelog.replace("streaming", "batch"))?;
  run_eco_rail(&eco.path, &["release", "status"])?;
  assert_eq!(plan_json(&eco)?["repos"]["core"]["changelog_state"], "dirty");

  run_eco_rail(&eco.path, &["release", "changelog", "core"])?;
  assert_eq!(plan_json(&eco)?["repos"]["core"]["changelog_state"], "clean");
  assert!(eco.read_file("core/CHANGELOG.md")?.contains("add streaming endpoint"));

  Ok(())
}

#[test]
fn test_replan_keeps_edited_changelog() -> Result<()> {
  let eco = released_ecosystem()?;
  run_eco_rail(&eco.path, &["release", "plan"])?;

  let changelog = eco.read_file("core/CHANGELOG.md")?;
  eco.write_file("core/CHANGELOG.md", &format!("{}\nHAND WRITTEN NOTE\n", changelog))?;

  let output = run_eco_rail(&eco.path, &["release", "plan"])?;
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(stderr.contains("Kept edited changelog of 'core'"), "unexpected stderr:\n{}", stderr);

  assert!(eco.read_file("core/CHANGELOG.md")?.contains("HAND WRITTEN NOTE"));
  let plan = plan_json(&eco)?;
  assert_eq!(plan["repos"]["core"]["changelog_state"], "dirty");
  assert_eq!(plan["repos"]["app"]["changelog_state"], "clean");

  Ok(())
}

#[test]
fn test_status_without_plan_explains_next_step() -> Result<()> {
  let eco = released_ecosystem()?;

  let output = eco_rail_output(&eco.path, &["release", "status"])?;
  assert_eq!(output.status.code(), Some(1));
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(stderr.contains("eco-rail release plan"), "unexpected stderr:\n{}", stderr);

  Ok(())
}
