//! Go module handler
//!
//! Versions live in tags, so the manifest carries no version field. A
//! `require` on a sibling module only counts as workspace-local when
//! non-test Go sources in the workspace actually import it; modules that
//! are required but only used from `_test.go` files stay off the graph.

use super::{Dependency, DependencyKind, ProjectHandler, WorkspaceIndex, run_tool, to_args};
use crate::core::error::{RailResult, ResultExt};
use semver::Version;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directories never scanned for production imports
const SKIP_DIRS: &[&str] = &["vendor", "testdata", "test", "tests", "node_modules"];

/// Workspace-relative directories holding test helpers only
const SKIP_PATHS: &[&str] = &["internal/testutil"];

pub struct GoHandler;

impl GoHandler {
  pub fn new() -> Self {
    Self
  }
}

impl Default for GoHandler {
  fn default() -> Self {
    Self::new()
  }
}

/// Parsed subset of go.mod
#[derive(Debug, Default, PartialEq)]
pub struct GoMod {
  pub module: Option<String>,
  pub requires: Vec<(String, String)>,
  pub tools: Vec<String>,
}

impl ProjectHandler for GoHandler {
  fn kind(&self) -> &'static str {
    "go"
  }

  fn manifest_filename(&self) -> &'static str {
    "go.mod"
  }

  fn identity(&self, dir: &Path) -> RailResult<Option<String>> {
    Ok(read_go_mod(dir)?.module)
  }

  fn parse_dependencies(&self, dir: &Path, index: &WorkspaceIndex) -> RailResult<Vec<Dependency>> {
    let go_mod = read_go_mod(dir)?;
    let imports = production_imports(dir)?;

    let deps = go_mod
      .requires
      .iter()
      .map(|(path, version)| {
        let is_tool = go_mod.tools.iter().any(|tool| is_within(tool, path));
        let imported = imports.iter().any(|import| is_within(import, path));
        Dependency {
          name: path.clone(),
          version: version.clone(),
          kind: if is_tool {
            DependencyKind::Binary
          } else {
            DependencyKind::Library
          },
          is_workspace_local: index.contains(path) && (imported || is_tool),
        }
      })
      .collect();

    Ok(deps)
  }

  fn update_dependency(&self, dir: &Path, name: &str, version: &Version) -> RailResult<()> {
    let target = format!("{}@v{}", name, version);
    run_tool(dir, "go", &["mod", "edit", &format!("-dropreplace={}", name)])?;
    run_tool(dir, "go", &["get", &target])?;
    run_tool(dir, "go", &["mod", "tidy"]).context("go mod tidy failed after dependency update")
  }

  fn get_version(&self, _dir: &Path) -> RailResult<Option<Version>> {
    Ok(None)
  }

  fn set_version(&self, _dir: &Path, _version: &Version) -> RailResult<Vec<PathBuf>> {
    Ok(Vec::new())
  }

  fn mutable_files(&self) -> Vec<&'static str> {
    vec!["go.mod", "go.sum"]
  }

  fn build_command(&self) -> Vec<String> {
    to_args(&["go", "build", "./..."])
  }

  fn test_command(&self) -> Vec<String> {
    to_args(&["go", "test", "./..."])
  }

  fn verify_command(&self) -> Vec<String> {
    to_args(&["go", "vet", "./..."])
  }

  fn skeleton(&self, name: &str, identity: &str) -> Vec<(PathBuf, String)> {
    let package = name.replace('-', "");
    vec![
      (PathBuf::from("go.mod"), format!("module {}\n\ngo 1.22\n", identity)),
      (
        PathBuf::from(format!("{}.go", package)),
        format!("// Package {pkg} is part of the ecosystem.\npackage {pkg}\n", pkg = package),
      ),
      (PathBuf::from("README.md"), format!("# {}\n", name)),
    ]
  }
}

fn read_go_mod(dir: &Path) -> RailResult<GoMod> {
  let path = dir.join("go.mod");
  let content = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
  Ok(parse_go_mod(&content))
}

/// Parse `module`, `require` and `tool` directives, single-line and block form
pub fn parse_go_mod(content: &str) -> GoMod {
  let mut go_mod = GoMod::default();
  let mut block: Option<&str> = None;

  for raw in content.lines() {
    let line = strip_comment(raw).trim();
    if line.is_empty() {
      continue;
    }

    if let Some(directive) = block {
      if line == ")" {
        block = None;
        continue;
      }
      apply_directive(&mut go_mod, directive, line);
      continue;
    }

    let (directive, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    if rest == "(" {
      block = Some(match directive {
        "require" => "require",
        "tool" => "tool",
        _ => "other",
      });
      continue;
    }

    match directive {
      "module" => go_mod.module = Some(unquote(rest).to_string()),
      "require" | "tool" => apply_directive(&mut go_mod, directive, rest),
      _ => {}
    }
  }

  go_mod
}

fn apply_directive(go_mod: &mut GoMod, directive: &str, args: &str) {
  let mut parts = args.split_whitespace();
  match directive {
    "require" => {
      if let (Some(path), Some(version)) = (parts.next(), parts.next()) {
        go_mod.requires.push((unquote(path).to_string(), version.to_string()));
      }
    }
    "tool" => {
      if let Some(path) = parts.next() {
        go_mod.tools.push(unquote(path).to_string());
      }
    }
    _ => {}
  }
}

fn strip_comment(line: &str) -> &str {
  match line.find("//") {
    Some(idx) => &line[..idx],
    None => line,
  }
}

fn unquote(s: &str) -> &str {
  s.trim_matches(|c| c == '"' || c == '`')
}

/// `import` equals `module` or is a package inside it
fn is_within(import: &str, module: &str) -> bool {
  import == module || import.strip_prefix(module).is_some_and(|rest| rest.starts_with('/'))
}

/// Import paths used by non-test Go files under `dir`
pub fn production_imports(dir: &Path) -> RailResult<BTreeSet<String>> {
  let mut imports = BTreeSet::new();
  let mut stack = vec![dir.to_path_buf()];

  while let Some(current) = stack.pop() {
    let entries = fs::read_dir(&current).with_context(|| format!("Failed to read {}", current.display()))?;
    for entry in entries {
      let entry = entry?;
      let path = entry.path();
      let name = entry.file_name().to_string_lossy().to_string();

      if entry.file_type()?.is_dir() {
        if name.starts_with('.') || name.starts_with('_') || SKIP_DIRS.contains(&name.as_str()) {
          continue;
        }
        // Nested modules are separate workspaces
        if path.join("go.mod").is_file()
          || SKIP_PATHS
            .iter()
            .any(|skip| path.strip_prefix(dir).is_ok_and(|rel| rel == Path::new(skip)))
        {
          continue;
        }
        stack.push(path);
        continue;
      }

      if !name.ends_with(".go") || name.ends_with("_test.go") {
        continue;
      }

      let source = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
      imports.extend(parse_imports(&source));
    }
  }

  debug!(dir = %dir.display(), count = imports.len(), "scanned production imports");
  Ok(imports)
}

/// Import paths declared by one Go source file
pub fn parse_imports(source: &str) -> Vec<String> {
  let mut imports = Vec::new();
  let mut in_block = false;

  for raw in source.lines() {
    let line = strip_comment(raw).trim();
    if line.is_empty() {
      continue;
    }

    if in_block {
      in_block = take_group(line, &mut imports);
      continue;
    }

    if let Some(rest) = line.strip_prefix("import") {
      let rest = rest.trim();
      if let Some(group) = rest.strip_prefix('(') {
        in_block = take_group(group, &mut imports);
      } else if let Some(path) = quoted(rest) {
        imports.push(path);
      }
      continue;
    }

    // Imports precede every other top-level declaration
    if ["func ", "type ", "var ", "const "].iter().any(|kw| line.starts_with(kw)) {
      break;
    }
  }

  imports
}

/// Collect the specs of one line inside `import ( ... )`, returning whether
/// the group is still open afterwards
fn take_group(line: &str, imports: &mut Vec<String>) -> bool {
  let (specs, open) = match line.find(')') {
    Some(end) => (&line[..end], false),
    None => (line, true),
  };
  imports.extend(specs.split(';').filter_map(quoted));
  open
}

fn quoted(s: &str) -> Option<String> {
  let start = s.find(['"', '`'])?;
  let quote = s[start..].chars().next()?;
  let rest = &s[start + 1..];
  let end = rest.find(quote)?;
  Some(rest[..end].to_string())
}
