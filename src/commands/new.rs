//! `eco-rail new`: create a repository and wire it into the ecosystem

use crate::core::context::EcosystemContext;
use crate::core::error::RailResult;
use crate::scaffold::{CreateRequest, RepoCreator};
use std::path::PathBuf;

pub struct NewOptions {
  pub path: Option<PathBuf>,
  pub identity: Option<String>,
  pub publish: bool,
  pub register: bool,
}

pub fn run_new(ctx: &EcosystemContext, name: &str, kind: &str, options: NewOptions) -> RailResult<()> {
  let request = CreateRequest {
    path: options.path,
    identity: options.identity,
    publish: options.publish,
    register: options.register,
    ..CreateRequest::new(name, kind)
  };

  println!("🏗️  Creating {} workspace '{}'", kind, name);
  let creator = RepoCreator::new(&ctx.root, ctx.config_path.clone(), &ctx.config, &ctx.registry);
  let dir = creator.create(&request)?;

  println!("✅ Created {}", dir.display());
  if request.publish
    && let Some(owner) = &ctx.config.ecosystem.owner
  {
    println!("   Published as {}/{}", owner, name);
  }
  Ok(())
}
