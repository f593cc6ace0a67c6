use clap::{Parser, Subcommand};
use eco_rail::build::JobKind;
use eco_rail::commands;
use eco_rail::core::context::EcosystemContext;
use eco_rail::core::error::{RailError, print_error};
use eco_rail::core::telemetry::init_tracing;
use std::path::PathBuf;

/// Release cross-dependent repositories as one unit, in dependency order
#[derive(Parser)]
#[command(name = "eco-rail")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(styles = get_styles())]
struct Cli {
  /// Ecosystem root (directory holding rail.toml)
  #[arg(short = 'C', long, global = true, default_value = ".")]
  root: PathBuf,

  /// Debug logging for eco-rail (RUST_LOG overrides)
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Emit log lines as JSON on stderr
  #[arg(long, global = true)]
  json_logs: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Show the dependency graph and build levels
  Graph {
    /// Graphviz output
    #[arg(long, conflicts_with = "json")]
    dot: bool,
    /// Output results in JSON format
    #[arg(long)]
    json: bool,
  },

  /// Build, test or verify workspaces level by level
  Build {
    /// Only these workspaces (default: all)
    workspaces: Vec<String>,
    /// Which handler command to run
    #[arg(long, default_value = "build")]
    kind: JobKind,
    /// Maximum concurrent jobs (default: config, then CPU count)
    #[arg(short, long)]
    jobs: Option<usize>,
    /// Keep running independent jobs after a failure
    #[arg(long)]
    keep_going: bool,
  },

  /// Release planning and execution
  #[command(subcommand)]
  Release(ReleaseCommands),

  /// Create a new repository and register it with the ecosystem
  New {
    /// Workspace name
    name: String,
    /// Project type (go, cargo, node)
    #[arg(short = 't', long = "type")]
    kind: String,
    /// Directory relative to the root (default: the name)
    #[arg(long)]
    path: Option<PathBuf>,
    /// Module/package identity (default: derived from owner and name)
    #[arg(long)]
    identity: Option<String>,
    /// Create the hosted repository with `gh repo create`
    #[arg(long)]
    publish: bool,
    /// Run the configured register command afterwards
    #[arg(long)]
    register: bool,
  },
}

#[derive(Subcommand)]
enum ReleaseCommands {
  /// Analyze commits, pick bumps and write changelog sections
  Plan {
    /// Override bumps: `name=major|minor|patch|none`, or a bare level for all
    #[arg(long = "bump")]
    bumps: Vec<String>,
    /// Output results in JSON format
    #[arg(long)]
    json: bool,
  },

  /// Show the saved plan and changelog review state
  Status {
    /// Output results in JSON format
    #[arg(long)]
    json: bool,
  },

  /// Regenerate a changelog section, or accept its edited content
  Changelog {
    /// Workspace name
    repo: String,
    /// Keep the edited section and mark it reviewed
    #[arg(long)]
    accept: bool,
  },

  /// Release every pending workspace, dependencies first
  Apply {
    /// Show the release order without making changes
    #[arg(long)]
    dry_run: bool,
    /// Do not wait for CI before or after releasing
    #[arg(long)]
    skip_ci: bool,
    /// Maximum concurrent build jobs
    #[arg(short, long)]
    jobs: Option<usize>,
  },

  /// Wait for existing CI and the release workflow of a tag
  Wait {
    /// Workspace name
    repo: String,
    /// Release tag (default: the latest version tag)
    #[arg(long)]
    tag: Option<String>,
  },
}

fn get_styles() -> clap::builder::Styles {
  clap::builder::Styles::styled()
    .usage(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
    )
    .header(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
    )
    .literal(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))))
    .invalid(
      anstyle::Style::new()
        .bold()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
    )
    .error(
      anstyle::Style::new()
        .bold()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
    )
    .valid(
      anstyle::Style::new()
        .bold()
        .underline()
        .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
    )
    .placeholder(anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))))
}

fn main() {
  let cli = Cli::parse();
  init_tracing(cli.verbose, cli.json_logs);

  // Build ecosystem context once (config, handlers, graph)
  let ctx = match EcosystemContext::build(&cli.root) {
    Ok(ctx) => ctx,
    Err(e) => handle_error(e),
  };

  let result = match cli.command {
    Commands::Graph { dot, json } => commands::run_graph(&ctx, dot, json),
    Commands::Build {
      workspaces,
      kind,
      jobs,
      keep_going,
    } => commands::run_build(&ctx, workspaces, jobs, keep_going, kind),
    Commands::Release(release_cmd) => match release_cmd {
      ReleaseCommands::Plan { bumps, json } => commands::run_release_plan(&ctx, &bumps, json),
      ReleaseCommands::Status { json } => commands::run_release_status(&ctx, json),
      ReleaseCommands::Changelog { repo, accept } => commands::run_release_changelog(&ctx, &repo, accept),
      ReleaseCommands::Apply { dry_run, skip_ci, jobs } => commands::run_release_apply(&ctx, dry_run, skip_ci, jobs),
      ReleaseCommands::Wait { repo, tag } => commands::run_release_wait(&ctx, &repo, tag),
    },
    Commands::New {
      name,
      kind,
      path,
      identity,
      publish,
      register,
    } => commands::run_new(
      &ctx,
      &name,
      &kind,
      commands::NewOptions {
        path,
        identity,
        publish,
        register,
      },
    ),
  };

  if let Err(err) = result {
    handle_error(err);
  }
}

fn handle_error(err: RailError) -> ! {
  print_error(&err);
  std::process::exit(err.exit_code().as_i32());
}
