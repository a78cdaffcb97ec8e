mod build;
mod cache;
mod config;
mod error;
mod fsutil;
mod pool;
mod project;
mod tool;

use std::path::PathBuf;

use clap::Parser;
use console::style;

use crate::cache::BuildContext;
use crate::config::{BuildMode, Cli, Command, CACHE_DIR_NAME, DEFAULT_MANIFEST};
use crate::error::*;
use crate::project::Project;

fn manifest_path(config: Option<PathBuf>) -> PathBuf {
    config.unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST))
}

// Pick the projects to build: the named subset, or all of them. Unknown
// names are warned about and skipped.
fn select_projects(all: Vec<Project>, requested: &[String]) -> Vec<Project> {
    if requested.is_empty() {
        return all;
    }

    let mut selected = Vec::new();
    for name in requested {
        match all.iter().find(|p| &p.name == name) {
            Some(proj) => selected.push(proj.clone()),
            None => {
                println!(
                    "{:>12} ignoring unknown project `{}`",
                    style("Warning").yellow(),
                    name
                );
            }
        }
    }
    selected
}

fn run_build(
    ctx: &BuildContext,
    config: Option<PathBuf>,
    mode: BuildMode,
    clean: bool,
    requested: &[String],
) -> Result<()> {
    let manifest = manifest_path(config);
    let projects = select_projects(cache::load_or_build_project_index(ctx, &manifest)?, requested);

    for proj in &projects {
        println!("{:>12} {} v{}", style("Compiling").cyan(), proj.name, proj.version);

        let summary = build::build_project(ctx, proj, mode, clean)?;

        if summary.compiled == 0 {
            println!(
                "{:>12} {} [{}] {}",
                style("Finished").green(),
                proj.name,
                mode,
                "already up to date"
            );
        } else {
            println!(
                "{:>12} {} [{}] in {:.2}s",
                style("Finished").green(),
                proj.name,
                mode,
                summary.elapsed.as_secs_f64()
            );
        }
        if proj.build_type == crate::project::BuildType::Executable {
            println!("{:>12} `{}`", style("Artifact").magenta(), summary.artifact.display());
        }
    }

    Ok(())
}

fn run_info(ctx: &BuildContext, config: Option<PathBuf>) -> Result<()> {
    let manifest = manifest_path(config);
    for proj in cache::load_or_build_project_index(ctx, &manifest)? {
        print!("{}", proj.describe());
        println!("-----------------------------------");
    }
    Ok(())
}

fn run_clean(ctx: &BuildContext) -> Result<()> {
    if cache::remove_all_cache(ctx) {
        println!("{:>12} removed all cached state", style("Cleaned").green());
        Ok(())
    } else {
        Err(Error::CannotRemove(
            ctx.cache_root.clone(),
            std::io::Error::new(std::io::ErrorKind::Other, "see the log for details"),
        ))
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let ctx = BuildContext::new(PathBuf::from(format!("./{}", CACHE_DIR_NAME)))?;

    match cli.command {
        Command::Build {
            mode,
            config,
            clean,
            projects,
        } => run_build(&ctx, config, mode, clean, &projects),
        Command::Info { config } => run_info(&ctx, config),
        Command::Clean => run_clean(&ctx),
    }
}

fn main() {
    pretty_env_logger::init();

    if let Err(err) = run() {
        eprintln!("{:>12} {}", style("Error").red(), err);
        std::process::exit(1);
    }
}
