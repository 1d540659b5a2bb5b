// src/commands/transition.rs
//! install, uninstall and image-update
//!
//! Each command locks the image, evaluates a plan and hands it to the
//! transaction engine. A search index that could not be brought up to date
//! does not undo the transition; it is reported and the command exits 1.

use super::progress::tracker;
use super::{EXIT_OK, EXIT_OOPS, open_image};
use anyhow::{Context, Result};
use pkgimage::manifest::ActionFilter;
use pkgimage::{ExecOptions, ExecutionOutcome, Image, TransitionKind, run_transition};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionOptions {
    pub noexecute: bool,
    pub verbose: bool,
    pub quiet: bool,
}

/// Run the evaluated plan and report the outcome
fn execute(image: &mut Image, kind: TransitionKind, opts: TransitionOptions) -> Result<u8> {
    let Some(plan) = image.imageplan.as_ref() else {
        return Ok(EXIT_OK);
    };

    if plan.nothingtodo() {
        if kind == TransitionKind::ImageUpdate {
            println!("No updates available for this image.");
        } else if !opts.quiet {
            println!("Nothing to do.");
        }
        image.imageplan = None;
        return Ok(EXIT_OK);
    }

    if opts.verbose || opts.noexecute {
        print!("{}", plan);
    }
    if opts.noexecute {
        return Ok(EXIT_OK);
    }

    let progress = tracker(opts.quiet, kind.as_str());
    let outcome = run_transition(image, kind, &ExecOptions::new().with_progress(progress))?;
    report(&outcome, opts)
}

fn report(outcome: &ExecutionOutcome, opts: TransitionOptions) -> Result<u8> {
    info!(
        "Transition {}: {} installed, {} updated, {} removed",
        outcome.tx_uuid.as_deref().unwrap_or("-"),
        outcome.installed,
        outcome.updated,
        outcome.removed
    );
    if !opts.quiet {
        println!(
            "{} installed, {} updated, {} removed",
            outcome.installed, outcome.updated, outcome.removed
        );
    }

    match &outcome.index_warning {
        Some(warning) => {
            eprintln!("pkg: the search index could not be updated: {}", warning);
            if let Some(hint) = warning.remediation() {
                eprintln!("{}", hint);
            }
            Ok(EXIT_OOPS)
        }
        None => Ok(EXIT_OK),
    }
}

pub fn cmd_install(
    image_dir: Option<&Path>,
    patterns: &[String],
    filters: &[String],
    opts: TransitionOptions,
) -> Result<u8> {
    let filters = filters
        .iter()
        .map(|f| {
            f.parse::<ActionFilter>()
                .with_context(|| format!("Invalid filter '{}'", f))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut image = open_image(image_dir)?;
    let _lock = image.lock()?;
    let progress = tracker(opts.quiet, "install");
    image.load_catalogs(progress.as_ref())?;
    image.make_install_plan(
        patterns,
        progress.as_ref(),
        filters,
        opts.verbose,
        opts.noexecute,
    )?;
    execute(&mut image, TransitionKind::Install, opts)
}

pub fn cmd_uninstall(
    image_dir: Option<&Path>,
    patterns: &[String],
    recursive: bool,
    opts: TransitionOptions,
) -> Result<u8> {
    let mut image = open_image(image_dir)?;
    let _lock = image.lock()?;
    let progress = tracker(opts.quiet, "uninstall");
    image.load_catalogs(progress.as_ref())?;
    image.make_uninstall_plan(
        patterns,
        recursive,
        progress.as_ref(),
        opts.verbose,
        opts.noexecute,
    )?;
    execute(&mut image, TransitionKind::Uninstall, opts)
}

pub fn cmd_image_update(image_dir: Option<&Path>, opts: TransitionOptions) -> Result<u8> {
    let mut image = open_image(image_dir)?;
    let _lock = image.lock()?;
    let progress = tracker(opts.quiet, "image-update");
    image.load_catalogs(progress.as_ref())?;
    image.make_update_plan(progress.as_ref(), opts.verbose, opts.noexecute)?;
    execute(&mut image, TransitionKind::ImageUpdate, opts)
}
