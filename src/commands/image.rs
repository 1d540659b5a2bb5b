// src/commands/image.rs
//! Image creation and index maintenance

use super::progress::tracker;
use super::{EXIT_OK, open_image};
use crate::cli::ImageKind;
use anyhow::{Context, Result, bail};
use pkgimage::{Image, ImageType};
use std::path::Path;
use tracing::info;

/// Create an image at `dir` with one authority given as `prefix=origin`
pub fn cmd_image_create(
    dir: &Path,
    authority: &str,
    kind: ImageKind,
    ssl_key: Option<String>,
    ssl_cert: Option<String>,
) -> Result<u8> {
    let Some((prefix, origin)) = authority.split_once('=') else {
        bail!("authority must be given as prefix=origin_url, not '{}'", authority);
    };
    let image_type = match kind {
        ImageKind::Full => ImageType::Full,
        ImageKind::User => ImageType::User,
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let mut image = Image::create(
        dir,
        image_type,
        prefix,
        origin,
        ssl_key.as_deref(),
        ssl_cert.as_deref(),
    )?;
    info!("Created {} image at {}", image_type, dir.display());

    // A failed first refresh still leaves a usable image
    if let Err(e) = image.retrieve_catalogs(true) {
        eprintln!("pkg: {}", e);
        eprintln!("The image was created; run 'pkg refresh' once the authority is reachable.");
    }
    Ok(EXIT_OK)
}

pub fn cmd_rebuild_index(image_dir: Option<&Path>) -> Result<u8> {
    let image = open_image(image_dir)?;
    let _lock = image.lock()?;
    let progress = tracker(false, "rebuild-index");
    image.rebuild_search_index(progress.as_ref())?;
    Ok(EXIT_OK)
}

/// Freeze or unfreeze the installed packages matching `patterns`
pub fn cmd_freeze(image_dir: Option<&Path>, patterns: &[String], frozen: bool) -> Result<u8> {
    let mut image = open_image(image_dir)?;
    let _lock = image.lock()?;
    let changed = image.set_frozen(patterns, frozen)?;
    for fmri in &changed {
        println!("{} {}", if frozen { "Froze" } else { "Unfroze" }, fmri);
    }
    Ok(EXIT_OK)
}
