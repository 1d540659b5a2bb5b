// src/commands/mod.rs
//! Command handlers for the pkg CLI
//!
//! Every handler returns the process exit code on success; errors are
//! reported by `report_error` and exit with `EXIT_OOPS`.

mod authority;
mod image;
pub mod progress;
mod query;
mod transition;

pub use authority::{cmd_authority, cmd_refresh, cmd_set_authority, cmd_unset_authority};
pub use image::{cmd_freeze, cmd_image_create, cmd_rebuild_index};
pub use query::{ListOptions, cmd_info, cmd_list, cmd_search};
pub use transition::{TransitionOptions, cmd_image_update, cmd_install, cmd_uninstall};

use anyhow::{Context, Result};
use pkgimage::Image;
use std::path::Path;

pub const EXIT_OK: u8 = 0;
pub const EXIT_OOPS: u8 = 1;
/// Some catalogs could not be refreshed
pub const EXIT_PARTIAL: u8 = 3;
/// Some authorities failed to answer a search
pub const EXIT_SEARCH_PARTIAL: u8 = 4;
pub const EXIT_INTERNAL: u8 = 99;

/// Open the image at `dir`, or the one enclosing the working directory
pub(crate) fn open_image(dir: Option<&Path>) -> Result<Image> {
    let root = match dir {
        Some(dir) => dir.to_path_buf(),
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            let (root, _) = Image::find_root(&cwd)
                .context("No image found; use -R or set PKG_IMAGE")?;
            root
        }
    };
    Image::open(&root).with_context(|| format!("Failed to open image at {}", root.display()))
}

/// Print an error and any remediation the library attaches to it
pub fn report_error(err: &anyhow::Error) {
    eprintln!("pkg: {:#}", err);
    let hint = err
        .chain()
        .find_map(|e| e.downcast_ref::<pkgimage::Error>())
        .and_then(pkgimage::Error::remediation);
    if let Some(hint) = hint {
        eprintln!("{}", hint);
    }
}
