// src/commands/authority.rs
//! Authority configuration and catalog refresh

use super::{EXIT_OK, EXIT_OOPS, EXIT_PARTIAL, open_image};
use anyhow::{Result, bail};
use pkgimage::Error;
use pkgimage::repository::CatalogState;
use std::path::Path;

pub fn cmd_set_authority(
    image_dir: Option<&Path>,
    prefix: &str,
    origin: Option<&str>,
    ssl_key: Option<&str>,
    ssl_cert: Option<&str>,
    preferred: bool,
) -> Result<u8> {
    let mut image = open_image(image_dir)?;
    let _lock = image.lock()?;

    image.set_authority(prefix, origin, ssl_key, ssl_cert)?;
    if preferred {
        image.set_preferred_authority(prefix)?;
    }

    if origin.is_some() {
        match image.retrieve_catalogs(false) {
            Ok(()) => {}
            Err(Error::CatalogRefresh(failures)) => {
                eprintln!("pkg: {}", failures);
                return Ok(EXIT_OOPS);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(EXIT_OK)
}

pub fn cmd_unset_authority(image_dir: Option<&Path>, prefix: &str) -> Result<u8> {
    let mut image = open_image(image_dir)?;
    let _lock = image.lock()?;
    image.delete_authority(prefix)?;
    Ok(EXIT_OK)
}

/// List authorities, or describe the named ones in detail
pub fn cmd_authority(image_dir: Option<&Path>, prefixes: &[String], no_headers: bool) -> Result<u8> {
    let image = open_image(image_dir)?;

    if prefixes.is_empty() {
        if !no_headers {
            println!("{:<35} {}", "AUTHORITY", "URL");
        }
        for authority in image.authorities()? {
            let name = if authority.preferred {
                format!("{} (preferred)", authority.prefix)
            } else {
                authority.prefix.clone()
            };
            println!("{:<35} {}", name, authority.origin_url);
        }
        return Ok(EXIT_OK);
    }

    let mut missing = Vec::new();
    for prefix in prefixes {
        let Some(authority) = image.authority(prefix)? else {
            missing.push(prefix.as_str());
            continue;
        };
        println!();
        println!("      Authority: {}", authority.prefix);
        println!("     Origin URL: {}", authority.origin_url);
        println!("        SSL Key: {}", authority.ssl_key.as_deref().unwrap_or("None"));
        println!("       SSL Cert: {}", authority.ssl_cert.as_deref().unwrap_or("None"));
        println!("      Preferred: {}", if authority.preferred { "Yes" } else { "No" });
        match image.catalog_state(&authority.prefix)? {
            CatalogState::NotRetrieved => println!("        Catalog: not retrieved"),
            CatalogState::Retrieved {
                packages,
                last_modified,
            } => {
                println!("       Packages: {}", packages);
                if let Some(ts) = last_modified {
                    println!("  Last Modified: {}", ts.format("%Y-%m-%d %H:%M:%S UTC"));
                }
            }
        }
    }

    if !missing.is_empty() {
        bail!("no such authorities: {}", missing.join(", "));
    }
    Ok(EXIT_OK)
}

pub fn cmd_refresh(image_dir: Option<&Path>, full: bool) -> Result<u8> {
    let mut image = open_image(image_dir)?;
    let _lock = image.lock()?;

    match image.retrieve_catalogs(full) {
        Ok(()) => Ok(EXIT_OK),
        Err(Error::CatalogRefresh(failures)) => {
            eprintln!(
                "pkg: {}/{} catalogs successfully updated:",
                failures.succeeded, failures.total
            );
            for failure in &failures.failures {
                eprintln!("   {} ({}): {}", failure.prefix, failure.origin, failure.error);
            }
            if failures.timeouts_exhausted {
                eprintln!("   Maximum number of timeouts exceeded during the refresh.");
            }
            Ok(if failures.all_failed() {
                EXIT_OOPS
            } else {
                EXIT_PARTIAL
            })
        }
        Err(e) => Err(e.into()),
    }
}
