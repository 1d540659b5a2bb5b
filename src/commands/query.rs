// src/commands/query.rs
//! Read-only queries: list, info, search

use super::{EXIT_OK, EXIT_OOPS, EXIT_SEARCH_PARTIAL, open_image};
use anyhow::Result;
use pkgimage::db::models::Authority;
use pkgimage::{Error, Fmri, Image, PkgState, PkgStatus, PkgVersion, SearchHit, SilentProgress};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    pub all: bool,
    pub upgradable: bool,
    pub no_headers: bool,
    pub summary: bool,
    pub verbose: bool,
}

/// `release-branch`, the form shown in listings
fn short_version(version: Option<&PkgVersion>) -> String {
    match version {
        Some(v) => match &v.branch {
            Some(branch) => format!("{}-{}", v.release, branch),
            None => v.release.to_string(),
        },
        None => String::new(),
    }
}

/// The `UFIX` column: upgradable, frozen, incorporated, excludes
fn state_flags(state: &PkgState) -> String {
    [
        (state.upgradable, 'u'),
        (state.frozen, 'f'),
        (state.incorporated, 'i'),
        (state.excludes, 'x'),
    ]
    .iter()
    .map(|&(set, flag)| if set { flag } else { '-' })
    .collect()
}

/// Package name, with its authority when that is not the preferred one
fn display_name(fmri: &Fmri, preferred: Option<&str>) -> String {
    match fmri.authority.as_deref() {
        Some(auth) if Some(auth) != preferred => format!("{} ({})", fmri.name, auth),
        _ => fmri.name.clone(),
    }
}

pub fn cmd_list(image_dir: Option<&Path>, patterns: &[String], opts: ListOptions) -> Result<u8> {
    let mut image = open_image(image_dir)?;
    image.load_catalogs(&SilentProgress::new())?;
    let preferred = image.preferred_prefix()?;

    let result = image.inventory(patterns, opts.all)?;
    let found: Vec<(Fmri, PkgState)> = result
        .found
        .into_iter()
        .filter(|(_, state)| !opts.upgradable || state.upgradable)
        .collect();

    if found.is_empty() && result.not_found.is_empty() {
        let reason = if opts.upgradable {
            "no installed packages have available updates"
        } else if opts.all {
            "no packages are known to the catalogs"
        } else {
            "no packages installed"
        };
        eprintln!("pkg: {}", reason);
        return Ok(EXIT_OOPS);
    }

    if !found.is_empty() && !opts.no_headers {
        if opts.verbose {
            println!("{:<64} {:<10} {}", "FMRI", "STATE", "UFIX");
        } else if opts.summary {
            println!("{:<30} {}", "NAME (AUTHORITY)", "SUMMARY");
        } else {
            println!(
                "{:<45} {:<15} {:<10} {}",
                "NAME (AUTHORITY)", "VERSION", "STATE", "UFIX"
            );
        }
    }

    for (fmri, state) in &found {
        if opts.verbose {
            println!(
                "{:<64} {:<10} {}",
                fmri.to_string(),
                state.state.as_str(),
                state_flags(state)
            );
        } else if opts.summary {
            let manifest = image.get_manifest(fmri, false)?;
            println!(
                "{:<30} {}",
                display_name(fmri, preferred.as_deref()),
                manifest.summary().unwrap_or("")
            );
        } else {
            println!(
                "{:<45} {:<15} {:<10} {}",
                display_name(fmri, preferred.as_deref()),
                short_version(fmri.version.as_ref()),
                state.state.as_str(),
                state_flags(state)
            );
        }
    }

    if !result.not_found.is_empty() {
        let scope = if opts.all { "known" } else { "installed" };
        eprintln!(
            "pkg: no packages matching '{}' {}",
            result.not_found.join(", "),
            scope
        );
        return Ok(EXIT_OOPS);
    }
    Ok(EXIT_OK)
}

fn human_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} kB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn print_info(image: &Image, fmri: &Fmri, state: &PkgState, preferred: Option<&str>) -> Result<()> {
    let manifest = image.get_manifest(fmri, false)?;
    let authority = match fmri.authority.as_deref() {
        Some(auth) if Some(auth) == preferred => format!("{} (preferred)", auth),
        Some(auth) => auth.to_string(),
        None => String::new(),
    };
    let version = fmri.version.as_ref();

    println!("          Name: {}", fmri.name);
    println!("       Summary: {}", manifest.summary().unwrap_or(""));
    println!(
        "         State: {}",
        match state.state {
            PkgStatus::Installed => "Installed",
            PkgStatus::Known => "Not installed",
        }
    );
    println!("     Authority: {}", authority);
    println!(
        "       Version: {}",
        version.map(|v| v.release.to_string()).unwrap_or_default()
    );
    println!(
        " Build Release: {}",
        version
            .and_then(|v| v.build_release.as_ref())
            .map(ToString::to_string)
            .unwrap_or_default()
    );
    println!(
        "        Branch: {}",
        version
            .and_then(|v| v.branch.as_ref())
            .map(ToString::to_string)
            .unwrap_or_default()
    );
    println!(
        "Packaging Date: {}",
        version
            .and_then(|v| v.timestamp)
            .map(|ts| ts.format("%a %b %d %H:%M:%S %Y").to_string())
            .unwrap_or_default()
    );
    println!("          Size: {}", human_size(manifest.size()));
    println!("          FMRI: {}", fmri);
    Ok(())
}

pub fn cmd_info(image_dir: Option<&Path>, patterns: &[String], remote: bool) -> Result<u8> {
    let mut image = open_image(image_dir)?;
    if remote {
        image.load_catalogs(&SilentProgress::new())?;
    }
    let preferred = image.preferred_prefix()?;

    let result = image.inventory(patterns, remote)?;

    // Catalog listings carry every version, newest first; show only the newest.
    let mut seen = BTreeSet::new();
    let mut first = true;
    for (fmri, state) in &result.found {
        if !seen.insert(fmri.name.clone()) {
            continue;
        }
        if !first {
            println!();
        }
        first = false;
        print_info(&image, fmri, state, preferred.as_deref())?;
    }

    if !result.not_found.is_empty() {
        if remote {
            eprintln!(
                "pkg: no packages matching the following patterns you specified were\n\
                 found in the catalog.  Try relaxing the patterns, refreshing, and/or\n\
                 examining the catalogs:"
            );
        } else {
            eprintln!(
                "pkg: no packages matching the following patterns you specified are\n\
                 installed on the system.  Try specifying -r to query remotely:"
            );
        }
        eprintln!();
        for pattern in &result.not_found {
            eprintln!("        {}", pattern);
        }
        return Ok(EXIT_OOPS);
    }
    Ok(EXIT_OK)
}

/// Prints hits under a header chosen by the first one
struct HitPrinter<'a> {
    preferred: Option<&'a str>,
    printed: usize,
}

impl HitPrinter<'_> {
    fn print(&mut self, hit: &SearchHit) {
        let fmri = hit.fmri.get_short_fmri(self.preferred);
        match &hit.action_type {
            Some(action) => {
                if self.printed == 0 {
                    println!("{:<10} {:<9} {:<25} {}", "INDEX", "ACTION", "VALUE", "PACKAGE");
                }
                println!(
                    "{:<10} {:<9} {:<25} {}",
                    hit.index,
                    action,
                    hit.value.as_deref().unwrap_or(""),
                    fmri
                );
            }
            None => {
                if self.printed == 0 {
                    println!("{:<10} {}", "INDEX", "PACKAGE");
                }
                println!("{:<10} {}", hit.index, fmri);
            }
        }
        self.printed += 1;
    }
}

/// Authorities for `-s`: each server stands in as its own authority
fn server_authorities(servers: &[String]) -> Vec<Authority> {
    servers
        .iter()
        .map(|server| {
            let origin = if server.contains("://") {
                server.clone()
            } else {
                format!("http://{}", server)
            };
            let prefix = origin
                .split_once("://")
                .map(|(_, rest)| rest.trim_end_matches('/'))
                .unwrap_or(server)
                .to_string();
            Authority::new(prefix, origin)
        })
        .collect()
}

pub fn cmd_search(
    image_dir: Option<&Path>,
    tokens: &[String],
    local: bool,
    remote: bool,
    servers: &[String],
) -> Result<u8> {
    let image = open_image(image_dir)?;
    let preferred = image.preferred_prefix()?;
    let remote = remote || !servers.is_empty();
    let local = local || !remote;

    let mut printer = HitPrinter {
        preferred: preferred.as_deref(),
        printed: 0,
    };

    if local {
        for hit in image.local_search(tokens)? {
            printer.print(&hit?);
        }
    }

    let mut partial = false;
    if remote {
        let authorities = if servers.is_empty() {
            image.authorities()?
        } else {
            server_authorities(servers)
        };
        for item in image.remote_search(tokens, authorities) {
            match item {
                Ok(hit) => printer.print(&hit),
                Err(Error::SearchFailed(failures)) => {
                    partial = true;
                    eprintln!("Some servers failed to respond:");
                    for failure in &failures.failures {
                        eprintln!("    {}: {}", failure.origin, failure.error);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    if partial {
        Ok(EXIT_SEARCH_PARTIAL)
    } else if printer.printed == 0 {
        Ok(EXIT_OOPS)
    } else {
        Ok(EXIT_OK)
    }
}
