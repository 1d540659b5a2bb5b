// src/cli.rs
//! CLI definitions for the pkg image packaging client
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pkg")]
#[command(author = "pkgimage Contributors")]
#[command(version)]
#[command(about = "Image packaging client", long_about = None)]
pub struct Cli {
    /// Operate on the image rooted at this directory
    #[arg(short = 'R', long = "image-dir", global = true, env = "PKG_IMAGE")]
    pub image_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ImageKind {
    Full,
    User,
}

#[derive(Subcommand)]
pub enum Commands {
    // =========================================================================
    // Image and authorities
    // =========================================================================
    /// Create an image at the given directory
    ImageCreate {
        /// Image root directory
        dir: PathBuf,

        /// Authority as prefix=origin_url
        #[arg(short = 'a', long)]
        authority: String,

        /// Kind of image to create
        #[arg(long = "type", value_enum, default_value = "user")]
        kind: ImageKind,

        /// Client SSL key for the authority
        #[arg(short = 'k', long)]
        ssl_key: Option<String>,

        /// Client SSL certificate for the authority
        #[arg(short = 'c', long)]
        ssl_cert: Option<String>,
    },

    /// Add or update an authority
    SetAuthority {
        prefix: String,

        /// Origin URL
        #[arg(short = 'O', long)]
        origin: Option<String>,

        /// Client SSL key
        #[arg(short = 'k', long)]
        ssl_key: Option<String>,

        /// Client SSL certificate
        #[arg(short = 'c', long)]
        ssl_cert: Option<String>,

        /// Make this the preferred authority
        #[arg(short = 'P', long)]
        preferred: bool,
    },

    /// Remove an authority
    UnsetAuthority { prefix: String },

    /// Show configured authorities
    Authority {
        /// Omit headers
        #[arg(short = 'H')]
        no_headers: bool,

        /// Show details of these authorities
        prefixes: Vec<String>,
    },

    /// Refresh catalogs from every authority
    Refresh {
        /// Fetch whole catalogs instead of updates
        #[arg(long)]
        full: bool,
    },

    // =========================================================================
    // Queries
    // =========================================================================
    /// List installed (or known) packages
    List {
        /// Include every package known to the catalogs
        #[arg(short = 'a')]
        all: bool,

        /// Only packages with a newer version available
        #[arg(short = 'u')]
        upgradable: bool,

        /// Omit headers
        #[arg(short = 'H')]
        no_headers: bool,

        /// Show package summaries
        #[arg(short = 's', conflicts_with = "verbose")]
        summary: bool,

        /// Show full FMRIs
        #[arg(short = 'v')]
        verbose: bool,

        patterns: Vec<String>,
    },

    /// Show package information
    Info {
        /// Query the catalogs instead of the installed set
        #[arg(short = 'r')]
        remote: bool,

        patterns: Vec<String>,
    },

    /// Search for packages by token
    Search {
        /// Search the local index
        #[arg(short = 'l')]
        local: bool,

        /// Search the authorities
        #[arg(short = 'r')]
        remote: bool,

        /// Search this server instead of the configured authorities
        #[arg(short = 's', long = "server")]
        servers: Vec<String>,

        #[arg(required = true)]
        tokens: Vec<String>,
    },

    /// Rebuild the local search index
    RebuildIndex,

    // =========================================================================
    // Transitions
    // =========================================================================
    /// Install packages
    Install {
        /// Evaluate only; change nothing
        #[arg(short = 'n')]
        noexecute: bool,

        /// Show the plan
        #[arg(short = 'v')]
        verbose: bool,

        /// No progress output
        #[arg(short = 'q')]
        quiet: bool,

        /// Only install actions whose attribute matches (attr=value)
        #[arg(short = 'f', long = "filter")]
        filters: Vec<String>,

        #[arg(required = true)]
        patterns: Vec<String>,
    },

    /// Remove installed packages
    Uninstall {
        #[arg(short = 'n')]
        noexecute: bool,

        /// Also remove packages that depend on the named ones
        #[arg(short = 'r')]
        recursive: bool,

        #[arg(short = 'v')]
        verbose: bool,

        #[arg(short = 'q')]
        quiet: bool,

        #[arg(required = true)]
        patterns: Vec<String>,
    },

    /// Update every installed package
    ImageUpdate {
        #[arg(short = 'n')]
        noexecute: bool,

        #[arg(short = 'v')]
        verbose: bool,

        #[arg(short = 'q')]
        quiet: bool,
    },

    /// Hold installed packages at their current versions during image-update
    Freeze {
        #[arg(required = true)]
        patterns: Vec<String>,
    },

    /// Release packages held by freeze
    Unfreeze {
        #[arg(required = true)]
        patterns: Vec<String>,
    },

    /// Print the client version
    Version,
}
