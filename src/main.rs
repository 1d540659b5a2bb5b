// src/main.rs

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use std::process::ExitCode;

fn main() -> ExitCode {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match std::panic::catch_unwind(|| run(cli)) {
        Ok(Ok(code)) => ExitCode::from(code),
        Ok(Err(e)) => {
            commands::report_error(&e);
            ExitCode::from(commands::EXIT_OOPS)
        }
        Err(_) => {
            eprintln!(
                "\nThis is an internal error. Please let the developers know about this problem."
            );
            ExitCode::from(commands::EXIT_INTERNAL)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<u8> {
    let image_dir = cli.image_dir;

    match cli.command {
        Commands::ImageCreate {
            dir,
            authority,
            kind,
            ssl_key,
            ssl_cert,
        } => commands::cmd_image_create(&dir, &authority, kind, ssl_key, ssl_cert),

        Commands::SetAuthority {
            prefix,
            origin,
            ssl_key,
            ssl_cert,
            preferred,
        } => commands::cmd_set_authority(
            image_dir.as_deref(),
            &prefix,
            origin.as_deref(),
            ssl_key.as_deref(),
            ssl_cert.as_deref(),
            preferred,
        ),

        Commands::UnsetAuthority { prefix } => {
            commands::cmd_unset_authority(image_dir.as_deref(), &prefix)
        }

        Commands::Authority {
            no_headers,
            prefixes,
        } => commands::cmd_authority(image_dir.as_deref(), &prefixes, no_headers),

        Commands::Refresh { full } => commands::cmd_refresh(image_dir.as_deref(), full),

        Commands::List {
            all,
            upgradable,
            no_headers,
            summary,
            verbose,
            patterns,
        } => commands::cmd_list(
            image_dir.as_deref(),
            &patterns,
            commands::ListOptions {
                all,
                upgradable,
                no_headers,
                summary,
                verbose,
            },
        ),

        Commands::Info { remote, patterns } => {
            commands::cmd_info(image_dir.as_deref(), &patterns, remote)
        }

        Commands::Search {
            local,
            remote,
            servers,
            tokens,
        } => commands::cmd_search(image_dir.as_deref(), &tokens, local, remote, &servers),

        Commands::RebuildIndex => commands::cmd_rebuild_index(image_dir.as_deref()),

        Commands::Install {
            noexecute,
            verbose,
            quiet,
            filters,
            patterns,
        } => commands::cmd_install(
            image_dir.as_deref(),
            &patterns,
            &filters,
            commands::TransitionOptions {
                noexecute,
                verbose,
                quiet,
            },
        ),

        Commands::Uninstall {
            noexecute,
            recursive,
            verbose,
            quiet,
            patterns,
        } => commands::cmd_uninstall(
            image_dir.as_deref(),
            &patterns,
            recursive,
            commands::TransitionOptions {
                noexecute,
                verbose,
                quiet,
            },
        ),

        Commands::ImageUpdate {
            noexecute,
            verbose,
            quiet,
        } => commands::cmd_image_update(
            image_dir.as_deref(),
            commands::TransitionOptions {
                noexecute,
                verbose,
                quiet,
            },
        ),

        Commands::Freeze { patterns } => {
            commands::cmd_freeze(image_dir.as_deref(), &patterns, true)
        }

        Commands::Unfreeze { patterns } => {
            commands::cmd_freeze(image_dir.as_deref(), &patterns, false)
        }

        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(commands::EXIT_OK)
        }
    }
}
