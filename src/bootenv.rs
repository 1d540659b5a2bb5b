// src/bootenv.rs

//! Boot-environment snapshots around image transitions
//!
//! On a live root with the platform `beadm` tool, a transition is bracketed
//! by a snapshot boot environment that can be activated if the transition
//! fails. Everywhere else the no-op `NullBootEnv` is used.

use crate::error::{Error, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Snapshot and restore hooks called by the execution controller
pub trait BootEnvironment {
    /// Take the snapshot a failed transition falls back to
    fn init_image_recovery(&mut self) -> Result<()>;

    /// An image-update succeeded
    fn activate_image(&mut self) -> Result<()>;

    /// An image-update failed
    fn restore_image(&mut self) -> Result<()>;

    /// An install or uninstall succeeded
    fn activate_install_uninstall(&mut self) -> Result<()>;

    /// An install or uninstall failed
    fn restore_install_uninstall(&mut self) -> Result<()>;

    fn is_snapshot_capable(&self) -> bool;
}

/// Pick the boot environment for an image rooted at `root`
pub fn select(root: &Path) -> Box<dyn BootEnvironment> {
    if root == Path::new("/") {
        match which::which("beadm") {
            Ok(beadm) => {
                debug!("Using beadm at {}", beadm.display());
                return Box::new(BeadmBootEnv::new(beadm));
            }
            Err(e) => debug!("beadm unavailable ({}), no boot environment snapshots", e),
        }
    }
    Box::new(NullBootEnv)
}

/// No snapshots; every hook succeeds without doing anything
#[derive(Debug, Default)]
pub struct NullBootEnv;

impl BootEnvironment for NullBootEnv {
    fn init_image_recovery(&mut self) -> Result<()> {
        Ok(())
    }

    fn activate_image(&mut self) -> Result<()> {
        Ok(())
    }

    fn restore_image(&mut self) -> Result<()> {
        Ok(())
    }

    fn activate_install_uninstall(&mut self) -> Result<()> {
        Ok(())
    }

    fn restore_install_uninstall(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_snapshot_capable(&self) -> bool {
        false
    }
}

/// Snapshots through `beadm create`/`activate`/`destroy`
#[derive(Debug)]
pub struct BeadmBootEnv {
    beadm: PathBuf,
    /// Name of the snapshot taken by `init_image_recovery`
    snapshot: Option<String>,
}

impl BeadmBootEnv {
    pub fn new(beadm: PathBuf) -> Self {
        Self {
            beadm,
            snapshot: None,
        }
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        debug!("Running beadm {}", args.join(" "));
        let output = Command::new(&self.beadm)
            .args(args)
            .output()
            .map_err(|e| Error::TransactionError(format!("Failed to run beadm: {}", e)))?;

        if !output.status.success() {
            return Err(Error::TransactionError(format!(
                "beadm {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn restore(&mut self) -> Result<()> {
        let Some(name) = self.snapshot.clone() else {
            return Ok(());
        };
        self.run(&["activate", &name])?;
        warn!(
            "The image could not be changed; boot environment '{}' has been activated. Reboot to return to it.",
            name
        );
        Ok(())
    }
}

impl BootEnvironment for BeadmBootEnv {
    fn init_image_recovery(&mut self) -> Result<()> {
        let name = format!("pkg-{}", Utc::now().format("%Y%m%d-%H%M%S"));
        self.run(&["create", &name])?;
        info!("Created boot environment snapshot {}", name);
        self.snapshot = Some(name);
        Ok(())
    }

    fn activate_image(&mut self) -> Result<()> {
        if let Some(name) = &self.snapshot {
            info!("Boot environment '{}' kept as a fallback", name);
        }
        Ok(())
    }

    fn restore_image(&mut self) -> Result<()> {
        self.restore()
    }

    fn activate_install_uninstall(&mut self) -> Result<()> {
        if let Some(name) = self.snapshot.take() {
            self.run(&["destroy", "-F", &name])?;
            debug!("Destroyed boot environment snapshot {}", name);
        }
        Ok(())
    }

    fn restore_install_uninstall(&mut self) -> Result<()> {
        self.restore()
    }

    fn is_snapshot_capable(&self) -> bool {
        true
    }
}
