// src/transaction/apply.rs

//! Execution: applying a preexecuted plan to the image
//!
//! Every change is journaled before it is made. Paths that already exist are
//! moved into `txn/<uuid>/backup/` rather than overwritten, so a failure at
//! any step restores the image exactly. The installed set and the transition
//! row are committed together once every action has been applied.

use crate::db::models::{InstalledPackage, Transition};
use crate::db::{self, paths};
use crate::error::{Error, Result};
use crate::image::Image;
use crate::manifest::{Action, ActionType, is_image_relative};
use crate::plan::{ImagePlan, PlanState, PlannedAction, StepKind};
use crate::progress::Phase;
use crate::search;
use chrono::Utc;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::journal::{JournalRecord, TransactionJournal};
use super::recovery::{cleanup_work_dir, rollback};
use super::{ExecOptions, ExecutionOutcome, TransitionKind, move_path};

impl ImagePlan {
    /// Apply every planned action, then commit the new installed set
    ///
    /// On failure every change made so far is undone and the installed set
    /// is left as it was.
    pub fn execute(&mut self, image: &mut Image, opts: &ExecOptions) -> Result<ExecutionOutcome> {
        self.require_state(PlanState::Preexecuted)?;
        self.set_state(PlanState::Executing);

        let tx_uuid = Uuid::new_v4().to_string();
        let kind = opts.kind.unwrap_or(TransitionKind::Install);
        let txn_dir = paths::txn_dir(image.meta_dir());
        let description = self.describe();

        let mut journal = TransactionJournal::create(&txn_dir, &tx_uuid)?;
        journal.write_barrier(&JournalRecord::Begin {
            tx_uuid: tx_uuid.clone(),
            kind: kind.as_str().to_string(),
            description: description.clone(),
            timestamp: Utc::now(),
        })?;
        info!("Executing {} ({} action(s))", tx_uuid, self.actions().len());

        let mut applier = Applier {
            root: image.root().to_path_buf(),
            download_dir: paths::download_dir(image.meta_dir()),
            backup_dir: txn_dir.join(&tx_uuid).join("backup"),
            journal,
            records: Vec::new(),
        };

        if let Some(progress) = opts.progress() {
            progress.start(Phase::Execute, self.actions().len() as u64);
        }
        let mut failure = None;
        for step in self.actions() {
            if let Err(e) = opts.check_cancelled("execution") {
                failure = Some(e);
                break;
            }
            if let Err(e) = applier.apply(step) {
                failure = Some(Error::Execution {
                    package: step.package.to_string(),
                    action: describe_action(&step.action),
                    reason: e.to_string(),
                });
                break;
            }
            if let Some(progress) = opts.progress() {
                progress.increment(1);
            }
        }
        if let Some(e) = failure {
            return Err(self.fail(applier, &txn_dir, &tx_uuid, e));
        }

        if let Err(e) = applier.journal.write_barrier(&JournalRecord::DbCommitIntent {
            tx_uuid: tx_uuid.clone(),
        }) {
            return Err(self.fail(applier, &txn_dir, &tx_uuid, e));
        }

        let pkg_plans = self.pkg_plans();
        let committed = db::transaction(image.conn_mut(), |tx| {
            for pkg in pkg_plans {
                match (&pkg.origin, &pkg.destination) {
                    (_, Some(dest)) => InstalledPackage::new(dest.clone()).upsert(tx)?,
                    (Some(origin), None) => InstalledPackage::delete(tx, &origin.name)?,
                    (None, None) => {}
                }
            }
            Transition::new(&tx_uuid, kind.as_str(), &description).insert(tx)
        });
        if let Err(e) = committed {
            return Err(self.fail(applier, &txn_dir, &tx_uuid, e));
        }

        // Committed: from here on nothing is undone
        let mut journal = applier.journal;
        if let Err(e) = journal.write_barrier(&JournalRecord::DbApplied) {
            warn!("Failed to journal commit of {}: {}", tx_uuid, e);
        }
        if let Err(e) = cleanup_work_dir(&txn_dir, &tx_uuid) {
            warn!("Failed to remove work directory of {}: {}", tx_uuid, e);
        }
        let finished = journal.write_barrier(&JournalRecord::Done { success: true });
        if let Err(e) = finished.and_then(|()| journal.delete()) {
            warn!("Failed to close journal of {}: {}", tx_uuid, e);
        }

        let mut outcome = ExecutionOutcome {
            tx_uuid: Some(tx_uuid),
            ..Default::default()
        };
        for pkg in self.pkg_plans() {
            match (&pkg.origin, &pkg.destination) {
                (None, Some(_)) => outcome.installed += 1,
                (Some(_), Some(_)) => outcome.updated += 1,
                (Some(_), None) => outcome.removed += 1,
                (None, None) => {}
            }
        }

        if let Err(e) = search::update_index(image, self, opts.progress()) {
            warn!("Search index update failed: {}", e);
            outcome.index_warning = Some(e);
        }

        if let Some(progress) = opts.progress() {
            progress.finish_with_message("Execution complete");
        }
        self.set_state(PlanState::ExecutedOk);
        Ok(outcome)
    }

    /// Undo an execution that did not reach its commit
    fn fail(&mut self, applier: Applier, txn_dir: &Path, tx_uuid: &str, error: Error) -> Error {
        warn!("Execution of {} failed, rolling back: {}", tx_uuid, error);
        rollback(&applier.root, &applier.records);

        let mut journal = applier.journal;
        if let Err(e) = journal.write_barrier(&JournalRecord::Done { success: false }) {
            warn!("Failed to journal rollback of {}: {}", tx_uuid, e);
        }
        if let Err(e) = cleanup_work_dir(txn_dir, tx_uuid) {
            warn!("Failed to remove work directory of {}: {}", tx_uuid, e);
        }
        if let Err(e) = journal.delete() {
            warn!("Failed to delete journal of {}: {}", tx_uuid, e);
        }

        self.set_state(PlanState::ExecutedError);
        error
    }

    fn describe(&self) -> String {
        self.pkg_plans()
            .iter()
            .map(|p| {
                let verb = match (p.is_update(), p.is_removal()) {
                    (true, _) => "update",
                    (_, true) => "remove",
                    _ => "install",
                };
                format!("{} {}", verb, p.name())
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn describe_action(action: &Action) -> String {
    match action.key() {
        Some(key) => format!("{} {}", action.action_type, key),
        None => action.action_type.to_string(),
    }
}

/// Applies steps while journaling what rollback needs
struct Applier {
    root: PathBuf,
    download_dir: PathBuf,
    backup_dir: PathBuf,
    journal: TransactionJournal,
    /// Records written so far, for in-process rollback
    records: Vec<JournalRecord>,
}

impl Applier {
    fn record(&mut self, record: JournalRecord) -> Result<()> {
        self.journal.write_barrier(&record)?;
        self.records.push(record);
        Ok(())
    }

    fn apply(&mut self, step: &PlannedAction) -> Result<()> {
        let action = &step.action;
        let Some(rel) = action.path() else {
            // Metadata actions have no filesystem effect
            return Ok(());
        };
        let rel = PathBuf::from(rel);
        if !is_image_relative(&rel) {
            return Err(Error::TransactionError(format!(
                "{} path '{}' leaves the image root",
                action.action_type,
                rel.display()
            )));
        }
        let full = self.root.join(&rel);

        match (step.kind, action.action_type) {
            (StepKind::Install, ActionType::File) => self.install_file(&rel, &full, action),
            (StepKind::Install, ActionType::Dir) => self.install_dir(&rel, &full, action),
            (StepKind::Install, ActionType::Link) => {
                let target = required_attr(action, "target")?;
                self.make_room(&rel, &full)?;
                std::os::unix::fs::symlink(target, &full)?;
                Ok(())
            }
            (StepKind::Install, ActionType::Hardlink) => {
                let target = required_attr(action, "target")?;
                let source = hardlink_source(&rel, target)
                    .map(|p| self.root.join(p))
                    .ok_or_else(|| {
                        Error::TransactionError(format!(
                            "hardlink target '{target}' leaves the image root"
                        ))
                    })?;
                self.make_room(&rel, &full)?;
                fs::hard_link(&source, &full)?;
                Ok(())
            }
            (StepKind::Remove, ActionType::Dir) => self.remove_dir(&rel, &full),
            (StepKind::Remove, _) => self.remove_path(&rel, &full),
            _ => Ok(()),
        }
    }

    fn install_file(&mut self, rel: &Path, full: &Path, action: &Action) -> Result<()> {
        let hash = action
            .payload
            .as_deref()
            .ok_or_else(|| Error::TransactionError("file action without payload".to_string()))?;
        let staged = self.download_dir.join(hash);
        if !staged.is_file() {
            return Err(Error::TransactionError(format!(
                "payload {hash} was not downloaded"
            )));
        }

        self.make_room(rel, full)?;
        let parent = full.parent().unwrap_or(self.root.as_path());
        let tmp = tempfile::NamedTempFile::new_in(parent)?;
        fs::copy(&staged, tmp.path())?;
        if let Some(mode) = parse_mode(action)? {
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode))?;
        }
        tmp.persist(full).map_err(|e| Error::Io(e.error))?;
        debug!("Installed {}", rel.display());
        Ok(())
    }

    fn install_dir(&mut self, rel: &Path, full: &Path, action: &Action) -> Result<()> {
        match full.symlink_metadata() {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(Error::TransactionError(format!(
                    "{} exists and is not a directory",
                    rel.display()
                )));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.create_parents(rel)?;
                self.record(JournalRecord::Create {
                    path: rel.to_path_buf(),
                    is_dir: true,
                })?;
                fs::create_dir(full)?;
            }
            Err(e) => return Err(Error::Io(e)),
        }
        if let Some(mode) = parse_mode(action)? {
            fs::set_permissions(full, fs::Permissions::from_mode(mode))?;
        }
        Ok(())
    }

    /// Prepare `full` to be written: create missing parents and move any
    /// existing file or link aside
    fn make_room(&mut self, rel: &Path, full: &Path) -> Result<()> {
        self.create_parents(rel)?;
        match full.symlink_metadata() {
            Ok(meta) if meta.is_dir() => Err(Error::TransactionError(format!(
                "{} is a directory",
                rel.display()
            ))),
            Ok(_) => self.backup(rel, full),
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.record(JournalRecord::Create {
                path: rel.to_path_buf(),
                is_dir: false,
            }),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn create_parents(&mut self, rel: &Path) -> Result<()> {
        let Some(parent) = rel.parent() else {
            return Ok(());
        };
        let mut missing: Vec<&Path> = parent
            .ancestors()
            .filter(|p| !p.as_os_str().is_empty())
            .take_while(|p| self.root.join(p).symlink_metadata().is_err())
            .collect();
        missing.reverse();
        for dir in missing {
            self.record(JournalRecord::Create {
                path: dir.to_path_buf(),
                is_dir: true,
            })?;
            fs::create_dir(self.root.join(dir))?;
        }
        Ok(())
    }

    fn backup(&mut self, rel: &Path, full: &Path) -> Result<()> {
        fs::create_dir_all(&self.backup_dir)?;
        let backup_path = self.backup_dir.join(self.records.len().to_string());
        self.record(JournalRecord::Backup {
            path: rel.to_path_buf(),
            backup_path: backup_path.clone(),
        })?;
        move_path(full, &backup_path)?;
        Ok(())
    }

    fn remove_path(&mut self, rel: &Path, full: &Path) -> Result<()> {
        match full.symlink_metadata() {
            Ok(meta) if meta.is_dir() => {
                warn!("Not removing {}: it is now a directory", rel.display());
                Ok(())
            }
            Ok(_) => self.backup(rel, full),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} already gone", rel.display());
                Ok(())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn remove_dir(&mut self, rel: &Path, full: &Path) -> Result<()> {
        if !full.is_dir() {
            return Ok(());
        }
        if fs::read_dir(full)?.next().is_some() {
            warn!("Directory {} not empty, leaving it in place", rel.display());
            return Ok(());
        }
        self.record(JournalRecord::RemoveDir {
            path: rel.to_path_buf(),
        })?;
        fs::remove_dir(full)?;
        Ok(())
    }
}

/// Image-relative source of a hardlink at `rel`, resolved lexically
fn hardlink_source(rel: &Path, target: &str) -> Option<PathBuf> {
    let joined = match target.strip_prefix('/') {
        Some(absolute) => PathBuf::from(absolute),
        None => rel.parent().unwrap_or(Path::new("")).join(target),
    };
    let mut resolved = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    is_image_relative(&resolved).then_some(resolved)
}

fn required_attr<'a>(action: &'a Action, key: &str) -> Result<&'a str> {
    action.attr(key).ok_or_else(|| {
        Error::TransactionError(format!("{} action missing '{}'", action.action_type, key))
    })
}

/// Octal `mode` attribute
fn parse_mode(action: &Action) -> Result<Option<u32>> {
    action
        .attr("mode")
        .map(|m| {
            u32::from_str_radix(m, 8)
                .map_err(|_| Error::ParseError(format!("invalid mode '{m}'")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn applier(dir: &TempDir) -> Applier {
        let root = dir.path().join("root");
        let meta = root.join("var/pkg");
        let txn = paths::txn_dir(&meta);
        fs::create_dir_all(paths::download_dir(&meta)).unwrap();
        Applier {
            download_dir: paths::download_dir(&meta),
            backup_dir: txn.join("t").join("backup"),
            journal: TransactionJournal::create(&txn, "t").unwrap(),
            records: Vec::new(),
            root,
        }
    }

    fn step(kind: StepKind, line: &str) -> PlannedAction {
        PlannedAction {
            package: crate::fmri::Fmri::parse("pkg://test/demo@1.0").unwrap(),
            kind,
            action: Action::parse(line).unwrap(),
        }
    }

    #[test]
    fn test_install_file_creates_parents_and_sets_mode() {
        let dir = TempDir::new().unwrap();
        let mut a = applier(&dir);
        fs::write(a.download_dir.join("abc"), "hello").unwrap();

        a.apply(&step(StepKind::Install, "file abc path=opt/demo/hello mode=0644"))
            .unwrap();

        let installed = a.root.join("opt/demo/hello");
        assert_eq!(fs::read_to_string(&installed).unwrap(), "hello");
        let mode = fs::metadata(&installed).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
        // opt, opt/demo, then the file
        assert_eq!(a.records.len(), 3);
    }

    #[test]
    fn test_overwrite_backs_up_and_rolls_back() {
        let dir = TempDir::new().unwrap();
        let mut a = applier(&dir);
        fs::create_dir_all(a.root.join("etc")).unwrap();
        fs::write(a.root.join("etc/motd"), "old").unwrap();
        fs::write(a.download_dir.join("new"), "new").unwrap();

        a.apply(&step(StepKind::Install, "file new path=etc/motd")).unwrap();
        assert_eq!(fs::read_to_string(a.root.join("etc/motd")).unwrap(), "new");

        rollback(&a.root, &a.records);
        assert_eq!(fs::read_to_string(a.root.join("etc/motd")).unwrap(), "old");
    }

    #[test]
    fn test_remove_non_empty_dir_is_kept() {
        let dir = TempDir::new().unwrap();
        let mut a = applier(&dir);
        fs::create_dir_all(a.root.join("opt/shared")).unwrap();
        fs::write(a.root.join("opt/shared/other"), "x").unwrap();

        a.apply(&step(StepKind::Remove, "dir path=opt/shared")).unwrap();
        assert!(a.root.join("opt/shared").is_dir());
        assert!(a.records.is_empty());
    }

    #[test]
    fn test_link_and_missing_payload() {
        let dir = TempDir::new().unwrap();
        let mut a = applier(&dir);

        a.apply(&step(StepKind::Install, "link path=usr/bin/sh target=bash"))
            .unwrap();
        assert_eq!(
            fs::read_link(a.root.join("usr/bin/sh")).unwrap(),
            Path::new("bash")
        );

        let err = a
            .apply(&step(StepKind::Install, "file missing path=usr/bin/bash"))
            .unwrap_err();
        assert!(err.to_string().contains("not downloaded"));
    }

    #[test]
    fn test_paths_outside_root_are_refused() {
        let dir = TempDir::new().unwrap();
        let mut a = applier(&dir);
        fs::write(a.download_dir.join("abc"), "x").unwrap();

        let escaping = PlannedAction {
            package: crate::fmri::Fmri::parse("pkg://test/demo@1.0").unwrap(),
            kind: StepKind::Install,
            action: Action::new(ActionType::File)
                .with_payload("abc")
                .with_attr("path", "../escaped.txt"),
        };
        assert!(a.apply(&escaping).is_err());
        assert!(!dir.path().join("escaped.txt").exists());
        assert!(a.records.is_empty());

        let err = a
            .apply(&step(StepKind::Install, "hardlink path=usr/bin/x target=../../../etc/passwd"))
            .unwrap_err();
        assert!(err.to_string().contains("leaves the image root"));
    }

    #[test]
    fn test_hardlink_source_resolution() {
        assert_eq!(
            hardlink_source(Path::new("usr/bin/x"), "../lib/y"),
            Some(PathBuf::from("usr/lib/y"))
        );
        assert_eq!(
            hardlink_source(Path::new("usr/bin/x"), "/etc/z"),
            Some(PathBuf::from("etc/z"))
        );
        assert_eq!(hardlink_source(Path::new("x"), "../y"), None);
    }

    #[test]
    fn test_metadata_actions_are_noops() {
        let dir = TempDir::new().unwrap();
        let mut a = applier(&dir);
        a.apply(&step(StepKind::Install, "set name=pkg.description value=demo"))
            .unwrap();
        assert!(a.records.is_empty());
    }
}
