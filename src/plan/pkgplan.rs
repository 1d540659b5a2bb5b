// src/plan/pkgplan.rs

//! Per-package plans
//!
//! A package plan carries one package from its origin version (or nothing)
//! to its destination version (or nothing). Its actions are already in the
//! order they must be applied within that package.

use crate::fmri::Fmri;
use crate::manifest::{Action, ActionType, Manifest};

/// Whether a planned action adds to or takes away from the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Install,
    Remove,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Install => "install",
            StepKind::Remove => "remove",
        }
    }
}

/// One entry of the resolved action sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    pub package: Fmri,
    pub kind: StepKind,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgPlan {
    pub origin: Option<Fmri>,
    pub destination: Option<Fmri>,
    /// Actions to take away, files before directories
    pub removals: Vec<Action>,
    /// Actions to put in place, directories before files
    pub installs: Vec<Action>,
}

impl PkgPlan {
    pub fn install(destination: Fmri, manifest: &Manifest) -> Self {
        Self {
            origin: None,
            destination: Some(destination),
            removals: Vec::new(),
            installs: order_installs(manifest.actions.iter().cloned()),
        }
    }

    pub fn remove(origin: Fmri, manifest: &Manifest) -> Self {
        Self {
            origin: Some(origin),
            destination: None,
            removals: order_removals(manifest.actions.iter().cloned()),
            installs: Vec::new(),
        }
    }

    /// Move between two versions, touching only actions that differ
    pub fn update(origin: Fmri, old: &Manifest, destination: Fmri, new: &Manifest) -> Self {
        let diff = Manifest::diff(old, new);
        let installs = diff
            .added
            .into_iter()
            .chain(diff.changed.into_iter().map(|(_, new)| new));
        Self {
            origin: Some(origin),
            destination: Some(destination),
            removals: order_removals(diff.removed),
            installs: order_installs(installs),
        }
    }

    /// Package this plan is reported under
    pub fn fmri(&self) -> Option<&Fmri> {
        self.destination.as_ref().or(self.origin.as_ref())
    }

    pub fn name(&self) -> &str {
        self.fmri().map(|f| f.name.as_str()).unwrap_or_default()
    }

    pub fn is_update(&self) -> bool {
        self.origin.is_some() && self.destination.is_some()
    }

    pub fn is_removal(&self) -> bool {
        self.destination.is_none()
    }

    /// File actions whose content must be downloaded before execution
    pub fn payloads(&self) -> impl Iterator<Item = &Action> {
        self.installs
            .iter()
            .filter(|a| a.action_type == ActionType::File && a.payload.is_some())
    }

    pub fn download_size(&self) -> u64 {
        self.payloads().map(Action::size).sum()
    }

    /// This package's removals followed by its installs
    pub fn steps(&self) -> impl Iterator<Item = PlannedAction> + '_ {
        let removals = self.origin.iter().flat_map(move |origin| {
            self.removals.iter().map(move |a| PlannedAction {
                package: origin.clone(),
                kind: StepKind::Remove,
                action: a.clone(),
            })
        });
        let installs = self.destination.iter().flat_map(move |dest| {
            self.installs.iter().map(move |a| PlannedAction {
                package: dest.clone(),
                kind: StepKind::Install,
                action: a.clone(),
            })
        });
        removals.chain(installs)
    }
}

fn depth(action: &Action) -> usize {
    action.path().map(|p| p.split('/').count()).unwrap_or(0)
}

/// Directories shallowest first, then files and links, then metadata
fn order_installs(actions: impl IntoIterator<Item = Action>) -> Vec<Action> {
    let (mut dirs, rest): (Vec<_>, Vec<_>) = actions
        .into_iter()
        .partition(|a| a.action_type == ActionType::Dir);
    let (paths, other): (Vec<_>, Vec<_>) = rest
        .into_iter()
        .partition(|a| a.action_type.is_filesystem());
    dirs.sort_by_key(depth);
    dirs.into_iter().chain(paths).chain(other).collect()
}

/// Files and links first, then directories deepest first, then metadata
fn order_removals(actions: impl IntoIterator<Item = Action>) -> Vec<Action> {
    let (mut dirs, rest): (Vec<_>, Vec<_>) = actions
        .into_iter()
        .partition(|a| a.action_type == ActionType::Dir);
    let (paths, other): (Vec<_>, Vec<_>) = rest
        .into_iter()
        .partition(|a| a.action_type.is_filesystem());
    dirs.sort_by_key(|a| std::cmp::Reverse(depth(a)));
    paths.into_iter().chain(dirs).chain(other).collect()
}
