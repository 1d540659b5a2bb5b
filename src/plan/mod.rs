// src/plan/mod.rs

//! Image plans
//!
//! An `ImagePlan` describes one transition of the image: packages to
//! install, update, and remove, and the ordered actions that carry it out.
//! A plan moves through its states exactly once:
//!
//! ```text
//! Unevaluated -> Evaluated -> Preexecuted -> Executing -> ExecutedOk
//!                                                      \-> ExecutedError
//! ```
//!
//! Proposals are only accepted while unevaluated. Preexecution and execution
//! live in the `transaction` module.

mod evaluate;
pub mod graph;
mod pkgplan;

pub use graph::DependencyGraph;
pub use pkgplan::{PkgPlan, PlannedAction, StepKind};

use crate::error::{Error, Result};
use crate::fmri::{Fmri, FmriPattern};
use crate::image::Image;
use crate::manifest::ActionFilter;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    Unevaluated,
    Evaluated,
    Preexecuted,
    Executing,
    ExecutedOk,
    ExecutedError,
}

impl PlanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanState::Unevaluated => "unevaluated",
            PlanState::Evaluated => "evaluated",
            PlanState::Preexecuted => "preexecuted",
            PlanState::Executing => "executing",
            PlanState::ExecutedOk => "executed",
            PlanState::ExecutedError => "failed",
        }
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct ImagePlan {
    recursive_removal: bool,
    filters: Vec<ActionFilter>,
    /// Evaluate only; execution is refused
    noexecute: bool,
    state: PlanState,
    /// Explicitly requested installs and updates
    target_fmris: Vec<Fmri>,
    /// Explicitly requested removals (installed FMRIs)
    target_rem_fmris: Vec<Fmri>,
    pkg_plans: Vec<PkgPlan>,
    actions: Vec<PlannedAction>,
}

impl ImagePlan {
    pub fn new(recursive_removal: bool, filters: Vec<ActionFilter>) -> Self {
        Self {
            recursive_removal,
            filters,
            noexecute: false,
            state: PlanState::Unevaluated,
            target_fmris: Vec::new(),
            target_rem_fmris: Vec::new(),
            pkg_plans: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn state(&self) -> PlanState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: PlanState) {
        debug!("Image plan {} -> {}", self.state, state);
        self.state = state;
    }

    /// Fail unless the plan is in `expected`
    pub(crate) fn require_state(&self, expected: PlanState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidPlanState {
                expected: expected.as_str(),
                found: self.state.as_str(),
            })
        }
    }

    pub fn set_noexecute(&mut self, noexecute: bool) {
        self.noexecute = noexecute;
    }

    pub fn noexecute(&self) -> bool {
        self.noexecute
    }

    pub fn filters(&self) -> &[ActionFilter] {
        &self.filters
    }

    pub fn target_fmris(&self) -> &[Fmri] {
        &self.target_fmris
    }

    pub fn target_rem_fmris(&self) -> &[Fmri] {
        &self.target_rem_fmris
    }

    /// Package plans in execution order
    pub fn pkg_plans(&self) -> &[PkgPlan] {
        &self.pkg_plans
    }

    /// Resolved action sequence in execution order
    pub fn actions(&self) -> &[PlannedAction] {
        &self.actions
    }

    /// Propose installing the latest match of each pattern
    ///
    /// Every pattern is resolved before anything is proposed; patterns that
    /// match nothing are reported together and leave the proposal untouched.
    pub fn propose_install(&mut self, image: &Image, patterns: &[String]) -> Result<()> {
        self.require_state(PlanState::Unevaluated)?;

        let mut resolved = Vec::new();
        let mut not_found = Vec::new();
        for pattern in patterns {
            match image.resolve_latest(pattern) {
                Ok(fmri) => resolved.push(fmri),
                Err(Error::PatternsNotFound(mut unmatched)) => not_found.append(&mut unmatched),
                Err(e) => return Err(e),
            }
        }
        if !not_found.is_empty() {
            return Err(Error::PatternsNotFound(not_found));
        }

        for fmri in resolved {
            if let Some(installed) = image.installed_fmri(&fmri.name)?
                && installed.version >= fmri.version
            {
                info!("{} is already installed", installed);
                continue;
            }
            self.add_target(fmri);
        }
        Ok(())
    }

    /// Propose updating every installed package to its latest catalog version
    ///
    /// Frozen packages stay where they are.
    pub fn propose_update_all(&mut self, image: &Image) -> Result<()> {
        self.require_state(PlanState::Unevaluated)?;

        for pkg in image.installed_packages()? {
            if pkg.frozen {
                debug!("{} is frozen, not updating", pkg.fmri);
                continue;
            }
            let candidates = image.catalog().versions(&pkg.fmri.name);
            let latest = candidates
                .iter()
                .find(|f| f.authority == pkg.fmri.authority)
                .or_else(|| candidates.first());
            if let Some(latest) = latest
                && latest.version > pkg.fmri.version
            {
                self.add_target(latest.clone());
            }
        }
        Ok(())
    }

    /// Propose removing the one installed package matching `pattern`
    pub fn propose_removal(&mut self, image: &Image, pattern: &str) -> Result<()> {
        self.require_state(PlanState::Unevaluated)?;

        let matcher = FmriPattern::new(pattern)?;
        let matches: Vec<Fmri> = image
            .installed_fmris()?
            .into_iter()
            .filter(|f| matcher.matches(f))
            .collect();

        match matches.as_slice() {
            [] => Err(Error::NotInstalled(pattern.to_string())),
            [fmri] => {
                if !self.target_rem_fmris.iter().any(|f| f.is_same_pkg(fmri)) {
                    self.target_rem_fmris.push(fmri.clone());
                }
                Ok(())
            }
            _ => Err(Error::AmbiguousMatch {
                pattern: pattern.to_string(),
                matches: matches.iter().map(ToString::to_string).collect(),
            }),
        }
    }

    fn add_target(&mut self, fmri: Fmri) {
        match self.target_fmris.iter_mut().find(|f| f.is_same_pkg(&fmri)) {
            Some(existing) if existing.version < fmri.version => *existing = fmri,
            Some(_) => {}
            None => self.target_fmris.push(fmri),
        }
    }

    /// True once evaluation found nothing to change
    pub fn nothingtodo(&self) -> bool {
        self.pkg_plans.is_empty() && self.actions.is_empty()
    }

    /// Bytes of file content preexecution will download
    pub fn download_size(&self) -> u64 {
        self.pkg_plans.iter().map(PkgPlan::download_size).sum()
    }
}

impl fmt::Display for ImagePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.state == PlanState::Unevaluated {
            writeln!(f, "Before evaluation:")?;
            for fmri in &self.target_fmris {
                writeln!(f, "  install {}", fmri)?;
            }
            for fmri in &self.target_rem_fmris {
                writeln!(f, "  remove {}", fmri)?;
            }
            return Ok(());
        }

        writeln!(f, "After evaluation:")?;
        for plan in &self.pkg_plans {
            let origin = plan.origin.as_ref().map(ToString::to_string);
            let dest = plan.destination.as_ref().map(ToString::to_string);
            writeln!(
                f,
                "  {} -> {}",
                origin.as_deref().unwrap_or("None"),
                dest.as_deref().unwrap_or("None")
            )?;
        }
        write!(f, "  {} action(s)", self.actions.len())
    }
}
