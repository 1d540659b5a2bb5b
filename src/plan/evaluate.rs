// src/plan/evaluate.rs

//! Plan evaluation
//!
//! Turns the proposals into package plans and an ordered action sequence.
//! Everything is computed into locals first; the plan itself only changes
//! once evaluation has succeeded, so a failed evaluation leaves it
//! unevaluated with its proposals intact.

use super::{DependencyGraph, ImagePlan, PkgPlan, PlanState, PlannedAction};
use crate::error::{Error, Result};
use crate::fmri::Fmri;
use crate::image::Image;
use crate::manifest::{Dependency, DependencyKind, Manifest};
use crate::version::VersionConstraint;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

/// Upper bound on selection passes before giving up on convergence
const MAX_PASSES: usize = 256;

/// Loads and memoizes filtered manifests for one evaluation
struct Manifests<'a> {
    image: &'a Image,
    plan: &'a ImagePlan,
    cache: HashMap<Fmri, Manifest>,
}

impl<'a> Manifests<'a> {
    fn get(&mut self, fmri: &Fmri) -> Result<&Manifest> {
        if !self.cache.contains_key(fmri) {
            let manifest = self.image.plan_manifest(fmri, self.plan.filters())?;
            self.cache.insert(fmri.clone(), manifest);
        }
        self.cache
            .get(fmri)
            .ok_or_else(|| Error::TransactionError(format!("manifest for {fmri} not loaded")))
    }

    fn dependencies(&mut self, fmri: &Fmri) -> Result<Vec<Dependency>> {
        self.get(fmri)?.dependencies()
    }
}

/// A version constraint and the package that declared it
struct Declared {
    source: Fmri,
    kind: DependencyKind,
    constraint: VersionConstraint,
}

impl Declared {
    fn describe(&self) -> String {
        format!("{} requires {}", self.source, self.constraint)
    }
}

impl ImagePlan {
    /// Resolve dependencies and order every action
    pub fn evaluate(&mut self, image: &Image) -> Result<()> {
        self.require_state(PlanState::Unevaluated)?;

        let installed: BTreeMap<String, Fmri> = image
            .installed_fmris()?
            .into_iter()
            .map(|f| (f.name.clone(), f))
            .collect();

        let mut manifests = Manifests {
            image,
            plan: self,
            cache: HashMap::new(),
        };

        let removals = removal_closure(self, &installed, &mut manifests)?;
        let selected = select_versions(self, &installed, &removals, &mut manifests)?;

        // Pure removals, dependents first
        let mut removal_graph = DependencyGraph::new();
        for name in &removals {
            removal_graph.add_node(name);
        }
        for name in &removals {
            for dep in manifests.dependencies(&installed[name])? {
                removal_graph.add_edge(name, &dep.fmri.name);
            }
        }

        let mut pkg_plans = Vec::new();
        for name in removal_graph.removal_order() {
            let origin = &installed[&name];
            pkg_plans.push(PkgPlan::remove(origin.clone(), manifests.get(origin)?));
        }

        // Installs and updates, dependencies first
        let mut install_graph = DependencyGraph::new();
        for fmri in &selected {
            let unchanged = installed
                .get(&fmri.name)
                .is_some_and(|i| i.version == fmri.version);
            if !unchanged {
                install_graph.add_node(&fmri.name);
            }
        }
        for fmri in &selected {
            for dep in manifests.dependencies(fmri)? {
                install_graph.add_edge(&fmri.name, &dep.fmri.name);
            }
        }

        for name in install_graph.install_order() {
            let Some(dest) = selected.iter().find(|f| f.name == name) else {
                continue;
            };
            let plan = match installed.get(&name) {
                Some(origin) => {
                    let old = manifests.get(origin)?.clone();
                    PkgPlan::update(origin.clone(), &old, dest.clone(), manifests.get(dest)?)
                }
                None => PkgPlan::install(dest.clone(), manifests.get(dest)?),
            };
            pkg_plans.push(plan);
        }

        let actions: Vec<PlannedAction> = pkg_plans.iter().flat_map(PkgPlan::steps).collect();

        info!(
            "Evaluated plan: {} package(s), {} action(s)",
            pkg_plans.len(),
            actions.len()
        );
        self.pkg_plans = pkg_plans;
        self.actions = actions;
        self.set_state(PlanState::Evaluated);
        Ok(())
    }
}

/// Requested removals plus, when recursive, everything that depends on them
fn removal_closure(
    plan: &ImagePlan,
    installed: &BTreeMap<String, Fmri>,
    manifests: &mut Manifests<'_>,
) -> Result<Vec<String>> {
    if plan.target_rem_fmris.is_empty() {
        return Ok(Vec::new());
    }

    let mut graph = DependencyGraph::new();
    for name in installed.keys() {
        graph.add_node(name);
    }
    for fmri in installed.values() {
        for dep in manifests.dependencies(fmri)? {
            if dep.is_required() {
                graph.add_edge(&fmri.name, &dep.fmri.name);
            }
        }
    }

    let mut removals: Vec<String> = plan
        .target_rem_fmris
        .iter()
        .map(|f| f.name.clone())
        .collect();

    for target in &plan.target_rem_fmris {
        let dependents: Vec<String> = graph
            .transitive_dependents(&target.name)
            .into_iter()
            .filter(|d| !removals.iter().any(|r| r == d))
            .map(str::to_string)
            .collect();
        if dependents.is_empty() {
            continue;
        }
        if !plan.recursive_removal {
            return Err(Error::NonLeaf {
                package: target.to_string(),
                dependents: dependents
                    .iter()
                    .map(|d| installed[d].to_string())
                    .collect(),
            });
        }
        debug!("Removing dependents of {}: {}", target, dependents.join(", "));
        removals.extend(dependents);
    }

    Ok(removals)
}

/// Choose a version for every package that will be present afterwards and
/// differs from, or is absent in, the installed set
fn select_versions(
    plan: &ImagePlan,
    installed: &BTreeMap<String, Fmri>,
    removals: &[String],
    manifests: &mut Manifests<'_>,
) -> Result<Vec<Fmri>> {
    if plan.target_fmris.is_empty() {
        return Ok(Vec::new());
    }

    let removing: HashSet<&str> = removals.iter().map(String::as_str).collect();
    let pinned: HashSet<&str> = plan.target_fmris.iter().map(|f| f.name.as_str()).collect();
    let image = manifests.image;
    let catalog = image.catalog();

    // Selection order: proposals, then dependencies as discovered
    let mut selected: Vec<Fmri> = plan.target_fmris.clone();

    for _ in 0..MAX_PASSES {
        let mut present: BTreeMap<&str, &Fmri> = installed
            .iter()
            .filter(|(name, _)| !removing.contains(name.as_str()))
            .map(|(name, fmri)| (name.as_str(), fmri))
            .collect();
        for fmri in &selected {
            present.insert(fmri.name.as_str(), fmri);
        }

        let mut declared: BTreeMap<String, Vec<Declared>> = BTreeMap::new();
        let sources: Vec<Fmri> = present.values().map(|f| (*f).clone()).collect();
        for source in sources {
            for dep in manifests.dependencies(&source)? {
                declared.entry(dep.fmri.name.clone()).or_default().push(Declared {
                    constraint: dep.constraint(),
                    kind: dep.kind,
                    source: source.clone(),
                });
            }
        }

        let mut changes = Vec::new();
        for (name, decls) in &declared {
            let required = decls.iter().any(|d| d.kind == DependencyKind::Require);
            let current = present.get(name.as_str()).copied();

            if removing.contains(name.as_str()) {
                if required {
                    let mut constraints: Vec<String> =
                        decls.iter().map(Declared::describe).collect();
                    constraints.push(format!("{name} is being removed"));
                    return Err(Error::Unsatisfiable {
                        package: name.clone(),
                        constraints,
                    });
                }
                continue;
            }

            let satisfied = |fmri: &Fmri| {
                fmri.version
                    .as_ref()
                    .is_some_and(|v| decls.iter().all(|d| d.constraint.satisfies(v)))
            };

            match current {
                Some(fmri) if satisfied(fmri) => {}
                None if !required => {}
                Some(_) if pinned.contains(name.as_str()) => {
                    return Err(unsatisfiable(name, decls));
                }
                _ => {
                    let choice = catalog
                        .versions(name)
                        .iter()
                        .find(|f| satisfied(f))
                        .ok_or_else(|| unsatisfiable(name, decls))?;
                    debug!("Selected {} for {}", choice, name);
                    changes.push(choice.clone());
                }
            }
        }

        if changes.is_empty() {
            return Ok(selected);
        }
        for choice in changes {
            match selected.iter_mut().find(|f| f.is_same_pkg(&choice)) {
                Some(existing) => *existing = choice,
                None => selected.push(choice),
            }
        }
    }

    let package = selected
        .last()
        .map(|f| f.name.clone())
        .unwrap_or_default();
    Err(Error::Unsatisfiable {
        package,
        constraints: vec!["dependency selection did not converge".to_string()],
    })
}

fn unsatisfiable(name: &str, decls: &[Declared]) -> Error {
    Error::Unsatisfiable {
        package: name.to_string(),
        constraints: decls.iter().map(Declared::describe).collect(),
    }
}
