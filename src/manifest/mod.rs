// src/manifest/mod.rs

//! Package manifests
//!
//! A manifest is the ordered list of actions that make up one package
//! version. Before use it is filtered against the image's variants and
//! facets and any caller-supplied filters.

mod action;
pub mod cache;

pub use action::{Action, ActionType, is_image_relative};

use crate::error::{Error, Result};
use crate::fmri::Fmri;
use crate::version::VersionConstraint;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub actions: Vec<Action>,
}

impl Manifest {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    /// Parse manifest text; blank lines and `#` comments are skipped
    pub fn parse(text: &str) -> Result<Self> {
        let mut actions = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let action = Action::parse(line).map_err(|e| {
                Error::ParseError(format!("manifest line {}: {}", lineno + 1, e))
            })?;
            actions.push(action);
        }
        Ok(Self { actions })
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for action in &self.actions {
            out.push_str(&action.to_string());
            out.push('\n');
        }
        out
    }

    /// Keep only actions applicable to this image
    pub fn filtered(
        &self,
        variants: &BTreeMap<String, String>,
        facets: &BTreeMap<String, bool>,
        filters: &[ActionFilter],
    ) -> Manifest {
        let actions = self
            .actions
            .iter()
            .filter(|a| {
                variant_allows(a, variants)
                    && facet_allows(a, facets)
                    && filters.iter().all(|f| f.allows(a))
            })
            .cloned()
            .collect();
        Manifest { actions }
    }

    pub fn actions_of(&self, action_type: ActionType) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(move |a| a.action_type == action_type)
    }

    /// Value of a `set` action
    pub fn get(&self, name: &str) -> Option<&str> {
        self.actions_of(ActionType::Set)
            .find(|a| a.attr("name") == Some(name))
            .and_then(|a| a.attr("value"))
    }

    /// One-line description: `pkg.description`, falling back to `description`
    pub fn summary(&self) -> Option<&str> {
        self.get("pkg.description").or_else(|| self.get("description"))
    }

    /// Sum of `pkg.size` over file actions
    pub fn size(&self) -> u64 {
        self.actions_of(ActionType::File).map(Action::size).sum()
    }

    pub fn dependencies(&self) -> Result<Vec<Dependency>> {
        self.actions_of(ActionType::Depend)
            .map(Dependency::from_action)
            .collect()
    }

    /// Compare two versions of a package's actions by key
    ///
    /// Actions present in both with identical content are left alone.
    pub fn diff(old: &Manifest, new: &Manifest) -> ManifestDiff {
        let index = |m: &Manifest| -> HashMap<(ActionType, String), Action> {
            m.actions
                .iter()
                .filter_map(|a| a.key().map(|k| ((a.action_type, k.to_string()), a.clone())))
                .collect()
        };
        let old_index = index(old);
        let new_index = index(new);

        let removed = old
            .actions
            .iter()
            .filter(|a| {
                a.key()
                    .is_some_and(|k| !new_index.contains_key(&(a.action_type, k.to_string())))
            })
            .cloned()
            .collect();

        let mut added = Vec::new();
        let mut changed = Vec::new();
        for action in &new.actions {
            let Some(key) = action.key() else { continue };
            match old_index.get(&(action.action_type, key.to_string())) {
                None => added.push(action.clone()),
                Some(previous) if previous != action => {
                    changed.push((previous.clone(), action.clone()))
                }
                Some(_) => {}
            }
        }

        ManifestDiff {
            added,
            changed,
            removed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    pub added: Vec<Action>,
    /// (old, new) pairs sharing a key
    pub changed: Vec<(Action, Action)>,
    pub removed: Vec<Action>,
}

fn variant_allows(action: &Action, variants: &BTreeMap<String, String>) -> bool {
    action
        .attrs
        .iter()
        .filter(|(k, _)| k.starts_with("variant."))
        .all(|(k, values)| match variants.get(k) {
            Some(image_value) => values.iter().any(|v| v == image_value),
            None => true,
        })
}

fn facet_allows(action: &Action, facets: &BTreeMap<String, bool>) -> bool {
    action
        .attrs
        .keys()
        .filter(|k| k.starts_with("facet."))
        .all(|k| facets.get(k).copied().unwrap_or(true))
}

/// Caller-supplied `attr=value` restriction on actions
///
/// An action that carries `attr` with a different value is dropped; actions
/// without `attr` pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFilter {
    pub attr: String,
    pub value: String,
}

impl ActionFilter {
    pub fn allows(&self, action: &Action) -> bool {
        let values = action.attr_values(&self.attr);
        values.is_empty() || values.iter().any(|v| *v == self.value)
    }
}

impl FromStr for ActionFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('=') {
            Some((attr, value)) if !attr.is_empty() && !value.is_empty() => Ok(Self {
                attr: attr.to_string(),
                value: value.to_string(),
            }),
            _ => Err(Error::ParseError(format!("filter '{s}' is not attr=value"))),
        }
    }
}

impl fmt::Display for ActionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attr, self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    /// Must be installed at or above the version
    Require,
    /// Constrains the version only when installed
    Optional,
    /// Constrains an installed package to successors of the version
    Incorporate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub kind: DependencyKind,
    pub fmri: Fmri,
}

impl Dependency {
    pub fn from_action(action: &Action) -> Result<Self> {
        let target = action
            .attr("fmri")
            .ok_or_else(|| Error::ParseError("depend action without fmri".to_string()))?;
        let kind = match action.attr("type") {
            Some("require") => DependencyKind::Require,
            Some("optional") => DependencyKind::Optional,
            Some("incorporate") => DependencyKind::Incorporate,
            other => {
                return Err(Error::ParseError(format!(
                    "unsupported dependency type {:?} for {}",
                    other, target
                )));
            }
        };
        Ok(Self {
            kind,
            fmri: Fmri::parse(target)?,
        })
    }

    /// Does this dependency pull its target into the image?
    pub fn is_required(&self) -> bool {
        self.kind == DependencyKind::Require
    }

    pub fn constraint(&self) -> VersionConstraint {
        match (&self.kind, &self.fmri.version) {
            (_, None) => VersionConstraint::Any,
            (DependencyKind::Incorporate, Some(v)) => VersionConstraint::Successor(v.clone()),
            (_, Some(v)) => VersionConstraint::GreaterOrEqual(v.clone()),
        }
    }
}
