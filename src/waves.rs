//! Wave layer directives and the visible-set model they drive.
//!
//! Wave members are grouped into ordinal layers (1 is the top layer). The beat
//! engine never touches member ids directly; it issues [`Directive`]s naming
//! whole groups and [`WaveField`] turns them into the set of visible ids that
//! the stage renders.

use crate::timeline::{Millis, TaskGroup};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// Layer group number (1 = topmost)
pub type Group = u8;

/// High-level instruction for the wave layers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Directive {
    /// Union groups into the visible set; `reenter` groups replay their entrance
    Show {
        groups: Vec<Group>,
        #[serde(default)]
        reenter: Vec<Group>,
    },
    /// Visible set becomes exactly these groups
    Set { groups: Vec<Group> },
    /// Reset to the base groups, then add `sequence` one group per step
    Burst {
        #[serde(default)]
        base_groups: Vec<Group>,
        sequence: Vec<Group>,
        step_ms: Millis,
        #[serde(default)]
        reset_after_ms: Option<Millis>,
    },
    /// Remove groups immediately
    FlashHide { groups: Vec<Group> },
}

impl Directive {
    /// Every group this directive refers to
    pub fn groups(&self) -> Vec<Group> {
        match self {
            Directive::Show { groups, reenter } => groups.iter().chain(reenter).copied().collect(),
            Directive::Set { groups } | Directive::FlashHide { groups } => groups.clone(),
            Directive::Burst {
                base_groups,
                sequence,
                ..
            } => base_groups.iter().chain(sequence).copied().collect(),
        }
    }
}

/// One layer group and its member ids, as written in a script file
#[derive(Debug, Clone, Deserialize)]
pub struct LayerEntry {
    pub group: Group,
    pub members: Vec<String>,
}

/// Group number to ordered member ids
#[derive(Debug, Clone, PartialEq)]
pub struct WaveLayers {
    groups: BTreeMap<Group, Vec<String>>,
}

impl Default for WaveLayers {
    fn default() -> Self {
        let counts: [(Group, usize); 4] = [(1, 5), (2, 4), (3, 3), (4, 5)];
        let groups = counts
            .iter()
            .map(|&(g, n)| (g, (1..=n).map(|i| format!("{}-{}", g, i)).collect()))
            .collect();
        Self { groups }
    }
}

impl WaveLayers {
    /// Build from script entries; later entries for the same group replace earlier ones
    pub fn from_entries(entries: &[LayerEntry]) -> Self {
        let groups = entries
            .iter()
            .map(|e| (e.group, e.members.clone()))
            .collect();
        Self { groups }
    }

    pub fn members(&self, group: Group) -> &[String] {
        self.groups.get(&group).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_group(&self, group: Group) -> bool {
        self.groups.contains_key(&group)
    }

    /// Groups in ascending order (top layer first)
    pub fn groups(&self) -> impl Iterator<Item = Group> + '_ {
        self.groups.keys().copied()
    }

    /// Every member id with its group, top layer first
    pub fn all_members(&self) -> impl Iterator<Item = (Group, &str)> + '_ {
        self.groups
            .iter()
            .flat_map(|(g, ids)| ids.iter().map(move |id| (*g, id.as_str())))
    }

    #[cfg(test)]
    pub fn group_of(&self, id: &str) -> Option<Group> {
        self.all_members().find(|(_, m)| *m == id).map(|(g, _)| g)
    }
}

/// Deferred step of a burst
#[derive(Debug, Clone, PartialEq)]
enum BurstStep {
    Add(Group),
    Reset(Vec<Group>),
}

/// Visible-set model maintained from directives.
///
/// Each visible id remembers when it (re)entered so the stage can animate the
/// entrance.
pub struct WaveField {
    layers: WaveLayers,
    visible: BTreeMap<String, Millis>,
    reenter: BTreeSet<Group>,
    last_show_key: Option<String>,
    pending: TaskGroup<BurstStep>,
}

impl WaveField {
    pub fn new(layers: WaveLayers) -> Self {
        Self {
            layers,
            visible: BTreeMap::new(),
            reenter: BTreeSet::new(),
            last_show_key: None,
            pending: TaskGroup::new(),
        }
    }

    pub fn layers(&self) -> &WaveLayers {
        &self.layers
    }

    /// Apply a directive issued at `now`
    pub fn apply(&mut self, directive: &Directive, now: Millis) {
        match directive {
            Directive::Show { groups, reenter } => {
                let key = show_key(groups, reenter);
                if self.last_show_key.as_deref() == Some(key.as_str()) {
                    log::trace!("waves: {} already applied", key);
                    return;
                }
                self.pending.cancel_all();
                self.last_show_key = Some(key);

                for &g in groups {
                    self.add_group(g, now);
                }
                for &g in reenter {
                    self.restart_group(g, now);
                }
                self.reenter = reenter.iter().copied().collect();
            }
            Directive::Set { groups } => {
                self.pending.cancel_all();
                self.last_show_key = None;
                self.reenter.clear();
                self.set_exactly(groups, now);
            }
            Directive::Burst {
                base_groups,
                sequence,
                step_ms,
                reset_after_ms,
            } => {
                self.pending.cancel_all();
                self.last_show_key = None;
                self.reenter.clear();
                self.set_exactly(base_groups, now);

                for (i, &g) in sequence.iter().enumerate() {
                    self.pending
                        .schedule(now + step_ms * i as Millis, BurstStep::Add(g));
                }
                if let Some(reset) = reset_after_ms {
                    self.pending
                        .schedule(now + reset, BurstStep::Reset(base_groups.clone()));
                }
                // zero-offset steps land with the directive itself
                self.advance(now);
            }
            Directive::FlashHide { groups } => {
                self.pending.cancel_all();
                self.last_show_key = None;
                for &g in groups {
                    if !self.known(g) {
                        continue;
                    }
                    for id in self.layers.members(g) {
                        self.visible.remove(id);
                    }
                }
            }
        }
    }

    /// Fire burst steps due at or before `now`
    pub fn advance(&mut self, now: Millis) {
        while let Some((due, step)) = self.pending.pop_due(now) {
            match step {
                BurstStep::Add(g) => self.add_group(g, due),
                BurstStep::Reset(base) => self.set_exactly(&base, due),
            }
        }
    }

    /// Drop all state (fresh session)
    pub fn clear(&mut self) {
        self.pending.cancel_all();
        self.visible.clear();
        self.reenter.clear();
        self.last_show_key = None;
    }

    pub fn is_visible(&self, id: &str) -> bool {
        self.visible.contains_key(id)
    }

    /// When `id` last entered, if visible
    pub fn visible_since(&self, id: &str) -> Option<Millis> {
        self.visible.get(id).copied()
    }

    #[cfg(test)]
    pub fn visible_ids(&self) -> impl Iterator<Item = &str> {
        self.visible.keys().map(String::as_str)
    }

    #[cfg(test)]
    pub fn visible_len(&self) -> usize {
        self.visible.len()
    }

    #[cfg(test)]
    pub fn reenter_groups(&self) -> &BTreeSet<Group> {
        &self.reenter
    }

    /// Scheduled burst steps still waiting
    #[cfg(test)]
    pub fn pending_timers(&self) -> usize {
        self.pending.len()
    }

    fn known(&self, group: Group) -> bool {
        if !self.layers.contains_group(group) {
            log::warn!("waves: unknown group {}", group);
            return false;
        }
        true
    }

    fn add_group(&mut self, group: Group, at: Millis) {
        if !self.known(group) {
            return;
        }
        for id in self.layers.members(group) {
            self.visible.entry(id.clone()).or_insert(at);
        }
    }

    fn restart_group(&mut self, group: Group, at: Millis) {
        if !self.known(group) {
            return;
        }
        for id in self.layers.members(group) {
            self.visible.insert(id.clone(), at);
        }
    }

    /// Replace the visible set, keeping entry times of ids that stay
    fn set_exactly(&mut self, groups: &[Group], at: Millis) {
        let mut next = BTreeMap::new();
        for &g in groups {
            if !self.known(g) {
                continue;
            }
            for id in self.layers.members(g) {
                let since = self.visible.get(id).copied().unwrap_or(at);
                next.insert(id.clone(), since);
            }
        }
        self.visible = next;
    }
}

/// Order-insensitive identity of a show directive
fn show_key(groups: &[Group], reenter: &[Group]) -> String {
    let join = |gs: &[Group]| {
        let mut sorted = gs.to_vec();
        sorted.sort_unstable();
        sorted
            .iter()
            .map(|g| g.to_string())
            .collect::<Vec<_>>()
            .join(",")
    };
    format!("show:{}|re:{}", join(groups), join(reenter))
}
