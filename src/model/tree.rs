//! Editing operations over a timer's step tree
//!
//! Steps are kept in an arena keyed by id, with parent links and ordered
//! child id lists, so locating a node or re-parenting a subtree is a key
//! lookup instead of a recursive rebuild. Every edit takes `&self` and
//! returns a new [`StepTree`]; a refused edit returns an unchanged copy.
//!
//! The slice helpers at the bottom of the module ([`delete_by_id`],
//! [`insert_relative`], [`move_by_id`], ...) wrap the arena for callers that
//! hold a nested `Vec<Step>`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::step::{Step, StepId};

/// Placement relative to an existing step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Before,
    After,
    /// Append to the children of a container step
    Inside,
}

/// Where a dropped step lands: top of the list, bottom of the list, or
/// next to / inside an existing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DropTarget {
    RootStart,
    RootEnd,
    Relative { target: StepId, position: Position },
}

#[derive(Debug, Clone)]
struct Node {
    /// Payload with its `children` vector left empty
    step: Step,
    parent: Option<StepId>,
    children: Vec<StepId>,
}

/// Arena form of a step tree
#[derive(Debug, Clone, Default)]
pub struct StepTree {
    nodes: HashMap<StepId, Node>,
    roots: Vec<StepId>,
}

impl StepTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the arena from nested steps. A repeated id is replaced with a
    /// fresh one so no node is lost.
    pub fn from_steps(steps: &[Step]) -> Self {
        let mut tree = Self::new();
        for step in steps {
            let id = tree.add_subtree(step.clone(), None);
            tree.roots.push(id);
        }
        tree
    }

    /// Rebuild nested steps, in order
    pub fn to_steps(&self) -> Vec<Step> {
        self.roots.iter().filter_map(|id| self.build(id)).collect()
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.to_steps()
    }

    pub fn contains(&self, id: &StepId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Total number of steps, counting every nested child
    pub fn count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Copy of the step and its whole subtree
    pub fn find(&self, id: &StepId) -> Option<Step> {
        self.build(id)
    }

    pub fn parent_of(&self, id: &StepId) -> Option<&StepId> {
        self.nodes.get(id).and_then(|node| node.parent.as_ref())
    }

    /// True when `id` sits somewhere below `ancestor`
    pub fn is_descendant(&self, ancestor: &StepId, id: &StepId) -> bool {
        let mut current = self.parent_of(id);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.parent_of(parent);
        }
        false
    }

    /// Remove a step together with its children
    pub fn delete(&self, id: &StepId) -> Self {
        if !self.contains(id) {
            debug!("Delete ignored, step {} not found", id);
            return self.clone();
        }

        let mut tree = self.clone();
        tree.detach(id);
        tree.remove_subtree(id);
        tree
    }

    /// Insert `step` next to or inside `target`
    pub fn insert_relative(&self, target: &StepId, step: Step, position: Position) -> Self {
        self.insert_at(
            &DropTarget::Relative {
                target: target.clone(),
                position,
            },
            step,
        )
    }

    /// Insert a new step (with any children it carries) at a drop target.
    ///
    /// The tree is returned unchanged when the target is gone, when dropping
    /// inside a step that cannot hold children, or when an id of the new
    /// subtree is already used.
    pub fn insert_at(&self, target: &DropTarget, step: Step) -> Self {
        let Some((parent, index)) = self.slot_for(target) else {
            debug!("Insert ignored, drop target {:?} is not available", target);
            return self.clone();
        };

        if !self.ids_are_free(&step) {
            warn!("Insert ignored, step {} reuses an existing id", step.id);
            return self.clone();
        }

        let mut tree = self.clone();
        let id = tree.add_subtree(step, parent.as_ref());
        tree.siblings_mut(parent.as_ref()).insert(index, id);
        tree
    }

    /// Move an existing step relative to `target`
    pub fn move_by_id(&self, moving: &StepId, target: &StepId, position: Position) -> Self {
        self.move_to(
            moving,
            &DropTarget::Relative {
                target: target.clone(),
                position,
            },
        )
    }

    /// Move an existing step and its subtree to a drop target, keeping ids.
    ///
    /// Refused when the step is missing, when it is dropped onto itself, or
    /// when the target lies inside the moving subtree.
    pub fn move_to(&self, moving: &StepId, target: &DropTarget) -> Self {
        if !self.contains(moving) {
            debug!("Move ignored, step {} not found", moving);
            return self.clone();
        }
        if let DropTarget::Relative { target, .. } = target {
            if target == moving || self.is_descendant(moving, target) {
                debug!("Move ignored, {} cannot be dropped onto itself or a descendant", moving);
                return self.clone();
            }
        }
        if self.slot_for(target).is_none() {
            debug!("Move ignored, drop target {:?} is not available", target);
            return self.clone();
        }

        let mut tree = self.clone();
        tree.detach(moving);
        // indexes shift once the step leaves its old list
        let Some((parent, index)) = tree.slot_for(target) else {
            return self.clone();
        };
        tree.siblings_mut(parent.as_ref()).insert(index, moving.clone());
        if let Some(node) = tree.nodes.get_mut(moving) {
            node.parent = parent;
        }
        tree
    }

    /// Copy a step and its children with fresh ids, placed right after it
    pub fn duplicate(&self, id: &StepId) -> Self {
        let Some(original) = self.find(id) else {
            return self.clone();
        };
        self.insert_relative(id, with_fresh_ids(original), Position::After)
    }

    /// Swap the settings of a step, keeping its id.
    ///
    /// A container replacement without children keeps the current children;
    /// otherwise the replacement's children take their place.
    pub fn replace(&self, id: &StepId, replacement: Step) -> Self {
        let Some(node) = self.nodes.get(id) else {
            return self.clone();
        };

        let mut step = replacement;
        step.id = id.clone();
        let new_children = step.take_children();
        let keep_children = step.is_container() && new_children.is_empty();

        let mut tree = self.clone();
        if !keep_children {
            for child in &node.children {
                tree.remove_subtree(child);
            }
            if let Some(node) = tree.nodes.get_mut(id) {
                node.children.clear();
            }
            if !new_children.iter().all(|child| tree.ids_are_free(child)) {
                warn!("Replace ignored, new children of {} reuse existing ids", id);
                return self.clone();
            }
            for child in new_children {
                let child_id = tree.add_subtree(child, Some(id));
                tree.siblings_mut(Some(id)).push(child_id);
            }
        }

        if let Some(node) = tree.nodes.get_mut(id) {
            node.step = step;
        }
        tree
    }

    fn build(&self, id: &StepId) -> Option<Step> {
        let node = self.nodes.get(id)?;
        let mut step = node.step.clone();
        if let Some(children) = step.children_mut() {
            *children = node.children.iter().filter_map(|child| self.build(child)).collect();
        }
        Some(step)
    }

    fn add_subtree(&mut self, mut step: Step, parent: Option<&StepId>) -> StepId {
        let children = step.take_children();
        if self.nodes.contains_key(&step.id) {
            warn!("Duplicate step id {}, assigning a new one", step.id);
            step.id = StepId::generate();
        }

        let id = step.id.clone();
        self.nodes.insert(
            id.clone(),
            Node {
                step,
                parent: parent.cloned(),
                children: Vec::new(),
            },
        );

        for child in children {
            let child_id = self.add_subtree(child, Some(&id));
            self.siblings_mut(Some(&id)).push(child_id);
        }
        id
    }

    fn remove_subtree(&mut self, id: &StepId) {
        if let Some(node) = self.nodes.remove(id) {
            for child in &node.children {
                self.remove_subtree(child);
            }
        }
    }

    /// Unlink a step from its parent's list (or the root list)
    fn detach(&mut self, id: &StepId) {
        let parent = self.parent_of(id).cloned();
        self.siblings_mut(parent.as_ref()).retain(|sibling| sibling != id);
    }

    fn siblings(&self, parent: Option<&StepId>) -> Option<&Vec<StepId>> {
        match parent {
            None => Some(&self.roots),
            Some(parent) => self.nodes.get(parent).map(|node| &node.children),
        }
    }

    /// Child list of `parent`, or the root list. A stale parent id gets a
    /// detached scratch list so callers never have to special-case it.
    fn siblings_mut(&mut self, parent: Option<&StepId>) -> &mut Vec<StepId> {
        match parent {
            None => &mut self.roots,
            Some(parent) => match self.nodes.get_mut(parent) {
                Some(node) => &mut node.children,
                None => {
                    warn!("Step {} vanished from the arena", parent);
                    &mut self.roots
                }
            },
        }
    }

    /// Resolve a drop target to (parent, index) in the current arena
    fn slot_for(&self, target: &DropTarget) -> Option<(Option<StepId>, usize)> {
        match target {
            DropTarget::RootStart => Some((None, 0)),
            DropTarget::RootEnd => Some((None, self.roots.len())),
            DropTarget::Relative { target, position } => {
                let node = self.nodes.get(target)?;
                match position {
                    Position::Inside => node
                        .step
                        .is_container()
                        .then(|| (Some(target.clone()), node.children.len())),
                    Position::Before | Position::After => {
                        let parent = node.parent.clone();
                        let index = self
                            .siblings(parent.as_ref())?
                            .iter()
                            .position(|sibling| sibling == target)?;
                        let index = if *position == Position::After { index + 1 } else { index };
                        Some((parent, index))
                    }
                }
            }
        }
    }

    fn ids_are_free(&self, step: &Step) -> bool {
        let mut seen = HashSet::new();
        let mut free = true;
        step.walk(&mut |s| {
            if self.nodes.contains_key(&s.id) || !seen.insert(&s.id) {
                free = false;
            }
        });
        free
    }
}

impl From<&[Step]> for StepTree {
    fn from(steps: &[Step]) -> Self {
        Self::from_steps(steps)
    }
}

/// Deep copy of `step` where every node gets a new id
pub fn with_fresh_ids(mut step: Step) -> Step {
    step.id = StepId::generate();
    if let Some(children) = step.children_mut() {
        *children = std::mem::take(children).into_iter().map(with_fresh_ids).collect();
    }
    step
}

/// Depth-first lookup in a nested step list
pub fn find_by_id<'a>(steps: &'a [Step], id: &StepId) -> Option<&'a Step> {
    steps.iter().find_map(|step| {
        if &step.id == id {
            Some(step)
        } else {
            find_by_id(step.children(), id)
        }
    })
}

/// Count every step, including all nested children
pub fn count_steps(steps: &[Step]) -> usize {
    steps.iter().map(|step| 1 + count_steps(step.children())).sum()
}

pub fn delete_by_id(steps: &[Step], id: &StepId) -> Vec<Step> {
    StepTree::from_steps(steps).delete(id).into_steps()
}

pub fn insert_relative(steps: &[Step], target: &StepId, step: Step, position: Position) -> Vec<Step> {
    StepTree::from_steps(steps)
        .insert_relative(target, step, position)
        .into_steps()
}

pub fn move_by_id(steps: &[Step], moving: &StepId, target: &StepId, position: Position) -> Vec<Step> {
    StepTree::from_steps(steps)
        .move_by_id(moving, target, position)
        .into_steps()
}
