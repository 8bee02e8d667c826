//! Watch expressions
//!
//! Watches form a forest: each root is an expression registered with GDB's
//! auto-display, and struct fields or array elements of its value become
//! child nodes. Nodes live in an arena and are addressed by [`WatchId`]; a
//! child refers to its parent by id only.
//!
//! Refreshing a value reuses existing nodes whose `full_expression` still
//! appears in the new value, so ids held by the front end stay valid across
//! refreshes. Freed arena entries are reused with a bumped generation, so a
//! stale id never resolves to a newer node.
use std::collections::HashSet;

use transport::events::{Display, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchVar {
    pub display_name: String,
    pub value: String,
    pub full_expression: String,
    /// GDB's display number, roots only
    pub slot: Option<u32>,
    children: Vec<WatchId>,
    parent: Option<WatchId>,
}

impl WatchVar {
    fn new(display_name: String, full_expression: String, parent: Option<WatchId>) -> Self {
        Self {
            display_name,
            value: String::new(),
            full_expression,
            slot: None,
            children: Vec::new(),
            parent,
        }
    }

    pub fn children(&self) -> &[WatchId] {
        &self.children
    }

    pub fn parent(&self) -> Option<WatchId> {
        self.parent
    }
}

/// The nodes touched between the outermost `begin_update` and `end_update`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchBatch {
    /// Added or modified nodes, in the order they were first touched
    pub changed: Vec<WatchId>,
    pub removed: Vec<WatchId>,
}

impl WatchBatch {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
struct Entry {
    generation: u32,
    node: Option<WatchVar>,
}

#[derive(Debug, Default)]
pub struct Watches {
    nodes: Vec<Entry>,
    /// Indices of empty entries
    free: Vec<usize>,
    roots: Vec<WatchId>,
    /// Expressions whose first display has been asked for
    requested: HashSet<String>,
    update_depth: usize,
    batch: WatchBatch,
}

impl Watches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: WatchId) -> Option<&WatchVar> {
        self.nodes
            .get(id.index)
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.node.as_ref())
    }

    fn node_mut(&mut self, id: WatchId) -> Option<&mut WatchVar> {
        self.nodes
            .get_mut(id.index)
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.node.as_mut())
    }

    pub fn roots(&self) -> &[WatchId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Arena entries allocated so far, used or not
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Every node, depth first, with its depth
    pub fn walk(&self) -> Vec<(usize, WatchId)> {
        let mut out = Vec::new();
        let mut stack: Vec<(usize, WatchId)> = self.roots.iter().rev().map(|id| (0, *id)).collect();
        while let Some((depth, id)) = stack.pop() {
            out.push((depth, id));
            if let Some(node) = self.get(id) {
                stack.extend(node.children.iter().rev().map(|c| (depth + 1, *c)));
            }
        }
        out
    }

    pub fn find(&self, expression: &str) -> Option<WatchId> {
        let expression = expression.trim();
        self.walk()
            .into_iter()
            .map(|(_, id)| id)
            .find(|id| self.get(*id).is_some_and(|n| n.full_expression == expression))
    }

    pub fn find_by_slot(&self, slot: u32) -> Option<WatchId> {
        self.roots
            .iter()
            .copied()
            .find(|id| self.get(*id).is_some_and(|n| n.slot == Some(slot)))
    }

    /// Add a root watch. Its value arrives with the first display of `expression`.
    pub fn add(&mut self, expression: &str) -> eyre::Result<WatchId> {
        let expression = expression.trim();
        eyre::ensure!(!expression.is_empty(), "empty watch expression");
        if self.find_root(expression).is_some() {
            eyre::bail!("already watching {expression}");
        }
        let id = self.insert(WatchVar::new(
            expression.to_string(),
            expression.to_string(),
            None,
        ));
        self.roots.push(id);
        self.request_evaluation(expression);
        self.touch(id);
        Ok(id)
    }

    /// Expect the next display of `expression` even if no node is waiting for it
    pub fn request_evaluation(&mut self, expression: &str) {
        self.requested.insert(expression.trim().to_string());
    }

    fn find_root(&self, expression: &str) -> Option<WatchId> {
        self.roots
            .iter()
            .copied()
            .find(|id| self.get(*id).is_some_and(|n| n.full_expression == expression))
    }

    /// Remove a root watch, returning its display slot
    pub fn remove(&mut self, expression: &str) -> Option<WatchVar> {
        let expression = expression.trim();
        self.requested.remove(expression);
        let id = self.find_root(expression)?;
        self.remove_root(id)
    }

    pub fn remove_by_slot(&mut self, slot: u32) -> Option<WatchVar> {
        let id = self.find_by_slot(slot)?;
        if let Some(node) = self.get(id) {
            let expression = node.full_expression.clone();
            self.requested.remove(&expression);
        }
        self.remove_root(id)
    }

    fn remove_root(&mut self, id: WatchId) -> Option<WatchVar> {
        self.roots.retain(|r| *r != id);
        self.remove_subtree(id)
    }

    /// Change a root's expression. The node keeps its id but loses its slot,
    /// value and children until the new expression is displayed.
    ///
    /// Returns the slot the old expression was displayed in.
    pub fn rename(&mut self, id: WatchId, expression: &str) -> eyre::Result<Option<u32>> {
        let expression = expression.trim();
        eyre::ensure!(!expression.is_empty(), "empty watch expression");
        let node = self
            .get(id)
            .ok_or_else(|| eyre::eyre!("no such watch"))?;
        eyre::ensure!(node.parent.is_none(), "only top level watches can be renamed");
        if let Some(existing) = self.find_root(expression) {
            eyre::ensure!(existing == id, "already watching {expression}");
        }

        let old_expression = node.full_expression.clone();
        self.requested.remove(&old_expression);
        self.clear_children(id);
        let Some(node) = self.node_mut(id) else {
            eyre::bail!("no such watch");
        };
        let old_slot = node.slot.take();
        node.display_name = expression.to_string();
        node.full_expression = expression.to_string();
        node.value.clear();
        self.request_evaluation(expression);
        self.touch(id);
        Ok(old_slot)
    }

    /// Remove every watch, returning the display slots that were in use
    pub fn clear(&mut self) -> Vec<u32> {
        let slots = self
            .roots
            .iter()
            .filter_map(|id| self.get(*id).and_then(|n| n.slot))
            .collect();
        for id in std::mem::take(&mut self.roots) {
            self.remove_subtree(id);
        }
        self.requested.clear();
        slots
    }

    /// Forget all slots and values, e.g. after the debugger restarted. Roots
    /// are kept so they can be registered again.
    pub fn invalidate_all(&mut self) {
        for id in self.roots.clone() {
            self.clear_children(id);
            if let Some(node) = self.node_mut(id) {
                node.slot = None;
                node.value.clear();
            }
            self.touch(id);
        }
        self.requested.clear();
    }

    /// Roots without a display slot
    pub fn unregistered(&self) -> Vec<String> {
        self.roots
            .iter()
            .filter_map(|id| self.get(*id))
            .filter(|n| n.slot.is_none())
            .map(|n| n.full_expression.clone())
            .collect()
    }

    pub fn begin_update(&mut self) {
        self.update_depth += 1;
    }

    /// Close an update. The outermost close returns what changed, if anything.
    pub fn end_update(&mut self) -> Option<WatchBatch> {
        if self.update_depth == 0 {
            tracing::warn!("unbalanced end_update");
            return None;
        }
        self.update_depth -= 1;
        if self.update_depth > 0 || self.batch.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.batch))
    }

    pub fn in_update(&self) -> bool {
        self.update_depth > 0
    }

    /// Close every open update at once, returning what changed
    pub fn abort_update(&mut self) -> Option<WatchBatch> {
        if self.update_depth == 0 {
            return None;
        }
        tracing::debug!(depth = self.update_depth, "closing unfinished watch update");
        self.update_depth = 0;
        let batch = std::mem::take(&mut self.batch);
        (!batch.is_empty()).then_some(batch)
    }

    /// Apply a display from GDB.
    ///
    /// Returns the root that was updated, or `None` when the display belongs
    /// to no watch.
    pub fn apply_display(&mut self, display: &Display) -> Option<WatchId> {
        let expression = display.expression.trim();
        let id = match self.find_by_slot(display.slot) {
            Some(id) => id,
            None => self.adopt(display.slot, expression)?,
        };

        if let Some(node) = self.node_mut(id) {
            if node.full_expression != expression {
                let slot = display.slot;
                tracing::debug!(
                    slot,
                    watched = %node.full_expression,
                    %expression,
                    "display expression differs from watch"
                );
            }
        }
        self.refresh(id, &display.value);
        Some(id)
    }

    /// Attach a new slot to the watch waiting for it
    fn adopt(&mut self, slot: u32, expression: &str) -> Option<WatchId> {
        if !self.requested.remove(expression) {
            tracing::debug!(slot, %expression, "discarding display for unknown watch");
            return None;
        }
        let waiting = self.roots.iter().copied().find(|id| {
            self.get(*id)
                .is_some_and(|n| n.slot.is_none() && n.full_expression == expression)
        });
        let id = match waiting {
            Some(id) => id,
            None => {
                let id = self.insert(WatchVar::new(
                    expression.to_string(),
                    expression.to_string(),
                    None,
                ));
                self.roots.push(id);
                id
            }
        };
        if let Some(node) = self.node_mut(id) {
            node.slot = Some(slot);
        }
        self.touch(id);
        Some(id)
    }

    fn refresh(&mut self, id: WatchId, value: &Value) {
        let text = value.to_string();
        let Some(node) = self.node_mut(id) else {
            return;
        };
        let full_expression = node.full_expression.clone();
        if node.value != text {
            node.value = text;
            self.touch(id);
        }

        match value {
            Value::Scalar(_) => self.clear_children(id),
            Value::Struct(fields) => {
                let entries = fields
                    .iter()
                    .map(|(name, v)| (name.clone(), format!("{full_expression}.{name}"), v))
                    .collect();
                self.reconcile(id, entries);
            }
            Value::Array(elements) => {
                let entries = elements
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (format!("[{i}]"), format!("{full_expression}[{i}]"), v))
                    .collect();
                self.reconcile(id, entries);
            }
        }
    }

    /// Match the new children of `parent` against the existing ones by full expression
    fn reconcile(&mut self, parent: WatchId, entries: Vec<(String, String, &Value)>) {
        let existing = self
            .get(parent)
            .map(|n| n.children.clone())
            .unwrap_or_default();

        let mut children = Vec::with_capacity(entries.len());
        for (name, full_expression, value) in entries {
            let reused = existing.iter().copied().find(|c| {
                self.get(*c)
                    .is_some_and(|n| n.full_expression == full_expression)
            });
            let child = match reused {
                Some(child) => child,
                None => {
                    let child = self.insert(WatchVar::new(name, full_expression, Some(parent)));
                    self.touch(child);
                    child
                }
            };
            self.refresh(child, value);
            children.push(child);
        }

        let mut structure_changed = children != existing;
        for old in existing {
            if !children.contains(&old) {
                self.remove_subtree(old);
                structure_changed = true;
            }
        }
        if let Some(node) = self.node_mut(parent) {
            node.children = children;
        }
        if structure_changed {
            self.touch(parent);
        }
    }

    fn insert(&mut self, node: WatchVar) -> WatchId {
        if let Some(index) = self.free.pop() {
            let entry = &mut self.nodes[index];
            entry.node = Some(node);
            return WatchId {
                index,
                generation: entry.generation,
            };
        }
        self.nodes.push(Entry {
            generation: 0,
            node: Some(node),
        });
        WatchId {
            index: self.nodes.len() - 1,
            generation: 0,
        }
    }

    fn clear_children(&mut self, id: WatchId) {
        let children = match self.node_mut(id) {
            Some(node) if !node.children.is_empty() => std::mem::take(&mut node.children),
            _ => return,
        };
        for child in children {
            self.remove_subtree(child);
        }
        self.touch(id);
    }

    fn remove_subtree(&mut self, id: WatchId) -> Option<WatchVar> {
        let entry = self
            .nodes
            .get_mut(id.index)
            .filter(|e| e.generation == id.generation)?;
        let mut node = entry.node.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);
        for child in std::mem::take(&mut node.children) {
            self.remove_subtree(child);
        }
        node.parent = None;
        self.batch.changed.retain(|c| *c != id);
        self.batch.removed.push(id);
        Some(node)
    }

    fn touch(&mut self, id: WatchId) {
        if !self.batch.changed.contains(&id) {
            self.batch.changed.push(id);
        }
    }
}
