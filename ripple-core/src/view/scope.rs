//! Structural scopes.
//!
//! Every branch arm and list item mounts into a fresh scope. The scope
//! records everything created while its builder ran, so unmounting the
//! region releases exactly those cells, computed nodes, bindings, nested
//! structures and widgets.

use std::collections::HashMap;

use crate::graph::NodeId;
use crate::reactive::{CallSite, RuntimeState, ScopeId, SlotKey};
use crate::render::{Patch, WidgetId};

/// Everything owned by one scope.
#[derive(Debug, Default)]
pub(crate) struct ScopeRecord {
    pub(crate) parent: Option<ScopeId>,
    pub(crate) children: Vec<ScopeId>,
    pub(crate) cells: Vec<NodeId>,
    pub(crate) computeds: Vec<NodeId>,
    pub(crate) bindings: Vec<NodeId>,
    pub(crate) structures: Vec<NodeId>,
    pub(crate) widgets: Vec<WidgetId>,
    pub(crate) widget_keys: Vec<SlotKey>,
    /// Top-level widgets of the region, in tree order.
    pub(crate) roots: Vec<WidgetId>,
    occurrences: HashMap<CallSite, u32>,
}

impl ScopeRecord {
    fn new(parent: Option<ScopeId>) -> Self {
        Self {
            parent,
            ..Self::default()
        }
    }
}

/// All live scopes of a session.
#[derive(Debug)]
pub(crate) struct ScopeTable {
    records: HashMap<ScopeId, ScopeRecord>,
    next: u64,
}

impl ScopeTable {
    pub(crate) fn new() -> Self {
        let mut records = HashMap::new();
        records.insert(ScopeId::ROOT, ScopeRecord::new(None));
        Self { records, next: 1 }
    }

    /// Open a child scope of `parent`.
    pub(crate) fn create(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.next);
        self.next += 1;
        self.records.insert(id, ScopeRecord::new(Some(parent)));
        if let Some(record) = self.records.get_mut(&parent) {
            record.children.push(id);
        }
        id
    }

    pub(crate) fn get(&self, scope: ScopeId) -> Option<&ScopeRecord> {
        self.records.get(&scope)
    }

    pub(crate) fn get_mut(&mut self, scope: ScopeId) -> Option<&mut ScopeRecord> {
        self.records.get_mut(&scope)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, scope: ScopeId) -> bool {
        self.records.contains_key(&scope)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// Occurrence index for the next slot created at `site` in `scope`.
    pub(crate) fn next_occurrence(&mut self, scope: ScopeId, site: CallSite) -> u32 {
        match self.records.get_mut(&scope) {
            Some(record) => {
                let counter = record.occurrences.entry(site).or_insert(0);
                let occurrence = *counter;
                *counter += 1;
                occurrence
            }
            None => 0,
        }
    }

    fn remove(&mut self, scope: ScopeId) -> Option<ScopeRecord> {
        let record = self.records.remove(&scope)?;
        if let Some(parent) = record.parent.and_then(|p| self.records.get_mut(&p)) {
            parent.children.retain(|child| *child != scope);
        }
        Some(record)
    }
}

impl RuntimeState {
    /// Release a scope and everything nested in it.
    ///
    /// With `emit`, one unmount per top-level widget goes to the flush in
    /// progress; nested regions disappear with their ancestors.
    pub(crate) fn teardown_scope(&mut self, scope: ScopeId, emit: bool) {
        if scope == ScopeId::ROOT {
            return;
        }
        let Some(record) = self.scopes.remove(scope) else {
            return;
        };
        for child in &record.children {
            self.teardown_scope(*child, false);
        }

        for id in record.structures {
            self.structures.remove(&id);
            self.graph.remove_node(id);
        }
        for id in record.bindings {
            self.bindings.remove(&id);
            self.graph.remove_node(id);
        }
        for id in record.computeds {
            self.computeds.remove(&id);
            self.graph.remove_node(id);
        }
        for id in record.cells {
            if let Some(cell) = self.cells.remove(&id) {
                self.cell_keys.remove(&cell.key);
            }
            self.pending.shift_remove(&id);
            self.graph.remove_node(id);
        }
        for key in &record.widget_keys {
            self.widget_keys.remove(key);
        }
        for id in &record.widgets {
            self.handlers.remove(id);
        }
        for root in record.roots {
            if self.tree.remove_subtree(root).is_empty() {
                continue;
            }
            if emit {
                self.emit(Patch::Unmount { node_id: root });
            }
        }
    }

    /// Move the top-level widgets of `scope` so they sit right before
    /// position `before` of their parent, emitting one move per widget that
    /// changes place.
    pub(crate) fn move_roots(&mut self, scope: ScopeId, mut before: usize) {
        let roots = match self.scopes.get(scope) {
            Some(record) => record.roots.clone(),
            None => return,
        };
        for root in roots {
            let Some(current) = self.tree.index_of(root) else {
                continue;
            };
            let target = if current < before { before - 1 } else { before };
            if current != target {
                self.tree.move_child(root, target);
                self.emit(Patch::Move {
                    node_id: root,
                    new_index: target,
                });
            }
            before = target + 1;
        }
    }

    /// Position of the first top-level widget of `scope` in its parent.
    pub(crate) fn first_root_index(&self, scope: ScopeId) -> Option<usize> {
        let record = self.scopes.get(scope)?;
        record.roots.iter().find_map(|root| self.tree.index_of(*root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occurrences_count_per_scope_and_site() {
        let mut table = ScopeTable::new();
        let site = CallSite::caller();
        let child = table.create(ScopeId::ROOT);

        assert_eq!(table.next_occurrence(ScopeId::ROOT, site), 0);
        assert_eq!(table.next_occurrence(ScopeId::ROOT, site), 1);
        assert_eq!(table.next_occurrence(child, site), 0);
    }

    #[test]
    fn remove_unlinks_from_parent() {
        let mut table = ScopeTable::new();
        let child = table.create(ScopeId::ROOT);
        assert_eq!(table.get(ScopeId::ROOT).unwrap().children, vec![child]);

        table.remove(child);
        assert!(table.get(ScopeId::ROOT).unwrap().children.is_empty());
        assert!(!table.contains(child));
        assert_eq!(table.len(), 1);
    }
}
