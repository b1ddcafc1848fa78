//! Structural constructs.
//!
//! A branch-select mounts one of two arms depending on the truthiness of a
//! predicate. A keyed list mounts one region per item of an array, keyed by
//! a field of the item, a key function, or (weakest) the item's position.
//!
//! Both live in the dependency graph as leaves depending on their driving
//! value, and both are reconciled by the patch scheduler when that value
//! changes. Each arm or item runs its builder in a fresh scope, so cells
//! created inside survive reorders of the same key and are released when
//! the key (or arm) goes away.

use std::sync::Arc;

use serde_json::Value;
use tracing::{trace, warn};

use super::Ui;
use crate::graph::NodeId;
use crate::reactive::{display, truthy, Runtime, ScopeId, SlotKey, State};
use crate::render::diff::{dedupe_keys, diff_keys};
use crate::render::WidgetId;

/// Builds the contents of a branch arm.
pub(crate) type ArmFn = Arc<dyn Fn(&mut Ui) + Send + Sync>;

/// Builds the contents of one list item.
pub(crate) type ItemFn = Arc<dyn Fn(&mut Ui, &Item) + Send + Sync>;

/// How list items are keyed.
#[derive(Clone)]
pub enum ListKey {
    /// Key by position. Reorders and inserts in the middle rebind items to
    /// different regions; a warning is logged once per list.
    Index,
    /// Key by the display form of a field of each item.
    Field(String),
    /// Key by a function of the item.
    With(Arc<dyn Fn(&Value) -> String + Send + Sync>),
}

impl ListKey {
    /// Key items by the field `name` of each item.
    pub fn field(name: impl Into<String>) -> Self {
        ListKey::Field(name.into())
    }

    /// Key items by the string `f` returns for each item.
    pub fn with<F>(f: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        ListKey::With(Arc::new(f))
    }

    /// The explicit key of `item`, if it has one.
    fn resolve(&self, item: &Value) -> Option<String> {
        match self {
            ListKey::Index => None,
            ListKey::Field(name) => item.get(name).map(display),
            ListKey::With(f) => Some(f(item)),
        }
    }
}

impl std::fmt::Debug for ListKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListKey::Index => f.write_str("Index"),
            ListKey::Field(name) => f.debug_tuple("Field").field(name).finish(),
            ListKey::With(_) => f.write_str("With(..)"),
        }
    }
}

/// What a list item's builder receives.
#[derive(Debug, Clone)]
pub struct Item {
    key: String,
    value: State,
}

impl Item {
    /// The resolved item key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// A cell holding the item's value. It is rewritten in place when a
    /// retained item's value changes.
    pub fn value(&self) -> &State {
        &self.value
    }
}

pub(crate) struct BranchSlot {
    pub(crate) anchor: WidgetId,
    pub(crate) owner: ScopeId,
    pub(crate) source: NodeId,
    pub(crate) current: Option<bool>,
    pub(crate) arm_scope: Option<ScopeId>,
    pub(crate) then_arm: ArmFn,
    pub(crate) else_arm: Option<ArmFn>,
}

#[derive(Debug, Clone)]
pub(crate) struct ItemSlot {
    key: String,
    scope: ScopeId,
    cell: NodeId,
}

pub(crate) struct ListSlot {
    pub(crate) anchor: WidgetId,
    pub(crate) owner: ScopeId,
    pub(crate) source: NodeId,
    pub(crate) key: ListKey,
    pub(crate) render: ItemFn,
    pub(crate) items: Vec<ItemSlot>,
    pub(crate) warned_positional: bool,
}

/// A structural construct registered in the runtime.
pub(crate) enum StructureSlot {
    Branch(BranchSlot),
    List(ListSlot),
}

impl StructureSlot {
    /// The widget the construct mounts its regions under.
    pub(crate) fn anchor(&self) -> WidgetId {
        match self {
            StructureSlot::Branch(branch) => branch.anchor,
            StructureSlot::List(list) => list.anchor,
        }
    }
}

impl Runtime {
    /// Bring a structural construct in line with its driving value.
    pub(crate) fn reconcile(&self, id: NodeId) {
        let is_list = self.with(|s| match s.structures.get(&id) {
            Some(StructureSlot::List(_)) => Some(true),
            Some(StructureSlot::Branch(_)) => Some(false),
            None => None,
        });
        match is_list {
            Some(true) => self.reconcile_list(id),
            Some(false) => self.reconcile_branch(id),
            None => {}
        }
    }

    /// Run a region builder with `scope` as the current scope.
    pub(crate) fn run_region(&self, scope: ScopeId, parent: WidgetId, cursor: usize, f: impl FnOnce(&mut Ui)) {
        self.with(|s| s.scope_stack.push(scope));
        let mut ui = Ui::new(self.clone(), scope, parent, cursor);
        f(&mut ui);
        self.with(|s| s.scope_stack.pop());
    }

    fn reconcile_branch(&self, id: NodeId) {
        let Some((source, current)) = self.with(|s| match s.structures.get(&id) {
            Some(StructureSlot::Branch(branch)) => Some((branch.source, branch.current)),
            _ => None,
        }) else {
            return;
        };

        let selected = match self.read_node(source) {
            Ok(value) => truthy(&value),
            Err(err) => {
                self.report(err);
                return;
            }
        };
        if current == Some(selected) {
            return;
        }

        let region = self.with(|s| {
            let (owner, anchor, previous, arm) = match s.structures.get_mut(&id) {
                Some(StructureSlot::Branch(branch)) => {
                    branch.current = Some(selected);
                    let arm = if selected {
                        Some(Arc::clone(&branch.then_arm))
                    } else {
                        branch.else_arm.clone()
                    };
                    (branch.owner, branch.anchor, branch.arm_scope.take(), arm)
                }
                _ => return None,
            };
            if let Some(previous) = previous {
                s.teardown_scope(previous, true);
            }
            let arm = arm?;
            let scope = s.scopes.create(owner);
            if let Some(StructureSlot::Branch(branch)) = s.structures.get_mut(&id) {
                branch.arm_scope = Some(scope);
            }
            Some((scope, anchor, arm))
        });

        trace!(structure = %id, selected, "branch switched");
        if let Some((scope, anchor, arm)) = region {
            self.run_region(scope, anchor, 0, |ui| arm(ui));
        }
    }

    fn reconcile_list(&self, id: NodeId) {
        let Some((source, key_by)) = self.with(|s| match s.structures.get(&id) {
            Some(StructureSlot::List(list)) => Some((list.source, list.key.clone())),
            _ => None,
        }) else {
            return;
        };

        let entries = match self.read_node(source) {
            Ok(Value::Array(items)) => items,
            Ok(Value::Null) => Vec::new(),
            Ok(other) => {
                warn!(structure = %id, value = %other, "list source is not an array; rendering no items");
                Vec::new()
            }
            Err(err) => {
                self.report(err);
                return;
            }
        };

        let mut positional = false;
        let mut keys: Vec<String> = entries
            .iter()
            .enumerate()
            .map(|(index, item)| {
                key_by.resolve(item).unwrap_or_else(|| {
                    positional = true;
                    format!("#{index}")
                })
            })
            .collect();
        for repeated in dedupe_keys(&mut keys) {
            warn!(structure = %id, key = %repeated, "duplicate list key; later items are rekeyed");
        }

        let Some((anchor, owner, render, diff, old_items)) = self.with(|s| {
            let StructureSlot::List(list) = s.structures.get_mut(&id)? else {
                return None;
            };
            if positional && !list.warned_positional {
                list.warned_positional = true;
                warn!(structure = %id, "list items keyed by position; reorders will not preserve item state");
            }
            let old_keys: Vec<String> = list.items.iter().map(|item| item.key.clone()).collect();
            let diff = diff_keys(&old_keys, &keys);
            let old_items = std::mem::take(&mut list.items);
            let found = (list.anchor, list.owner, Arc::clone(&list.render), diff, old_items);

            for &removed in &found.3.removed {
                s.teardown_scope(found.4[removed].scope, true);
            }
            Some(found)
        }) else {
            return;
        };

        for (position, source) in diff.sources.iter().enumerate() {
            if let Some(old) = source {
                let cell = old_items[*old].cell;
                if let Err(err) = self.write_cell(cell, entries[position].clone(), false) {
                    self.report(err);
                }
            }
        }

        // Right to left, each item lands right before the next one.
        let mut placed: Vec<Option<ItemSlot>> = vec![None; keys.len()];
        let mut before = self.with(|s| s.tree.get(anchor).map_or(0, |node| node.children().len()));
        for position in (0..keys.len()).rev() {
            let item = match diff.sources[position] {
                Some(old) => {
                    let item = old_items[old].clone();
                    if !diff.stable[position] {
                        self.with(|s| s.move_roots(item.scope, before));
                    }
                    item
                }
                None => {
                    match self.mount_item(owner, anchor, before, &keys[position], &entries[position], &render) {
                        Some(item) => item,
                        None => continue,
                    }
                }
            };
            if let Some(first) = self.with(|s| s.first_root_index(item.scope)) {
                before = first;
            }
            placed[position] = Some(item);
        }

        self.with(|s| {
            if let Some(StructureSlot::List(list)) = s.structures.get_mut(&id) {
                list.items = placed.into_iter().flatten().collect();
            }
        });
        trace!(structure = %id, moved = diff.moves(), added = diff.additions(), removed = diff.removed.len(), "list reconciled");
    }

    fn mount_item(
        &self,
        owner: ScopeId,
        anchor: WidgetId,
        at: usize,
        key: &str,
        value: &Value,
        render: &ItemFn,
    ) -> Option<ItemSlot> {
        let scope = self.with(|s| s.scopes.create(owner));
        let cell_key = SlotKey::Named {
            scope,
            name: "item".to_owned(),
        };
        let cell = match self.create_cell(cell_key, value.clone()) {
            Ok(cell) => cell,
            Err(err) => {
                self.report(err);
                self.with(|s| s.teardown_scope(scope, false));
                return None;
            }
        };
        let item = Item {
            key: key.to_owned(),
            value: State::new(cell, self.downgrade()),
        };
        self.run_region(scope, anchor, at, |ui| render(ui, &item));
        Some(ItemSlot {
            key: key.to_owned(),
            scope,
            cell,
        })
    }
}

/// A dialog registered with [`Ui::dialog`].
///
/// The dialog's contents are mounted while `is_open` is truthy.
#[derive(Debug, Clone)]
pub struct Dialog {
    anchor: WidgetId,
    is_open: State,
}

impl Dialog {
    pub(crate) fn new(anchor: WidgetId, is_open: State) -> Self {
        Self { anchor, is_open }
    }

    /// The widget the dialog contents mount under.
    pub fn id(&self) -> WidgetId {
        self.anchor
    }

    /// The open/closed cell.
    pub fn is_open(&self) -> &State {
        &self.is_open
    }

    /// Mount the dialog contents on the next flush.
    pub fn open(&self) {
        self.is_open.write(true);
    }

    /// Unmount the dialog contents on the next flush.
    pub fn close(&self) {
        self.is_open.write(false);
    }

    /// Open a closed dialog or close an open one.
    pub fn toggle(&self) {
        self.is_open.update(|open| !truthy(open));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_keys_use_display_form() {
        let key = ListKey::field("id");
        assert_eq!(key.resolve(&json!({"id": 7})), Some("7".to_owned()));
        assert_eq!(key.resolve(&json!({"id": "a"})), Some("a".to_owned()));
        assert_eq!(key.resolve(&json!({"name": "x"})), None);
        assert_eq!(ListKey::Index.resolve(&json!(1)), None);
    }

    #[test]
    fn key_function_sees_the_item() {
        let key = ListKey::with(|item| item["slug"].as_str().unwrap_or_default().to_uppercase());
        assert_eq!(key.resolve(&json!({"slug": "ab"})), Some("AB".to_owned()));
    }
}
