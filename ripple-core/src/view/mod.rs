//! Build-time API.
//!
//! The host script receives a [`Ui`] and describes the tree once: cells,
//! computed nodes, widgets with literal or bound properties, event
//! handlers, and structural constructs whose builders run again whenever
//! they mount a region. Nothing is global; every call goes through the
//! `Ui` of the session being built.
//!
//! ```rust
//! use ripple_core::{ListKey, Reactive, Session, SessionConfig};
//! use serde_json::json;
//!
//! let mut session = Session::create(SessionConfig::default());
//! session
//!     .build(|ui| {
//!         let todos = ui.state(json!([{"id": 1, "title": "write docs"}]));
//!         let count = todos.map(|v| v.as_array().map_or(0, Vec::len));
//!         ui.widget("text").prop("value", &count).mount();
//!         ui.list(&todos, ListKey::field("id"), |ui, item| {
//!             let title = item.value().map(|v| v["title"].clone());
//!             ui.widget("text").prop("value", &title).mount();
//!         });
//!     })
//!     .unwrap();
//! assert_eq!(session.snapshot().root.children.len(), 2);
//! ```

mod scope;
mod structure;

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, error};

use crate::graph::{NodeId, NodeKind};
use crate::reactive::{
    CallSite, Computed, Handle, Reactive, Runtime, ScopeId, SlotKey, State, WeakRuntime,
};
use crate::render::{Patch, PropSlot, WidgetId, WidgetNode};
use crate::session::SessionId;

pub(crate) use scope::ScopeTable;
pub(crate) use structure::StructureSlot;
pub use structure::{Dialog, Item, ListKey};

use structure::{BranchSlot, ListSlot};

/// An event handler. Receives the event payload.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// A widget property bound to a reactive source.
#[derive(Debug, Clone)]
pub(crate) struct BindingSlot {
    pub(crate) widget: WidgetId,
    pub(crate) field: String,
    pub(crate) source: NodeId,
}

/// A property value: a literal, or a reactive source it stays bound to.
#[derive(Debug, Clone)]
pub enum Prop {
    /// Shipped once, never updated.
    Literal(Value),
    /// Re-read and updated whenever the source changes.
    Bound(Handle),
}

macro_rules! literal_prop {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Prop {
                fn from(value: $ty) -> Self {
                    Prop::Literal(Value::from(value))
                }
            }
        )*
    };
}

literal_prop!(&str, String, bool, i32, i64, u32, u64, usize, f64, Value);

impl From<&State> for Prop {
    fn from(state: &State) -> Self {
        Prop::Bound(state.handle().clone())
    }
}

impl From<State> for Prop {
    fn from(state: State) -> Self {
        Prop::Bound(state.handle().clone())
    }
}

impl From<&Computed> for Prop {
    fn from(computed: &Computed) -> Self {
        Prop::Bound(computed.handle().clone())
    }
}

impl From<Computed> for Prop {
    fn from(computed: Computed) -> Self {
        Prop::Bound(computed.handle().clone())
    }
}

/// The build context.
///
/// A `Ui` inserts widgets under one parent at an advancing cursor, inside
/// one structural scope.
pub struct Ui {
    rt: Runtime,
    scope: ScopeId,
    parent: WidgetId,
    cursor: usize,
    /// Zero for the top level of the scope's region.
    depth: usize,
}

impl Ui {
    pub(crate) fn new(rt: Runtime, scope: ScopeId, parent: WidgetId, cursor: usize) -> Self {
        Self {
            rt,
            scope,
            parent,
            cursor,
            depth: 0,
        }
    }

    fn child(&self, parent: WidgetId) -> Self {
        Self {
            rt: self.rt.clone(),
            scope: self.scope,
            parent,
            cursor: 0,
            depth: self.depth + 1,
        }
    }

    /// The session being built.
    pub fn session(&self) -> SessionId {
        self.rt.with(|s| s.session)
    }

    /// The current structural scope.
    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// The widget new widgets are inserted under.
    pub fn parent(&self) -> WidgetId {
        self.parent
    }

    /// A state cell keyed by this call site.
    ///
    /// Inside a region that is mounted again the same call site yields a
    /// fresh cell; inside one region, repeated runs of the call site (in a
    /// loop) yield distinct cells.
    #[track_caller]
    pub fn state(&mut self, initial: impl Into<Value>) -> State {
        let site = CallSite::caller();
        let occurrence = self.rt.with(|s| s.scopes.next_occurrence(self.scope, site));
        self.cell(
            SlotKey::Site {
                scope: self.scope,
                site,
                occurrence,
            },
            initial.into(),
        )
    }

    /// A state cell under an explicit name, unique within the scope.
    ///
    /// Asking again for the same name returns the existing cell with its
    /// current value.
    pub fn state_keyed(&mut self, name: impl Into<String>, initial: impl Into<Value>) -> State {
        self.cell(
            SlotKey::Named {
                scope: self.scope,
                name: name.into(),
            },
            initial.into(),
        )
    }

    fn cell(&mut self, key: SlotKey, initial: Value) -> State {
        match self.rt.create_cell(key, initial) {
            Ok(id) => State::new(id, self.rt.downgrade()),
            Err(err) => {
                self.rt.report(err);
                State::new(NodeId::new(), WeakRuntime::dangling())
            }
        }
    }

    /// A computed node owned by the current scope.
    pub fn computed<F, V>(&mut self, f: F) -> Computed
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        Computed::from_fn(&self.rt.downgrade(), move || f().into())
    }

    /// A string computed from `template`, one `{}` per source.
    pub fn format(&mut self, template: &str, sources: &[&dyn Reactive]) -> Computed {
        let handles: Vec<Handle> = sources.iter().map(|s| s.handle().clone()).collect();
        let template = template.to_owned();
        Computed::from_fn(&self.rt.downgrade(), move || {
            let values: Vec<Value> = handles.iter().map(|h| h.read()).collect();
            Value::String(crate::reactive::render_template(&template, &values))
        })
    }

    /// Start describing a widget of type `kind`.
    #[track_caller]
    pub fn widget(&mut self, kind: impl Into<String>) -> WidgetBuilder<'_> {
        WidgetBuilder {
            site: CallSite::caller(),
            ui: self,
            kind: kind.into(),
            key: None,
            props: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// A `text` widget showing `value`.
    #[track_caller]
    pub fn text(&mut self, value: impl Into<Prop>) -> WidgetId {
        self.widget("text").prop("value", value).mount()
    }

    /// A `button` widget with a click handler.
    #[track_caller]
    pub fn button<F>(&mut self, label: impl Into<Prop>, on_click: F) -> WidgetId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.widget("button").prop("label", label).on("click", on_click).mount()
    }

    /// Mount `then` while `predicate` is truthy and `otherwise` while it is
    /// not.
    #[track_caller]
    pub fn branch<P, T, E>(&mut self, predicate: &P, then: T, otherwise: E) -> WidgetId
    where
        P: Reactive,
        T: Fn(&mut Ui) + Send + Sync + 'static,
        E: Fn(&mut Ui) + Send + Sync + 'static,
    {
        let site = CallSite::caller();
        self.branch_at(site, "branch", predicate.node_id(), Arc::new(then), Some(Arc::new(otherwise)))
    }

    /// Mount `then` while `predicate` is truthy.
    #[track_caller]
    pub fn when<P, T>(&mut self, predicate: &P, then: T) -> WidgetId
    where
        P: Reactive,
        T: Fn(&mut Ui) + Send + Sync + 'static,
    {
        let site = CallSite::caller();
        self.branch_at(site, "branch", predicate.node_id(), Arc::new(then), None)
    }

    /// Register a dialog: its contents are mounted while it is open.
    #[track_caller]
    pub fn dialog<T>(&mut self, render: T) -> Dialog
    where
        T: Fn(&mut Ui) + Send + Sync + 'static,
    {
        let site = CallSite::caller();
        let is_open = self.state(false);
        let anchor = self.branch_at(site, "dialog", is_open.id(), Arc::new(render), None);
        Dialog::new(anchor, is_open)
    }

    /// Mount one region per item of the array held by `source`.
    #[track_caller]
    pub fn list<S, F>(&mut self, source: &S, key: ListKey, render: F) -> WidgetId
    where
        S: Reactive,
        F: Fn(&mut Ui, &Item) + Send + Sync + 'static,
    {
        let site = CallSite::caller();
        let (anchor, _) = self.mount_widget(site, None, "list".to_owned(), Vec::new(), Vec::new());
        let slot = StructureSlot::List(ListSlot {
            anchor,
            owner: self.scope,
            source: source.node_id(),
            key,
            render: Arc::new(render),
            items: Vec::new(),
            warned_positional: false,
        });
        self.structure(source.node_id(), slot);
        anchor
    }

    fn branch_at(
        &mut self,
        site: CallSite,
        kind: &str,
        source: NodeId,
        then_arm: structure::ArmFn,
        else_arm: Option<structure::ArmFn>,
    ) -> WidgetId {
        let (anchor, _) = self.mount_widget(site, None, kind.to_owned(), Vec::new(), Vec::new());
        let slot = StructureSlot::Branch(BranchSlot {
            anchor,
            owner: self.scope,
            source,
            current: None,
            arm_scope: None,
            then_arm,
            else_arm,
        });
        self.structure(source, slot);
        anchor
    }

    /// Register a construct depending on `source` and mount its initial
    /// regions.
    fn structure(&mut self, source: NodeId, slot: StructureSlot) {
        let scope = self.scope;
        let registered = self.rt.with(|s| {
            if !s.graph.contains(source) {
                return None;
            }
            let id = s.graph.add_node(NodeKind::Structure);
            if s.graph.add_edge(source, id).is_err() {
                s.graph.remove_node(id);
                return None;
            }
            s.structures.insert(id, slot);
            if let Some(record) = s.scopes.get_mut(scope) {
                record.structures.push(id);
            }
            Some(id)
        });
        match registered {
            Some(id) => self.rt.reconcile(id),
            None => error!(source = %source, "structural construct bound to a disposed value"),
        }
    }

    fn mount_widget(
        &mut self,
        site: CallSite,
        name: Option<String>,
        kind: String,
        props: Vec<(String, Prop)>,
        handlers: Vec<(String, Handler)>,
    ) -> (WidgetId, bool) {
        let scope = self.scope;
        let key = match name {
            Some(name) => SlotKey::Named { scope, name },
            None => {
                let occurrence = self.rt.with(|s| s.scopes.next_occurrence(scope, site));
                SlotKey::Site {
                    scope,
                    site,
                    occurrence,
                }
            }
        };

        let existing = self
            .rt
            .with(|s| s.widget_keys.get(&key).copied().filter(|id| s.tree.contains(*id)));
        if let Some(existing) = existing {
            debug!(widget = %existing, key = %key, "widget key already mounted");
            return (existing, false);
        }

        let mut initial = Vec::with_capacity(props.len());
        for (field, prop) in props {
            match prop {
                Prop::Literal(value) => initial.push((field, value, None)),
                Prop::Bound(handle) => {
                    let value = match handle.try_read() {
                        Ok(value) => value,
                        Err(err) => {
                            self.rt.report(err);
                            Value::Null
                        }
                    };
                    initial.push((field, value, Some(handle.id())));
                }
            }
        }

        let (parent, cursor, top_level) = (self.parent, self.cursor, self.depth == 0);
        let mounted = self.rt.with(|s| {
            let slots: IndexMap<String, PropSlot> = initial
                .iter()
                .map(|(field, value, _)| (field.clone(), PropSlot::literal(value.clone())))
                .collect();
            let id = s.tree.insert(parent, cursor, kind.clone(), slots)?;

            let mut bindings = Vec::new();
            for (field, _, source) in &initial {
                let Some(source) = *source else { continue };
                if !s.graph.contains(source) {
                    continue;
                }
                let binding = s.graph.add_node(NodeKind::Binding);
                if s.graph.add_edge(source, binding).is_err() {
                    s.graph.remove_node(binding);
                    continue;
                }
                s.tree.bind_prop(id, field, binding);
                s.bindings.insert(
                    binding,
                    BindingSlot {
                        widget: id,
                        field: field.clone(),
                        source,
                    },
                );
                bindings.push(binding);
            }
            if !handlers.is_empty() {
                s.handlers.insert(id, handlers.into_iter().collect());
            }

            if let Some(record) = s.scopes.get_mut(scope) {
                record.widgets.push(id);
                record.widget_keys.push(key.clone());
                record.bindings.extend(bindings);
                if top_level {
                    record.roots.push(id);
                }
            }
            s.widget_keys.insert(key, id);

            let index = s.tree.index_of(id).unwrap_or(cursor);
            let props = s.tree.get(id).map(WidgetNode::rendered_props).unwrap_or_default();
            s.emit(Patch::Mount {
                parent_id: parent,
                index,
                node_id: id,
                kind,
                props,
            });
            Some(id)
        });

        match mounted {
            Some(id) => {
                self.cursor += 1;
                (id, true)
            }
            None => {
                error!(parent = %parent, "parent widget is gone; widget not mounted");
                (parent, false)
            }
        }
    }
}

/// Describes one widget; finish with [`mount`](Self::mount) or
/// [`children`](Self::children).
#[must_use = "a widget is only created by `mount` or `children`"]
pub struct WidgetBuilder<'a> {
    ui: &'a mut Ui,
    site: CallSite,
    kind: String,
    key: Option<String>,
    props: Vec<(String, Prop)>,
    handlers: Vec<(String, Handler)>,
}

impl WidgetBuilder<'_> {
    /// Key the widget by name instead of by call site.
    pub fn key(mut self, name: impl Into<String>) -> Self {
        self.key = Some(name.into());
        self
    }

    /// Set a property to a literal or bind it to a cell or computed node.
    pub fn prop(mut self, field: impl Into<String>, value: impl Into<Prop>) -> Self {
        self.props.push((field.into(), value.into()));
        self
    }

    /// Handle a client event.
    pub fn on<F>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.handlers.push((event.into(), Arc::new(handler)));
        self
    }

    /// Two-way binding: `field` shows the cell, and a `change` event writes
    /// its payload back into it.
    pub fn model(self, field: impl Into<String>, state: &State) -> Self {
        let target = state.clone();
        self.prop(field, state).on("change", move |payload| {
            target.write(payload.clone());
        })
    }

    /// Create the widget.
    pub fn mount(self) -> WidgetId {
        let WidgetBuilder {
            ui,
            site,
            kind,
            key,
            props,
            handlers,
        } = self;
        ui.mount_widget(site, key, kind, props, handlers).0
    }

    /// Create the widget and describe its children.
    pub fn children(self, build: impl FnOnce(&mut Ui)) -> WidgetId {
        let WidgetBuilder {
            ui,
            site,
            kind,
            key,
            props,
            handlers,
        } = self;
        let (id, fresh) = ui.mount_widget(site, key, kind, props, handlers);
        if fresh {
            let mut inner = ui.child(id);
            build(&mut inner);
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literal_props_convert() {
        assert!(matches!(Prop::from("a"), Prop::Literal(Value::String(_))));
        assert!(matches!(Prop::from(3usize), Prop::Literal(Value::Number(_))));
        assert!(matches!(Prop::from(json!([1])), Prop::Literal(Value::Array(_))));
    }
}
