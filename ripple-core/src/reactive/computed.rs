//! Computed Nodes
//!
//! A computed node is a cached derived value that re-evaluates only when
//! its dependencies change.
//!
//! # How Computed Nodes Work
//!
//! 1. On first read, the node runs its function inside a tracking frame and
//!    caches the result. Every cell or computed node read during the run
//!    becomes a dependency.
//!
//! 2. When a dependency changes, the node is marked dirty but not
//!    recomputed. Recomputation happens on the next read or flush, so
//!    several writes in one callback cost one evaluation.
//!
//! 3. On the next access, the node first re-checks the versions of what it
//!    read last time. If nothing moved, it is marked clean and the cache
//!    is returned.
//!
//! 4. A recomputation that yields an equal value keeps the version, so
//!    downstream nodes see no change.
//!
//! Dependencies are rebuilt on every run: a function that reads `b` only
//! while `a` is true drops its edge to `b` once `a` turns false.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use super::context::Reads;
use super::runtime::{Handle, Reactive, WeakRuntime};
use super::value::display;
use crate::graph::NodeId;

/// The recompute function of a computed node.
pub(crate) type ComputeFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Storage for one computed node inside the runtime.
pub(crate) struct ComputedSlot {
    pub(crate) compute: ComputeFn,
    /// `None` until the first evaluation.
    pub(crate) value: Option<Value>,
    pub(crate) version: u64,
    /// What the last evaluation read, with the versions it saw.
    pub(crate) dep_versions: Reads,
}

impl ComputedSlot {
    pub(crate) fn new(compute: ComputeFn) -> Self {
        Self {
            compute,
            value: None,
            version: 0,
            dep_versions: Reads::new(),
        }
    }
}

/// Handle to a computed node.
#[derive(Clone, Debug)]
pub struct Computed {
    handle: Handle,
}

impl Computed {
    /// Register `f` as a new computed node in `rt`.
    ///
    /// If the runtime is already gone the handle is dangling and reads
    /// `Null`.
    pub(crate) fn from_fn<F>(rt: &WeakRuntime, f: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        match rt.upgrade() {
            Some(runtime) => {
                let id = runtime.create_computed(Arc::new(f));
                Self {
                    handle: Handle::new(id, rt.clone()),
                }
            }
            None => {
                warn!("computed node created after its session was torn down");
                Self {
                    handle: Handle::new(NodeId::new(), WeakRuntime::dangling()),
                }
            }
        }
    }

    /// The node's id.
    pub fn id(&self) -> NodeId {
        self.handle.id()
    }
}

impl Reactive for Computed {
    fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// Combine two reactive values.
pub fn zip_with<A, B, F, V>(a: &A, b: &B, f: F) -> Computed
where
    A: Reactive,
    B: Reactive,
    F: Fn(&Value, &Value) -> V + Send + Sync + 'static,
    V: Into<Value>,
{
    let left = a.handle().clone();
    let right = b.handle().clone();
    Computed::from_fn(&left.weak_runtime(), move || {
        let l = left.read();
        let r = right.read();
        f(&l, &r).into()
    })
}

/// Fill each `{}` in `template` with the display form of the next source.
///
/// Missing sources leave the placeholder empty; extra sources are ignored.
pub fn format(template: &str, sources: &[&dyn Reactive]) -> Computed {
    let handles: Vec<Handle> = sources.iter().map(|s| s.handle().clone()).collect();
    let rt = handles
        .first()
        .map(Handle::weak_runtime)
        .unwrap_or_else(WeakRuntime::dangling);
    let template = template.to_owned();
    Computed::from_fn(&rt, move || {
        let values: Vec<Value> = handles.iter().map(|h| h.read()).collect();
        Value::String(render_template(&template, &values))
    })
}

pub(crate) fn render_template(template: &str, values: &[Value]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut values = values.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("{}") {
        out.push_str(&rest[..pos]);
        if let Some(value) = values.next() {
            out.push_str(&display(value));
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::reactive::runtime::Runtime;
    use crate::reactive::{ScopeId, SlotKey, State};
    use crate::session::SessionId;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;

    fn cell(rt: &Runtime, name: &str, initial: Value) -> State {
        let key = SlotKey::Named {
            scope: ScopeId::ROOT,
            name: name.into(),
        };
        State::new(rt.create_cell(key, initial).unwrap(), rt.downgrade())
    }

    #[test]
    fn computed_is_lazy_and_cached() {
        let rt = Runtime::new(SessionId::new());
        let n = cell(&rt, "n", json!(2));
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();

        let doubled = n.map(move |v| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            v.as_i64().unwrap_or(0) * 2
        });
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        assert_eq!(doubled.read(), json!(4));
        assert_eq!(doubled.read(), json!(4));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        n.write(3);
        n.write(5);
        assert_eq!(doubled.read(), json!(10));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn equal_result_cuts_off_downstream() {
        let rt = Runtime::new(SessionId::new());
        let n = cell(&rt, "n", json!(1));
        let parity = n.map(|v| v.as_i64().unwrap_or(0) % 2);
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let label = parity.map(move |p| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            if p == &json!(0) { "even" } else { "odd" }
        });

        assert_eq!(label.read(), json!("odd"));
        n.write(3);
        assert_eq!(label.read(), json!("odd"));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dependencies_follow_the_branch_taken() {
        let rt = Runtime::new(SessionId::new());
        let flag = cell(&rt, "flag", json!(true));
        let detail = cell(&rt, "detail", json!("shown"));

        let (f, d) = (flag.clone(), detail.clone());
        let view = Computed::from_fn(&rt.downgrade(), move || {
            if crate::reactive::truthy(&f.read()) {
                d.read()
            } else {
                json!("hidden")
            }
        });

        assert_eq!(view.read(), json!("shown"));
        let reads_detail =
            |rt: &Runtime| rt.with(|s| s.graph.get_node(detail.id()).unwrap().dependents().contains(&view.id()));
        assert!(reads_detail(&rt));

        flag.write(false);
        assert_eq!(view.read(), json!("hidden"));
        assert!(!reads_detail(&rt));
    }

    #[test]
    fn mutual_reads_are_a_cycle() {
        let rt = Runtime::new(SessionId::new());
        let later: Arc<OnceLock<Computed>> = Arc::new(OnceLock::new());
        let later_clone = later.clone();

        let a = Computed::from_fn(&rt.downgrade(), move || match later_clone.get() {
            Some(b) => b.read(),
            None => Value::Null,
        });
        let b = a.map(|v| v.clone());
        later.set(b).unwrap();

        assert!(matches!(a.try_read(), Err(Error::Cycle { .. })));
        assert!(rt.with(|s| s.fault.is_none()));
        assert!(rt.with(|s| s.tracking.is_empty()));
    }

    #[test]
    fn zip_with_combines_both_sides() {
        let rt = Runtime::new(SessionId::new());
        let first = cell(&rt, "first", json!("Ada"));
        let last = cell(&rt, "last", json!("Lovelace"));
        let full = zip_with(&first, &last, |a, b| format!("{} {}", display(a), display(b)));

        assert_eq!(full.read(), json!("Ada Lovelace"));
        last.write("Byron");
        assert_eq!(full.read(), json!("Ada Byron"));
    }

    #[test]
    fn format_fills_placeholders() {
        let rt = Runtime::new(SessionId::new());
        let name = cell(&rt, "name", json!("Bo"));
        let count = cell(&rt, "count", json!(3));
        let msg = format("{} has {} items", &[&name, &count]);

        assert_eq!(msg.read(), json!("Bo has 3 items"));
        count.write(4);
        assert_eq!(msg.read(), json!("Bo has 4 items"));
    }

    #[test]
    fn template_tolerates_missing_sources() {
        assert_eq!(render_template("{}-{}", &[json!(1)]), "1-");
        assert_eq!(render_template("plain", &[json!(1)]), "plain");
    }

    #[test]
    fn computed_created_in_callback_belongs_to_root() {
        let rt = Runtime::new(SessionId::new());
        rt.set_phase(crate::reactive::Phase::Callback);
        let n = cell(&rt, "n", json!(4));

        let half = n.map(|v| v.as_i64().unwrap_or(0) / 2);

        assert_eq!(half.read(), json!(2));
        let in_root = rt.with(|s| {
            s.scopes
                .get(ScopeId::ROOT)
                .map_or(false, |record| record.computeds.contains(&half.id()))
        });
        assert!(in_root);
    }
}
