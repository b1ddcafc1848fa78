//! Patch Scheduler
//!
//! Turns the cells written since the last flush into one ordered list of
//! patches.
//!
//! # Flush Rounds
//!
//! Each round takes the pending cells and everything downstream of them in
//! topological order, then:
//!
//! 1. Brings the affected computed nodes up to date, dependencies first, so
//!    a node reachable along two paths is evaluated once.
//! 2. Reconciles the affected structural constructs, outermost first. A
//!    construct removed by an outer one in the same round is skipped.
//!    Mount, unmount and move operations are recorded as they happen.
//! 3. Re-reads the source of every affected binding still alive and keeps
//!    an update when it differs from the value last shipped.
//!
//! Reconciling a list rewrites the item cells of retained items; those
//! writes are pending again after the round and get another round, up to
//! the configured bound.
//!
//! The batch is every structural operation in order, then one update per
//! (widget, field), skipping widgets that no longer exist.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{error, trace};

use crate::graph::{NodeId, NodeKind};
use crate::reactive::{Phase, Runtime};
use crate::render::{Patch, WidgetId};

impl Runtime {
    /// Run a flush and return the operations it produced.
    pub(crate) fn flush(&self, max_rounds: usize) -> Vec<Patch> {
        let entered = self.with(|s| {
            s.collecting = Some(Vec::new());
            s.fault = None;
            match s.phase {
                Phase::Idle | Phase::Callback => {
                    s.phase = Phase::Flushing;
                    true
                }
                _ => false,
            }
        });

        let mut updates: IndexMap<(WidgetId, String), Value> = IndexMap::new();
        let mut rounds = 0;
        loop {
            let sources: Vec<NodeId> = self.with(|s| s.pending.drain(..).collect());
            if sources.is_empty() {
                break;
            }
            if rounds == max_rounds {
                error!(rounds, pending = sources.len(), "flush did not settle; leaving writes for the next flush");
                self.with(|s| s.pending.extend(sources));
                break;
            }
            rounds += 1;
            self.flush_round(&sources, &mut updates);
        }

        let ops = self.with(|s| {
            let mut ops = s.collecting.take().unwrap_or_default();
            for ((widget, field), value) in updates {
                if s.tree.contains(widget) {
                    ops.push(Patch::Update {
                        node_id: widget,
                        field,
                        value,
                    });
                }
            }
            if entered && s.phase == Phase::Flushing {
                s.phase = Phase::Idle;
            }
            ops
        });
        trace!(rounds, ops = ops.len(), "flush finished");
        ops
    }

    fn flush_round(&self, sources: &[NodeId], updates: &mut IndexMap<(WidgetId, String), Value>) {
        let affected = self.with(|s| s.graph.collect_affected(sources.iter().copied()));

        let derived: Vec<NodeId> = self.with(|s| {
            affected
                .iter()
                .copied()
                .filter(|id| s.graph.kind(*id) == Some(NodeKind::Derived))
                .collect()
        });
        for id in derived {
            if let Err(err) = self.ensure_fresh(id) {
                self.report(err);
            }
        }

        let mut structures: Vec<(usize, NodeId)> = self.with(|s| {
            affected
                .iter()
                .filter_map(|id| s.structures.get(id).map(|slot| (s.tree.depth(slot.anchor()), *id)))
                .collect()
        });
        structures.sort_by_key(|(depth, _)| *depth);
        for (_, id) in structures {
            if self.with(|s| s.structures.contains_key(&id)) {
                self.reconcile(id);
            }
        }

        let bindings: Vec<(NodeId, NodeId)> = self.with(|s| {
            affected
                .iter()
                .filter_map(|id| s.bindings.get(id).map(|b| (*id, b.source)))
                .collect()
        });
        for (binding, source) in bindings {
            if !self.with(|s| s.bindings.contains_key(&binding)) {
                continue;
            }
            let value = match self.read_node(source) {
                Ok(value) => value,
                Err(err) => {
                    self.report(err);
                    continue;
                }
            };
            self.with(|s| {
                let Some(slot) = s.bindings.get(&binding) else {
                    return;
                };
                let (widget, field) = (slot.widget, slot.field.clone());
                let unchanged = s
                    .tree
                    .get(widget)
                    .and_then(|node| node.props().get(&field))
                    .map_or(true, |prop| prop.value == value);
                if unchanged {
                    return;
                }
                s.tree.set_prop(widget, &field, value.clone());
                updates.insert((widget, field), value);
            });
        }

        // Computed nodes track their own freshness.
        self.with(|s| {
            let settled: Vec<NodeId> = affected
                .iter()
                .copied()
                .filter(|id| s.graph.kind(*id) != Some(NodeKind::Derived))
                .collect();
            s.graph.mark_clean(settled);
        });
    }
}
