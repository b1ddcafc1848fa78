//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a cell or computed
//! node is read, the read is recorded against the current computation.
//!
//! # Implementation
//!
//! Each session's runtime keeps a stack of tracking frames. Evaluating a
//! computed node pushes a frame; reads append to the top frame; the frame
//! is popped when evaluation completes and its reads become the node's new
//! dependency set.
//!
//! Nested frames support a computed node that reads another computed node
//! which has to re-evaluate first.

use smallvec::SmallVec;

use super::runtime::Runtime;
use crate::graph::NodeId;

/// Reads collected during one evaluation, with the version seen.
pub(crate) type Reads = SmallVec<[(NodeId, u64); 4]>;

/// An entry in the tracking stack.
#[derive(Debug, Clone)]
pub(crate) struct TrackingFrame {
    owner: Option<NodeId>,
    reads: Reads,
}

impl TrackingFrame {
    pub(crate) fn new(owner: Option<NodeId>) -> Self {
        Self {
            owner,
            reads: SmallVec::new(),
        }
    }

    pub(crate) fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    /// Record a read. Repeated reads of the same node keep the first
    /// version seen.
    pub(crate) fn record(&mut self, node: NodeId, version: u64) {
        if !self.reads.iter().any(|(seen, _)| *seen == node) {
            self.reads.push((node, version));
        }
    }
}

/// Guard that pops the frame when dropped.
///
/// This keeps the tracking stack balanced even if the computation panics.
pub(crate) struct ReactiveContext<'a> {
    rt: &'a Runtime,
    owner: Option<NodeId>,
    finished: bool,
}

impl<'a> ReactiveContext<'a> {
    /// Enter a new tracking frame for `owner`.
    pub(crate) fn enter(rt: &'a Runtime, owner: Option<NodeId>) -> Self {
        rt.with(|s| s.tracking.push(TrackingFrame::new(owner)));
        Self {
            rt,
            owner,
            finished: false,
        }
    }

    /// Pop the frame and return the reads it collected.
    pub(crate) fn finish(mut self) -> Reads {
        self.finished = true;
        let frame = self.rt.with(|s| s.tracking.pop());
        match frame {
            Some(frame) => {
                debug_assert_eq!(frame.owner, self.owner, "ReactiveContext mismatch");
                frame.reads
            }
            None => Reads::new(),
        }
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.rt.with(|s| s.tracking.pop());
        }
    }
}
