//! Patch sinks: where a session hands its batches.
//!
//! A sink receives the batches of one session in emission order.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use crate::render::PatchBatch;

/// Receives the batches of one session.
pub trait PatchSink: Send {
    fn deliver(&mut self, batch: PatchBatch);
}

impl PatchSink for mpsc::UnboundedSender<PatchBatch> {
    fn deliver(&mut self, batch: PatchBatch) {
        if self.send(batch).is_err() {
            warn!("patch receiver dropped; batch discarded");
        }
    }
}

/// Forwards batches to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PatchBatch>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PatchBatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PatchSink for ChannelSink {
    fn deliver(&mut self, batch: PatchBatch) {
        self.tx.deliver(batch);
    }
}

/// Calls a closure per batch.
pub struct FnSink<F>(pub F);

impl<F> PatchSink for FnSink<F>
where
    F: FnMut(PatchBatch) + Send,
{
    fn deliver(&mut self, batch: PatchBatch) {
        (self.0)(batch)
    }
}

/// Collects batches in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct VecSink {
    batches: Arc<Mutex<Vec<PatchBatch>>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything received so far.
    pub fn take(&self) -> Vec<PatchBatch> {
        std::mem::take(&mut *self.batches.lock())
    }

    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }
}

impl PatchSink for VecSink {
    fn deliver(&mut self, batch: PatchBatch) {
        self.batches.lock().push(batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;

    fn batch(seq: u64) -> PatchBatch {
        PatchBatch {
            session: SessionId::new(),
            seq,
            ops: Vec::new(),
        }
    }

    #[test]
    fn vec_sink_clones_share_buffer() {
        let sink = VecSink::new();
        let mut writer = sink.clone();
        writer.deliver(batch(1));
        writer.deliver(batch(2));

        let seen: Vec<u64> = sink.take().iter().map(|b| b.seq).collect();
        assert_eq!(seen, vec![1, 2]);
        assert!(sink.is_empty());
    }

    #[test]
    fn fn_sink_calls_closure() {
        let mut count = 0;
        {
            let mut sink = FnSink(|_batch: PatchBatch| count += 1);
            sink.deliver(batch(1));
        }
        assert_eq!(count, 1);
    }

    #[test]
    fn channel_sink_preserves_order() {
        let (mut sink, mut rx) = ChannelSink::new();
        sink.deliver(batch(1));
        sink.deliver(batch(2));
        assert_eq!(rx.try_recv().unwrap().seq, 1);
        assert_eq!(rx.try_recv().unwrap().seq, 2);
    }
}
