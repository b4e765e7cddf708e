//! Live channel instances during a run.
//!
//! An instance holds the payload one output produced, plus how many consumers
//! still have to read it. The last consumer releases it.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

use crossplan_core::error::{Error, Result};
use crossplan_core::plan::OutputRef;

/// Opaque data handed between stages. Executors downcast to their own types.
pub type Payload = Arc<dyn Any + Send + Sync>;

pub struct ChannelInstance {
    pub output: OutputRef,
    pub payload: Payload,
    /// Record count observed by the producer, if it counted.
    pub measured: Option<u64>,
    remaining: usize,
}

impl ChannelInstance {
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl std::fmt::Debug for ChannelInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelInstance")
            .field("output", &self.output)
            .field("measured", &self.measured)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct ExecutionState {
    instances: BTreeMap<OutputRef, ChannelInstance>,
    measured: BTreeMap<OutputRef, u64>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `payload` for `consumers` readers. A later registration for the
    /// same output (the next loop iteration) replaces the earlier one.
    pub fn register(
        &mut self,
        output: OutputRef,
        payload: Payload,
        consumers: usize,
        measured: Option<u64>,
    ) {
        if let Some(n) = measured {
            self.measured.insert(output, n);
        }
        if consumers == 0 {
            trace!(%output, "output has no readers; dropped");
            return;
        }
        self.instances.insert(
            output,
            ChannelInstance {
                output,
                payload,
                measured,
                remaining: consumers,
            },
        );
    }

    /// Read `output` once; the instance is released after its last read.
    pub fn consume(&mut self, output: OutputRef) -> Result<Payload> {
        let instance = self
            .instances
            .get_mut(&output)
            .ok_or_else(|| Error::Executor(format!("no data available for {output}")))?;
        let payload = instance.payload.clone();
        instance.remaining = instance.remaining.saturating_sub(1);
        if instance.remaining == 0 {
            self.instances.remove(&output);
            trace!(%output, "channel instance released");
        }
        Ok(payload)
    }

    /// Read without counting; loop-invariant inputs are read every iteration.
    pub fn read(&self, output: OutputRef) -> Result<Payload> {
        self.instances
            .get(&output)
            .map(|i| i.payload.clone())
            .ok_or_else(|| Error::Executor(format!("no data available for {output}")))
    }

    pub fn contains(&self, output: OutputRef) -> bool {
        self.instances.contains_key(&output)
    }

    pub fn release(&mut self, output: OutputRef) -> bool {
        self.instances.remove(&output).is_some()
    }

    pub fn record_measured(&mut self, output: OutputRef, count: u64) {
        self.measured.insert(output, count);
    }

    /// Every record count seen so far, latest value per output.
    pub fn measured(&self) -> &BTreeMap<OutputRef, u64> {
        &self.measured
    }

    pub fn live(&self) -> usize {
        self.instances.len()
    }

    /// Drop every remaining instance; returns how many were still live.
    pub fn dispose_all(&mut self) -> usize {
        let n = self.instances.len();
        self.instances.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossplan_core::id::OperatorId;

    fn out(op: u64) -> OutputRef {
        OutputRef::new(OperatorId::new(op), 0)
    }

    #[test]
    fn released_after_last_consumer() {
        let mut state = ExecutionState::new();
        state.register(out(0), Arc::new(vec![1u32, 2, 3]), 2, Some(3));

        let first = state.consume(out(0)).unwrap();
        assert_eq!(first.downcast_ref::<Vec<u32>>().unwrap().len(), 3);
        assert!(state.contains(out(0)));
        state.consume(out(0)).unwrap();
        assert!(!state.contains(out(0)));
        assert!(state.consume(out(0)).is_err());
        assert_eq!(state.measured().get(&out(0)), Some(&3));
    }

    #[test]
    fn read_does_not_count() {
        let mut state = ExecutionState::new();
        state.register(out(1), Arc::new(7u64), 1, None);
        for _ in 0..3 {
            assert_eq!(*state.read(out(1)).unwrap().downcast_ref::<u64>().unwrap(), 7);
        }
        assert_eq!(state.instances[&out(1)].remaining(), 1);
        assert_eq!(state.dispose_all(), 1);
        assert_eq!(state.live(), 0);
    }

    #[test]
    fn reregistration_replaces_and_unread_outputs_are_dropped() {
        let mut state = ExecutionState::new();
        state.register(out(2), Arc::new(1u8), 1, Some(1));
        state.register(out(2), Arc::new(2u8), 1, Some(5));
        assert_eq!(*state.read(out(2)).unwrap().downcast_ref::<u8>().unwrap(), 2);
        assert_eq!(state.measured()[&out(2)], 5);

        state.register(out(3), Arc::new(()), 0, Some(0));
        assert!(!state.contains(out(3)));
        assert_eq!(state.measured()[&out(3)], 0);
    }
}
