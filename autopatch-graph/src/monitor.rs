use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::backend::GraphBackend;

/// Server figures readable from any thread.
///
/// Scalar fields use atomics so hosts can poll without contending with the
/// scheduler thread. The xrun counter accumulates until `take_xruns`.
#[derive(Clone, Default)]
pub struct GraphMonitor {
    sample_rate: Arc<AtomicU32>,
    block_size: Arc<AtomicU32>,
    /// Engine DSP load (atomic f32 as u32 bits)
    cpu_load: Arc<AtomicU32>,
    xruns: Arc<AtomicU32>,
}

impl GraphMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pull current figures from the backend and add its new xruns.
    pub fn refresh_from<B: GraphBackend + ?Sized>(&self, backend: &B) {
        self.sample_rate.store(backend.sample_rate(), Ordering::Relaxed);
        self.block_size.store(backend.block_size(), Ordering::Relaxed);
        self.cpu_load
            .store(backend.cpu_load().to_bits(), Ordering::Relaxed);
        let new = backend.take_xruns();
        if new > 0 {
            self.xruns.fetch_add(new, Ordering::Relaxed);
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub fn block_size(&self) -> u32 {
        self.block_size.load(Ordering::Relaxed)
    }

    pub fn cpu_load(&self) -> f32 {
        f32::from_bits(self.cpu_load.load(Ordering::Relaxed))
    }

    /// Xruns in the current window.
    pub fn xruns(&self) -> u32 {
        self.xruns.load(Ordering::Relaxed)
    }

    /// Read and reset the xrun counter, closing the current window.
    pub fn take_xruns(&self) -> u32 {
        self.xruns.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryGraph;

    #[test]
    fn refresh_accumulates_xruns_until_taken() {
        let graph = MemoryGraph::new();
        graph.set_info(44_100, 128, 12.5);
        let monitor = GraphMonitor::new();
        let reader = monitor.clone();

        graph.add_xruns(2);
        monitor.refresh_from(&graph);
        graph.add_xruns(1);
        monitor.refresh_from(&graph);

        assert_eq!(reader.sample_rate(), 44_100);
        assert_eq!(reader.block_size(), 128);
        assert!((reader.cpu_load() - 12.5).abs() < f32::EPSILON);
        assert_eq!(reader.xruns(), 3);
        assert_eq!(reader.take_xruns(), 3);
        assert_eq!(monitor.xruns(), 0);
    }
}
