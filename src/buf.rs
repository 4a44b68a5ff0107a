use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::Sample;

/// Samples waiting for export, shared by producers and the flusher.
///
/// The lock is held only to append, swap out or requeue; delivery works on
/// the swapped-out contents.
#[derive(Debug, Default)]
pub struct MetricBuf {
    samples: Mutex<VecDeque<Sample>>,
}
impl MetricBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, samples: impl IntoIterator<Item = Sample>) {
        self.samples.lock().extend(samples);
    }

    /// Installs an empty buffer and returns what was buffered.
    pub fn take(&self) -> VecDeque<Sample> {
        std::mem::take(&mut *self.samples.lock())
    }

    /// Puts `samples` back ahead of everything currently buffered, keeping
    /// their relative order. Returns the new buffer length.
    pub fn requeue_front(&self, samples: Vec<Sample>) -> usize {
        let mut buf = self.samples.lock();
        for sample in samples.into_iter().rev() {
            buf.push_front(sample);
        }
        buf.len()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }
}
