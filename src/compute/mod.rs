//! Off-thread feature computation with a one-way fallback to the calling thread.

mod dispatcher;

pub use dispatcher::{ComputeDispatcher, DispatchMode, VectorSink, WORKER_THREAD_NAME};

use crate::capture::KeyEvent;
use crate::features::FeatureVector;

/// Windowing + extraction over successive batches of key events.
pub trait WindowCompute: Send + Sync + 'static {
    /// Vectors for the windows this batch completes.
    fn compute(&self, events: &[KeyEvent]) -> Vec<FeatureVector>;

    /// Vectors for windows still open at the end of the stream.
    fn finish(&self) -> Vec<FeatureVector> {
        Vec::new()
    }
}
