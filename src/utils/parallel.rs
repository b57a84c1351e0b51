use std::sync::atomic::{AtomicUsize, Ordering};
use log::info;
use crate::{AcxError, Result};

pub trait ParallelProcessor {
    /// A dedicated pool so concurrent runs with different worker counts do
    /// not fight over rayon's global pool.
    fn build_pool(threads: usize) -> Result<rayon::ThreadPool> {
        let threads = if threads == 0 { num_cpus::get() } else { threads };
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("acx-worker-{}", i))
            .build()
            .map_err(|e| AcxError::Config(format!("failed to start worker pool: {}", e)))
    }

    fn get_progress_counter() -> AtomicUsize {
        AtomicUsize::new(0)
    }

    fn report_progress(counter: &AtomicUsize, total: usize, verb: &str) {
        let processed = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if processed % 100 == 0 || processed == total {
            info!(
                "Progress: {}/{} files {} ({:.1}%)",
                processed,
                total,
                verb,
                (processed as f64 / total as f64) * 100.0
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    struct Probe;
    impl ParallelProcessor for Probe {}

    #[test]
    fn pool_has_requested_width() {
        let pool = Probe::build_pool(3).unwrap();
        assert_eq!(pool.current_num_threads(), 3);
        let widths: Vec<usize> = pool.install(|| (0..4).into_par_iter().map(|_| rayon::current_num_threads()).collect());
        assert!(widths.iter().all(|&w| w == 3));
    }

    #[test]
    fn progress_counts_every_call() {
        let counter = Probe::get_progress_counter();
        for _ in 0..5 {
            Probe::report_progress(&counter, 5, "checked");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }
}
