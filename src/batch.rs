use crate::runtime::Runtime;

/// RAII guard that ends the batch even if the closure panics.
///
/// When the outermost guard drops normally, queued jobs are flushed right
/// away. When it drops while unwinding, the queue is left for the host's next
/// flush instead: running user jobs during a panic could abort the process.
struct BatchGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if !self.runtime.exit_batch() {
            return;
        }
        if std::thread::panicking() {
            cov_mark::hit!(batch_unwound_without_flush);
            self.runtime.inner.scheduler.request_flush();
        } else {
            self.runtime.flush();
        }
    }
}

impl Runtime {
    /// Run `f` with flushing deferred, then flush once when the outermost
    /// batch returns.
    ///
    /// Batched effects touched by several writes inside `f` run once, after
    /// `f`, and no flush is requested from the host while the batch is open.
    /// Sync effects are unaffected and still run on every write. Batches nest.
    ///
    /// # Example
    /// ```ignore
    /// rt.batch(|| {
    ///     first.set("Ada".into());
    ///     last.set("Lovelace".into());
    /// }); // a full-name effect runs once here
    /// ```
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.enter_batch();
        let _guard = BatchGuard { runtime: self };
        f()
    }

    /// Whether a [`batch`](Self::batch) is currently open.
    pub fn in_batch(&self) -> bool {
        self.is_batching()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn nested_batches_flush_once_at_the_outermost_exit() {
        let requests = Arc::new(AtomicUsize::new(0));
        let rt = Runtime::builder()
            .on_flush_requested({
                let requests = requests.clone();
                move || {
                    requests.fetch_add(1, Ordering::Relaxed);
                }
            })
            .build();
        let a = rt.cell(0);
        let b = rt.cell(0);
        let runs = Arc::new(AtomicUsize::new(0));
        let _effect = rt.effect({
            let (a, b, runs) = (a.clone(), b.clone(), runs.clone());
            move || {
                runs.fetch_add(1, Ordering::Relaxed);
                let _ = a.get() + b.get();
            }
        });

        let returned = rt.batch(|| {
            a.set(1);
            rt.batch(|| b.set(2));
            assert!(rt.in_batch());
            assert_eq!(runs.load(Ordering::Relaxed), 1, "inner exit does not flush");
            "done"
        });

        assert_eq!(returned, "done");
        assert!(!rt.in_batch());
        assert_eq!(runs.load(Ordering::Relaxed), 2);
        assert_eq!(rt.pending_jobs(), 0);
        assert_eq!(requests.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn sync_effects_still_run_per_write() {
        let rt = Runtime::new();
        let cell = rt.cell(0);
        let runs = Arc::new(AtomicUsize::new(0));
        let _effect = rt.effect_with(crate::EffectOptions::new().sync(true), {
            let (cell, runs) = (cell.clone(), runs.clone());
            move || {
                runs.fetch_add(1, Ordering::Relaxed);
                let _ = cell.get();
            }
        });

        rt.batch(|| {
            cell.set(1);
            cell.set(2);
            assert_eq!(runs.load(Ordering::Relaxed), 3);
        });
    }

    #[test]
    fn panicking_batch_leaves_queue_for_the_host() {
        let requests = Arc::new(AtomicUsize::new(0));
        let rt = Runtime::builder()
            .on_flush_requested({
                let requests = requests.clone();
                move || {
                    requests.fetch_add(1, Ordering::Relaxed);
                }
            })
            .build();
        let cell = rt.cell(0);
        let _effect = rt.effect({
            let cell = cell.clone();
            move || {
                let _ = cell.get();
            }
        });

        cov_mark::check!(batch_unwound_without_flush);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            rt.batch(|| {
                cell.set(1);
                panic!("aborted update");
            })
        }));

        assert!(result.is_err());
        assert!(!rt.in_batch());
        assert_eq!(rt.pending_jobs(), 1);
        assert_eq!(requests.load(Ordering::Relaxed), 1);
        assert_eq!(rt.flush(), 1);
    }
}
