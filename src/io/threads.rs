//! Threading infrastructure — producer-consumer read pipeline.
//!
//! One dedicated producer thread parses FASTX chunks and feeds a
//! bounded crossbeam channel; a fixed pool of workers drains it. Uses
//! crossbeam scoped threads so workers can borrow the graph and other
//! shared state without `Arc`.
//!
//! There is no cross-thread cancellation: a fatal error in any worker
//! raises a process-wide abort flag that the producer reads at each
//! I/O boundary, so the pipeline drains and exits. The first error is
//! kept and returned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use crossbeam::channel;

use crate::io::fastx::{FastxSource, ReadChunk};

/// Default worker count.
pub const DEFAULT_THREADS: usize = 2;

// ---------------------------------------------------------------------------
// AbortFlag
// ---------------------------------------------------------------------------

/// Process-wide abort switch checked at pipeline I/O boundaries.
#[derive(Debug, Default)]
pub struct AbortFlag(AtomicBool);

impl AbortFlag {
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// run_read_pipeline
// ---------------------------------------------------------------------------

/// Run the read pipeline: producer parses chunks, `threads` workers
/// apply `worker_fn`. A worker error aborts the run; the first error is
/// returned after the pipeline drains.
pub fn run_read_pipeline<F>(mut fastx: FastxSource, threads: usize, worker_fn: F) -> Result<()>
where
    F: Fn(ReadChunk) -> Result<()> + Send + Sync,
{
    let num_threads = threads.max(1);
    let (sender, receiver) = channel::bounded::<ReadChunk>(num_threads * 2);
    let abort = AbortFlag::default();
    let first_error: Mutex<Option<anyhow::Error>> = Mutex::new(None);

    let worker_ref = &worker_fn;
    let abort_ref = &abort;
    let error_ref = &first_error;
    crossbeam::scope(|scope| {
        // Worker threads.
        for _ in 0..num_threads {
            let recv = receiver.clone();
            scope.spawn(move |_| {
                while let Ok(chunk) = recv.recv() {
                    if abort_ref.is_raised() {
                        continue; // drain without processing
                    }
                    if let Err(e) = worker_ref(chunk) {
                        abort_ref.raise();
                        let mut slot = error_ref.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                    }
                }
            });
        }
        // Drop the extra receiver clone so workers exit once the sender
        // is gone.
        drop(receiver);

        // Producer thread.
        scope.spawn(move |_| {
            let mut chunk = Vec::new();
            loop {
                if abort_ref.is_raised() {
                    break;
                }
                match fastx.next_chunk(&mut chunk) {
                    Ok(true) => {
                        let batch = std::mem::take(&mut chunk);
                        if sender.send(batch).is_err() {
                            break; // workers have shut down
                        }
                    }
                    Ok(false) => break, // EOF
                    Err(e) => {
                        abort_ref.raise();
                        let mut slot = error_ref.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                        break;
                    }
                }
            }
            // sender dropped here, signaling workers to exit.
        });
    })
    .map_err(|e| anyhow::anyhow!("thread panicked: {:?}", e))?;

    match first_error.into_inner().unwrap() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::fastx::FastxConfig;
    use std::sync::atomic::AtomicU64;

    fn write_reads(dir: &std::path::Path, n: usize) -> String {
        let path = dir.join("reads.fa");
        let mut text = String::new();
        for i in 0..n {
            text.push_str(&format!(">r{i}\nACGTACGTACGT\n"));
        }
        std::fs::write(&path, text).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_pipeline_processes_all_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_reads(dir.path(), 100);
        let config = FastxConfig {
            read1_paths: vec![path],
            chunk_size: 7,
            ..Default::default()
        };
        let source = FastxSource::new(config).unwrap();
        let count = AtomicU64::new(0);
        run_read_pipeline(source, 3, |chunk| {
            count.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            Ok(())
        })
        .unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_worker_error_aborts_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_reads(dir.path(), 50);
        let config = FastxConfig {
            read1_paths: vec![path],
            chunk_size: 5,
            ..Default::default()
        };
        let source = FastxSource::new(config).unwrap();
        let err = run_read_pipeline(source, 2, |_chunk| anyhow::bail!("worker failed"))
            .unwrap_err();
        assert!(err.to_string().contains("worker failed"));
    }
}
