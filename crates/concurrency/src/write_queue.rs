//! Single-writer queue (C13, §4.12).
//!
//! A single dedicated thread drains a bounded queue of write operations
//! in submission order, applying each through a caller-supplied
//! handler (WAL append, in-memory apply, entity-block append, index
//! update — the actual I/O lives in `entity-engine`, this module only
//! owns ordering, backpressure, and the per-entity circuit breaker).
//! Enqueuing blocks up to 100ms waiting for room before failing with
//! `Timeout`.

use crate::circuit_breaker::CircuitBreaker;
use entity_core::error::{EntityError, Result};
use entity_core::limits::DEFAULT_ENQUEUE_TIMEOUT_MS;
use entity_core::types::Entity;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const ENQUEUE_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// A single write-path operation (§4.12).
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert a brand-new entity.
    Create(Entity),
    /// Apply a tag mutation to an existing entity, recorded as a new
    /// temporal snapshot.
    Update(Entity),
    /// Remove an entity and its index entries.
    Delete(String),
    /// Attach a single tag to an existing entity without a full update.
    AddTag {
        /// The entity to tag.
        id: String,
        /// The tag to attach.
        tag: String,
    },
    /// Detach a single tag from an existing entity.
    RemoveTag {
        /// The entity to untag.
        id: String,
        /// The tag to detach.
        tag: String,
    },
    /// Force a checkpoint regardless of the operation-count threshold.
    Checkpoint,
    /// Flush buffered writes without checkpointing.
    Flush,
}

impl WriteOp {
    /// The entity id this operation's circuit breaker should key on.
    /// `Checkpoint`/`Flush` aren't per-entity and bypass the breaker.
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            WriteOp::Create(e) | WriteOp::Update(e) => Some(e.id.as_str()),
            WriteOp::Delete(id) => Some(id.as_str()),
            WriteOp::AddTag { id, .. } => Some(id.as_str()),
            WriteOp::RemoveTag { id, .. } => Some(id.as_str()),
            WriteOp::Checkpoint | WriteOp::Flush => None,
        }
    }
}

struct Job {
    op: WriteOp,
    reply: Sender<Result<()>>,
}

/// Handle for enqueuing write operations onto the single-writer thread.
/// Dropping the last handle stops the worker once its current job
/// finishes.
pub struct WriteQueue {
    sender: SyncSender<Job>,
    breaker: Arc<CircuitBreaker>,
    worker: Option<JoinHandle<()>>,
}

impl WriteQueue {
    /// Start the writer thread with the given queue `capacity`, applying
    /// each op through `handler` in submission order.
    pub fn start(capacity: usize, mut handler: impl FnMut(&WriteOp) -> Result<()> + Send + 'static) -> Self {
        let (sender, receiver): (SyncSender<Job>, Receiver<Job>) = mpsc::sync_channel(capacity);
        let breaker = Arc::new(CircuitBreaker::new());
        let breaker_for_thread = Arc::clone(&breaker);

        let worker = std::thread::Builder::new()
            .name("entity-write-queue".to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    let result = handler(&job.op);
                    if let Some(id) = job.op.entity_id() {
                        match &result {
                            Ok(()) => breaker_for_thread.record_success(id),
                            Err(_) => breaker_for_thread.record_failure(id),
                        }
                    }
                    let _ = job.reply.send(result);
                }
            })
            .expect("failed to spawn write-queue thread");

        WriteQueue {
            sender,
            breaker,
            worker: Some(worker),
        }
    }

    /// Enqueue `op` and block until the writer thread has applied it.
    /// Fails fast with `CircuitOpen` without touching the queue if the
    /// target entity's circuit is tripped. Blocks up to 100ms for queue
    /// room before failing with `Timeout`; fails with `Shutdown` if the
    /// writer thread has already exited.
    pub fn submit(&self, op: WriteOp) -> Result<()> {
        if let Some(id) = op.entity_id() {
            self.breaker.check(id)?;
        }

        let enqueue_timeout = Duration::from_millis(DEFAULT_ENQUEUE_TIMEOUT_MS);
        let (reply_tx, reply_rx) = mpsc::channel();
        let mut job = Job { op, reply: reply_tx };
        let deadline = Instant::now() + enqueue_timeout;

        loop {
            match self.sender.try_send(job) {
                Ok(()) => break,
                Err(TrySendError::Disconnected(_)) => return Err(EntityError::Shutdown),
                Err(TrySendError::Full(returned)) => {
                    if Instant::now() >= deadline {
                        return Err(EntityError::Timeout(enqueue_timeout));
                    }
                    job = returned;
                    std::thread::sleep(ENQUEUE_POLL_INTERVAL);
                }
            }
        }

        reply_rx.recv().map_err(|_| EntityError::Shutdown)?
    }

    /// Whether `id`'s circuit is currently open.
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

impl Drop for WriteQueue {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_entity(id: &str) -> Entity {
        Entity {
            id: id.to_string(),
            tags: Vec::new(),
            content: Vec::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn applied_ops_run_in_submission_order() {
        let applied: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let applied_for_handler = Arc::clone(&applied);
        let queue = WriteQueue::start(8, move |op| {
            if let Some(id) = op.entity_id() {
                applied_for_handler.lock().unwrap().push(id.to_string());
            }
            Ok(())
        });

        queue.submit(WriteOp::Create(test_entity("a"))).unwrap();
        queue.submit(WriteOp::Create(test_entity("b"))).unwrap();
        queue.submit(WriteOp::Create(test_entity("c"))).unwrap();

        assert_eq!(*applied.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn handler_failure_is_surfaced_and_recorded() {
        let queue = WriteQueue::start(8, |_| Err(EntityError::corruption("boom")));
        let result = queue.submit(WriteOp::Create(test_entity("x")));
        assert!(result.is_err());
    }

    #[test]
    fn repeated_failures_trip_the_circuit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_handler = Arc::clone(&calls);
        let queue = WriteQueue::start(8, move |_| {
            calls_for_handler.fetch_add(1, Ordering::SeqCst);
            Err(EntityError::corruption("boom"))
        });

        for _ in 0..5 {
            let _ = queue.submit(WriteOp::Update(test_entity("flaky")));
        }
        let result = queue.submit(WriteOp::Update(test_entity("flaky")));
        assert!(matches!(result, Err(EntityError::CircuitOpen { .. })));
        // The tripped circuit rejected the 6th call before it reached the handler.
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn checkpoint_and_flush_bypass_the_circuit_breaker() {
        let queue = WriteQueue::start(8, |_| Ok(()));
        queue.submit(WriteOp::Checkpoint).unwrap();
        queue.submit(WriteOp::Flush).unwrap();
    }
}
