use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// Strategy used to generate row identifiers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    #[default]
    Ulid,
    Uuid,
    Nanoid,
}

impl IdStrategy {
    pub fn generate(&self) -> String {
        match self {
            IdStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
            IdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            IdStrategy::Nanoid => nanoid::nanoid!(),
        }
    }
}

type Buffer = Arc<Mutex<VecDeque<String>>>;

/// Look-ahead source of unique identifiers.
///
/// `next()` pops the front of a pre-generated buffer and asks a background
/// worker for one replacement. When the buffer has run dry the identifier
/// is generated synchronously instead, so `next()` never waits on the worker.
pub struct IdSource {
    strategy: IdStrategy,
    buffer: Buffer,
    refill_tx: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl IdSource {
    pub fn new(strategy: IdStrategy, buffer_size: usize) -> Self {
        let primed: VecDeque<String> = (0..buffer_size).map(|_| strategy.generate()).collect();
        let buffer = Arc::new(Mutex::new(primed));

        let (refill_tx, refill_rx) = mpsc::channel::<()>();
        let worker_buffer = Arc::clone(&buffer);
        let worker = std::thread::Builder::new()
            .name("schemadb-ids".into())
            .spawn(move || {
                // Exits once every sender is dropped
                while refill_rx.recv().is_ok() {
                    let id = strategy.generate();
                    lock(&worker_buffer).push_back(id);
                }
            });

        let (refill_tx, worker) = match worker {
            Ok(handle) => (Some(refill_tx), Some(handle)),
            Err(e) => {
                log::warn!("Identifier refill thread unavailable, generating inline: {e}");
                (None, None)
            }
        };

        IdSource {
            strategy,
            buffer,
            refill_tx,
            worker,
        }
    }

    /// Take the next identifier.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> String {
        let buffered = lock(&self.buffer).pop_front();
        let id = match buffered {
            Some(id) => id,
            None => {
                log::warn!("Identifier buffer empty, generating synchronously");
                return self.strategy.generate();
            }
        };

        let requested = self
            .refill_tx
            .as_ref()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false);
        if !requested {
            lock(&self.buffer).push_back(self.strategy.generate());
        }
        id
    }

    /// Number of identifiers currently waiting in the buffer.
    pub fn buffered(&self) -> usize {
        lock(&self.buffer).len()
    }

    pub fn strategy(&self) -> IdStrategy {
        self.strategy
    }
}

impl Drop for IdSource {
    fn drop(&mut self) {
        self.refill_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for IdSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdSource")
            .field("strategy", &self.strategy)
            .field("buffered", &self.buffered())
            .finish()
    }
}

// The buffer holds plain strings, so a poisoned lock still guards valid data.
fn lock(buffer: &Mutex<VecDeque<String>>) -> MutexGuard<'_, VecDeque<String>> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
