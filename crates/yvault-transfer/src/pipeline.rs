//! Client-side upload pipeline
//!
//! Chunks `1..N-1` go through a fixed pool of workers pulling from one
//! bounded queue. The first failure cancels the shared token: the dispatch
//! loop stops feeding, idle workers exit, and the call returns every worker
//! error joined. Chunk `N` is sealed and sent alone after the pool drains,
//! and its response carries the final object id.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_util::sync::CancellationToken;
use yvault_core::{UserId, VaultError, VaultResult};

use crate::chunks::ChunkLayout;
use crate::coordinator::{TransferCoordinator, UploadTarget};

/// Produces sealed chunks, 1-indexed.
pub trait ChunkSource: Send + Sync {
    fn chunk_count(&self) -> u32;

    /// Read and seal chunk `chunk`.
    fn sealed_chunk(&self, chunk: u32) -> VaultResult<Vec<u8>>;
}

/// Delivers one sealed chunk. The final chunk's response is the object id.
pub trait ChunkSender: Send + Sync {
    fn send_chunk(
        &self,
        chunk: u32,
        sealed: Vec<u8>,
    ) -> impl Future<Output = VaultResult<Option<String>>> + Send;
}

type SealFn = dyn Fn(u32, &[u8]) -> VaultResult<Vec<u8>> + Send + Sync;

/// In-memory plaintext sealed chunk by chunk with a caller-supplied function.
pub struct SealingSource {
    plaintext: Vec<u8>,
    layout: ChunkLayout,
    seal: Box<SealFn>,
}

impl SealingSource {
    pub fn new(
        plaintext: Vec<u8>,
        layout: ChunkLayout,
        seal: impl Fn(u32, &[u8]) -> VaultResult<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            plaintext,
            layout,
            seal: Box::new(seal),
        }
    }
}

impl ChunkSource for SealingSource {
    fn chunk_count(&self) -> u32 {
        self.layout.chunk_count(self.plaintext.len() as u64)
    }

    fn sealed_chunk(&self, chunk: u32) -> VaultResult<Vec<u8>> {
        let (start, end) = self
            .layout
            .plaintext_bounds(chunk, self.plaintext.len() as u64)
            .ok_or_else(|| VaultError::InvalidRequest(format!("no chunk {chunk}")))?;
        (self.seal)(chunk, &self.plaintext[start as usize..end as usize])
    }
}

/// Sender that hands chunks straight to an in-process coordinator.
pub struct LocalSender {
    coordinator: Arc<TransferCoordinator>,
    caller: UserId,
    target: UploadTarget,
}

impl LocalSender {
    pub fn new(coordinator: Arc<TransferCoordinator>, caller: UserId, target: UploadTarget) -> Self {
        Self {
            coordinator,
            caller,
            target,
        }
    }
}

impl ChunkSender for LocalSender {
    async fn send_chunk(&self, chunk: u32, sealed: Vec<u8>) -> VaultResult<Option<String>> {
        self.coordinator
            .upload_chunk(&self.caller, &self.target, chunk, sealed)
            .await
    }
}

struct Job {
    chunk: u32,
    sealed: Vec<u8>,
}

/// Upload every chunk of `source` through `sender` with `workers` parallel
/// workers. `progress` fires once per delivered chunk.
pub async fn upload_all<S, T>(
    source: Arc<S>,
    sender: Arc<T>,
    workers: usize,
    progress: Arc<dyn Fn(u32) + Send + Sync>,
) -> VaultResult<String>
where
    S: ChunkSource + 'static,
    T: ChunkSender + 'static,
{
    let count = source.chunk_count();
    if count == 0 {
        return Err(VaultError::InvalidRequest("nothing to upload".into()));
    }
    let workers = workers.max(1);

    let cancel = CancellationToken::new();
    let errors: Arc<Mutex<Vec<VaultError>>> = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::channel::<Job>(workers);
    let rx = Arc::new(TokioMutex::new(rx));

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let rx = rx.clone();
        let sender = sender.clone();
        let cancel = cancel.clone();
        let errors = errors.clone();
        let progress = progress.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let job = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    job = async { rx.lock().await.recv().await } => job,
                };
                let Some(job) = job else { break };
                if cancel.is_cancelled() {
                    break;
                }
                let chunk = job.chunk;
                match sender.send_chunk(chunk, job.sealed).await {
                    Ok(_) => progress(chunk),
                    Err(e) => {
                        tracing::warn!(worker, chunk, "chunk upload failed: {e}");
                        errors
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(e);
                        cancel.cancel();
                        break;
                    }
                }
            }
        }));
    }

    for chunk in 1..count {
        if cancel.is_cancelled() {
            break;
        }
        let sealed = match source.sealed_chunk(chunk) {
            Ok(sealed) => sealed,
            Err(e) => {
                errors
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(e);
                cancel.cancel();
                break;
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = tx.send(Job { chunk, sealed }) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    drop(tx);

    for handle in handles {
        if let Err(e) = handle.await {
            errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(VaultError::Other(anyhow::anyhow!("upload worker panicked: {e}")));
            cancel.cancel();
        }
    }

    let failures = std::mem::take(&mut *errors.lock().unwrap_or_else(PoisonError::into_inner));
    if let Some(err) = VaultError::join(failures) {
        tracing::warn!(chunks = count, "upload aborted before the final chunk");
        return Err(err);
    }

    let sealed = source.sealed_chunk(count)?;
    let object_id = sender.send_chunk(count, sealed).await?.ok_or_else(|| {
        VaultError::Backend("final chunk returned no object id".into())
    })?;
    progress(count);
    tracing::info!(chunks = count, object = %object_id, "upload complete");
    Ok(object_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    /// Records delivered chunks and fails the listed ones.
    struct Recorder {
        fail: BTreeSet<u32>,
        delivered: Mutex<Vec<u32>>,
        total: u32,
    }

    impl ChunkSender for Recorder {
        async fn send_chunk(&self, chunk: u32, _sealed: Vec<u8>) -> VaultResult<Option<String>> {
            if self.fail.contains(&chunk) {
                return Err(VaultError::Backend(format!("chunk {chunk} refused")));
            }
            self.delivered.lock().unwrap().push(chunk);
            Ok((chunk == self.total).then(|| "obj".to_string()))
        }
    }

    fn source(len: usize) -> Arc<SealingSource> {
        Arc::new(SealingSource::new(
            vec![7u8; len],
            ChunkLayout::new(4, 0),
            |_, plain| Ok(plain.to_vec()),
        ))
    }

    fn recorder(total: u32, fail: &[u32]) -> Arc<Recorder> {
        Arc::new(Recorder {
            fail: fail.iter().copied().collect(),
            delivered: Mutex::new(Vec::new()),
            total,
        })
    }

    #[tokio::test]
    async fn test_final_chunk_goes_last() {
        let sender = recorder(5, &[]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let progress_seen = seen.clone();
        let object = upload_all(
            source(20),
            sender.clone(),
            3,
            Arc::new(move |c: u32| progress_seen.lock().unwrap().push(c)),
        )
        .await
        .unwrap();

        assert_eq!(object, "obj");
        let delivered = sender.delivered.lock().unwrap().clone();
        assert_eq!(delivered.len(), 5);
        assert_eq!(*delivered.last().unwrap(), 5);
        assert_eq!(seen.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_single_chunk_skips_the_pool() {
        let sender = recorder(1, &[]);
        let object = upload_all(source(3), sender.clone(), 3, Arc::new(|_: u32| {}))
            .await
            .unwrap();
        assert_eq!(object, "obj");
        assert_eq!(*sender.delivered.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_failure_cancels_and_never_sends_final() {
        let sender = recorder(5, &[3]);
        let err = upload_all(source(20), sender.clone(), 2, Arc::new(|_: u32| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Backend(_)));
        let delivered = sender.delivered.lock().unwrap().clone();
        assert!(!delivered.contains(&3));
        assert!(!delivered.contains(&5));
    }

    #[tokio::test]
    async fn test_seal_failure_aborts() {
        let src = Arc::new(SealingSource::new(vec![0u8; 12], ChunkLayout::new(4, 0), |chunk, _| {
            if chunk == 2 {
                Err(VaultError::InvalidRequest("seal".into()))
            } else {
                Ok(vec![0u8; 4])
            }
        }));
        let sender = recorder(3, &[]);
        let err = upload_all(src, sender.clone(), 1, Arc::new(|_: u32| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidRequest(_)));
        assert!(!sender.delivered.lock().unwrap().contains(&3));
    }
}
