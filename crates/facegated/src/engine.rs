use facegate_core::analyzer::FaceAnalyzer;
use facegate_core::service::{
    FaceService, RegisterOutcome, ServiceError, ServiceStatus, VerifyOutcome,
};
use facegate_core::store::EmbeddingStore;
use facegate_core::types::{EmbeddingSummary, IdentityId};
use image::RgbImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
}

type Reply<T> = oneshot::Sender<Result<T, ServiceError>>;

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Register {
        student_id: IdentityId,
        image: RgbImage,
        reply: Reply<RegisterOutcome>,
    },
    Verify {
        student_id: Option<IdentityId>,
        image: RgbImage,
        reply: Reply<VerifyOutcome>,
    },
    List {
        student_id: IdentityId,
        reply: Reply<Vec<EmbeddingSummary>>,
    },
    Delete {
        student_id: IdentityId,
        embedding_id: String,
        reply: Reply<bool>,
    },
    Status {
        reply: Reply<ServiceStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub async fn register(
        &self,
        student_id: IdentityId,
        image: RgbImage,
    ) -> Result<RegisterOutcome, EngineError> {
        self.call(|reply| EngineRequest::Register {
            student_id,
            image,
            reply,
        })
        .await
    }

    /// `student_id = None` verifies against every registered student.
    pub async fn verify(
        &self,
        student_id: Option<IdentityId>,
        image: RgbImage,
    ) -> Result<VerifyOutcome, EngineError> {
        self.call(|reply| EngineRequest::Verify {
            student_id,
            image,
            reply,
        })
        .await
    }

    pub async fn list(&self, student_id: IdentityId) -> Result<Vec<EmbeddingSummary>, EngineError> {
        self.call(|reply| EngineRequest::List { student_id, reply }).await
    }

    pub async fn delete(
        &self,
        student_id: IdentityId,
        embedding_id: String,
    ) -> Result<bool, EngineError> {
        self.call(|reply| EngineRequest::Delete {
            student_id,
            embedding_id,
            reply,
        })
        .await
    }

    pub async fn status(&self) -> Result<ServiceStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }

    /// A handle whose engine has already exited.
    #[cfg(test)]
    pub(crate) fn disconnected() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { tx }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Move `service` onto a dedicated OS thread and return a handle to it.
///
/// Requests are processed one at a time in arrival order, so store writes
/// never interleave. The thread exits when every handle has been dropped.
pub fn spawn_engine<S, A>(mut service: FaceService<S, A>) -> Result<EngineHandle, EngineError>
where
    S: EmbeddingStore + Send + 'static,
    A: FaceAnalyzer + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                // A dropped receiver means the caller timed out; the work is
                // already done, so the reply is discarded.
                match req {
                    EngineRequest::Register {
                        student_id,
                        image,
                        reply,
                    } => {
                        let _ = reply.send(service.register(student_id, &image));
                    }
                    EngineRequest::Verify {
                        student_id,
                        image,
                        reply,
                    } => {
                        let _ = reply.send(service.verify(student_id, &image));
                    }
                    EngineRequest::List { student_id, reply } => {
                        let _ = reply.send(service.list_embeddings(student_id));
                    }
                    EngineRequest::Delete {
                        student_id,
                        embedding_id,
                        reply,
                    } => {
                        let _ = reply.send(service.delete_embedding(student_id, &embedding_id));
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(service.status());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
