use crate::domain::device::DeviceIdentity;
use crate::domain::ports::{BackendBox, CoordinationBackend};
use crate::domain::session::{NewSession, PaymentSession, PendingSession, SessionUpdate};
use crate::domain::token::ConnectionToken;
use crate::error::BackendError;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type Reply<T> = oneshot::Sender<Result<T, BackendError>>;

enum Job {
    IssueToken {
        device: DeviceIdentity,
        reply: Reply<ConnectionToken>,
    },
    ClaimNext {
        device: DeviceIdentity,
        reply: Reply<Option<PaymentSession>>,
    },
    Update {
        session_id: String,
        update: SessionUpdate,
        reply: Option<Reply<()>>,
    },
    Create {
        request: NewSession,
        reply: Reply<PendingSession>,
    },
}

/// Serialises every backend call through a single worker task.
///
/// Calls are executed strictly in submission order and never overlap, so a
/// status update queued before a claim is always sent before it.
#[derive(Clone)]
pub struct SerialBackend {
    jobs: mpsc::UnboundedSender<Job>,
}

impl SerialBackend {
    /// Spawns the worker. It exits once every `SerialBackend` clone is dropped.
    pub fn spawn(inner: BackendBox) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(inner, rx));
        Self { jobs }
    }

    /// Queues a session status update without waiting for it. Failures are
    /// logged by the worker.
    pub fn submit_update(&self, session_id: &str, update: SessionUpdate) {
        let job = Job::Update {
            session_id: session_id.to_owned(),
            update,
            reply: None,
        };
        if self.jobs.send(job).is_err() {
            warn!(session_id = %session_id, "backend worker gone, dropping session update");
        }
    }

    async fn call<T>(&self, job: impl FnOnce(Reply<T>) -> Job) -> Result<T, BackendError> {
        let (tx, rx) = oneshot::channel();
        self.jobs
            .send(job(tx))
            .map_err(|_| BackendError::WorkerGone)?;
        rx.await.map_err(|_| BackendError::WorkerGone)?
    }
}

#[async_trait]
impl CoordinationBackend for SerialBackend {
    async fn issue_connection_token(
        &self,
        device: &DeviceIdentity,
    ) -> Result<ConnectionToken, BackendError> {
        let device = device.clone();
        self.call(|reply| Job::IssueToken { device, reply }).await
    }

    async fn claim_next_session(
        &self,
        device: &DeviceIdentity,
    ) -> Result<Option<PaymentSession>, BackendError> {
        let device = device.clone();
        self.call(|reply| Job::ClaimNext { device, reply }).await
    }

    async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<(), BackendError> {
        let session_id = session_id.to_owned();
        let update = update.clone();
        self.call(|reply| Job::Update {
            session_id,
            update,
            reply: Some(reply),
        })
        .await
    }

    async fn create_session(&self, request: &NewSession) -> Result<PendingSession, BackendError> {
        let request = request.clone();
        self.call(|reply| Job::Create { request, reply }).await
    }
}

async fn run_worker(inner: BackendBox, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        match job {
            Job::IssueToken { device, reply } => {
                let _ = reply.send(inner.issue_connection_token(&device).await);
            }
            Job::ClaimNext { device, reply } => {
                let _ = reply.send(inner.claim_next_session(&device).await);
            }
            Job::Update {
                session_id,
                update,
                reply,
            } => {
                let result = inner.update_session(&session_id, &update).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(session_id = %session_id, status = ?update.status, error = %e, "session update failed");
                        }
                    }
                }
            }
            Job::Create { request, reply } => {
                let _ = reply.send(inner.create_session(&request).await);
            }
        }
    }
    debug!("backend worker stopped");
}
