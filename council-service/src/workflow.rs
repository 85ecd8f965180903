use std::sync::Arc;
use std::time::Duration;

use council_flow::{ChatMessage, Council, CouncilError, DebateState, PersistenceBackend};
use dashmap::DashMap;
use graph_flow::{
    ExecutionStatus, FlowRunner, Graph, GraphBuilder, InMemorySessionStorage, Session,
    SessionStorage,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{DebateCase, DebateRequest, DebateView, SessionResponse, SessionStatus};
use crate::tasks::debate_round::DEBATE_ROUND_TASK;
use crate::tasks::opening::OPENING_TASK;
use crate::tasks::synthesis::SYNTHESIS_TASK;
use crate::tasks::utils::{ANSWER_KEY, CASE_KEY, STATE_KEY, VIEW_KEY};
use crate::tasks::{DebateRoundTask, OpeningTask, SynthesisTask};

/// How long a completed or failed session stays readable for follow-ups
pub const SESSION_TTL: Duration = Duration::from_secs(60 * 60);

pub fn build_debate_workflow(council: Council, cases: Arc<dyn PersistenceBackend>) -> Graph {
    GraphBuilder::new("council_debate")
        .add_task(Arc::new(OpeningTask::new(council.clone())))
        .add_task(Arc::new(DebateRoundTask::new(council.clone())))
        .add_task(Arc::new(SynthesisTask::new(council, cases)))
        .add_edge(OPENING_TASK, DEBATE_ROUND_TASK)
        .add_edge(DEBATE_ROUND_TASK, SYNTHESIS_TASK)
        .build()
}

pub async fn create_debate_session(case: DebateCase) -> Session {
    let session = Session::new_from_task(Uuid::new_v4().to_string(), OPENING_TASK);
    session
        .context
        .set(VIEW_KEY, DebateView::new(case.language))
        .await;
    session.context.set(CASE_KEY, case).await;
    session
}

fn storage_error(e: graph_flow::GraphError) -> CouncilError {
    CouncilError::Storage(format!("session storage failed: {}", e))
}

/// Debate sessions on the council workflow graph. Each session is advanced
/// by one background driver at a time; finished sessions expire after `ttl`.
#[derive(Clone)]
pub struct DebateSessions {
    storage: Arc<dyn SessionStorage>,
    runner: FlowRunner,
    drivers: Arc<DashMap<String, Arc<Mutex<()>>>>,
    finished: Arc<DashMap<String, Instant>>,
    ttl: Duration,
}

impl DebateSessions {
    pub fn new(council: Council, cases: Arc<dyn PersistenceBackend>) -> Self {
        let storage: Arc<dyn SessionStorage> = Arc::new(InMemorySessionStorage::new());
        let graph = Arc::new(build_debate_workflow(council, cases));
        Self {
            runner: FlowRunner::new(graph, storage.clone()),
            storage,
            drivers: Arc::new(DashMap::new()),
            finished: Arc::new(DashMap::new()),
            ttl: SESSION_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    async fn load(&self, session_id: &str) -> Result<Session, CouncilError> {
        self.storage
            .get(session_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| CouncilError::SessionNotFound(session_id.to_string()))
    }

    async fn view(session: &Session) -> Result<DebateView, CouncilError> {
        session
            .context
            .get(VIEW_KEY)
            .await
            .ok_or_else(|| CouncilError::Storage(format!("session {} has no view", session.id)))
    }

    /// Saves a new session and starts driving it. Returns the session id
    /// immediately.
    pub async fn start(&self, request: DebateRequest) -> Result<String, CouncilError> {
        self.evict_expired().await;
        let session = create_debate_session(request.into()).await;
        let session_id = session.id.clone();
        self.storage.save(session).await.map_err(storage_error)?;
        info!(session_id = %session_id, "Debate session created");

        self.spawn_driver(&session_id);
        Ok(session_id)
    }

    pub async fn get(&self, session_id: &str) -> Result<SessionResponse, CouncilError> {
        let session = self.load(session_id).await?;
        Ok(Self::view(&session).await?.to_response(&session.id))
    }

    /// Hands the clinician's answer to the parked debate and resumes it
    pub async fn resume(&self, session_id: &str, answer: &str) -> Result<(), CouncilError> {
        let session = self.load(session_id).await?;
        let view = Self::view(&session).await?;
        let parked = session
            .context
            .get::<DebateState>(STATE_KEY)
            .await
            .is_some_and(|state| state.is_waiting());
        let answered = session.context.get::<String>(ANSWER_KEY).await.is_some();
        if view.status != SessionStatus::WaitingForInput || !parked || answered {
            return Err(CouncilError::InvalidRequest(
                "the council is not waiting for an answer".to_string(),
            ));
        }

        session
            .context
            .set(ANSWER_KEY, answer.trim().to_string())
            .await;
        self.storage.save(session).await.map_err(storage_error)?;
        info!(session_id = %session_id, "Clinician answer delivered");

        self.spawn_driver(session_id);
        Ok(())
    }

    /// Case and debate log of a completed session, for follow-up calls
    pub async fn completed_context(
        &self,
        session_id: &str,
    ) -> Result<(DebateCase, Vec<ChatMessage>), CouncilError> {
        let session = self.load(session_id).await?;
        let view = Self::view(&session).await?;
        if view.status != SessionStatus::Completed {
            return Err(CouncilError::InvalidRequest(
                "the debate has not finished yet".to_string(),
            ));
        }
        let case: DebateCase = session
            .context
            .get(CASE_KEY)
            .await
            .ok_or_else(|| CouncilError::Storage(format!("session {} has no case", session_id)))?;
        Ok((case, view.messages))
    }

    pub async fn append_message(
        &self,
        session_id: &str,
        message: ChatMessage,
    ) -> Result<(), CouncilError> {
        let session = self.load(session_id).await?;
        let mut view = Self::view(&session).await?;
        view.messages.push(message);
        session.context.set(VIEW_KEY, view).await;
        self.storage.save(session).await.map_err(storage_error)
    }

    fn spawn_driver(&self, session_id: &str) {
        let sessions = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            sessions.drive(&session_id).await;
        });
    }

    /// Runs graph steps until the session completes, fails or parks on a
    /// clinician question
    async fn drive(&self, session_id: &str) {
        let driver = self.drivers.entry(session_id.to_string()).or_default().clone();
        let _running = driver.lock().await;

        loop {
            match self.should_step(session_id).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Debate session vanished");
                    return;
                }
            }

            match self.runner.run(session_id).await {
                Ok(result) if matches!(result.status, ExecutionStatus::Completed) => {
                    info!(session_id = %session_id, "Debate session completed");
                    self.finished.insert(session_id.to_string(), Instant::now());
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(session_id = %session_id, error = %e, "Debate session failed");
                    self.fail(session_id, e.to_string()).await;
                    return;
                }
            }
        }
    }

    /// False once the session is finished or parked without an answer
    async fn should_step(&self, session_id: &str) -> Result<bool, CouncilError> {
        let session = self.load(session_id).await?;
        if Self::view(&session).await?.is_finished() {
            return Ok(false);
        }
        let parked = session
            .context
            .get::<DebateState>(STATE_KEY)
            .await
            .is_some_and(|state| state.is_waiting());
        if parked && session.context.get::<String>(ANSWER_KEY).await.is_none() {
            info!(session_id = %session_id, "Debate parked until the clinician answers");
            return Ok(false);
        }
        Ok(true)
    }

    async fn fail(&self, session_id: &str, cause: String) {
        if let Ok(session) = self.load(session_id).await {
            if let Ok(mut view) = Self::view(&session).await {
                view.status = SessionStatus::Failed;
                view.pending_question = None;
                view.error.get_or_insert(cause);
                session.context.set(VIEW_KEY, view).await;
                if let Err(e) = self.storage.save(session).await {
                    error!(session_id = %session_id, error = %e, "Failed to record session failure");
                }
            }
        }
        self.finished.insert(session_id.to_string(), Instant::now());
    }

    /// Deletes completed and failed sessions older than the ttl
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .finished
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) >= self.ttl)
            .map(|entry| entry.key().clone())
            .collect();

        for session_id in &expired {
            self.finished.remove(session_id);
            self.drivers.remove(session_id);
            if let Err(e) = self.storage.delete(session_id).await {
                warn!(session_id = %session_id, error = %e, "Failed to evict debate session");
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Evicted finished debate sessions");
        }
        expired.len()
    }

    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let sessions = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                sessions.evict_expired().await;
            }
        })
    }
}
