use council_flow::{Council, CouncilError, DebateState, ProgressUpdate};
use graph_flow::{Context, GraphError};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::error;

use crate::models::{DebateCase, DebateView};

pub const CASE_KEY: &str = "case";
pub const STATE_KEY: &str = "debate_state";
pub const VIEW_KEY: &str = "view";
pub const ANSWER_KEY: &str = "clinician_answer";

pub async fn load_case(context: &Context) -> graph_flow::Result<DebateCase> {
    context
        .get(CASE_KEY)
        .await
        .ok_or_else(|| GraphError::ContextError("Debate case not found in context".to_string()))
}

pub async fn load_state(context: &Context) -> graph_flow::Result<DebateState> {
    context
        .get(STATE_KEY)
        .await
        .ok_or_else(|| GraphError::ContextError("Debate state not found in context".to_string()))
}

/// Council tuned to the case's device profile
pub fn council_for(council: &Council, case: &DebateCase) -> Council {
    council.for_profile(case.profile)
}

pub fn task_error(step: &str, e: CouncilError) -> GraphError {
    error!(step, error = %e, "Council step failed");
    GraphError::TaskExecutionFailed(format!("{} failed: {}", step, e))
}

/// Folds one event into the session view stored in `context`
pub async fn record(context: &Context, update: ProgressUpdate) {
    if let Some(mut view) = context.get::<DebateView>(VIEW_KEY).await {
        view.apply(update);
        context.set(VIEW_KEY, view).await;
    }
}

/// Bridges the council's synchronous progress callback onto the session
/// context, preserving emission order
pub struct ProgressRelay {
    sender: UnboundedSender<ProgressUpdate>,
    forwarder: JoinHandle<()>,
}

impl ProgressRelay {
    pub fn start(context: &Context) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let context = context.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(update) = receiver.recv().await {
                record(&context, update).await;
            }
        });
        Self { sender, forwarder }
    }

    pub fn emit(&self, update: ProgressUpdate) {
        // the receiver lives until `finish`
        let _ = self.sender.send(update);
    }

    /// Waits until every emitted event has reached the view
    pub async fn finish(self) {
        drop(self.sender);
        if let Err(e) = self.forwarder.await {
            error!(error = %e, "Progress relay stopped unexpectedly");
        }
    }
}
