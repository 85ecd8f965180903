use std::sync::Arc;

use super::utils::{ProgressRelay, VIEW_KEY, council_for, load_case, load_state, task_error};
use async_trait::async_trait;
use council_flow::{AnalysisRecord, Council, PersistenceBackend, ProgressUpdate};
use graph_flow::{Context, NextAction, Result, Task, TaskResult};
use tracing::{info, warn};

use crate::models::{DebateView, SessionStatus};

pub const SYNTHESIS_TASK: &str = "council_synthesis";

/// Final report, then the analysis record
pub struct SynthesisTask {
    council: Council,
    cases: Arc<dyn PersistenceBackend>,
}

impl SynthesisTask {
    pub fn new(council: Council, cases: Arc<dyn PersistenceBackend>) -> Self {
        Self { council, cases }
    }
}

#[async_trait]
impl Task for SynthesisTask {
    fn id(&self) -> &str {
        SYNTHESIS_TASK
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let case = load_case(&context).await?;
        let state = load_state(&context).await?;
        let council = council_for(&self.council, &case);

        let relay = ProgressRelay::start(&context);
        let on_progress = |update: ProgressUpdate| relay.emit(update);
        let synthesized = council
            .synthesize(state, &case.patient, &on_progress, case.language)
            .await;
        relay.finish().await;
        let outcome = synthesized.map_err(|e| task_error("Synthesis", e))?;

        let roles = case.panel.iter().map(|member| member.role).collect();
        let record = AnalysisRecord::new(case.patient, outcome.messages, outcome.report, roles);
        let analysis_id = match self.cases.save_analysis(record).await {
            Ok(stored) => {
                info!(analysis_id = %stored.id, "Analysis saved");
                Some(stored.id)
            }
            Err(e) => {
                warn!(error = %e, "Analysis could not be saved");
                None
            }
        };

        if let Some(mut view) = context.get::<DebateView>(VIEW_KEY).await {
            view.analysis_id = analysis_id.clone();
            view.pending_question = None;
            view.status = SessionStatus::Completed;
            context.set(VIEW_KEY, view).await;
        }

        Ok(TaskResult::new_with_status(
            analysis_id,
            NextAction::End,
            Some("Council debate completed".to_string()),
        ))
    }
}
