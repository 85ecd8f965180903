use super::utils::{ProgressRelay, STATE_KEY, council_for, load_case, task_error};
use async_trait::async_trait;
use council_flow::{Council, ProgressUpdate};
use graph_flow::{Context, NextAction, Result, Task, TaskResult};
use tracing::info;

pub const OPENING_TASK: &str = "council_opening";

/// Chair introduction and the opening topic of the debate
pub struct OpeningTask {
    council: Council,
}

impl OpeningTask {
    pub fn new(council: Council) -> Self {
        Self { council }
    }
}

#[async_trait]
impl Task for OpeningTask {
    fn id(&self) -> &str {
        OPENING_TASK
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let case = load_case(&context).await?;
        let council = council_for(&self.council, &case);
        info!(panel_size = case.panel.len(), "Opening council debate");

        let relay = ProgressRelay::start(&context);
        let on_progress = |update: ProgressUpdate| relay.emit(update);
        let opened = council
            .open_debate(
                &case.patient,
                &case.diagnoses,
                &case.panel,
                &on_progress,
                case.language,
            )
            .await;
        relay.finish().await;

        let state = opened.map_err(|e| task_error("Council opening", e))?;
        context.set(STATE_KEY, state).await;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::ContinueAndExecute,
            Some("Council opened, starting the first round".to_string()),
        ))
    }
}
