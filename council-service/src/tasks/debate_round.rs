use super::utils::{
    ANSWER_KEY, ProgressRelay, STATE_KEY, council_for, load_case, load_state, task_error,
};
use async_trait::async_trait;
use council_flow::{Council, ProgressUpdate};
use graph_flow::{Context, NextAction, Result, Task, TaskResult};
use tracing::info;

pub const DEBATE_ROUND_TASK: &str = "debate_round";

/// One debate round. Parks the session when the chair asks the clinician
/// something and picks the round up again once an answer is in the context.
pub struct DebateRoundTask {
    council: Council,
}

impl DebateRoundTask {
    pub fn new(council: Council) -> Self {
        Self { council }
    }
}

#[async_trait]
impl Task for DebateRoundTask {
    fn id(&self) -> &str {
        DEBATE_ROUND_TASK
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let case = load_case(&context).await?;
        let mut state = load_state(&context).await?;
        let council = council_for(&self.council, &case);
        if council.debate_finished(&state) {
            return Ok(TaskResult::new(None, NextAction::ContinueAndExecute));
        }

        let answer: Option<String> = if state.is_waiting() {
            let Some(answer) = context.get::<String>(ANSWER_KEY).await else {
                info!(round = state.round + 1, "Still waiting for the clinician");
                return Ok(TaskResult::new_with_status(
                    None,
                    NextAction::WaitForInput,
                    Some("Waiting for the clinician's answer".to_string()),
                ));
            };
            context.remove(ANSWER_KEY).await;
            Some(answer)
        } else {
            None
        };

        let relay = ProgressRelay::start(&context);
        let on_progress = |update: ProgressUpdate| relay.emit(update);

        if answer.is_none() {
            if let Some(question) = council.begin_round(&mut state, &on_progress, case.language) {
                relay.finish().await;
                context.set(STATE_KEY, state).await;
                return Ok(TaskResult::new_with_status(
                    Some(question),
                    NextAction::WaitForInput,
                    Some("The council has a question for the clinician".to_string()),
                ));
            }
        }

        let finished = council
            .finish_round(
                &mut state,
                &case.patient,
                &case.panel,
                answer.as_deref(),
                &on_progress,
                case.language,
            )
            .await;
        relay.finish().await;
        finished.map_err(|e| task_error("Debate round", e))?;

        let round = state.round;
        let done = council.debate_finished(&state);
        context.set(STATE_KEY, state).await;
        info!(round, "Debate round finished");

        if done {
            Ok(TaskResult::new_with_status(
                None,
                NextAction::ContinueAndExecute,
                Some("All rounds finished, preparing the report".to_string()),
            ))
        } else {
            Ok(TaskResult::new_with_status(
                None,
                NextAction::GoTo(DEBATE_ROUND_TASK.to_string()),
                Some(format!("Round {} finished", round)),
            ))
        }
    }
}
