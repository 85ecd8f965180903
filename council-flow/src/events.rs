use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, CriticalFinding, FinalReport, PrognosisReport};
use crate::specialists::SpecialistRole;

/// The only channel through which debate state reaches the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressUpdate {
    Status { message: String },
    Message { message: ChatMessage },
    /// A specialist is about to speak; not part of the message log
    Thinking { model: SpecialistRole },
    CriticalFinding { data: CriticalFinding },
    UserQuestion { question: String },
    PrognosisUpdate { data: PrognosisReport },
    Report { data: FinalReport },
    Error { message: String },
}

impl ProgressUpdate {
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressUpdate::Status { .. } => "status",
            ProgressUpdate::Message { .. } => "message",
            ProgressUpdate::Thinking { .. } => "thinking",
            ProgressUpdate::CriticalFinding { .. } => "critical_finding",
            ProgressUpdate::UserQuestion { .. } => "user_question",
            ProgressUpdate::PrognosisUpdate { .. } => "prognosis_update",
            ProgressUpdate::Report { .. } => "report",
            ProgressUpdate::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressUpdate::Report { .. } | ProgressUpdate::Error { .. })
    }
}

/// Invoked synchronously, once per event, in emission order
pub type ProgressCallback<'a> = &'a (dyn Fn(ProgressUpdate) + Send + Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tag_matches_kind() {
        let event = ProgressUpdate::UserQuestion {
            question: "Any fever?".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
        assert_eq!(json["question"], "Any fever?");
        assert!(!event.is_terminal());
    }
}
