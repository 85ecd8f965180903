pub mod models;
pub mod service;
pub mod tasks;
pub mod workflow;

pub use service::{AppState, build_router, create_app};
pub use workflow::{DebateSessions, build_debate_workflow, create_debate_session};
pub use models::*;
