pub mod debate_round;
pub mod opening;
pub mod synthesis;
pub mod utils;

pub use debate_round::DebateRoundTask;
pub use opening::OpeningTask;
pub use synthesis::SynthesisTask;
