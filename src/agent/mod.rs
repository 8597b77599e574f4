//! Agent loop subsystem: response parsing, the iteration loop itself,
//! system prompt assembly, edit review, and per-session JSONL logging.

pub mod agent_loop;
pub mod logging;
pub mod parser;
pub mod review;
pub mod system_prompt;

pub use agent_loop::{AgentLoop, LoopEnd, LoopEvent, LoopResult};
pub use logging::{LogEntry, SessionLogger};
pub use parser::{parse_response, ParsedResponse, ToolInvocation};
pub use review::{
    ApprovalHandler, ConsoleApproval, EditDisposition, EditReviewSession, ProposedEdit,
    ReviewDecision, ReviewSummary, StaticApproval,
};
pub use system_prompt::{build_system_prompt, DEFAULT_PERSONA};
