//! Task pipeline.
//!
//! Every unit of work, from the mailbox or the command line, flows through:
//! 1. `subject::parse_subject()`: task name plus optional api/model overrides
//! 2. `TaskCatalog::lookup()`: the configured task, or "not found"
//! 3. `RateLimiter`: per-sender quota (email only)
//! 4. `TaskDispatcher`: attachment policy, prompt assembly, backend routing
//!
//! Only the dispatcher talks to an AI backend; front doors only deliver.

pub mod attachments;
pub mod catalog;
pub mod dispatcher;
pub mod subject;
pub mod types;

pub use catalog::{OutputFormat, TaskCatalog, TaskDefinition, TaskNotFound};
pub use dispatcher::{DispatchOutcome, TaskDispatcher};
pub use subject::parse_subject;
pub use types::{Attachment, Origin, ParsedSubject, Rejection, TaskInvocation, TaskOutput, WorkUnit};
