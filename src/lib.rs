pub mod alias;
pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod history;
pub mod i18n;
pub mod journal;
pub mod record;
pub mod registry;

pub use alias::AliasTable;
pub use config::Config;
pub use dispatcher::{CommandDispatcher, ExecutionHandle, SubmitOptions};
pub use history::HistoryLog;
pub use journal::ExecutionJournal;
pub use record::{CommandRequest, ExecutionSnapshot, ExecutionState, FailureKind};
pub use registry::ExecutionRegistry;
