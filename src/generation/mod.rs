//! The dump generation pipeline: the worker that runs exports and the relay
//! that records their outcome.

pub mod command;
mod handler;
mod relay;
mod status;
mod worker;

pub use command::{CommandError, CommandOutput, CommandRunner, CommandSpec, ShellCommandRunner};
pub use handler::DumpJobHandler;
pub use relay::StatusUpdateRelay;
pub use status::StatusManager;
pub use worker::{substitute_filename, DumpWorker, NOT_EXECUTED_COMMENT, TIMED_OUT_COMMENT};
