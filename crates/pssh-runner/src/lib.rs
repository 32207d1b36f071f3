//! pssh-runner: the parallel execution engine
//!
//! One [`worker::Worker`] per host owns an SSH connection and runs the
//! broadcast command in a session; results flow to a [`printer::Printer`]
//! that prints them live or in host order and folds them into one exit
//! code. [`orchestrator::Runner`] wires the pieces together for a run.

pub mod error;
pub mod orchestrator;
pub mod printer;
pub mod result;
pub mod session;
pub mod ssh;
pub mod transport;
pub mod worker;

#[cfg(test)]
mod mock;

pub use error::{ConnectError, RunError, RunnerError, SessionError};
pub use orchestrator::{read_stdin, run_from_config, RunSettings, Runner};
pub use printer::{paint_for, ColorPaint, Paint, PlainPaint, Printer, ABORTED_EXIT_CODE};
pub use result::{
    BufferPool, ErrorOrigin, ExecError, ExecResult, ResultBuffers, FAILED_RESULT_CODE,
};
pub use transport::{Connector, RemoteSession, SshClient};
pub use worker::{ConnectEvent, CONNECT_FAILURE_CODE};
