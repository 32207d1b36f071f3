//! Per-host results and their pooled output buffers

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Initial capacity of a freshly allocated output buffer
const BUFFER_CAPACITY: usize = 4096;

/// Idle buffers kept per pool; extras are freed
const MAX_IDLE_BUFFERS: usize = 1024;

/// Exit code of a result that failed without a remote exit status
pub const FAILED_RESULT_CODE: i32 = 1;

/// Where a failure recorded on a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// Dial, handshake or authentication
    Connect,
    /// Opening the SSH session
    OpenSession,
    /// Opening the stdout pipe
    StdoutPipe,
    /// Opening the stderr pipe
    StderrPipe,
    /// Copying remote stdout
    StdoutStream,
    /// Copying remote stderr
    StderrStream,
    /// Running the command
    Run,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorOrigin::Connect => "connect",
            ErrorOrigin::OpenSession => "cannot open new session",
            ErrorOrigin::StdoutPipe => "cannot open stdout pipe",
            ErrorOrigin::StderrPipe => "cannot open stderr pipe",
            ErrorOrigin::StdoutStream => "stdout stream",
            ErrorOrigin::StderrStream => "stderr stream",
            ErrorOrigin::Run => "run",
        };
        f.write_str(label)
    }
}

/// One labelled failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCause {
    pub origin: ErrorOrigin,
    pub message: String,
}

/// Every failure seen while producing one result, one per line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecError {
    causes: Vec<ErrorCause>,
}

impl ExecError {
    /// Error with a single cause
    pub fn new(origin: ErrorOrigin, err: impl fmt::Display) -> Self {
        let mut error = Self::default();
        error.push(origin, err);
        error
    }

    /// Record another cause
    pub fn push(&mut self, origin: ErrorOrigin, err: impl fmt::Display) {
        self.causes.push(ErrorCause {
            origin,
            message: err.to_string(),
        });
    }

    pub fn causes(&self) -> &[ErrorCause] {
        &self.causes
    }

    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }

    /// `None` when nothing was recorded
    pub fn into_option(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, cause) in self.causes.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}: {}", cause.origin, cause.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecError {}

/// Outcome of one command on one host
#[derive(Debug)]
pub struct ExecResult {
    /// Index of the host in the host list
    pub conn_index: usize,
    /// Index of the command on that host's connection
    pub session_index: usize,
    /// Remote exit code, 0 unless the command exited nonzero
    pub code: i32,
    /// Every failure seen for this result
    pub error: Option<ExecError>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecResult {
    /// Code 0 and no error
    pub fn is_success(&self) -> bool {
        self.code == 0 && self.error.is_none()
    }

    /// Code this result contributes to the run's exit code.
    ///
    /// A result with an error but no remote status never counts as success.
    pub fn exit_code(&self) -> i32 {
        match (self.code, &self.error) {
            (0, Some(_)) => FAILED_RESULT_CODE,
            (code, _) => code,
        }
    }
}

/// Free list of byte buffers
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn free_list(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.free.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// An empty buffer, reused when one is available
    pub fn get(&self) -> Vec<u8> {
        match self.free_list().pop() {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => Vec::with_capacity(BUFFER_CAPACITY),
        }
    }

    /// Give a buffer back
    pub fn put(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut free = self.free_list();
        if free.len() < MAX_IDLE_BUFFERS {
            free.push(buf);
        }
    }

    /// Number of idle buffers
    pub fn idle(&self) -> usize {
        self.free_list().len()
    }
}

/// The stdout and stderr buffer pools shared by a run
#[derive(Debug, Default)]
pub struct ResultBuffers {
    pub stdout: BufferPool,
    pub stderr: BufferPool,
}

impl ResultBuffers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A blank result with pooled buffers
    pub fn new_result(&self, conn_index: usize, session_index: usize) -> ExecResult {
        ExecResult {
            conn_index,
            session_index,
            code: 0,
            error: None,
            stdout: self.stdout.get(),
            stderr: self.stderr.get(),
        }
    }

    /// Return a printed result's buffers
    pub fn recycle(&self, result: ExecResult) {
        self.stdout.put(result.stdout);
        self.stderr.put(result.stderr);
    }
}
