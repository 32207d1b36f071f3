//! Running one command on an open connection

use pssh_core::CommandInput;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::result::{ErrorOrigin, ExecError, ExecResult};
use crate::transport::{RemoteSession, SshClient};

/// Run `input` in a new session on `client`, filling in `result`.
///
/// Returns `None` if the run was cancelled before the command finished.
pub async fn execute<C: SshClient>(
    client: &C,
    input: &CommandInput,
    mut result: ExecResult,
    cancel: &CancellationToken,
) -> Option<ExecResult> {
    let mut session = match client.open_session().await {
        Ok(session) => session,
        Err(e) => {
            result.error = Some(ExecError::new(ErrorOrigin::OpenSession, e));
            return Some(result);
        }
    };

    let mut stdout = match session.stdout_pipe() {
        Ok(pipe) => pipe,
        Err(e) => {
            result.error = Some(ExecError::new(ErrorOrigin::StdoutPipe, e));
            return Some(result);
        }
    };
    let mut stderr = match session.stderr_pipe() {
        Ok(pipe) => pipe,
        Err(e) => {
            result.error = Some(ExecError::new(ErrorOrigin::StderrPipe, e));
            return Some(result);
        }
    };

    let outcome = {
        let run = session.run(&input.command, &input.stdin);
        let copy_stdout = tokio::io::copy(&mut stdout, &mut result.stdout);
        let copy_stderr = tokio::io::copy(&mut stderr, &mut result.stderr);
        tokio::select! {
            _ = cancel.cancelled() => None,
            outcome = async { tokio::join!(run, copy_stdout, copy_stderr) } => Some(outcome),
        }
    };
    let (run, copied_stdout, copied_stderr) = outcome?;

    let mut error = ExecError::default();
    if let Err(e) = copied_stdout {
        error.push(ErrorOrigin::StdoutStream, e);
    }
    if let Err(e) = copied_stderr {
        error.push(ErrorOrigin::StderrStream, e);
    }
    if let Err(e) = run {
        if let Some(status) = e.exit_status() {
            result.code = status;
        }
        error.push(ErrorOrigin::Run, e);
    }
    result.error = error.into_option();

    tracing::debug!(
        "Host #{} finished with code {} ({} bytes out, {} bytes err)",
        result.conn_index,
        result.code,
        result.stdout.len(),
        result.stderr.len()
    );
    Some(result)
}

/// Queue a result for the printer unless the run is cancelled first
pub async fn emit(
    results: &mpsc::Sender<ExecResult>,
    result: ExecResult,
    cancel: &CancellationToken,
) {
    let index = result.conn_index;
    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!("Dropping result for host #{}: run cancelled", index);
        }
        sent = results.send(result) => {
            if sent.is_err() {
                tracing::debug!("Result queue closed before host #{} reported", index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockClient, Outcome, Script};
    use crate::result::ResultBuffers;
    use bytes::Bytes;
    use std::time::Duration;

    fn input(command: &str, stdin: &'static [u8]) -> CommandInput {
        CommandInput {
            command: command.to_string(),
            stdin: Bytes::from_static(stdin),
        }
    }

    #[tokio::test]
    async fn test_clean_run() {
        let client = MockClient::new(Script {
            stdout: b"hello\n".to_vec(),
            ..Script::default()
        });
        let buffers = ResultBuffers::default();
        let result = execute(
            &client,
            &input("echo hello", b""),
            buffers.new_result(2, 0),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.conn_index, 2);
        assert_eq!(result.code, 0);
        assert!(result.error.is_none());
        assert_eq!(result.stdout, b"hello\n");
        assert!(result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_streams() {
        let stdout = vec![b'o'; 10_000];
        let stderr = vec![b'e'; 7_000];
        let client = MockClient::new(Script {
            stdout: stdout.clone(),
            stderr: stderr.clone(),
            outcome: Outcome::Exit(42),
            ..Script::default()
        });
        let buffers = ResultBuffers::default();
        let result = execute(
            &client,
            &input("false", b"piped"),
            buffers.new_result(0, 0),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.code, 42);
        let err = result.error.expect("diagnostic for nonzero exit");
        assert_eq!(err.to_string(), "run: Process exited with status 42");
        // Stdin is echoed after the scripted output
        assert_eq!(result.stdout.len(), stdout.len() + b"piped".len());
        assert!(result.stdout.ends_with(b"piped"));
        assert_eq!(result.stderr, stderr);
    }

    #[tokio::test]
    async fn test_session_failure_is_reported() {
        let client = MockClient::new(Script {
            session_error: true,
            ..Script::default()
        });
        let buffers = ResultBuffers::default();
        let result = execute(
            &client,
            &input("true", b""),
            buffers.new_result(0, 0),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.code, 0);
        assert_eq!(
            result.error.unwrap().to_string(),
            "cannot open new session: connection closed"
        );
    }

    #[tokio::test]
    async fn test_io_failure_keeps_code_zero() {
        let client = MockClient::new(Script {
            stdout: b"partial".to_vec(),
            outcome: Outcome::Fail("channel reset".into()),
            ..Script::default()
        });
        let buffers = ResultBuffers::default();
        let result = execute(
            &client,
            &input("cat", b""),
            buffers.new_result(0, 0),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.code, 0);
        assert_eq!(result.error.unwrap().to_string(), "run: channel reset");
        assert_eq!(result.stdout, b"partial");
    }

    #[tokio::test]
    async fn test_pipe_failures_are_reported() {
        for (pipe, expected) in [
            ("stdout", "cannot open stdout pipe: connection closed"),
            ("stderr", "cannot open stderr pipe: connection closed"),
        ] {
            let client = MockClient::new(Script {
                pipe_error: Some(pipe),
                ..Script::default()
            });
            let buffers = ResultBuffers::default();
            let result = execute(
                &client,
                &input("true", b""),
                buffers.new_result(0, 0),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

            assert_eq!(result.code, 0);
            assert_eq!(result.error.unwrap().to_string(), expected);
        }
    }

    #[tokio::test]
    async fn test_stream_and_exit_errors_are_combined() {
        let client = MockClient::new(Script {
            stdout: b"half a line".to_vec(),
            stdout_reset: true,
            outcome: Outcome::Exit(3),
            ..Script::default()
        });
        let buffers = ResultBuffers::default();
        let result = execute(
            &client,
            &input("flaky", b""),
            buffers.new_result(0, 0),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.code, 3);
        assert_eq!(
            result.error.unwrap().to_string(),
            "stdout stream: stream reset\nrun: Process exited with status 3"
        );
        // Bytes read before the reset are kept
        assert_eq!(result.stdout, b"half a line");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_hung_command() {
        let client = MockClient::new(Script {
            outcome: Outcome::Hang,
            ..Script::default()
        });
        let buffers = ResultBuffers::default();
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let result = execute(
            &client,
            &input("sleep inf", b""),
            buffers.new_result(0, 0),
            &cancel,
        )
        .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_emit_after_cancel_does_not_block() {
        let buffers = ResultBuffers::default();
        let (tx, mut rx) = mpsc::channel(1);
        tx.send(buffers.new_result(0, 0)).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        // Queue is full; the cancelled token lets emit return
        emit(&tx, buffers.new_result(1, 0), &cancel).await;

        assert_eq!(rx.recv().await.unwrap().conn_index, 0);
        assert!(rx.try_recv().is_err());
    }
}
