//! Printing results and computing the run's exit code
//!
//! Results race in from every host. The printer either shows them as they
//! arrive or reassembles host order with a slot per host and a cursor on
//! the next host to print.

use std::borrow::Cow;
use std::io::{self, Write};
use std::sync::Arc;

use crossterm::style::{Attribute, Color, SetAttribute, SetForegroundColor, Stylize};
use pssh_core::HostAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::result::{ExecResult, ResultBuffers};

/// Exit code when the run was cancelled before every host reported
pub const ABORTED_EXIT_CODE: i32 = 255;

/// What a piece of output means, for colouring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Header of a successful result
    Success,
    /// Header of a failed result
    Failure,
    /// Error text and remote stderr
    Error,
}

/// Turns text into terminal output
pub trait Paint: Send + Sync {
    fn paint(&self, tone: Tone, text: &str) -> String;

    /// Paint raw remote output, leaving the bytes themselves untouched
    fn paint_bytes<'a>(&self, tone: Tone, bytes: &'a [u8]) -> Cow<'a, [u8]>;
}

/// No colour; remote bytes pass through untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainPaint;

impl Paint for PlainPaint {
    fn paint(&self, _tone: Tone, text: &str) -> String {
        text.to_string()
    }

    fn paint_bytes<'a>(&self, _tone: Tone, bytes: &'a [u8]) -> Cow<'a, [u8]> {
        Cow::Borrowed(bytes)
    }
}

/// ANSI colours via crossterm
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorPaint;

impl Paint for ColorPaint {
    fn paint(&self, tone: Tone, text: &str) -> String {
        match tone {
            Tone::Success => text.green().to_string(),
            Tone::Failure => text.red().bold().to_string(),
            Tone::Error => text.red().to_string(),
        }
    }

    fn paint_bytes<'a>(&self, tone: Tone, bytes: &'a [u8]) -> Cow<'a, [u8]> {
        let mut painted = ColorPaint::escape(tone).into_bytes();
        painted.extend_from_slice(bytes);
        painted.extend_from_slice(SetAttribute(Attribute::Reset).to_string().as_bytes());
        Cow::Owned(painted)
    }
}

impl ColorPaint {
    /// Escape sequence that starts text of `tone`
    fn escape(tone: Tone) -> String {
        match tone {
            Tone::Success => SetForegroundColor(Color::Green).to_string(),
            Tone::Failure => format!(
                "{}{}",
                SetForegroundColor(Color::Red),
                SetAttribute(Attribute::Bold)
            ),
            Tone::Error => SetForegroundColor(Color::Red).to_string(),
        }
    }
}

/// Pick the paint for the terminal once at startup
pub fn paint_for(color: bool) -> Arc<dyn Paint> {
    if color {
        Arc::new(ColorPaint)
    } else {
        Arc::new(PlainPaint)
    }
}

/// Writes results to `out`
pub struct Printer<W> {
    out: W,
    paint: Arc<dyn Paint>,
    hosts: Vec<HostAddr>,
    show_hosts: bool,
    buffers: Arc<ResultBuffers>,
}

impl<W: Write> Printer<W> {
    pub fn new(
        out: W,
        paint: Arc<dyn Paint>,
        hosts: Vec<HostAddr>,
        show_hosts: bool,
        buffers: Arc<ResultBuffers>,
    ) -> Self {
        Self {
            out,
            paint,
            hosts,
            show_hosts,
            buffers,
        }
    }

    /// Get the writer back
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Print one result and hand its buffers back to the pools
    pub fn print(&mut self, result: ExecResult) {
        if let Err(e) = self.write_result(&result) {
            tracing::debug!("Failed to print result of host #{}: {}", result.conn_index, e);
        }
        self.buffers.recycle(result);
    }

    fn write_result(&mut self, result: &ExecResult) -> io::Result<()> {
        if self.show_hosts {
            let host = self
                .hosts
                .get(result.conn_index)
                .map(HostAddr::as_str)
                .unwrap_or("?");
            let tone = if result.is_success() {
                Tone::Success
            } else {
                Tone::Failure
            };
            let header = format!("{}  result code {}", host, result.code);
            writeln!(self.out, "{}", self.paint.paint(tone, &header))?;
        }
        if let Some(err) = &result.error {
            let text = format!("result err: {}", err);
            writeln!(self.out, "{}", self.paint.paint(Tone::Error, &text))?;
        }
        self.out.write_all(&result.stdout)?;
        if !result.stderr.is_empty() {
            let stderr = self.paint.paint_bytes(Tone::Error, &result.stderr);
            self.out.write_all(&stderr)?;
        }
        self.out.flush()
    }

    /// Next result, `None` on cancellation or a closed queue
    async fn next(
        results: &mut mpsc::Receiver<ExecResult>,
        cancel: &CancellationToken,
    ) -> Option<ExecResult> {
        tokio::select! {
            biased;
            result = results.recv() => result,
            _ = cancel.cancelled() => None,
        }
    }

    /// Print results as they arrive.
    ///
    /// Returns the first nonzero [`ExecResult::exit_code`] in arrival order.
    pub async fn print_stream(
        &mut self,
        results: &mut mpsc::Receiver<ExecResult>,
        expected: usize,
        cancel: &CancellationToken,
    ) -> i32 {
        let mut code = 0;
        for _ in 0..expected {
            let Some(result) = Self::next(results, cancel).await else {
                tracing::debug!("Run aborted before every host reported");
                return ABORTED_EXIT_CODE;
            };
            if code == 0 {
                code = result.exit_code();
            }
            self.print(result);
        }
        code
    }

    /// Print results in host order, one per host.
    ///
    /// Returns the first nonzero [`ExecResult::exit_code`] in host order.
    pub async fn print_sorted(
        &mut self,
        results: &mut mpsc::Receiver<ExecResult>,
        cancel: &CancellationToken,
    ) -> i32 {
        let total = self.hosts.len();
        let mut slots: Vec<Option<ExecResult>> = (0..total).map(|_| None).collect();
        let mut next = 0;
        let mut code = 0;

        while next < total {
            let Some(result) = Self::next(results, cancel).await else {
                tracing::debug!("Run aborted with {} of {} hosts printed", next, total);
                for result in slots.into_iter().flatten() {
                    self.buffers.recycle(result);
                }
                return ABORTED_EXIT_CODE;
            };

            let index = result.conn_index;
            match slots.get_mut(index) {
                Some(slot) if slot.is_none() && index >= next => *slot = Some(result),
                _ => {
                    tracing::warn!("Ignoring unexpected result for host #{}", index);
                    self.buffers.recycle(result);
                    continue;
                }
            }

            while let Some(result) = slots.get_mut(next).and_then(Option::take) {
                if code == 0 {
                    code = result.exit_code();
                }
                self.print(result);
                next += 1;
            }
        }
        code
    }
}
