//! STDIO pump: newline-framed JSON-RPC in on stdin, one task per frame, each
//! reply written to stdout as a single newline-terminated line.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::upstream::Upstream;

pub const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    EndOfInput,
    Signal,
}

/// Result of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeReport {
    pub reason: ShutdownReason,
    pub frames: u64,
    /// False when the drain deadline expired with tasks still in flight.
    pub drained: bool,
}

pub struct Bridge<U> {
    upstream: Arc<U>,
    drain_deadline: Duration,
    state: watch::Sender<BridgeState>,
}

impl<U: Upstream> Bridge<U> {
    pub fn new(upstream: U) -> Self {
        let (state, _) = watch::channel(BridgeState::Running);
        Self {
            upstream: Arc::new(upstream),
            drain_deadline: DRAIN_DEADLINE,
            state,
        }
    }

    pub fn with_drain_deadline(mut self, deadline: Duration) -> Self {
        self.drain_deadline = deadline;
        self
    }

    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Pump `input` until EOF or until `shutdown` resolves. Either way the
    /// shared token is cancelled and tasks get `drain_deadline` to unwind.
    pub async fn run<R, W, E, S>(
        &self,
        input: R,
        output: W,
        errors: E,
        shutdown: S,
    ) -> BridgeReport
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
        E: AsyncWrite + Unpin + Send + 'static,
        S: Future<Output = ()>,
    {
        self.state.send_replace(BridgeState::Running);
        let output = Arc::new(Mutex::new(output));
        let errors = Arc::new(Mutex::new(errors));
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let mut reader = BufReader::new(input);
        let mut line = Vec::new();
        let mut frames = 0u64;
        tokio::pin!(shutdown);

        let reason = loop {
            line.clear();
            tokio::select! {
                biased;
                _ = &mut shutdown => break ShutdownReason::Signal,
                read = reader.read_until(b'\n', &mut line) => match read {
                    Ok(0) => break ShutdownReason::EndOfInput,
                    Ok(_) => {
                        let frame = trim_frame(&line);
                        if frame.is_empty() {
                            continue;
                        }
                        frames += 1;
                        tracker.spawn(relay(
                            Arc::clone(&self.upstream),
                            frame.to_vec(),
                            cancel.clone(),
                            Arc::clone(&output),
                            Arc::clone(&errors),
                        ));
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to read stdin");
                        write_error(&errors, &format!("failed to read stdin: {err}")).await;
                        break ShutdownReason::EndOfInput;
                    }
                },
            }
        };

        tracing::info!(?reason, frames, in_flight = tracker.len(), "draining");
        self.state.send_replace(BridgeState::Draining);
        tracker.close();

        // In-flight forwards abort their HTTP reads and report on stderr.
        cancel.cancel();
        let drained = tokio::time::timeout(self.drain_deadline, tracker.wait())
            .await
            .is_ok();
        if !drained {
            tracing::warn!(
                deadline = ?self.drain_deadline,
                in_flight = tracker.len(),
                "drain deadline exceeded, forcing shutdown"
            );
        }

        self.state.send_replace(BridgeState::Stopped);
        tracing::info!("bridge stopped");
        BridgeReport {
            reason,
            frames,
            drained,
        }
    }
}

async fn relay<U, W, E>(
    upstream: Arc<U>,
    frame: Vec<u8>,
    cancel: CancellationToken,
    output: Arc<Mutex<W>>,
    errors: Arc<Mutex<E>>,
) where
    U: Upstream,
    W: AsyncWrite + Unpin + Send,
    E: AsyncWrite + Unpin + Send,
{
    match upstream.forward(frame, cancel).await {
        Ok(reply) if reply.is_empty() => {
            tracing::debug!("upstream returned an empty body");
        }
        Ok(reply) => {
            if let Err(err) = write_frame(&output, reply).await {
                tracing::error!(error = %err, "failed to write stdout");
            }
        }
        Err(err) => {
            tracing::debug!(error = %err, "forward failed");
            write_error(&errors, &err.to_string()).await;
        }
    }
}

/// Strip the line terminator (`\n` or `\r\n`); whitespace-only lines come
/// back empty.
fn trim_frame(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.iter().all(u8::is_ascii_whitespace) {
        &[]
    } else {
        line
    }
}

/// One reply, newline-terminated, under a single lock acquisition.
async fn write_frame<W: AsyncWrite + Unpin>(
    output: &Mutex<W>,
    mut reply: Vec<u8>,
) -> std::io::Result<()> {
    if reply.last() != Some(&b'\n') {
        reply.push(b'\n');
    }
    let mut out = output.lock().await;
    out.write_all(&reply).await?;
    out.flush().await
}

async fn write_error<E: AsyncWrite + Unpin>(errors: &Mutex<E>, message: &str) {
    let line = format!("error: {message}\n");
    let mut err = errors.lock().await;
    if err.write_all(line.as_bytes()).await.is_ok() {
        let _ = err.flush().await;
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::ForwardError;
    use requirements_mcp_core::error::HandlerError;
    use requirements_mcp_core::jsonrpc::{BatchProcessor, InvocationContext, Processor};
    use serde_json::{Value, json};
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};

    /// Replies with a canned body after an optional delay.
    struct Canned {
        reply: &'static [u8],
        delay: Duration,
    }

    impl Upstream for Canned {
        async fn forward(
            &self,
            _frame: Vec<u8>,
            cancel: CancellationToken,
        ) -> Result<Vec<u8>, ForwardError> {
            tokio::select! {
                _ = cancel.cancelled() => Err(ForwardError::Cancelled),
                _ = tokio::time::sleep(self.delay) => Ok(self.reply.to_vec()),
            }
        }
    }

    fn echo_processor() -> BatchProcessor {
        let mut builder = Processor::builder();
        builder
            .register("echo", |_ctx: InvocationContext, params: Option<Value>| async move {
                Ok::<_, HandlerError>(params.unwrap_or(Value::Null))
            })
            .unwrap()
            .register("slow", |_ctx: InvocationContext, _p: Option<Value>| async {
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok::<_, HandlerError>(json!("slow"))
            })
            .unwrap();
        BatchProcessor::new(builder.build())
    }

    async fn read_all(mut stream: DuplexStream) -> String {
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    /// Feeds `input`, then holds stdin open long enough for every reply to
    /// land before EOF cancels whatever is still running.
    async fn run_with_input<U: Upstream>(
        bridge: &Bridge<U>,
        input: &'static [u8],
    ) -> (BridgeReport, String, String) {
        let (mut stdin_w, stdin_r) = duplex(64 * 1024);
        let (stdout_w, stdout_r) = duplex(64 * 1024);
        let (stderr_w, stderr_r) = duplex(64 * 1024);
        let feed = async move {
            stdin_w.write_all(input).await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(stdin_w);
        };
        let (report, ()) = tokio::join!(
            bridge.run(stdin_r, stdout_w, stderr_w, std::future::pending()),
            feed
        );
        // The bridge holds the writers only through its tasks; once drained
        // they are dropped and the readers see EOF.
        let out = read_all(stdout_r).await;
        let err = read_all(stderr_r).await;
        (report, out, err)
    }

    #[test]
    fn frame_trimming() {
        assert_eq!(trim_frame(b"{}\n"), b"{}");
        assert_eq!(trim_frame(b"{}\r\n"), b"{}");
        assert_eq!(trim_frame(b"{}"), b"{}");
        assert!(trim_frame(b"  \t\n").is_empty());
        assert!(trim_frame(b"\n").is_empty());
    }

    #[tokio::test]
    async fn every_reply_is_a_complete_line() {
        let bridge = Bridge::new(echo_processor());
        let input: &[u8] = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"slow\"}\n\n   \n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"echo\",\"params\":{\"a\":1}}\n{\"jsonrpc\":\"2.0\",\"method\":\"echo\"}\n";

        let (report, out, err) = run_with_input(&bridge, input).await;
        assert_eq!(report.reason, ShutdownReason::EndOfInput);
        assert_eq!(report.frames, 3);
        assert!(report.drained);
        assert!(err.is_empty(), "unexpected stderr: {err}");

        let lines: Vec<Value> = out
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(out.ends_with('\n'));
        // The slow reply finishes after the fast one.
        assert_eq!(lines[0]["id"], json!(2));
        assert_eq!(lines[0]["result"], json!({"a": 1}));
        assert_eq!(lines[1]["id"], json!(1));
        assert_eq!(bridge.state(), BridgeState::Stopped);
    }

    #[tokio::test]
    async fn missing_newline_is_appended_and_empty_body_writes_nothing() {
        let bridge = Bridge::new(Canned {
            reply: br#"{"jsonrpc":"2.0","id":1,"result":{}}"#,
            delay: Duration::ZERO,
        });
        let (_, out, _) = run_with_input(&bridge, b"{}\n").await;
        assert_eq!(out, "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n");

        let bridge = Bridge::new(Canned {
            reply: b"",
            delay: Duration::ZERO,
        });
        let (_, out, err) = run_with_input(&bridge, b"{}\n").await;
        assert!(out.is_empty());
        assert!(err.is_empty());
    }

    #[tokio::test]
    async fn parse_errors_come_back_on_stdout() {
        let bridge = Bridge::new(echo_processor());
        let (_, out, _) = run_with_input(&bridge, b"{\"jsonrpc\":\n").await;
        let reply: Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(reply["error"]["code"], json!(-32700));
        assert_eq!(reply["id"], Value::Null);
    }

    #[tokio::test]
    async fn signal_cancels_in_flight_and_reports_on_stderr() {
        let bridge = Bridge::new(Canned {
            reply: b"{}",
            delay: Duration::from_secs(30),
        });
        let mut states = bridge.subscribe();

        let (stdin_w, stdin_r) = duplex(1024);
        let (stdout_w, stdout_r) = duplex(1024);
        let (stderr_w, stderr_r) = duplex(1024);
        let (signal_tx, signal_rx) = tokio::sync::oneshot::channel::<()>();

        let mut stdin_w = stdin_w;
        stdin_w.write_all(b"{\"id\":1}\n").await.unwrap();

        let run = bridge.run(stdin_r, stdout_w, stderr_w, async {
            let _ = signal_rx.await;
        });
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            signal_tx.send(()).unwrap();
        };
        let started = std::time::Instant::now();
        let (report, ()) = tokio::join!(run, trigger);

        assert_eq!(report.reason, ShutdownReason::Signal);
        assert!(report.drained);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(read_all(stdout_r).await.is_empty());
        assert_eq!(read_all(stderr_r).await, "error: request cancelled\n");
        assert_eq!(*states.borrow_and_update(), BridgeState::Stopped);
        drop(stdin_w);
    }

    #[tokio::test]
    async fn end_of_input_cancels_in_flight_forwards() {
        let bridge = Bridge::new(Canned {
            reply: br#"{"late":true}"#,
            delay: Duration::from_millis(300),
        });

        let (stdout_w, stdout_r) = duplex(1024);
        let (stderr_w, stderr_r) = duplex(1024);
        let report = bridge
            .run(&b"{}\n"[..], stdout_w, stderr_w, std::future::pending())
            .await;

        assert_eq!(report.reason, ShutdownReason::EndOfInput);
        assert_eq!(report.frames, 1);
        assert!(report.drained);
        assert!(read_all(stdout_r).await.is_empty());
        assert_eq!(read_all(stderr_r).await, "error: request cancelled\n");
    }

    #[tokio::test]
    async fn drain_deadline_bounds_shutdown() {
        /// Ignores cancellation entirely.
        struct Stubborn;
        impl Upstream for Stubborn {
            async fn forward(
                &self,
                _frame: Vec<u8>,
                _cancel: CancellationToken,
            ) -> Result<Vec<u8>, ForwardError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(b"{}".to_vec())
            }
        }

        let bridge = Bridge::new(Stubborn).with_drain_deadline(Duration::from_millis(100));
        let (stdout_w, _stdout_r) = duplex(1024);
        let (stderr_w, _stderr_r) = duplex(1024);
        let started = std::time::Instant::now();
        let report = bridge
            .run(&b"{}\n"[..], stdout_w, stderr_w, std::future::pending())
            .await;
        assert!(!report.drained);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(bridge.state(), BridgeState::Stopped);
    }

    #[tokio::test]
    async fn lines_after_a_signal_are_not_dispatched() {
        struct Counting(std::sync::atomic::AtomicUsize);
        impl Upstream for Counting {
            async fn forward(
                &self,
                _frame: Vec<u8>,
                cancel: CancellationToken,
            ) -> Result<Vec<u8>, ForwardError> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                cancel.cancelled().await;
                Err(ForwardError::Cancelled)
            }
        }

        let bridge = Bridge::new(Counting(std::sync::atomic::AtomicUsize::new(0)));
        let (mut stdin_w, stdin_r) = duplex(1024);
        let (stdout_w, _stdout_r) = duplex(1024);
        let (stderr_w, _stderr_r) = duplex(1024);
        let (signal_tx, signal_rx) = tokio::sync::oneshot::channel::<()>();

        stdin_w.write_all(b"{\"id\":1}\n").await.unwrap();
        let mut states = bridge.subscribe();
        let run = bridge.run(stdin_r, stdout_w, stderr_w, async {
            let _ = signal_rx.await;
        });
        let drive = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            signal_tx.send(()).unwrap();
            states
                .wait_for(|state| *state != BridgeState::Running)
                .await
                .unwrap();
            // The pump has stopped reading; this line must be ignored.
            stdin_w.write_all(b"{\"id\":2}\n").await.unwrap();
            stdin_w
        };
        let (report, stdin_w) = tokio::join!(run, drive);

        assert_eq!(report.reason, ShutdownReason::Signal);
        assert_eq!(report.frames, 1);
        assert_eq!(
            bridge.upstream.0.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        drop(stdin_w);
    }

    #[tokio::test]
    async fn upstream_errors_go_to_stderr_masked() {
        struct Failing;
        impl Upstream for Failing {
            async fn forward(
                &self,
                _frame: Vec<u8>,
                _cancel: CancellationToken,
            ) -> Result<Vec<u8>, ForwardError> {
                Err(ForwardError::InvalidEndpoint("http://h/?token=abc123".into()))
            }
        }

        let bridge = Bridge::new(Failing);
        let (_, out, err) = run_with_input(&bridge, b"{}\n").await;
        assert!(out.is_empty());
        assert!(err.starts_with("error: invalid backend endpoint"));
        assert!(!err.contains("abc123"));
    }

    #[tokio::test]
    async fn fixed_error_messages_reach_stderr_verbatim() {
        struct Rejecting;
        impl Upstream for Rejecting {
            async fn forward(
                &self,
                _frame: Vec<u8>,
                _cancel: CancellationToken,
            ) -> Result<Vec<u8>, ForwardError> {
                Err(ForwardError::AuthenticationFailed)
            }
        }

        let bridge = Bridge::new(Rejecting);
        let (_, _, err) = run_with_input(&bridge, b"{}\n").await;
        assert_eq!(err, "error: authentication failed: invalid PAT token\n");
    }
}
