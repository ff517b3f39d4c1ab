//! # Process Runner Module
//!
//! Questo modulo avvia lo strumento esterno e ne trasmette l'output riga per riga.
//!
//! ## Responsabilità:
//! - Avvia il comando con stdout e stderr in pipe (senza finestra console su Windows)
//! - Legge entrambe le pipe in parallelo, un task per stream
//! - Decodifica ogni riga con la code page della console (vedi `platform`)
//! - Inoltra ogni riga su un canale limitato, con il suo stream
//! - Rispetta un `CancellationToken`: termina l'intero albero di processi,
//!   abbandona le letture e restituisce `CleanupError::Cancelled`
//! - Restituisce l'exit code solo quando stdout, stderr e processo sono finiti
//!
//! ## Divisione delle righe:
//! DISM ridisegna la barra con semplici carriage return, quindi `\r`, `\n` e
//! `\r\n` chiudono tutti una riga. Altrimenti la percentuale comparirebbe solo
//! a barra finita.
//!
//! ## Ordinamento:
//! Le righe di uno stream arrivano nell'ordine in cui lo strumento le ha
//! scritte. Tra stdout e stderr non c'è ordine.
//!
//! ## Esempio:
//! ```rust,ignore
//! let runner = ProcessRunner::new("dism.exe");
//! let (tx, mut rx) = tokio::sync::mpsc::channel(256);
//! let exit_code = runner.run(&args, tx, &cancel).await?;
//! ```

use crate::error::{CleanupError, Result};
use crate::platform::{self, PlatformCommands};
use serde::Serialize;
use std::fmt;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 4096;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// One decoded line of tool output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEvent {
    pub text: String,
    pub stream: Stream,
}

impl LineEvent {
    pub fn is_error_stream(&self) -> bool {
        self.stream == Stream::Stderr
    }
}

/// Exit code and every line of one invocation, in arrival order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    pub exit_code: i32,
    pub lines: Vec<String>,
}

/// Splits a byte stream on `\r`, `\n` and `\r\n`
#[derive(Debug, Default)]
struct LineSplitter {
    pending: Vec<u8>,
    after_cr: bool,
}

impl LineSplitter {
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for &byte in chunk {
            match byte {
                b'\n' if self.after_cr => {
                    self.after_cr = false;
                }
                b'\n' | b'\r' => {
                    lines.push(std::mem::take(&mut self.pending));
                    self.after_cr = byte == b'\r';
                }
                _ => {
                    self.after_cr = false;
                    self.pending.push(byte);
                }
            }
        }
        lines
    }

    /// Trailing text without a final line break
    fn finish(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Sends lines to the consumer. A closed channel stops forwarding, never draining.
struct LineForwarder {
    sink: Option<mpsc::Sender<LineEvent>>,
    stream: Stream,
    cancel: CancellationToken,
}

impl LineForwarder {
    /// Returns false once cancellation was requested
    async fn forward(&mut self, raw: &[u8]) -> bool {
        let Some(sink) = self.sink.as_ref() else {
            return !self.cancel.is_cancelled();
        };

        let event = LineEvent {
            text: PlatformCommands::instance().decode_line(raw),
            stream: self.stream,
        };

        let delivered = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            sent = sink.send(event) => sent.is_ok(),
        };

        if !delivered {
            debug!("Line consumer went away, draining {} without forwarding", self.stream);
            self.sink = None;
        }
        true
    }
}

async fn drain<R>(
    mut reader: R,
    stream: Stream,
    sink: mpsc::Sender<LineEvent>,
    cancel: CancellationToken,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::default();
    let mut forwarder = LineForwarder {
        sink: Some(sink),
        stream,
        cancel: cancel.clone(),
    };
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read(&mut chunk) => read?,
        };

        if read == 0 {
            if let Some(rest) = splitter.finish() {
                forwarder.forward(&rest).await;
            }
            debug!("{} reached end of stream", stream);
            return Ok(());
        }

        for line in splitter.push(&chunk[..read]) {
            if !forwarder.forward(&line).await {
                return Ok(());
            }
        }
    }
}

/// Runs one external command per call
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // own process group so cancellation can take the whole tree down
        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        cmd
    }

    /// Run the command, forwarding every line to `sink`.
    ///
    /// Returns the exit code (`-1` when the process was killed by a signal).
    pub async fn run(
        &self,
        args: &[String],
        sink: mpsc::Sender<LineEvent>,
        cancel: &CancellationToken,
    ) -> Result<i32> {
        if cancel.is_cancelled() {
            return Err(CleanupError::Cancelled);
        }

        info!("Running {} {}", self.program, args.join(" "));

        let mut child = self.command(args).spawn().map_err(|source| CleanupError::Spawn {
            command: self.program.clone(),
            source,
        })?;
        let pid = child.id();
        debug!("Spawned {} (pid {:?})", self.program, pid);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CleanupError::Task("stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CleanupError::Task("stderr was not captured".into()))?;

        let mut out_task = tokio::spawn(drain(stdout, Stream::Stdout, sink.clone(), cancel.clone()));
        let mut err_task = tokio::spawn(drain(stderr, Stream::Stderr, sink, cancel.clone()));

        let joined = {
            let completion = async { tokio::join!(&mut out_task, &mut err_task, child.wait()) };
            tokio::select! {
                _ = cancel.cancelled() => None,
                joined = completion => Some(joined),
            }
        };

        let Some((out, err, status)) = joined else {
            warn!("Cancelling {} (pid {:?})", self.program, pid);
            if let Some(pid) = pid {
                platform::kill_process_tree(pid).await;
            }
            if let Err(e) = child.start_kill() {
                debug!("start_kill after tree kill: {}", e);
            }
            let _ = child.wait().await;
            out_task.abort();
            err_task.abort();
            return Err(CleanupError::Cancelled);
        };

        out??;
        err??;
        let status = status?;

        let exit_code = status.code().unwrap_or(-1);
        info!("{} exited with code {}", self.program, exit_code);
        Ok(exit_code)
    }

    /// Run the command and collect its lines instead of streaming them.
    pub async fn run_collect(&self, args: &[String], cancel: &CancellationToken) -> Result<RunResult> {
        let (tx, mut rx) = mpsc::channel::<LineEvent>(256);

        let collector = tokio::spawn(async move {
            let mut lines = Vec::new();
            while let Some(event) = rx.recv().await {
                lines.push(event.text);
            }
            lines
        });

        let exit_code = self.run(args, tx, cancel).await;
        let lines = collector.await?;

        Ok(RunResult {
            exit_code: exit_code?,
            lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn split_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut splitter = LineSplitter::default();
        let mut lines: Vec<String> = Vec::new();
        for chunk in chunks {
            for line in splitter.push(chunk) {
                lines.push(String::from_utf8(line).unwrap());
            }
        }
        if let Some(rest) = splitter.finish() {
            lines.push(String::from_utf8(rest).unwrap());
        }
        lines
    }

    #[test]
    fn test_splitter_handles_all_line_endings() {
        assert_eq!(split_all(&[b"a\nb\r\nc\rd"]), vec!["a", "b", "c", "d"]);
        assert_eq!(split_all(&[b"a\r", b"\nb\n"]), vec!["a", "b"]);
        assert_eq!(split_all(&[b"\n\n"]), vec!["", ""]);
        assert_eq!(split_all(&[b"10%\r20%\r30%\r\n"]), vec!["10%", "20%", "30%"]);
    }

    #[cfg(unix)]
    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_both_pipes_in_order() {
        let runner = ProcessRunner::new("sh");
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let code = runner
            .run(&sh("echo a; echo b >&2; echo c; echo d >&2; exit 3"), tx, &cancel)
            .await
            .unwrap();
        assert_eq!(code, 3);

        let mut out = Vec::new();
        let mut err = Vec::new();
        while let Some(event) = rx.recv().await {
            if event.is_error_stream() {
                err.push(event.text);
            } else {
                out.push(event.text);
            }
        }
        assert_eq!(out, vec!["a", "c"]);
        assert_eq!(err, vec!["b", "d"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_waits_for_both_streams() {
        let runner = ProcessRunner::new("sh");
        let cancel = CancellationToken::new();

        let result = runner
            .run_collect(&sh("echo first; sleep 0.2; echo second >&2; printf tail"), &cancel)
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.lines.first().map(String::as_str), Some("first"));
        let mut lines = result.lines.clone();
        lines.sort();
        assert_eq!(lines, vec!["first", "second", "tail"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_carriage_return_progress_lines() {
        let runner = ProcessRunner::new("sh");
        let cancel = CancellationToken::new();

        let result = runner
            .run_collect(&sh(r"printf '[= 10.0%% =]\r[== 20.0%% ==]\r\ndone\n'"), &cancel)
            .await
            .unwrap();

        assert_eq!(result.lines, vec!["[= 10.0% =]", "[== 20.0% ==]", "done"]);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_distinct() {
        let runner = ProcessRunner::new("winsxs-cleanup-no-such-tool");
        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(1);

        let err = runner.run(&[], tx, &cancel).await.unwrap_err();
        assert!(matches!(err, CleanupError::Spawn { .. }));
        assert!(!err.is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_never_spawns() {
        let runner = ProcessRunner::new("winsxs-cleanup-no-such-tool");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = mpsc::channel(1);

        let err = runner.run(&[], tx, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_before_output_does_not_hang() {
        let runner = ProcessRunner::new("sh");
        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(16);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        // the background sleep keeps the pipes open unless the whole group dies
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            runner.run(&sh("sleep 30 & sleep 30; wait"), tx, &cancel),
        )
        .await
        .expect("run must return after cancellation");

        assert!(result.unwrap_err().is_cancelled());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_closed_consumer_does_not_stop_draining() {
        let runner = ProcessRunner::new("sh");
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let code = runner
            .run(&sh("i=0; while [ $i -lt 200 ]; do echo line $i; i=$((i+1)); done; exit 7"), tx, &cancel)
            .await
            .unwrap();
        assert_eq!(code, 7);
    }
}
