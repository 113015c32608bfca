//! Interactive simulator session.

use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use crate::admission::{AdmissionController, Decision};
use crate::error::{FloodgateError, Result};
use crate::report::{analyze, Report, RequestLog};

/// Keyword that ends an interactive session.
pub const EXIT_COMMAND: &str = "exit";

/// One simulator run: an engine plus the log of every decision it made.
pub struct Session {
    controller: Arc<AdmissionController>,
    log: RequestLog,
}

impl Session {
    /// Create a session over a shared engine.
    pub fn new(controller: Arc<AdmissionController>, log: RequestLog) -> Self {
        Self { controller, log }
    }

    /// Admit one request and record the decision.
    ///
    /// Malformed ids are returned as errors and are not logged.
    pub fn handle(&mut self, entity: &str) -> Result<Decision> {
        let decision = self.controller.admit(entity)?;
        self.log.record(entity, decision);
        Ok(decision)
    }

    /// Read entity ids line by line until `exit` or end of input.
    pub async fn run<R, W>(&mut self, reader: R, writer: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.run_with_shutdown(reader, writer, std::future::pending())
            .await
    }

    /// Like [`run`](Self::run), but also stops when `signal` resolves.
    #[instrument(skip_all)]
    pub async fn run_with_shutdown<R, W, F>(
        &mut self,
        reader: R,
        writer: &mut W,
        signal: F,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        F: Future<Output = ()>,
    {
        let mut lines = reader.lines();
        tokio::pin!(signal);

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = &mut signal => {
                    info!("Shutdown requested, ending session");
                    break;
                }
            };

            let Some(line) = line else {
                debug!("End of input");
                break;
            };

            let entity = line.trim();
            if entity == EXIT_COMMAND {
                break;
            }

            let output = match self.handle(entity) {
                Ok(decision) => format_decision(entity, &decision),
                Err(FloodgateError::InvalidInput(msg)) => {
                    warn!(input = %line, "Rejected malformed request");
                    format!("[ERROR] {}", msg)
                }
                Err(e) => return Err(e),
            };

            writer.write_all(output.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        info!(decisions = self.log.len(), "Session finished");
        Ok(())
    }

    /// Analyse every decision recorded so far.
    pub fn report(&self) -> Report {
        analyze(&self.log)
    }

    /// The decisions recorded so far.
    pub fn log(&self) -> &RequestLog {
        &self.log
    }
}

/// Render a decision the way the simulator prints it.
pub fn format_decision(entity: &str, decision: &Decision) -> String {
    if decision.allowed {
        format!("[ALLOWED] user={}", entity)
    } else {
        format!(
            "[REJECTED] user={} reason={} retry_after={:.2}s",
            entity, decision.reason, decision.retry_after_secs
        )
    }
}
