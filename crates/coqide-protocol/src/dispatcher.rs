//! Call/reply pairing over the prover's pipes.
//!
//! A long-lived reader task decodes frames as bytes arrive and forwards them
//! over a channel. [`Dispatcher::call`] writes one call and waits for the
//! next terminal `<value>`, merging the messages that precede it.
//!
//! A `<value>` that cannot be decoded still answers the call in flight. Any
//! other undecodable output is logged and skipped, so it never shifts later
//! replies onto the wrong call.

use std::{io, sync::Arc, time::Duration};

use coqide_core::{
    CodecError, FeedbackStore, Frame, FrameCodec, Interrupt, Method, ProverReader, ProverWriter,
    Response, Value, codec,
};
use futures::StreamExt;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, sync::mpsc, task::JoinHandle, time::Instant};
use tokio_util::codec::FramedRead;

/// Call error.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("Prover stream closed")]
    StreamDied,
    #[error("Malformed reply: {0}")]
    Malformed(#[from] CodecError),
    #[error("No reply within {0:?}")]
    Timeout(Duration),
}

/// What the reader task saw.
#[derive(Debug)]
enum Inbound {
    Frame(Frame),
    Malformed(CodecError),
    Closed,
}

/// A call between being written and being answered.
#[derive(Debug)]
struct PendingCall {
    method: Method,
    request: Vec<u8>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl PendingCall {
    fn new(method: Method, arg: &Value, timeout: Option<Duration>) -> Self {
        Self {
            method,
            request: codec::encode_call(method.as_str(), arg),
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }
}

/// Sends calls to one prover process and pairs them with replies.
///
/// Only one call is in flight at a time; `call` takes `&mut self`.
pub struct Dispatcher {
    writer: ProverWriter,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    interrupter: Arc<dyn Interrupt>,
    owed_replies: usize,
    dead: bool,
    reader: JoinHandle<()>,
}

impl Dispatcher {
    /// Start the reader task for a freshly spawned prover.
    ///
    /// Every notification is pushed to `feedback` as soon as it is decoded.
    #[must_use]
    pub fn new(
        reader: ProverReader,
        writer: ProverWriter,
        interrupter: Arc<dyn Interrupt>,
        feedback: Arc<FeedbackStore>,
    ) -> Self {
        let (tx, inbound) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(reader, tx, feedback));
        Self {
            writer,
            inbound,
            interrupter,
            owed_replies: 0,
            dead: false,
            reader,
        }
    }

    /// Whether the prover's stream has ended.
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        self.dead
    }

    /// Replies still expected for calls that timed out.
    #[must_use]
    pub const fn owed_replies(&self) -> usize {
        self.owed_replies
    }

    /// Send one call and wait for its reply.
    ///
    /// A well-formed prover failure is `Ok(Response::Failure)`.
    ///
    /// # Errors
    /// - `StreamDied` once the prover's output has ended or a write failed.
    /// - `Malformed` when the reply cannot be decoded.
    /// - `Timeout` when `timeout` elapsed first. The prover is interrupted and
    ///   its eventual reply to this call is discarded.
    pub async fn call(
        &mut self,
        method: Method,
        arg: &Value,
        timeout: Option<Duration>,
    ) -> Result<Response, CallError> {
        if self.dead {
            return Err(CallError::StreamDied);
        }
        let pending = PendingCall::new(method, arg, timeout);
        tracing::debug!(%method, bytes = pending.request.len(), ?timeout, "Sending call");

        // The write is never cut short by the deadline.
        if let Err(e) = self.send(&pending.request).await {
            tracing::error!(%method, "Failed to write call: {e}");
            self.dead = true;
            return Err(CallError::StreamDied);
        }

        match (pending.deadline, pending.timeout) {
            (Some(deadline), Some(limit)) => {
                match tokio::time::timeout_at(deadline, self.await_reply(method)).await {
                    Ok(result) => result,
                    Err(_) => {
                        self.abandon(&pending, limit);
                        Err(CallError::Timeout(limit))
                    }
                }
            }
            _ => self.await_reply(method).await,
        }
    }

    async fn send(&mut self, request: &[u8]) -> io::Result<()> {
        self.writer.write_all(request).await?;
        self.writer.flush().await
    }

    fn abandon(&mut self, pending: &PendingCall, limit: Duration) {
        tracing::warn!(method = %pending.method, ?limit, "Call timed out, interrupting prover");
        if let Err(e) = self.interrupter.interrupt() {
            tracing::warn!("Failed to interrupt prover: {e}");
        }
        self.owed_replies += 1;
    }

    async fn await_reply(&mut self, method: Method) -> Result<Response, CallError> {
        let mut messages = Vec::new();
        loop {
            let Some(inbound) = self.inbound.recv().await else {
                self.dead = true;
                return Err(CallError::StreamDied);
            };
            match inbound {
                Inbound::Frame(Frame::Notification(note)) => {
                    // Messages ahead of an owed reply belong to the abandoned call.
                    if self.owed_replies == 0 {
                        if let Some(message) = note.message() {
                            messages.push(message.text.clone());
                        }
                    }
                }
                Inbound::Frame(Frame::Reply(response)) => {
                    if self.owed_replies > 0 {
                        self.owed_replies -= 1;
                        tracing::debug!(success = response.is_success(), "Discarded reply to abandoned call");
                        messages.clear();
                        continue;
                    }
                    tracing::debug!(%method, success = response.is_success(), "Received reply");
                    return Ok(response.with_messages(messages));
                }
                Inbound::Malformed(e) => {
                    if self.owed_replies > 0 {
                        self.owed_replies -= 1;
                        tracing::warn!("Malformed reply to abandoned call: {e}");
                        messages.clear();
                        continue;
                    }
                    tracing::error!(%method, "Malformed reply: {e}");
                    return Err(CallError::Malformed(e));
                }
                Inbound::Closed => {
                    tracing::error!(%method, "Prover stream closed");
                    self.dead = true;
                    return Err(CallError::StreamDied);
                }
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    reader: ProverReader,
    tx: mpsc::UnboundedSender<Inbound>,
    feedback: Arc<FeedbackStore>,
) {
    let mut frames = FramedRead::new(reader, FrameCodec);
    loop {
        let inbound = match frames.next().await {
            None => {
                tracing::debug!("Prover closed its output");
                break;
            }
            Some(Err(e)) => {
                tracing::error!("Error reading prover output: {e}");
                break;
            }
            Some(Ok(Ok(Frame::Notification(note)))) => {
                feedback.push(note.clone());
                Inbound::Frame(Frame::Notification(note))
            }
            Some(Ok(Ok(frame))) => Inbound::Frame(frame),
            Some(Ok(Err(e))) if e.is_reply() => Inbound::Malformed(e.error),
            Some(Ok(Err(e))) => {
                tracing::error!(kind = ?e.kind, "Skipping undecodable prover output: {}", e.error);
                continue;
            }
        };
        if tx.send(inbound).is_err() {
            return;
        }
    }
    let _ = tx.send(Inbound::Closed);
}
