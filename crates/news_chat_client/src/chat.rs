//! Chat delivery core: owns the message log for one session, sends turns over
//! the streaming transport (falling back to the ask endpoint), and folds
//! streamed fragments into the log.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::api::SessionApi;
use crate::error::ClientError;
use crate::messages::{ChatMessage, InboundEvent, OutboundTurn, Role, DEFAULT_TOP_K};
use crate::transport::{Transport, TransportEvent, TransportOptions, TurnSink};

/// Assistant text older servers stored in history in place of streamed replies.
pub const LEGACY_PLACEHOLDER: &str = "(streamed reply in UI)";

pub const DEFAULT_SAFETY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    AwaitingFirstChunk,
    Streaming,
}

/// Status projection for a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChatStatus {
    /// A turn was submitted and has not terminated.
    pub loading: bool,
    /// At least one fragment arrived for the in-flight turn.
    pub streaming: bool,
    /// The streaming channel is established or assumed usable.
    pub connected: bool,
}

/// Drop assistant placeholder entries left by older servers.
pub fn prime_history(history: Vec<ChatMessage>) -> Vec<ChatMessage> {
    history
        .into_iter()
        .filter(|m| !(m.role == Role::Assistant && m.content.trim() == LEGACY_PLACEHOLDER))
        .collect()
}

/// Synchronous state machine behind `ChatCore`.
#[derive(Debug)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    phase: TurnPhase,
    connected: bool,
    turn: u64,
    /// The in-flight turn was discarded by a reset or rebind.
    discarded: bool,
    /// The current turn was closed by the safety timeout; a late reply is still accepted.
    expired: bool,
    /// Assistant entry the in-flight turn is extending.
    streaming_index: Option<usize>,
    last_error: Option<String>,
}

impl ChatLog {
    pub fn new(connected: bool) -> Self {
        Self {
            messages: Vec::new(),
            phase: TurnPhase::Idle,
            connected,
            turn: 0,
            discarded: false,
            expired: false,
            streaming_index: None,
            last_error: None,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn status(&self) -> ChatStatus {
        ChatStatus {
            loading: self.phase != TurnPhase::Idle,
            streaming: self.phase == TurnPhase::Streaming,
            connected: self.connected,
        }
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Replace the log with freshly loaded history.
    pub fn prime(&mut self, history: Vec<ChatMessage>) {
        self.messages = prime_history(history);
        self.streaming_index = None;
        self.expired = false;
    }

    /// Append the user entry and open a turn. Returns the turn id.
    pub fn begin_turn(&mut self, content: &str) -> u64 {
        self.messages.push(ChatMessage::user(content));
        self.turn += 1;
        self.phase = TurnPhase::AwaitingFirstChunk;
        self.discarded = false;
        self.expired = false;
        self.streaming_index = None;
        self.last_error = None;
        self.turn
    }

    /// Fold one inbound event. Returns true when the safety timer should be disarmed.
    pub fn apply(&mut self, event: InboundEvent) -> bool {
        match event {
            InboundEvent::Init { .. } => {
                self.connected = true;
                false
            }
            InboundEvent::AssistantChunk(text) => self.apply_chunk(&text),
            InboundEvent::AssistantDone => {
                self.end_turn();
                true
            }
            InboundEvent::Error(message) => {
                tracing::warn!(%message, "assistant turn failed");
                if self.phase != TurnPhase::Idle && !self.discarded {
                    self.last_error = Some(message);
                }
                self.end_turn();
                true
            }
        }
    }

    fn apply_chunk(&mut self, text: &str) -> bool {
        if self.phase == TurnPhase::Idle && !self.expired {
            tracing::debug!("dropping chunk outside a turn");
            return false;
        }
        if self.discarded {
            tracing::debug!("dropping chunk for a discarded turn");
            return false;
        }
        match self.streaming_index.and_then(|i| self.messages.get_mut(i)) {
            Some(message) => message.content.push_str(text),
            None => {
                self.messages.push(ChatMessage::assistant(text));
                self.streaming_index = Some(self.messages.len() - 1);
            }
        }
        let first = self.phase == TurnPhase::AwaitingFirstChunk;
        self.phase = TurnPhase::Streaming;
        self.expired = false;
        first
    }

    fn end_turn(&mut self) {
        self.phase = TurnPhase::Idle;
        self.discarded = false;
        self.expired = false;
        self.streaming_index = None;
    }

    /// Safety timeout for `turn`. Returns true if it closed the turn.
    ///
    /// Only the status flags are reset: a reply that arrives later for the
    /// same turn still lands in the log.
    pub fn expire(&mut self, turn: u64) -> bool {
        if turn != self.turn || self.phase == TurnPhase::Idle {
            return false;
        }
        tracing::warn!(turn, "no terminal event before safety timeout");
        self.expired = !self.discarded;
        self.discarded = false;
        self.phase = TurnPhase::Idle;
        true
    }

    /// Close a turn answered over the request/response path.
    pub fn finish_fallback(&mut self, turn: u64, answer: Option<String>) {
        if turn != self.turn {
            return;
        }
        if let Some(answer) = answer {
            if !self.discarded {
                self.messages.push(ChatMessage::assistant(answer));
            }
        }
        self.end_turn();
    }

    /// Empty the log; an in-flight turn keeps loading but its fragments are dropped.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.streaming_index = None;
        self.expired = false;
        if self.phase != TurnPhase::Idle {
            self.discarded = true;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChatOptions {
    pub top_k: u32,
    pub safety_timeout: Duration,
    pub transport: TransportOptions,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            safety_timeout: DEFAULT_SAFETY_TIMEOUT,
            transport: TransportOptions::default(),
        }
    }
}

struct Shared {
    log: Mutex<ChatLog>,
    revision: watch::Sender<u64>,
    safety_timer: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn log(&self) -> MutexGuard<'_, ChatLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the log and notify subscribers.
    fn update<R>(&self, f: impl FnOnce(&mut ChatLog) -> R) -> R {
        let result = {
            let mut log = self.log();
            f(&mut *log)
        };
        self.notify();
        result
    }

    /// Like `update`, but subscribers are only notified when `f` returns true.
    fn update_if(&self, f: impl FnOnce(&mut ChatLog) -> bool) -> bool {
        let changed = {
            let mut log = self.log();
            f(&mut *log)
        };
        if changed {
            self.notify();
        }
        changed
    }

    fn notify(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    fn arm_timer(self: &Arc<Self>, turn: u64, timeout: Duration) {
        let shared = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            shared.update_if(|log| log.expire(turn));
        });
        if let Some(previous) = self
            .safety_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(timer)
        {
            previous.abort();
        }
    }

    fn disarm_timer(&self) {
        if let Some(timer) = self
            .safety_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
        }
    }

    fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.update(|log| log.set_connected(true)),
            TransportEvent::Close => self.update(|log| log.set_connected(false)),
            TransportEvent::Message(event) => {
                if self.update(|log| log.apply(event)) {
                    self.disarm_timer();
                }
            }
        }
    }
}

/// Conversation bound to one session.
///
/// External code reads snapshots through [`ChatCore::messages`] and
/// [`ChatCore::status`]; only the core mutates the log.
pub struct ChatCore {
    session: String,
    api: Arc<dyn SessionApi>,
    sink: Option<Arc<dyn TurnSink>>,
    shared: Arc<Shared>,
    pump: Option<JoinHandle<()>>,
    options: ChatOptions,
}

impl ChatCore {
    /// Open the streaming channel at `endpoint`, bind to `session` and load its history.
    ///
    /// An endpoint that cannot be opened leaves the core disconnected; every
    /// turn then goes through `SessionApi::ask`.
    pub async fn connect(
        session: impl Into<String>,
        api: Arc<dyn SessionApi>,
        endpoint: &str,
        options: ChatOptions,
    ) -> Self {
        let (sink, events) = match Transport::open_with(endpoint, options.transport) {
            Ok((transport, events)) => (
                Some(Arc::new(transport) as Arc<dyn TurnSink>),
                Some(events),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "streaming channel unavailable; using request/response");
                (None, None)
            }
        };
        let core = Self::new(session, api, sink, events, options);
        core.load_history().await;
        core
    }

    /// Build a core around an existing sink and its event stream. History is not loaded.
    pub fn new(
        session: impl Into<String>,
        api: Arc<dyn SessionApi>,
        sink: Option<Arc<dyn TurnSink>>,
        events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
        options: ChatOptions,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            log: Mutex::new(ChatLog::new(sink.is_some())),
            revision,
            safety_timer: Mutex::new(None),
        });
        let pump = events.map(|mut events| {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    shared.handle(event);
                }
            })
        });
        Self {
            session: session.into(),
            api,
            sink,
            shared,
            pump,
            options,
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.shared.log().messages().to_vec()
    }

    pub fn status(&self) -> ChatStatus {
        self.shared.log().status()
    }

    /// Message of the last protocol `error` event, cleared by the next submission.
    pub fn last_error(&self) -> Option<String> {
        self.shared.log().last_error().map(str::to_string)
    }

    /// Revision counter bumped on every change to the log or status.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Replace the log with the session's history. Failures yield an empty log.
    pub async fn load_history(&self) {
        let history = match self.api.fetch_history(&self.session).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(session = %self.session, error = %e, "history fetch failed");
                Vec::new()
            }
        };
        self.shared.update(|log| log.prime(history));
    }

    /// Switch to another session and load its history.
    pub async fn rebind(&mut self, session: impl Into<String>) {
        self.session = session.into();
        self.shared.update(ChatLog::clear);
        self.load_history().await;
    }

    /// Submit a question with the configured result-count hint.
    pub async fn submit(&self, content: &str) -> Result<(), ClientError> {
        self.submit_with_top_k(content, self.options.top_k).await
    }

    /// Submit a question. Whitespace-only input is ignored.
    pub async fn submit_with_top_k(&self, content: &str, top_k: u32) -> Result<(), ClientError> {
        if content.trim().is_empty() {
            return Ok(());
        }

        let turn = self.shared.update(|log| log.begin_turn(content));
        self.shared.arm_timer(turn, self.options.safety_timeout);

        if let Some(sink) = &self.sink {
            match sink.send(&OutboundTurn::new(&self.session, content, top_k)) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(error = %e, "streaming send failed; falling back to ask");
                    self.shared.update(|log| log.set_connected(false));
                }
            }
        }

        let result = self.api.ask(&self.session, content, top_k).await;
        let answer = result.as_ref().ok().map(|a| a.answer.clone());
        self.shared.update(|log| log.finish_fallback(turn, answer));
        self.shared.disarm_timer();
        result.map(|_| ())
    }

    /// Clear the session on the server, then empty the local log.
    pub async fn reset(&self) -> Result<(), ClientError> {
        self.api.reset(&self.session).await?;
        self.shared.update(ChatLog::clear);
        Ok(())
    }

    /// Release the transport, the event pump and any armed timer.
    pub fn dispose(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.dispose();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.shared.disarm_timer();
    }
}

impl Drop for ChatCore {
    fn drop(&mut self) {
        self.dispose();
    }
}
