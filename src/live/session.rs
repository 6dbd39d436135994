//! Session and connector traits for the remote streaming service.

use crate::audio::pcm::PcmBlob;
use crate::error::{CharlaError, Result};
use crate::live::message::ServerEvent;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Capacity of the server event channel handed out by connectors.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Configuration snapshot taken at connect time.
///
/// Changing the live config mid-session has no effect; the next connect
/// picks it up.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSessionParams {
    pub model: String,
    pub system_instruction: String,
    pub voice_name: String,
    pub search_enabled: bool,
}

/// Handle to an open streaming session.
///
/// Sends are fire-and-forget from the engine's point of view: the engine
/// never awaits a send inside its event dispatch, so a slow transport
/// cannot stall capture or playback.
#[async_trait]
pub trait LiveSession: Send + Sync {
    /// Hand one encoded audio chunk to the transport.
    async fn send_realtime_input(&self, blob: PcmBlob) -> Result<()>;

    /// Send a user text message over the session.
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Close the session. Closing an already-closed session is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Implement LiveSession for Arc<T> so handles can be shared with send tasks.
#[async_trait]
impl<T: LiveSession> LiveSession for Arc<T> {
    async fn send_realtime_input(&self, blob: PcmBlob) -> Result<()> {
        (**self).send_realtime_input(blob).await
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        (**self).send_text(text).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

/// Opens streaming sessions against the remote service.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Open a session with the given config snapshot.
    ///
    /// Returns the session handle and the ordered server event stream.
    /// The `Opened` event arrives on the stream once the session is live;
    /// a connector error here is a setup failure, not a timeout.
    async fn connect(
        &self,
        params: &LiveSessionParams,
    ) -> Result<(Arc<dyn LiveSession>, mpsc::Receiver<ServerEvent>)>;
}

/// Mock session for testing: records everything sent through it.
#[derive(Default)]
pub struct MockLiveSession {
    sent_chunks: Mutex<Vec<PcmBlob>>,
    sent_texts: Mutex<Vec<String>>,
    closed: Mutex<bool>,
    fail_sends: bool,
}

impl MockLiveSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure every send to fail with a transport error.
    pub fn with_send_failure(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub fn sent_chunks(&self) -> Vec<PcmBlob> {
        self.sent_chunks.lock().expect("mock lock").clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent_texts.lock().expect("mock lock").clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().expect("mock lock")
    }
}

#[async_trait]
impl LiveSession for MockLiveSession {
    async fn send_realtime_input(&self, blob: PcmBlob) -> Result<()> {
        if self.fail_sends {
            return Err(CharlaError::Transport {
                message: "mock send failure".to_string(),
            });
        }
        self.sent_chunks.lock().expect("mock lock").push(blob);
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if self.fail_sends {
            return Err(CharlaError::Transport {
                message: "mock send failure".to_string(),
            });
        }
        self.sent_texts
            .lock()
            .expect("mock lock")
            .push(text.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.closed.lock().expect("mock lock") = true;
        Ok(())
    }
}

/// Mock connector for testing the engine's lifecycle.
///
/// Each `connect` hands out a fresh `MockLiveSession` and keeps both the
/// session handle and the event sender so tests can inject server events
/// and inspect traffic.
#[derive(Default)]
pub struct MockLiveConnector {
    fail_connect: bool,
    auto_open: bool,
    last_session: Mutex<Option<Arc<MockLiveSession>>>,
    last_events: Mutex<Option<mpsc::Sender<ServerEvent>>>,
    last_params: Mutex<Option<LiveSessionParams>>,
    connect_count: Mutex<u64>,
}

impl MockLiveConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure `connect` to fail outright (setup error).
    pub fn with_connect_failure(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Queue an `Opened` event immediately on connect.
    pub fn with_auto_open(mut self) -> Self {
        self.auto_open = true;
        self
    }

    /// The session handed out by the most recent connect.
    pub fn last_session(&self) -> Option<Arc<MockLiveSession>> {
        self.last_session.lock().expect("mock lock").clone()
    }

    /// Sender for injecting server events into the most recent session.
    pub fn event_sender(&self) -> Option<mpsc::Sender<ServerEvent>> {
        self.last_events.lock().expect("mock lock").clone()
    }

    /// Drop the retained event sender, ending the event stream abruptly
    /// (as a vanished transport would).
    pub fn drop_event_sender(&self) {
        *self.last_events.lock().expect("mock lock") = None;
    }

    /// Params snapshot received on the most recent connect.
    pub fn last_params(&self) -> Option<LiveSessionParams> {
        self.last_params.lock().expect("mock lock").clone()
    }

    pub fn connect_count(&self) -> u64 {
        *self.connect_count.lock().expect("mock lock")
    }
}

#[async_trait]
impl LiveConnector for MockLiveConnector {
    async fn connect(
        &self,
        params: &LiveSessionParams,
    ) -> Result<(Arc<dyn LiveSession>, mpsc::Receiver<ServerEvent>)> {
        *self.connect_count.lock().expect("mock lock") += 1;
        if self.fail_connect {
            return Err(CharlaError::Transport {
                message: "mock connect failure".to_string(),
            });
        }

        let session = Arc::new(MockLiveSession::new());
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        if self.auto_open {
            tx.send(ServerEvent::Opened).await.map_err(|_| {
                CharlaError::Transport {
                    message: "event channel closed".to_string(),
                }
            })?;
        }

        *self.last_session.lock().expect("mock lock") = Some(session.clone());
        *self.last_events.lock().expect("mock lock") = Some(tx);
        *self.last_params.lock().expect("mock lock") = Some(params.clone());

        Ok((session, rx))
    }
}
