//! The session state machine.
//!
//! `SessionEngine` owns every piece of mutable session state and receives
//! named events through one dispatch entry point per source: user
//! commands, capture frames, pacer ticks, server events, playback
//! completions, and the connect deadline. All entry points run on a
//! single task, so no locking is needed; tests drive them synthetically
//! without a live event loop.
//!
//! States: disconnected → connecting → connected → {disconnected |
//! error}. Remote errors, timeouts and normal closes all route through
//! one teardown path before landing in their terminal state.

use crate::audio::chunk::{visual_volume, AudioChunk};
use crate::audio::pcm;
use crate::audio::pipeline::{CaptureFrame, CapturePipeline, CapturePipelineConfig, CapturePipelineHandle};
use crate::audio::source::{CaptureProvider, CaptureSource};
use crate::config::{Config, HistoryPolicy};
use crate::engine::playback::PlaybackScheduler;
use crate::engine::queue::OutboundQueue;
use crate::engine::sink::{SinkProvider, SourceId};
use crate::engine::transcript::{TranscriptReconciler, TranscriptStore};
use crate::engine::types::{ConnectionState, EngineSnapshot, Phase};
use crate::error::CharlaError;
use crate::live::message::{ServerEvent, ServerMessage};
use crate::live::session::{LiveConnector, LiveSession, LiveSessionParams};
use crate::metrics::LiveMetrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Outcome of delivering a server event: a receiver appears when the
/// session opened and the capture pipeline came up.
pub type CaptureFrames = mpsc::Receiver<CaptureFrame>;

/// The realtime session engine.
pub struct SessionEngine {
    config: Config,
    connector: Arc<dyn LiveConnector>,
    capture_provider: Arc<dyn CaptureProvider>,
    sink_provider: Arc<dyn SinkProvider>,
    store: Box<dyn TranscriptStore>,

    state: ConnectionState,
    phase: Phase,
    error: Option<String>,
    volume: f32,

    session: Option<Arc<dyn LiveSession>>,
    // Liveness token: replaced on every connect, flipped off by teardown.
    // In-flight send tasks check it so a late send cannot race teardown.
    live_token: Arc<AtomicBool>,
    // Holds the acquired microphone between connect() and the Opened event.
    capture_source: Option<Box<dyn CaptureSource>>,
    capture_handle: Option<CapturePipelineHandle>,
    playback: Option<PlaybackScheduler>,
    queue: OutboundQueue,
    reconciler: TranscriptReconciler,
    metrics: LiveMetrics,

    connect_deadline: Option<tokio::time::Instant>,
    pacer_running: bool,

    session_started_at: Option<Instant>,
    turn_onset: Option<Instant>,
    turn_text_stamped: bool,
}

impl SessionEngine {
    pub fn new(
        config: Config,
        connector: Arc<dyn LiveConnector>,
        capture_provider: Arc<dyn CaptureProvider>,
        sink_provider: Arc<dyn SinkProvider>,
        store: Box<dyn TranscriptStore>,
    ) -> Self {
        let queue_capacity = config.engine.queue_capacity;
        Self {
            config,
            connector,
            capture_provider,
            sink_provider,
            store,
            state: ConnectionState::Disconnected,
            phase: Phase::Idle,
            error: None,
            volume: 0.0,
            session: None,
            live_token: Arc::new(AtomicBool::new(false)),
            capture_source: None,
            capture_handle: None,
            playback: None,
            queue: OutboundQueue::new(queue_capacity),
            reconciler: TranscriptReconciler::new(),
            metrics: LiveMetrics::new(),
            connect_deadline: None,
            pacer_running: false,
            session_started_at: None,
            turn_onset: None,
            turn_text_stamped: false,
        }
    }

    // ---- user commands -------------------------------------------------

    /// Open a session. History is cleared or kept per the configured
    /// `HistoryPolicy`. Returns the server event stream on success.
    pub async fn connect(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        let preserve = self.config.engine.history == HistoryPolicy::Preserve;
        self.connect_inner(preserve).await
    }

    /// Tear down whatever exists and connect again. The transcript is
    /// always preserved across this boundary so the conversation
    /// continues.
    pub async fn reconnect(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.metrics.reconnects += 1;
        self.disconnect().await;
        self.connect_inner(true).await
    }

    async fn connect_inner(&mut self, preserve_history: bool) -> Option<mpsc::Receiver<ServerEvent>> {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            tracing::warn!("connect ignored: session already {:?}", self.state);
            return None;
        }

        if !self.config.has_api_key() {
            // Configuration error: never attempts a connection and does
            // not change state.
            self.error = Some(CharlaError::MissingApiKey.to_string());
            return None;
        }

        self.state = ConnectionState::Connecting;
        self.phase = Phase::InitializingAudio;
        self.error = None;
        self.session_started_at = Some(Instant::now());
        self.turn_onset = None;
        self.turn_text_stamped = false;
        self.metrics.session_starts += 1;
        self.metrics.reset_latency_for_connect();
        self.live_token = Arc::new(AtomicBool::new(true));

        if !preserve_history {
            self.store.update(&mut |items| items.clear());
            self.reconciler.reset();
        }

        let sink = match self.sink_provider.open(self.config.audio.output_sample_rate) {
            Ok(sink) => sink,
            Err(e) => {
                self.fail(e.to_string(), Phase::SetupError).await;
                return None;
            }
        };
        self.playback = Some(PlaybackScheduler::new(
            sink,
            self.config.audio.output_sample_rate,
        ));

        self.phase = Phase::RequestingMic;
        match self.capture_provider.open(self.config.audio.input_sample_rate) {
            Ok(source) => self.capture_source = Some(source),
            Err(e) => {
                // Permission/device errors are terminal; retry is only
                // ever an explicit reconnect.
                self.fail(e.to_string(), Phase::Error).await;
                return None;
            }
        }

        let params = LiveSessionParams {
            model: self.config.session.model.clone(),
            system_instruction: self.config.session.system_instruction.clone(),
            voice_name: self.config.session.voice_name.clone(),
            search_enabled: self.config.session.use_search,
        };

        self.connect_deadline = Some(
            tokio::time::Instant::now()
                + Duration::from_millis(self.config.engine.connect_timeout_ms),
        );
        self.phase = Phase::WaitingLiveSession;

        match self.connector.connect(&params).await {
            Ok((session, events)) => {
                tracing::info!(model = %params.model, "live session requested");
                self.session = Some(session);
                Some(events)
            }
            Err(e) => {
                self.fail(e.to_string(), Phase::SetupError).await;
                None
            }
        }
    }

    /// Close everything. Idempotent and callable from any state.
    pub async fn disconnect(&mut self) {
        self.teardown().await;
        self.state = ConnectionState::Disconnected;
        self.phase = Phase::Idle;
    }

    /// Send a typed user message over the open session.
    ///
    /// Appends a complete user item to the log; the model's reply comes
    /// back through the normal message stream.
    pub fn send_text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.state != ConnectionState::Connected {
            tracing::debug!("send_text ignored while {:?}", self.state);
            return;
        }

        self.reconciler.user_message(self.store.as_mut(), text);

        if let Some(session) = self.session.clone() {
            let token = self.live_token.clone();
            let text = text.to_string();
            tokio::spawn(async move {
                if !token.load(Ordering::SeqCst) {
                    return;
                }
                if let Err(e) = session.send_text(&text).await {
                    tracing::debug!("text send failed: {}", e);
                }
            });
        }
    }

    // ---- capture source ------------------------------------------------

    /// One capture block arrived from the microphone thread.
    pub fn handle_frame(&mut self, frame: CaptureFrame) {
        if self.state != ConnectionState::Connected {
            return;
        }

        self.volume = visual_volume(frame.rms);
        self.metrics.record_input_rms(frame.rms);

        if self.turn_onset.is_none() && frame.rms > self.config.audio.vad_onset_threshold {
            self.turn_onset = Some(Instant::now());
            self.turn_text_stamped = false;
            self.phase = Phase::CapturingAudio;
        }

        let chunk = AudioChunk {
            samples: frame.samples,
            rms: frame.rms,
        };
        if self.queue.push(chunk).is_some() {
            self.metrics.chunks_dropped += 1;
            tracing::debug!("outbound queue full, dropped oldest chunk");
        }
    }

    // ---- pacer ---------------------------------------------------------

    /// One paced send tick: pop at most one chunk, encode, hand off.
    ///
    /// The pop-encode-handoff sequence is a single synchronous step; the
    /// actual transport send runs on its own task behind the liveness
    /// token so teardown cannot race it.
    pub fn pacer_tick(&mut self) {
        if !self.pacer_running {
            return;
        }
        let Some(chunk) = self.queue.pop() else {
            return;
        };
        let Some(session) = self.session.clone() else {
            return;
        };

        let blob = pcm::encode_blob(&chunk.samples, self.config.audio.input_sample_rate);
        self.metrics.chunks_sent += 1;

        let token = self.live_token.clone();
        tokio::spawn(async move {
            if !token.load(Ordering::SeqCst) {
                return;
            }
            if let Err(e) = session.send_realtime_input(blob).await {
                tracing::debug!("chunk send failed: {}", e);
            }
        });
    }

    // ---- remote session ------------------------------------------------

    /// Dispatch one server event. Returns the capture frame receiver when
    /// the event was `Opened` and the input pipeline started.
    pub async fn handle_server_event(&mut self, event: ServerEvent) -> Option<CaptureFrames> {
        match event {
            ServerEvent::Opened => self.handle_opened().await,
            ServerEvent::Message(message) => {
                self.handle_message(message);
                None
            }
            ServerEvent::Closed => {
                self.handle_remote_closed().await;
                None
            }
            ServerEvent::Error(message) => {
                self.handle_remote_error(message).await;
                None
            }
        }
    }

    async fn handle_opened(&mut self) -> Option<CaptureFrames> {
        if self.state != ConnectionState::Connecting {
            tracing::debug!("stale open event while {:?}", self.state);
            return None;
        }

        self.connect_deadline = None;
        self.state = ConnectionState::Connected;
        self.phase = Phase::ConnectedIdle;
        tracing::info!("live session open");

        let Some(source) = self.capture_source.take() else {
            self.fail("capture source missing after open".to_string(), Phase::Error)
                .await;
            return None;
        };

        let pipeline_config = CapturePipelineConfig {
            block_size: self.config.audio.block_size,
            ..Default::default()
        };
        match CapturePipeline::with_config(source, pipeline_config).start() {
            Ok((frames, handle)) => {
                self.capture_handle = Some(handle);
                self.pacer_running = true;
                Some(frames)
            }
            Err(e) => {
                self.fail(e.to_string(), Phase::Error).await;
                None
            }
        }
    }

    fn handle_message(&mut self, message: ServerMessage) {
        if let Some(audio) = &message.audio {
            match pcm::decode(audio) {
                Ok(samples) => {
                    if self.metrics.first_audio_latency_ms.is_none() {
                        if let Some(onset) = self.turn_onset {
                            self.metrics.first_audio_latency_ms =
                                Some(onset.elapsed().as_millis() as u64);
                        }
                    }
                    if let Some(playback) = &mut self.playback {
                        self.phase = Phase::PlayingAudio;
                        if let Err(e) = playback.schedule(samples) {
                            tracing::warn!("failed to schedule playback: {}", e);
                        }
                    }
                }
                Err(e) => tracing::warn!("dropping undecodable audio payload: {}", e),
            }
        }

        if message.interrupted {
            if let Some(playback) = &mut self.playback {
                playback.interrupt();
            }
            self.phase = Phase::Interrupted;
        }

        if let Some(input_tx) = message.input_transcription.as_deref() {
            if !input_tx.is_empty() {
                self.phase = Phase::WaitingModel;
                self.reconciler.user_fragment(self.store.as_mut(), input_tx);
            }
        }

        let output_tx = message
            .output_transcription
            .as_deref()
            .filter(|t| !t.is_empty());
        let sources = message.sources();

        if output_tx.is_some() && !self.turn_text_stamped {
            if let Some(onset) = self.turn_onset {
                let latency = onset.elapsed().as_millis() as u64;
                if self.metrics.first_text_latency_ms.is_none() {
                    self.metrics.first_text_latency_ms = Some(latency);
                }
                self.metrics.last_round_trip_ms = Some(latency);
                self.turn_text_stamped = true;
            }
        }

        if output_tx.is_some() || !sources.is_empty() {
            self.reconciler
                .model_fragment(self.store.as_mut(), output_tx, sources);
        }
    }

    async fn handle_remote_closed(&mut self) {
        self.reconciler.finalize_model_items(self.store.as_mut());
        self.teardown().await;
        self.state = ConnectionState::Disconnected;
        self.phase = Phase::Closed;
    }

    async fn handle_remote_error(&mut self, message: String) {
        self.fail(message, Phase::Error).await;
    }

    // ---- timers --------------------------------------------------------

    /// The connect deadline fired before the remote open callback.
    pub async fn handle_connect_timeout(&mut self) {
        if self.connect_deadline.is_none() {
            return;
        }
        tracing::warn!("live session did not open within the deadline");
        self.fail(CharlaError::ConnectTimeout.to_string(), Phase::Timeout)
            .await;
    }

    // ---- playback ------------------------------------------------------

    /// A scheduled source finished playing naturally.
    pub fn handle_playback_ended(&mut self, id: SourceId) {
        let Some(playback) = &mut self.playback else {
            return;
        };
        if playback.handle_ended(id) {
            if self.state == ConnectionState::Connected {
                self.phase = Phase::ConnectedIdle;
            }
            // The model's turn has played out: the next loud frame starts
            // a fresh turn for latency measurement.
            self.turn_onset = None;
            self.turn_text_stamped = false;
        }
    }

    // ---- teardown ------------------------------------------------------

    async fn fail(&mut self, message: String, phase: Phase) {
        self.metrics.session_errors += 1;
        self.teardown().await;
        self.state = ConnectionState::Error;
        self.phase = phase;
        self.error = Some(message);
    }

    /// Releases every resource. Never fails; errors from already-stopped
    /// resources are swallowed.
    async fn teardown(&mut self) {
        self.live_token.store(false, Ordering::SeqCst);
        self.connect_deadline = None;
        self.pacer_running = false;

        if let Some(handle) = self.capture_handle.take() {
            handle.stop();
        }
        if let Some(mut source) = self.capture_source.take() {
            if let Err(e) = source.stop() {
                tracing::debug!("capture source stop during teardown: {}", e);
            }
        }
        if let Some(mut playback) = self.playback.take() {
            playback.shutdown();
        }
        self.queue.clear();
        self.volume = 0.0;

        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                tracing::debug!("session close after teardown: {}", e);
            }
        }
        if let Some(started) = self.session_started_at.take() {
            tracing::debug!("session lasted {:?}", started.elapsed());
        }
    }

    // ---- read surface --------------------------------------------------

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            connection_state: self.state,
            phase: self.phase,
            volume: self.volume,
            error: self.error.clone(),
            messages: self.store.items(),
            metrics: self.metrics.clone(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn metrics(&self) -> &LiveMetrics {
        &self.metrics
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_pacer_running(&self) -> bool {
        self.pacer_running
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn send_interval_ms(&self) -> u64 {
        self.config.engine.send_interval_ms
    }

    pub fn connect_deadline(&self) -> Option<tokio::time::Instant> {
        self.connect_deadline
    }

    /// When the current connection attempt began, if one is live.
    pub fn session_started_at(&self) -> Option<Instant> {
        self.session_started_at
    }

    pub fn playback(&self) -> Option<&PlaybackScheduler> {
        self.playback.as_ref()
    }
}
