//! The engine event loop.
//!
//! One tokio task owns the `SessionEngine` and multiplexes its event
//! sources: user commands, the server event stream, capture frames, the
//! paced send interval, playback completions, and the connect deadline.
//! After every step the task publishes an `EngineSnapshot` over a watch
//! channel for UIs to read.

use crate::audio::pipeline::CaptureFrame;
use crate::engine::session::SessionEngine;
use crate::engine::sink::SourceId;
use crate::engine::types::{Command, EngineSnapshot};
use crate::live::message::ServerEvent;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

/// Capacity of the command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 16;
/// Capacity of the playback completion channel.
const PLAYBACK_EVENT_CAPACITY: usize = 64;

/// Control and read surface for a running engine task.
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<EngineSnapshot>,
    playback_ended: mpsc::Sender<SourceId>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Spawns the engine event loop and returns its handle.
    pub fn spawn(engine: SessionEngine) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot) = watch::channel(engine.snapshot());
        let (playback_ended, playback_rx) = mpsc::channel(PLAYBACK_EVENT_CAPACITY);

        let task = tokio::spawn(run_loop(engine, command_rx, snapshot_tx, playback_rx));

        Self {
            commands,
            snapshot,
            playback_ended,
            task,
        }
    }

    pub async fn connect(&self) {
        self.send(Command::Connect).await;
    }

    pub async fn disconnect(&self) {
        self.send(Command::Disconnect).await;
    }

    pub async fn reconnect(&self) {
        self.send(Command::Reconnect).await;
    }

    pub async fn send_text(&self, text: impl Into<String>) {
        self.send(Command::SendText(text.into())).await;
    }

    async fn send(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            tracing::debug!("engine task is gone, command dropped");
        }
    }

    /// Latest published state.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch channel for state changes.
    pub fn watch(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot.clone()
    }

    /// Sender that playback sinks use to report completed sources.
    pub fn playback_completion_sender(&self) -> mpsc::Sender<SourceId> {
        self.playback_ended.clone()
    }

    /// Stops the engine (full disconnect) and waits for the task to end.
    pub async fn shutdown(self) {
        self.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::warn!("engine task ended abnormally: {}", e);
        }
    }
}

async fn run_loop(
    mut engine: SessionEngine,
    mut commands: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    mut playback_rx: mpsc::Receiver<SourceId>,
) {
    let mut server_rx: Option<mpsc::Receiver<ServerEvent>> = None;
    let mut frames_rx: Option<mpsc::Receiver<CaptureFrame>> = None;
    let mut pacer: Option<Interval> = None;

    loop {
        // Materialize the pacer from the engine's flag. Starting twice is
        // a no-op because an existing interval is kept.
        if engine.is_pacer_running() {
            if pacer.is_none() {
                let mut interval =
                    tokio::time::interval(Duration::from_millis(engine.send_interval_ms()));
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                pacer = Some(interval);
            }
        } else {
            pacer = None;
        }

        let deadline = engine.connect_deadline();

        publish(&snapshot_tx, &engine);

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Connect) => {
                    if let Some(events) = engine.connect().await {
                        server_rx = Some(events);
                        frames_rx = None;
                    }
                }
                Some(Command::Reconnect) => {
                    frames_rx = None;
                    server_rx = engine.reconnect().await;
                }
                Some(Command::Disconnect) => {
                    engine.disconnect().await;
                    server_rx = None;
                    frames_rx = None;
                }
                Some(Command::SendText(text)) => engine.send_text(&text),
                Some(Command::Shutdown) | None => {
                    engine.disconnect().await;
                    break;
                }
            },
            event = recv_opt(&mut server_rx), if server_rx.is_some() => match event {
                Some(event) => {
                    if let Some(frames) = engine.handle_server_event(event).await {
                        frames_rx = Some(frames);
                    }
                }
                None => {
                    // Stream end without a close event: treat as closed.
                    engine.handle_server_event(ServerEvent::Closed).await;
                    server_rx = None;
                    frames_rx = None;
                }
            },
            frame = recv_opt(&mut frames_rx), if frames_rx.is_some() => match frame {
                Some(frame) => engine.handle_frame(frame),
                None => frames_rx = None,
            },
            Some(id) = playback_rx.recv() => engine.handle_playback_ended(id),
            _ = tick_opt(&mut pacer), if pacer.is_some() => engine.pacer_tick(),
            _ = sleep_until_opt(deadline), if deadline.is_some() => {
                engine.handle_connect_timeout().await;
                server_rx = None;
                frames_rx = None;
            }
        }

        // Engine teardown invalidates the per-session channels.
        if !engine.has_session() {
            server_rx = None;
            frames_rx = None;
        }
    }

    publish(&snapshot_tx, &engine);
}

fn publish(snapshot_tx: &watch::Sender<EngineSnapshot>, engine: &SessionEngine) {
    let snapshot = engine.snapshot();
    if *snapshot_tx.borrow() != snapshot {
        let _ = snapshot_tx.send(snapshot);
    }
}

async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick_opt(pacer: &mut Option<Interval>) {
    match pacer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::MockCaptureProvider;
    use crate::config::Config;
    use crate::engine::sink::CollectorSinkProvider;
    use crate::engine::transcript::MemoryStore;
    use crate::engine::types::{ConnectionState, Phase};
    use crate::live::message::ServerMessage;
    use crate::live::session::MockLiveConnector;
    use std::sync::Arc;

    fn test_engine(connector: Arc<MockLiveConnector>) -> SessionEngine {
        let mut config = Config::default();
        config.api_key = Some("test-key".to_string());
        SessionEngine::new(
            config,
            connector,
            Arc::new(MockCaptureProvider::new()),
            Arc::new(CollectorSinkProvider),
            Box::new(MemoryStore::new()),
        )
    }

    async fn wait_for_state(
        watch: &mut watch::Receiver<EngineSnapshot>,
        state: ConnectionState,
    ) -> EngineSnapshot {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if watch.borrow().connection_state == state {
                    return watch.borrow().clone();
                }
                watch.changed().await.expect("engine task alive");
            }
        })
        .await
        .expect("state reached before timeout")
    }

    #[tokio::test]
    async fn test_handle_connect_and_open() {
        let connector = Arc::new(MockLiveConnector::new().with_auto_open());
        let handle = EngineHandle::spawn(test_engine(connector));
        let mut watch = handle.watch();

        handle.connect().await;
        let snapshot = wait_for_state(&mut watch, ConnectionState::Connected).await;

        assert_eq!(snapshot.phase, Phase::ConnectedIdle);
        assert_eq!(snapshot.metrics.session_starts, 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_handle_disconnect_round_trip() {
        let connector = Arc::new(MockLiveConnector::new().with_auto_open());
        let handle = EngineHandle::spawn(test_engine(connector.clone()));
        let mut watch = handle.watch();

        handle.connect().await;
        wait_for_state(&mut watch, ConnectionState::Connected).await;

        handle.disconnect().await;
        let snapshot = wait_for_state(&mut watch, ConnectionState::Disconnected).await;
        assert_eq!(snapshot.phase, Phase::Idle);
        assert!(connector.last_session().unwrap().is_closed());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_server_messages_reach_transcript() {
        let connector = Arc::new(MockLiveConnector::new().with_auto_open());
        let handle = EngineHandle::spawn(test_engine(connector.clone()));
        let mut watch = handle.watch();

        handle.connect().await;
        wait_for_state(&mut watch, ConnectionState::Connected).await;

        let events = connector.event_sender().unwrap();
        events
            .send(ServerEvent::Message(
                ServerMessage::default().with_output_transcription("Hola "),
            ))
            .await
            .unwrap();
        events
            .send(ServerEvent::Message(
                ServerMessage::default().with_output_transcription("mundo"),
            ))
            .await
            .unwrap();

        let snapshot = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let snapshot = watch.borrow().clone();
                if snapshot
                    .messages
                    .first()
                    .is_some_and(|m| m.text == "Hola mundo")
                {
                    return snapshot;
                }
                watch.changed().await.expect("engine task alive");
            }
        })
        .await
        .expect("transcript before timeout");

        assert_eq!(snapshot.messages.len(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_pacer_drains_capture_frames() {
        let connector = Arc::new(MockLiveConnector::new().with_auto_open());
        // Loud frames so the capture thread emits continuously
        let mut config = Config::default();
        config.api_key = Some("test-key".to_string());
        let engine = SessionEngine::new(
            config,
            connector.clone(),
            Arc::new(MockCaptureProvider::new().with_samples(vec![0.1; 4096])),
            Arc::new(CollectorSinkProvider),
            Box::new(MemoryStore::new()),
        );
        let handle = EngineHandle::spawn(engine);
        let mut watch = handle.watch();

        handle.connect().await;
        wait_for_state(&mut watch, ConnectionState::Connected).await;

        // Wait for at least one paced send
        tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                if watch.borrow().metrics.chunks_sent > 0 {
                    return;
                }
                watch.changed().await.expect("engine task alive");
            }
        })
        .await
        .expect("chunks sent before timeout");

        let session = connector.last_session().unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if !session.sent_chunks().is_empty() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("transport received a chunk");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_server_error_lands_in_error_state() {
        let connector = Arc::new(MockLiveConnector::new().with_auto_open());
        let handle = EngineHandle::spawn(test_engine(connector.clone()));
        let mut watch = handle.watch();

        handle.connect().await;
        wait_for_state(&mut watch, ConnectionState::Connected).await;

        connector
            .event_sender()
            .unwrap()
            .send(ServerEvent::Error("quota exceeded".to_string()))
            .await
            .unwrap();

        let snapshot = wait_for_state(&mut watch, ConnectionState::Error).await;
        assert_eq!(snapshot.error.as_deref(), Some("quota exceeded"));
        assert_eq!(snapshot.metrics.session_errors, 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_dropped_event_stream_counts_as_close() {
        let connector = Arc::new(MockLiveConnector::new().with_auto_open());
        let handle = EngineHandle::spawn(test_engine(connector.clone()));
        let mut watch = handle.watch();

        handle.connect().await;
        wait_for_state(&mut watch, ConnectionState::Connected).await;

        // Simulate the transport going away without a close event
        connector.drop_event_sender();

        let snapshot = wait_for_state(&mut watch, ConnectionState::Disconnected).await;
        assert_eq!(snapshot.phase, Phase::Closed);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_fires_without_open() {
        let connector = Arc::new(MockLiveConnector::new());
        let mut config = Config::default();
        config.api_key = Some("test-key".to_string());
        // Deadline well inside the helper's wait timeout
        config.engine.connect_timeout_ms = 100;
        let engine = SessionEngine::new(
            config,
            connector,
            Arc::new(MockCaptureProvider::new()),
            Arc::new(CollectorSinkProvider),
            Box::new(MemoryStore::new()),
        );
        let handle = EngineHandle::spawn(engine);
        let mut watch = handle.watch();

        handle.connect().await;

        // Paused time: advancing the clock past the deadline fires it
        let snapshot = wait_for_state(&mut watch, ConnectionState::Error).await;
        assert_eq!(snapshot.phase, Phase::Timeout);
        assert_eq!(snapshot.metrics.session_errors, 1);

        handle.shutdown().await;
    }
}
