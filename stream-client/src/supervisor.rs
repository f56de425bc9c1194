// 连接监管
//
// 每个摄像头一个任务：探测 → 连接 → 读取 → 失败 → 退避 → 重新探测。
// 所有延迟都是任务内可取消的定时器。

use chrono::Utc;
use common::{CameraFeed, EncodedFrame};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ClientConfig, ProbePolicy};
use crate::fps::{FpsGauge, FpsSample};
use crate::parser::FrameBoundaryParser;
use crate::state::{FailureReason, StateChange, StreamConnectionState};
use crate::transport::{StreamTransport, TransportError};

const FPS_REFRESH_INTERVAL: Duration = Duration::from_millis(250);
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// 监管参数
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub probe: ProbePolicy,
    pub connect_timeout: Duration,
    pub stream_timeout: Duration,
    pub backoff: Duration,
    pub failed_restart: Option<Duration>,
    pub max_buffer: usize,
    pub fps_window: usize,
    pub fps_stale: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            probe: config.probe.clone(),
            connect_timeout: config.connect_timeout(),
            stream_timeout: config.stream_timeout(),
            backoff: config.backoff(),
            failed_restart: config.failed_restart(),
            max_buffer: config.max_buffer_bytes,
            fps_window: config.fps_window,
            fps_stale: config.fps_stale(),
        }
    }
}

/// 对外可观察的输出，重连后保持不变
#[derive(Clone)]
pub struct SupervisorOutputs {
    feed: CameraFeed,
    frames: broadcast::Sender<EncodedFrame>,
    state: Arc<watch::Sender<StreamConnectionState>>,
    events: broadcast::Sender<StateChange>,
    fps: FpsGauge,
    dropped_frames: Arc<AtomicU64>,
}

impl SupervisorOutputs {
    pub fn new(feed: CameraFeed, frame_capacity: usize) -> Self {
        let (frames, _) = broadcast::channel(frame_capacity.max(1));
        let (state, _) = watch::channel(StreamConnectionState::Idle);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            feed,
            frames,
            state: Arc::new(state),
            events,
            fps: FpsGauge::new(),
            dropped_frames: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn feed(&self) -> CameraFeed {
        self.feed
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<EncodedFrame> {
        self.frames.subscribe()
    }

    pub fn state(&self) -> StreamConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<StreamConnectionState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    pub fn fps(&self) -> f64 {
        self.fps.get()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// 按转换表切换状态，非法转换被拒绝并返回 false
    #[must_use]
    fn transition(&self, next: StreamConnectionState) -> bool {
        let current = self.state();
        if current == next {
            return true;
        }
        if !current.can_transition_to(&next) {
            error!(
                "[{}] Rejected state transition {} -> {}",
                self.feed, current, next
            );
            return false;
        }

        info!("[{}] {} -> {}", self.feed, current, next);
        self.state.send_replace(next.clone());
        let _ = self.events.send(StateChange {
            feed: self.feed,
            from: current,
            to: next,
            at: Utc::now(),
        });
        true
    }
}

/// 运行中的监管任务
pub struct SupervisorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    outputs: SupervisorOutputs,
}

impl SupervisorHandle {
    /// 取消任务并等待其结束，状态回到 Idle
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("[{}] Supervisor task ended abnormally: {}", self.outputs.feed, e);
        }
        self.outputs.fps.set(0.0);
        // 任何状态都可以回到 Idle
        let _ = self.outputs.transition(StreamConnectionState::Idle);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

enum ProbeOutcome {
    Ready,
    Exhausted(u32),
    Cancelled,
}

/// 一次连接会话的结束原因
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    ConnectFailed(TransportError),
    ConnectTimeout,
    Closed,
    ReadError(TransportError),
    IdleTimeout,
    Overflow,
    /// 状态已被外部改变，本任务不再拥有该连接
    Rejected,
}

/// 单个摄像头的连接监管
pub struct ConnectionSupervisor {
    feed: CameraFeed,
    transport: Arc<dyn StreamTransport>,
    settings: SupervisorSettings,
    outputs: SupervisorOutputs,
}

impl ConnectionSupervisor {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        settings: SupervisorSettings,
        outputs: SupervisorOutputs,
    ) -> Self {
        Self {
            feed: outputs.feed,
            transport,
            settings,
            outputs,
        }
    }

    pub fn spawn(self) -> SupervisorHandle {
        let cancel = CancellationToken::new();
        let outputs = self.outputs.clone();
        let task = tokio::spawn(self.run(cancel.clone()));
        SupervisorHandle {
            cancel,
            task,
            outputs,
        }
    }

    /// 运行直到取消，或在不自动重启时进入 Failed
    pub async fn run(self, cancel: CancellationToken) {
        if !self.outputs.transition(StreamConnectionState::Probing) {
            return;
        }

        loop {
            match self.probe_until_ready(&cancel).await {
                ProbeOutcome::Cancelled => break,
                ProbeOutcome::Exhausted(attempts) => {
                    warn!(
                        "⚠️  [{}] Camera not reachable after {} attempts",
                        self.feed, attempts
                    );
                    let failed = StreamConnectionState::Failed(FailureReason::NotReachable {
                        attempts,
                    });
                    if !self.outputs.transition(failed) {
                        break;
                    }

                    let Some(delay) = self.settings.failed_restart else {
                        // 保持 Failed，等待调用方重新连接
                        return;
                    };
                    if !pause(&cancel, delay).await {
                        break;
                    }
                    if !self.outputs.transition(StreamConnectionState::Probing) {
                        break;
                    }
                    continue;
                }
                ProbeOutcome::Ready => {}
            }

            if !self.outputs.transition(StreamConnectionState::Connecting) {
                break;
            }
            let end = self.stream_session(&cancel).await;
            self.outputs.fps.set(0.0);

            match end {
                SessionEnd::Cancelled | SessionEnd::Rejected => break,
                SessionEnd::ConnectFailed(e) => warn!("[{}] Connect failed: {}", self.feed, e),
                SessionEnd::ConnectTimeout => warn!("[{}] Connect timed out", self.feed),
                SessionEnd::Closed => warn!("[{}] Stream closed by server", self.feed),
                SessionEnd::ReadError(e) => warn!("[{}] Stream read error: {}", self.feed, e),
                SessionEnd::IdleTimeout => warn!(
                    "[{}] No data for {:?}, reconnecting",
                    self.feed, self.settings.stream_timeout
                ),
                SessionEnd::Overflow => {
                    warn!("[{}] Parser overflow, treating connection as unhealthy", self.feed)
                }
            }

            if !self.outputs.transition(StreamConnectionState::Backoff) {
                break;
            }
            if !pause(&cancel, self.settings.backoff).await {
                break;
            }
            if !self.outputs.transition(StreamConnectionState::Probing) {
                break;
            }
        }

        debug!("[{}] Supervisor loop finished", self.feed);
    }

    async fn probe_until_ready(&self, cancel: &CancellationToken) -> ProbeOutcome {
        let policy = &self.settings.probe;
        let max_attempts = policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let result = tokio::select! {
                _ = cancel.cancelled() => return ProbeOutcome::Cancelled,
                result = tokio::time::timeout(policy.timeout(), self.transport.probe(self.feed)) => result,
            };

            match result {
                Ok(Ok(_)) => {
                    info!("✓ [{}] Camera reachable (attempt {})", self.feed, attempt);
                    return ProbeOutcome::Ready;
                }
                Ok(Err(e)) => {
                    debug!("[{}] Probe attempt {} failed: {}", self.feed, attempt, e);
                }
                Err(_) => {
                    debug!("[{}] Probe attempt {} timed out", self.feed, attempt);
                }
            }

            if attempt < max_attempts && !pause(cancel, policy.interval()).await {
                return ProbeOutcome::Cancelled;
            }
        }

        ProbeOutcome::Exhausted(max_attempts)
    }

    async fn stream_session(&self, cancel: &CancellationToken) -> SessionEnd {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            opened = tokio::time::timeout(
                self.settings.connect_timeout,
                self.transport.open_stream(self.feed),
            ) => opened,
        };

        let mut stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return SessionEnd::ConnectFailed(e),
            Err(_) => return SessionEnd::ConnectTimeout,
        };

        let mut parser = FrameBoundaryParser::new(self.settings.max_buffer);
        let mut sample = FpsSample::new(self.settings.fps_window, self.settings.fps_stale);
        let mut streaming = false;
        let mut reported_drops = 0u64;

        let idle = tokio::time::sleep(self.settings.stream_timeout);
        tokio::pin!(idle);
        let mut refresh = tokio::time::interval(FPS_REFRESH_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                _ = &mut idle => return SessionEnd::IdleTimeout,
                _ = refresh.tick() => {
                    self.outputs.fps.set(sample.estimate(Instant::now()));
                }
                chunk = stream.next() => {
                    let chunk = match chunk {
                        Some(Ok(chunk)) => chunk,
                        Some(Err(e)) => return SessionEnd::ReadError(e),
                        None => return SessionEnd::Closed,
                    };
                    idle.as_mut().reset(Instant::now() + self.settings.stream_timeout);

                    parser.push(&chunk);
                    while let Some(frame) = parser.next_frame() {
                        if !streaming {
                            streaming = true;
                            if !self.outputs.transition(StreamConnectionState::Streaming) {
                                return SessionEnd::Rejected;
                            }
                        }
                        let now = Instant::now();
                        sample.record(now);
                        self.outputs.fps.set(sample.estimate(now));
                        // 没有订阅者时直接丢弃
                        let _ = self.outputs.frames.send(frame);
                    }

                    let stats = parser.stats();
                    let drops = stats.corrupt_frames + stats.overflows;
                    if drops > reported_drops {
                        self.outputs
                            .dropped_frames
                            .fetch_add(drops - reported_drops, Ordering::Relaxed);
                        reported_drops = drops;
                    }
                    if stats.overflows > 0 {
                        return SessionEnd::Overflow;
                    }
                }
            }
        }
    }
}

/// 可取消的等待，被取消时返回 false
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::ByteStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use common::{encode_part, HealthResponse, StatsResponse};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    /// 会话脚本
    pub(crate) enum Session {
        /// 发送这些块后关闭
        Close(Vec<Bytes>),
        /// 发送这些块后保持连接但不再发送
        Hang(Vec<Bytes>),
        /// 无法建立连接
        Refuse,
    }

    /// 按脚本响应的传输层
    pub(crate) struct ScriptedTransport {
        /// 前若干次探测失败
        pub probe_failures: AtomicU32,
        pub probes: AtomicU32,
        pub opens: AtomicU32,
        sessions: Mutex<VecDeque<Session>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(probe_failures: u32, sessions: Vec<Session>) -> Arc<Self> {
            Arc::new(Self {
                probe_failures: AtomicU32::new(probe_failures),
                probes: AtomicU32::new(0),
                opens: AtomicU32::new(0),
                sessions: Mutex::new(sessions.into()),
            })
        }
    }

    #[async_trait]
    impl StreamTransport for ScriptedTransport {
        async fn probe(&self, feed: CameraFeed) -> Result<HealthResponse, TransportError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            let remaining = self.probe_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.probe_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(TransportError::Connect("refused".to_string()));
            }
            Ok(HealthResponse::ok(feed))
        }

        async fn open_stream(&self, _feed: CameraFeed) -> Result<ByteStream, TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let session = self.sessions.lock().unwrap().pop_front();
            match session {
                Some(Session::Close(chunks)) => {
                    Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
                }
                Some(Session::Hang(chunks)) => Ok(futures::stream::iter(chunks.into_iter().map(Ok))
                    .chain(futures::stream::pending())
                    .boxed()),
                Some(Session::Refuse) | None => Err(TransportError::Connect("refused".to_string())),
            }
        }

        async fn fetch_stats(&self, _feed: CameraFeed) -> Result<StatsResponse, TransportError> {
            Err(TransportError::Status(404))
        }
    }

    pub(crate) fn jpeg_part(tag: u8) -> Bytes {
        encode_part(&[0xFF, 0xD8, tag, tag, 0xFF, 0xD9])
    }

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            probe: ProbePolicy {
                max_attempts: 30,
                interval_ms: 1000,
                timeout_ms: 2000,
            },
            connect_timeout: Duration::from_secs(5),
            stream_timeout: Duration::from_secs(10),
            backoff: Duration::from_secs(2),
            failed_restart: None,
            max_buffer: 4096,
            fps_window: 30,
            fps_stale: Duration::from_secs(3),
        }
    }

    async fn wait_for(
        rx: &mut watch::Receiver<StreamConnectionState>,
        pred: impl Fn(&StreamConnectionState) -> bool,
    ) -> StreamConnectionState {
        let state = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| pred(s)))
            .await
            .expect("state not reached")
            .expect("state channel closed");
        state.clone()
    }

    fn drain(events: &mut broadcast::Receiver<StateChange>) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok(change) = events.try_recv() {
            names.push(change.to.name().to_string());
        }
        names
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaches_streaming_and_delivers_frames() {
        let transport = ScriptedTransport::new(0, vec![Session::Hang(vec![jpeg_part(1), jpeg_part(2)])]);
        let outputs = SupervisorOutputs::new(CameraFeed::Left, 8);
        let mut frames = outputs.subscribe_frames();
        let mut events = outputs.subscribe_events();
        let mut state = outputs.watch_state();

        let handle = ConnectionSupervisor::new(transport, settings(), outputs.clone()).spawn();
        wait_for(&mut state, |s| s.is_streaming()).await;

        let first = frames.recv().await.unwrap();
        let second = frames.recv().await.unwrap();
        assert_eq!(first.data()[2], 1);
        assert_eq!(second.data()[2], 2);
        assert_eq!(drain(&mut events), vec!["probing", "connecting", "streaming"]);

        handle.stop().await;
        assert_eq!(outputs.state(), StreamConnectionState::Idle);
        assert_eq!(outputs.fps(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_retries_at_fixed_interval() {
        let transport = ScriptedTransport::new(2, vec![Session::Hang(vec![jpeg_part(1)])]);
        let outputs = SupervisorOutputs::new(CameraFeed::Right, 8);
        let mut state = outputs.watch_state();

        let started = Instant::now();
        let handle = ConnectionSupervisor::new(transport.clone(), settings(), outputs.clone()).spawn();
        wait_for(&mut state, |s| s.is_streaming()).await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));
        assert_eq!(transport.probes.load(Ordering::SeqCst), 3);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_probes_fail_without_restart() {
        let transport = ScriptedTransport::new(u32::MAX, vec![]);
        let outputs = SupervisorOutputs::new(CameraFeed::Eye, 8);
        let mut settings = settings();
        settings.probe.max_attempts = 3;

        let mut state = outputs.watch_state();
        let handle = ConnectionSupervisor::new(transport.clone(), settings, outputs.clone()).spawn();

        let failed = wait_for(&mut state, |s| s.is_failed()).await;
        assert_eq!(
            failed,
            StreamConnectionState::Failed(FailureReason::NotReachable { attempts: 3 })
        );
        assert_eq!(transport.probes.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.is_finished());
        assert!(outputs.state().is_failed());

        handle.stop().await;
        assert_eq!(outputs.state(), StreamConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_transition_stops_supervisor() {
        let transport = ScriptedTransport::new(u32::MAX, vec![]);
        let outputs = SupervisorOutputs::new(CameraFeed::Left, 8);
        let mut settings = settings();
        settings.probe.max_attempts = 2;
        settings.failed_restart = Some(Duration::from_secs(1));

        let mut state = outputs.watch_state();
        let handle = ConnectionSupervisor::new(transport.clone(), settings, outputs.clone()).spawn();
        wait_for(&mut state, |s| *s == StreamConnectionState::Probing).await;

        // 状态被外部重置后，Probing -> Failed 不再合法
        assert!(outputs.transition(StreamConnectionState::Idle));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(handle.is_finished());
        assert_eq!(outputs.state(), StreamConnectionState::Idle);
        assert_eq!(transport.probes.load(Ordering::SeqCst), 2);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_restarts_probing_after_delay() {
        let transport = ScriptedTransport::new(3, vec![Session::Hang(vec![jpeg_part(1)])]);
        let outputs = SupervisorOutputs::new(CameraFeed::Eye, 8);
        let mut settings = settings();
        settings.probe.max_attempts = 3;
        settings.failed_restart = Some(Duration::from_secs(5));

        let mut events = outputs.subscribe_events();
        let mut state = outputs.watch_state();
        let handle = ConnectionSupervisor::new(transport, settings, outputs.clone()).spawn();

        wait_for(&mut state, |s| s.is_streaming()).await;
        assert_eq!(
            drain(&mut events),
            vec!["probing", "failed", "probing", "connecting", "streaming"]
        );

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_stream_disconnect_recovers() {
        let transport = ScriptedTransport::new(
            0,
            vec![
                Session::Close(vec![jpeg_part(1), jpeg_part(2)]),
                Session::Hang(vec![jpeg_part(3)]),
            ],
        );
        let outputs = SupervisorOutputs::new(CameraFeed::Left, 8);
        let mut frames = outputs.subscribe_frames();
        let mut events = outputs.subscribe_events();
        let mut state = outputs.watch_state();

        let handle = ConnectionSupervisor::new(transport.clone(), settings(), outputs.clone()).spawn();

        let mut tags = Vec::new();
        for _ in 0..3 {
            let frame = tokio::time::timeout(Duration::from_secs(30), frames.recv())
                .await
                .unwrap()
                .unwrap();
            tags.push(frame.data()[2]);
        }
        assert_eq!(tags, vec![1, 2, 3]);
        wait_for(&mut state, |s| s.is_streaming()).await;

        assert_eq!(
            drain(&mut events),
            vec![
                "probing",
                "connecting",
                "streaming",
                "backoff",
                "probing",
                "connecting",
                "streaming"
            ]
        );
        assert_eq!(transport.opens.load(Ordering::SeqCst), 2);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connection_backs_off() {
        let transport = ScriptedTransport::new(0, vec![Session::Refuse, Session::Hang(vec![jpeg_part(1)])]);
        let outputs = SupervisorOutputs::new(CameraFeed::Left, 8);
        let mut events = outputs.subscribe_events();
        let mut state = outputs.watch_state();

        let started = Instant::now();
        let handle = ConnectionSupervisor::new(transport, settings(), outputs.clone()).spawn();
        wait_for(&mut state, |s| s.is_streaming()).await;

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(
            drain(&mut events),
            vec!["probing", "connecting", "backoff", "probing", "connecting", "streaming"]
        );

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_stream_times_out() {
        let transport = ScriptedTransport::new(
            0,
            vec![Session::Hang(vec![jpeg_part(1)]), Session::Hang(vec![jpeg_part(2)])],
        );
        let outputs = SupervisorOutputs::new(CameraFeed::Left, 8);
        let mut state = outputs.watch_state();

        let handle = ConnectionSupervisor::new(transport.clone(), settings(), outputs.clone()).spawn();
        wait_for(&mut state, |s| s.is_streaming()).await;

        let started = Instant::now();
        wait_for(&mut state, |s| *s == StreamConnectionState::Backoff).await;
        assert!(started.elapsed() >= Duration::from_secs(10));

        wait_for(&mut state, |s| s.is_streaming()).await;
        assert_eq!(transport.opens.load(Ordering::SeqCst), 2);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_parser_overflow_forces_reconnect() {
        let mut garbage = vec![0xFF, 0xD8];
        garbage.extend(std::iter::repeat(0x11).take(5000));
        let transport = ScriptedTransport::new(
            0,
            vec![
                Session::Hang(vec![jpeg_part(1), Bytes::from(garbage)]),
                Session::Hang(vec![jpeg_part(2)]),
            ],
        );
        let outputs = SupervisorOutputs::new(CameraFeed::Right, 8);
        let mut events = outputs.subscribe_events();
        let mut state = outputs.watch_state();

        let handle = ConnectionSupervisor::new(transport.clone(), settings(), outputs.clone()).spawn();
        wait_for(&mut state, |s| *s == StreamConnectionState::Backoff).await;
        wait_for(&mut state, |s| s.is_streaming()).await;

        assert!(outputs.dropped_frames() >= 1);
        assert_eq!(
            drain(&mut events),
            vec![
                "probing",
                "connecting",
                "streaming",
                "backoff",
                "probing",
                "connecting",
                "streaming"
            ]
        );

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fps_estimate_tracks_arrivals() {
        let outputs = SupervisorOutputs::new(CameraFeed::Left, 64);
        let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes, TransportError>>();

        struct ChannelTransport(Mutex<Option<futures::channel::mpsc::UnboundedReceiver<Result<Bytes, TransportError>>>>);

        #[async_trait]
        impl StreamTransport for ChannelTransport {
            async fn probe(&self, feed: CameraFeed) -> Result<HealthResponse, TransportError> {
                Ok(HealthResponse::ok(feed))
            }

            async fn open_stream(&self, _feed: CameraFeed) -> Result<ByteStream, TransportError> {
                self.0
                    .lock()
                    .unwrap()
                    .take()
                    .map(|rx| rx.boxed())
                    .ok_or(TransportError::Closed)
            }

            async fn fetch_stats(&self, _feed: CameraFeed) -> Result<StatsResponse, TransportError> {
                Err(TransportError::Status(404))
            }
        }

        let transport = Arc::new(ChannelTransport(Mutex::new(Some(rx))));
        let handle = ConnectionSupervisor::new(transport, settings(), outputs.clone()).spawn();

        for tag in 0..11u8 {
            tx.unbounded_send(Ok(jpeg_part(tag))).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let fps = outputs.fps();
        assert!((fps - 10.0).abs() < 0.5, "fps was {}", fps);

        // 超过陈旧窗口后归零
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(outputs.fps(), 0.0);

        handle.stop().await;
    }
}
