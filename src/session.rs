use crate::{
    ble::{Transport, TransportLink},
    error::{BlockLightError, Result},
    protocol::{CommandId, Frame, StatusReport},
    types::{DeviceStatus, PowerState, TimeoutConfig},
};
use std::{
    collections::VecDeque,
    fmt,
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{self, Instant},
};
use tracing::{debug, info, warn};

/// Request buffer depth between facade callers and the session task
const REQUEST_CHANNEL_SIZE: usize = 16;

/// Interval of the client-side countdown mirror
const COUNTDOWN_INTERVAL: Duration = Duration::from_secs(1);

/// Connection lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection; commands trigger a fresh connect
    Disconnected,
    /// Connection establishment in flight
    Connecting,
    /// Connected; the only state commands are written in
    Connected,
    /// Teardown in flight
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

enum Request {
    EnsureConnected {
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        frame: Frame,
        correlate: Option<oneshot::Sender<Frame>>,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<()>>,
    },
    State {
        reply: oneshot::Sender<SessionState>,
    },
}

/// Handle to a device session
///
/// All session state lives in one dedicated task that owns the transport
/// link for its whole lifetime; handles are cheap clones of the channels
/// into that task, so any number of callers can share one session without
/// sharing connection state. Dropping the last handle shuts the task down
/// and releases the connection.
///
/// The session connects on demand, re-synchronizes device state on every
/// connect, and autonomously releases the connection after the configured
/// idle window (the device accepts only one connection at a time).
#[derive(Clone)]
pub struct Session {
    requests: mpsc::Sender<Request>,
    status_rx: watch::Receiver<DeviceStatus>,
}

impl Session {
    /// Spawn the session task over the given transport
    #[must_use]
    pub fn spawn(transport: Arc<dyn Transport>, timeouts: TimeoutConfig) -> Self {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);
        let (status_tx, status_rx) = watch::channel(DeviceStatus::unknown());

        let task = SessionTask {
            transport,
            timeouts,
            state: SessionState::Disconnected,
            link: None,
            pending: VecDeque::new(),
            status_tx,
            countdown_active: false,
            idle_deadline: Instant::now(),
            tick_deadline: Instant::now(),
        };
        tokio::spawn(task.run(request_rx));

        Self {
            requests: request_tx,
            status_rx,
        }
    }

    /// Connect if not already connected
    ///
    /// A request issued while a connect attempt is in flight queues behind
    /// it and observes its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`BlockLightError::ConnectionFailed`] or
    /// [`BlockLightError::Timeout`] when the transport cannot be brought up.
    pub async fn ensure_connected(&self) -> Result<()> {
        self.call(|reply| Request::EnsureConnected { reply }).await?
    }

    /// Write a frame without waiting for a device response
    ///
    /// # Errors
    ///
    /// Returns [`BlockLightError::Disconnected`] when no connection is
    /// established, or the write error that tore the connection down.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.call(|reply| Request::Send {
            frame,
            correlate: None,
            reply,
        })
        .await?
    }

    /// Write a frame and register for the next notification of the same
    /// command id
    ///
    /// Correlations are first-in-first-out per command id: with several
    /// requests of one type in flight, responses pair up with requests in
    /// issue order. The returned receiver fails if the session disconnects
    /// before the matching notification arrives.
    ///
    /// # Errors
    ///
    /// Same as [`Session::send`].
    pub async fn send_correlated(&self, frame: Frame) -> Result<oneshot::Receiver<Frame>> {
        let (resolve_tx, resolve_rx) = oneshot::channel();
        self.call(|reply| Request::Send {
            frame,
            correlate: Some(resolve_tx),
            reply,
        })
        .await??;
        Ok(resolve_rx)
    }

    /// Tear down the connection immediately
    ///
    /// # Errors
    ///
    /// Returns [`BlockLightError::Disconnected`] if the session task has
    /// already exited.
    pub async fn disconnect(&self) -> Result<()> {
        self.call(|reply| Request::Disconnect { reply }).await?
    }

    /// Current lifecycle state
    pub async fn state(&self) -> SessionState {
        self.call(|reply| Request::State { reply })
            .await
            .unwrap_or(SessionState::Disconnected)
    }

    /// Latest device status snapshot
    #[must_use]
    pub fn status(&self) -> DeviceStatus {
        self.status_rx.borrow().clone()
    }

    /// Subscribe to device status changes
    ///
    /// Every update is a complete snapshot; receivers never observe a
    /// partially applied status.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DeviceStatus> {
        self.status_rx.clone()
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(make(reply_tx))
            .await
            .map_err(|_| BlockLightError::Disconnected)?;
        reply_rx.await.map_err(|_| BlockLightError::Disconnected)
    }
}

/// The session state machine, run by exactly one task
struct SessionTask {
    transport: Arc<dyn Transport>,
    timeouts: TimeoutConfig,
    state: SessionState,
    link: Option<Box<dyn TransportLink>>,
    pending: VecDeque<(u8, oneshot::Sender<Frame>)>,
    status_tx: watch::Sender<DeviceStatus>,
    countdown_active: bool,
    idle_deadline: Instant,
    tick_deadline: Instant,
}

impl SessionTask {
    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        let mut notifications: Option<mpsc::Receiver<Vec<u8>>> = None;

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request, &mut notifications).await,
                    None => break,
                },
                notification = next_notification(&mut notifications), if notifications.is_some() => {
                    match notification {
                        Some(bytes) => self.on_notification(&bytes),
                        None => self.on_transport_lost(&mut notifications).await,
                    }
                }
                () = time::sleep_until(self.idle_deadline),
                    if self.state == SessionState::Connected && !self.countdown_active =>
                {
                    info!(
                        "No activity for {}ms, releasing connection",
                        self.timeouts.idle_timeout_ms
                    );
                    self.teardown(&mut notifications, true).await;
                }
                () = time::sleep_until(self.tick_deadline), if self.countdown_active => {
                    self.on_countdown_tick(&mut notifications).await;
                }
            }
        }

        // Last handle dropped; release the radio on the way out.
        self.teardown(&mut notifications, true).await;
        debug!("Session task exiting");
    }

    async fn handle_request(
        &mut self,
        request: Request,
        notifications: &mut Option<mpsc::Receiver<Vec<u8>>>,
    ) {
        match request {
            Request::EnsureConnected { reply } => {
                let result = self.connect_if_needed(notifications).await;
                let _ = reply.send(result);
            }
            Request::Send {
                frame,
                correlate,
                reply,
            } => {
                let result = if self.state == SessionState::Connected {
                    self.write_frame(notifications, &frame, correlate).await
                } else {
                    Err(BlockLightError::Disconnected)
                };
                let _ = reply.send(result);
            }
            Request::Disconnect { reply } => {
                self.teardown(notifications, true).await;
                let _ = reply.send(Ok(()));
            }
            Request::State { reply } => {
                let _ = reply.send(self.state);
            }
        }
    }

    async fn connect_if_needed(
        &mut self,
        notifications: &mut Option<mpsc::Receiver<Vec<u8>>>,
    ) -> Result<()> {
        if self.state == SessionState::Connected {
            return Ok(());
        }

        self.state = SessionState::Connecting;
        let connect_timeout = Duration::from_millis(self.timeouts.connect_timeout_ms);
        let outcome = time::timeout(connect_timeout, self.transport.connect()).await;
        match outcome {
            Err(_) => {
                self.state = SessionState::Disconnected;
                warn!(
                    "Connection attempt timed out after {}ms",
                    self.timeouts.connect_timeout_ms
                );
                Err(BlockLightError::Timeout {
                    timeout_ms: self.timeouts.connect_timeout_ms,
                })
            }
            Ok(Err(e)) => {
                self.state = SessionState::Disconnected;
                warn!("Connection attempt failed: {e}");
                Err(e)
            }
            Ok(Ok((link, notification_rx))) => {
                self.link = Some(link);
                *notifications = Some(notification_rx);
                self.state = SessionState::Connected;
                self.touch();

                // The device does not push state unprompted after connect;
                // query once so the snapshot reflects whatever the panel is
                // doing (it may be mid-countdown from before a restart).
                self.write_frame(notifications, &Frame::status_query(), None)
                    .await?;
                Ok(())
            }
        }
    }

    async fn write_frame(
        &mut self,
        notifications: &mut Option<mpsc::Receiver<Vec<u8>>>,
        frame: &Frame,
        correlate: Option<oneshot::Sender<Frame>>,
    ) -> Result<()> {
        let bytes = frame.encode();
        debug!("Sending frame: {:02X?}", &bytes[..]);

        let Some(link) = self.link.as_ref() else {
            return Err(BlockLightError::Disconnected);
        };

        let write_timeout = Duration::from_millis(self.timeouts.write_timeout_ms);
        let outcome = time::timeout(write_timeout, link.write(&bytes)).await;
        match outcome {
            Ok(Ok(())) => {
                self.touch();
                if let Some(resolve) = correlate {
                    self.pending.push_back((frame.command, resolve));
                }
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("Write failed, dropping connection: {e}");
                self.teardown(notifications, false).await;
                Err(e)
            }
            Err(_) => {
                let timeout_ms = self.timeouts.write_timeout_ms;
                warn!("Write timed out after {timeout_ms}ms, dropping connection");
                self.teardown(notifications, false).await;
                Err(BlockLightError::Timeout { timeout_ms })
            }
        }
    }

    fn on_notification(&mut self, bytes: &[u8]) {
        if self.state != SessionState::Connected {
            debug!("Ignoring notification outside connected state");
            return;
        }

        let frame = match Frame::decode_notification(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Discarding malformed notification ({e}): {bytes:02X?}");
                return;
            }
        };

        self.touch();

        match CommandId::from_u8(frame.command) {
            Some(CommandId::Status) => match StatusReport::from_frame(&frame) {
                Ok(report) => {
                    self.apply_status(&report);
                    self.resolve_pending(frame);
                }
                Err(e) => debug!("Discarding status notification with short payload ({e})"),
            },
            Some(id) => {
                debug!("Received {id:?} acknowledgement");
                self.resolve_pending(frame);
            }
            None => debug!(
                "Discarding notification with unknown command id {:#04X}",
                frame.command
            ),
        }
    }

    fn apply_status(&mut self, report: &StatusReport) {
        if report.power == PowerState::Unknown {
            warn!("Device reported a power byte outside the documented values");
        }
        if report.timer_remaining_seconds > report.timer_initial_seconds {
            warn!(
                "Device reports {}s remaining on a {}s timer",
                report.timer_remaining_seconds, report.timer_initial_seconds
            );
        }

        let status = DeviceStatus::from_report(report);
        info!(
            "Device state updated: {}, timer {}s of {}s",
            status.power, status.timer_remaining_seconds, status.timer_initial_seconds
        );
        self.status_tx.send_replace(status);

        let countdown_running = report.timer_remaining_seconds > 0;
        if countdown_running && !self.countdown_active {
            debug!("Starting countdown mirror");
            self.countdown_active = true;
            self.tick_deadline = Instant::now() + COUNTDOWN_INTERVAL;
        } else if !countdown_running && self.countdown_active {
            self.stop_countdown();
        }
    }

    /// Resolve the oldest pending correlation matching the frame's command id
    fn resolve_pending(&mut self, frame: Frame) {
        let mut frame = frame;
        while let Some(position) = self
            .pending
            .iter()
            .position(|(command, _)| *command == frame.command)
        {
            let Some((_, resolve)) = self.pending.remove(position) else {
                return;
            };
            match resolve.send(frame) {
                Ok(()) => return,
                // The waiter gave up (timed out or was cancelled); offer the
                // notification to the next one in line.
                Err(returned) => frame = returned,
            }
        }
    }

    async fn on_countdown_tick(&mut self, notifications: &mut Option<mpsc::Receiver<Vec<u8>>>) {
        let mut status = self.status_tx.borrow().clone();
        if status.timer_remaining_seconds == 0 {
            self.stop_countdown();
            return;
        }

        status.timer_remaining_seconds -= 1;
        status.last_updated = SystemTime::now();
        let remaining = status.timer_remaining_seconds;
        self.status_tx.send_replace(status);

        if remaining > 0 {
            self.tick_deadline += COUNTDOWN_INTERVAL;
            return;
        }

        info!("Countdown reached zero, confirming device state");
        self.countdown_active = false;
        self.touch();
        if self.state == SessionState::Connected {
            if let Err(e) = self
                .write_frame(notifications, &Frame::status_query(), None)
                .await
            {
                warn!("Post-countdown status query failed: {e}");
            }
        }
    }

    fn stop_countdown(&mut self) {
        debug!("Stopping countdown mirror");
        self.countdown_active = false;
        self.touch();
    }

    async fn on_transport_lost(&mut self, notifications: &mut Option<mpsc::Receiver<Vec<u8>>>) {
        *notifications = None;
        if self.state == SessionState::Connected {
            warn!("Transport closed the notification channel, dropping connection");
            self.teardown(notifications, false).await;
        }
    }

    /// Release the connection and fail anything still waiting on it
    async fn teardown(
        &mut self,
        notifications: &mut Option<mpsc::Receiver<Vec<u8>>>,
        expected: bool,
    ) {
        *notifications = None;
        self.countdown_active = false;
        // Dropping the resolvers wakes correlated waiters with a
        // disconnect error.
        self.pending.clear();

        if let Some(link) = self.link.take() {
            self.state = SessionState::Disconnecting;
            if expected {
                info!("Disconnecting from device");
            }
            if let Err(e) = link.disconnect().await {
                debug!("Disconnect failed: {e}");
            }
        }
        self.state = SessionState::Disconnected;
    }

    fn touch(&mut self) {
        self.idle_deadline = Instant::now() + Duration::from_millis(self.timeouts.idle_timeout_ms);
    }
}

async fn next_notification(rx: &mut Option<mpsc::Receiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    /// In-memory transport for exercising the session without a radio
    pub(crate) struct MockTransport {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        notify_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
        connect_count: AtomicUsize,
        disconnect_count: Arc<AtomicUsize>,
        failures_remaining: AtomicUsize,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self::failing_first(0)
        }

        /// Refuse the first `failures` connect attempts, then succeed
        pub(crate) fn failing_first(failures: usize) -> Self {
            Self {
                writes: Arc::new(Mutex::new(Vec::new())),
                notify_tx: Mutex::new(None),
                connect_count: AtomicUsize::new(0),
                disconnect_count: Arc::new(AtomicUsize::new(0)),
                failures_remaining: AtomicUsize::new(failures),
            }
        }

        /// Deliver raw notification bytes as the device would
        pub(crate) async fn notify(&self, bytes: Vec<u8>) {
            let tx = self.notify_tx.lock().unwrap().clone();
            if let Some(tx) = tx {
                let _ = tx.send(bytes).await;
            }
        }

        pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().unwrap().clone()
        }

        pub(crate) fn connect_count(&self) -> usize {
            self.connect_count.load(Ordering::SeqCst)
        }

        pub(crate) fn disconnect_count(&self) -> usize {
            self.disconnect_count.load(Ordering::SeqCst)
        }
    }

    struct MockLink {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        disconnect_count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self) -> Result<(Box<dyn TransportLink>, mpsc::Receiver<Vec<u8>>)> {
            self.connect_count.fetch_add(1, Ordering::SeqCst);

            let failures = self.failures_remaining.load(Ordering::SeqCst);
            if failures > 0 {
                self.failures_remaining.store(failures - 1, Ordering::SeqCst);
                return Err(BlockLightError::ConnectionFailed(
                    "mock transport refused".to_string(),
                ));
            }

            let (tx, rx) = mpsc::channel(32);
            *self.notify_tx.lock().unwrap() = Some(tx);

            let link = MockLink {
                writes: self.writes.clone(),
                disconnect_count: self.disconnect_count.clone(),
            };
            Ok((Box::new(link), rx))
        }
    }

    #[async_trait]
    impl TransportLink for MockLink {
        async fn write(&self, bytes: &[u8]) -> Result<()> {
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.disconnect_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Encode a status notification as the device sends it
    pub(crate) fn status_notification(power: u8, initial: u16, remaining: u16) -> Vec<u8> {
        let mut payload = vec![power];
        payload.extend_from_slice(&initial.to_be_bytes());
        payload.extend_from_slice(&remaining.to_be_bytes());
        Frame::new(
            crate::protocol::Direction::Notification,
            CommandId::Status as u8,
            payload,
        )
        .unwrap()
        .encode()
        .to_vec()
    }

    /// Encode an empty acknowledgement notification
    pub(crate) fn ack_notification(command: CommandId) -> Vec<u8> {
        Frame::new(
            crate::protocol::Direction::Notification,
            command as u8,
            Vec::new(),
        )
        .unwrap()
        .encode()
        .to_vec()
    }
}
