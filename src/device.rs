use crate::{
    ble::{BleManager, Transport},
    error::{BlockLightError, Result},
    protocol::{Frame, StatusReport},
    session::{Session, SessionState},
    types::{ConnectionParams, DeviceInfo, DeviceStatus, TimeoutConfig, TimerRequest},
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, time};
use tracing::{info, warn};

/// Main interface for controlling a BlockBlueLight panel
///
/// `BlockLightDevice` provides a high-level interface for the device's three
/// capabilities: power, countdown timer, and status. The connection to the
/// panel is managed on demand: every command establishes a connection if
/// none is live, and an idle session releases the radio automatically so
/// other controllers (the vendor app, a wall switch) can reach the device.
///
/// Multiple consumers should share one instance by reference; each physical
/// panel maps to exactly one device value, since the hardware accepts a
/// single connection at a time.
///
/// # Examples
///
/// ```no_run
/// use blocklight::BlockLightDevice;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let light = BlockLightDevice::discover_first().await?;
///
///     // The device runs its own countdown: set it, then turn on
///     light.set_timer(20).await?;
///     light.turn_on().await?;
///
///     let status = light.query_status().await?;
///     println!(
///         "Light is {} with {} remaining",
///         status.power,
///         status.timer_remaining_display()
///     );
///
///     Ok(())
/// }
/// ```
pub struct BlockLightDevice {
    session: Session,
    device_info: DeviceInfo,
    timeouts: TimeoutConfig,
}

impl BlockLightDevice {
    /// Discover and bind to the first available BlockBlueLight device
    ///
    /// Scans with default parameters and picks the strongest signal when
    /// several panels are in range. Binding does not hold a connection open;
    /// the first command connects on demand.
    ///
    /// # Errors
    ///
    /// Returns [`BlockLightError::DeviceNotFound`] if no panel shows up
    /// during the scan, or [`BlockLightError::Ble`] for adapter failures.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use blocklight::BlockLightDevice;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let light = BlockLightDevice::discover_first().await?;
    /// println!("Found: {}", light.device_info().name);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn discover_first() -> Result<Self> {
        Self::discover_first_with_params(ConnectionParams::default()).await
    }

    /// Discover with custom scan/connect parameters
    ///
    /// # Errors
    ///
    /// Same as [`BlockLightDevice::discover_first`].
    pub async fn discover_first_with_params(params: ConnectionParams) -> Result<Self> {
        Self::discover_first_with_params_and_timeout(params, TimeoutConfig::default()).await
    }

    /// Discover with custom scan/connect parameters and session timeouts
    ///
    /// The timeout configuration controls the idle window, command
    /// timeouts, and the connect retry policy of the resulting session.
    ///
    /// # Errors
    ///
    /// Same as [`BlockLightDevice::discover_first`].
    pub async fn discover_first_with_params_and_timeout(
        params: ConnectionParams,
        timeouts: TimeoutConfig,
    ) -> Result<Self> {
        let manager = BleManager::new().await?;
        let mut devices = manager.scan_for_devices(&params).await?;

        if devices.is_empty() {
            return Err(BlockLightError::DeviceNotFound);
        }

        devices.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        let device_info = devices.remove(0);

        let transport = manager.transport_for(&device_info, &params).await?;
        Ok(Self::with_transport(
            Arc::new(transport),
            device_info,
            timeouts,
        ))
    }

    /// Bind to a device over a caller-supplied transport
    ///
    /// Useful for routing through something other than the local radio, or
    /// for driving the device logic against a fake transport.
    #[must_use]
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        device_info: DeviceInfo,
        timeouts: TimeoutConfig,
    ) -> Self {
        let session = Session::spawn(transport, timeouts.clone());
        Self {
            session,
            device_info,
            timeouts,
        }
    }

    /// Turn the panel on
    ///
    /// Fire-and-forget: the command is written and the device's
    /// acknowledgement arrives asynchronously, updating the status
    /// snapshot. If a timer should limit the session, set it first with
    /// [`BlockLightDevice::set_timer`]: the device expects timer-then-on
    /// ordering and this method does not chain the two.
    ///
    /// # Errors
    ///
    /// Returns connection errors after the retry budget is exhausted.
    pub async fn turn_on(&self) -> Result<()> {
        info!("Turning light on");
        self.ensure_connected().await?;
        self.session.send(Frame::power(true)).await
    }

    /// Turn the panel off
    ///
    /// # Errors
    ///
    /// Returns connection errors after the retry budget is exhausted.
    pub async fn turn_off(&self) -> Result<()> {
        info!("Turning light off");
        self.ensure_connected().await?;
        self.session.send(Frame::power(false)).await
    }

    /// Set the countdown timer
    ///
    /// The device turns itself off when the countdown expires. Accepts 1 to
    /// 60 minutes; the value is validated before any connection work
    /// happens. Setting the timer does not turn the panel on.
    ///
    /// # Errors
    ///
    /// Returns [`BlockLightError::InvalidArgument`] for out-of-range
    /// durations, otherwise connection errors as for
    /// [`BlockLightDevice::turn_on`].
    pub async fn set_timer(&self, minutes: u16) -> Result<()> {
        let request = TimerRequest::new(minutes)?;
        info!("Setting timer to {} minutes", request.minutes());
        self.ensure_connected().await?;
        self.session
            .send(Frame::set_timer(request.as_seconds()))
            .await
    }

    /// Query the device and wait for its status notification
    ///
    /// Returns the state carried by the notification answering this
    /// particular query: back-to-back queries see responses in issue order.
    ///
    /// # Errors
    ///
    /// Returns [`BlockLightError::Timeout`] if the device does not answer
    /// within the configured status timeout, or connection errors.
    pub async fn query_status(&self) -> Result<DeviceStatus> {
        self.ensure_connected().await?;

        let response = self.session.send_correlated(Frame::status_query()).await?;

        let timeout_ms = self.timeouts.status_timeout_ms;
        match time::timeout(Duration::from_millis(timeout_ms), response).await {
            Err(_) => Err(BlockLightError::Timeout { timeout_ms }),
            Ok(Err(_)) => Err(BlockLightError::Disconnected),
            Ok(Ok(frame)) => Ok(StatusReport::from_frame(&frame).map_or_else(
                |_| self.session.status(),
                |report| DeviceStatus::from_report(&report),
            )),
        }
    }

    /// Latest status snapshot without touching the device
    ///
    /// Starts out unknown and refreshes with every status notification;
    /// between notifications a running countdown is mirrored second by
    /// second.
    #[must_use]
    pub fn status(&self) -> DeviceStatus {
        self.session.status()
    }

    /// Subscribe to status changes
    ///
    /// Lets a presentation layer reflect the live countdown without
    /// polling. Each update is a complete snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DeviceStatus> {
        self.session.subscribe()
    }

    /// Whether a connection is currently held
    pub async fn is_connected(&self) -> bool {
        self.session.state().await == SessionState::Connected
    }

    /// Current session lifecycle state
    pub async fn session_state(&self) -> SessionState {
        self.session.state().await
    }

    /// Release the connection immediately
    ///
    /// The binding stays usable: a later command reconnects. Call this when
    /// shutting down to hand the radio back right away instead of waiting
    /// for the idle timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BlockLightError::Disconnected`] if the session task has
    /// already exited.
    pub async fn disconnect(&self) -> Result<()> {
        self.session.disconnect().await
    }

    /// Device information collected during discovery
    #[must_use]
    pub const fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Timeout configuration this device was built with
    #[must_use]
    pub const fn timeout_config(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// Connect with bounded exponential backoff
    async fn ensure_connected(&self) -> Result<()> {
        let max_attempts = self.timeouts.max_retry_attempts;
        let mut delay_ms = self.timeouts.retry_delay_ms;
        let mut attempt = 0;

        loop {
            match self.session.ensure_connected().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_recoverable() && attempt < max_attempts => {
                    attempt += 1;
                    warn!(
                        "Connect attempt {attempt}/{} failed, retrying in {delay_ms}ms: {e}",
                        max_attempts + 1
                    );
                    time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = delay_ms.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{status_notification, MockTransport};
    use crate::types::PowerState;

    fn test_device(transport: Arc<MockTransport>) -> BlockLightDevice {
        BlockLightDevice::with_transport(
            transport,
            DeviceInfo::new("BLOCK-TEST".to_string(), -40),
            TimeoutConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_timer_validates_before_any_io() {
        let transport = Arc::new(MockTransport::new());
        let device = test_device(transport.clone());

        assert!(matches!(
            device.set_timer(0).await,
            Err(BlockLightError::InvalidArgument(_))
        ));
        assert!(matches!(
            device.set_timer(61).await,
            Err(BlockLightError::InvalidArgument(_))
        ));

        // Rejected before the session ever touched the transport
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_timer_sends_big_endian_seconds() {
        let transport = Arc::new(MockTransport::new());
        let device = test_device(transport.clone());

        device.set_timer(15).await.unwrap();

        let writes = transport.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], Frame::status_query().encode().to_vec());
        assert_eq!(
            writes[1],
            vec![0x3A, 0x01, 0x31, 0x00, 0x02, 0x03, 0x84, 0xBB, 0x0A]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_off_twice_is_idempotent() {
        let transport = Arc::new(MockTransport::new());
        let device = test_device(transport.clone());

        device.turn_on().await.unwrap();
        device.turn_off().await.unwrap();
        device.turn_off().await.unwrap();

        let writes = transport.writes();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[1], vec![0x3A, 0x01, 0x20, 0x00, 0x01, 0x01, 0x23, 0x0A]);
        assert_eq!(writes[2], vec![0x3A, 0x01, 0x20, 0x00, 0x01, 0x00, 0x22, 0x0A]);
        assert_eq!(writes[3], writes[2]);

        // One connection served all three commands
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_status_returns_reported_state() {
        let transport = Arc::new(MockTransport::new());
        let device = Arc::new(test_device(transport.clone()));

        let querying = {
            let device = device.clone();
            tokio::spawn(async move { device.query_status().await })
        };

        // Let the query land, then answer it
        time::sleep(Duration::from_millis(50)).await;
        transport.notify(status_notification(0x01, 900, 540)).await;

        let status = querying.await.unwrap().unwrap();
        assert_eq!(status.power, PowerState::On);
        assert_eq!(status.timer_initial_seconds, 900);
        assert_eq!(status.timer_remaining_seconds, 540);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_status_times_out_without_answer() {
        let transport = Arc::new(MockTransport::new());
        let device = test_device(transport);

        let result = device.query_status().await;
        assert!(matches!(
            result,
            Err(BlockLightError::Timeout { timeout_ms: 3000 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_queries_keep_issue_order() {
        let transport = Arc::new(MockTransport::new());
        let device = Arc::new(test_device(transport.clone()));

        let first = {
            let device = device.clone();
            tokio::spawn(async move { device.query_status().await })
        };
        time::sleep(Duration::from_millis(10)).await;

        let second = {
            let device = device.clone();
            tokio::spawn(async move { device.query_status().await })
        };
        time::sleep(Duration::from_millis(10)).await;

        transport.notify(status_notification(0x01, 600, 100)).await;
        transport.notify(status_notification(0x01, 600, 200)).await;

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.timer_remaining_seconds, 100);
        assert_eq!(second.timer_remaining_seconds, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_with_backoff() {
        let transport = Arc::new(MockTransport::failing_first(2));
        let device = test_device(transport.clone());

        device.turn_on().await.unwrap();
        assert_eq!(transport.connect_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_are_bounded() {
        let transport = Arc::new(MockTransport::failing_first(10));
        let device = test_device(transport.clone());

        let result = device.turn_on().await;
        assert!(matches!(result, Err(BlockLightError::ConnectionFailed(_))));

        // Initial attempt plus the configured three retries
        assert_eq!(transport.connect_count(), 4);
    }
}
