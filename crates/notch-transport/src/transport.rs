//! Connection lifecycle, read loop and single-slot response correlation

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::endpoint::{Endpoint, EndpointProvider, LinkSettings};
use crate::error::{TransportError, TransportResult};
use crate::lines::{LineBuffer, TERMINATOR};

/// Size of a single read from the endpoint
const READ_CHUNK: usize = 1024;

/// Buffered lifecycle events per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 64;

type Reader = ReadHalf<Box<dyn Endpoint>>;
type Writer = WriteHalf<Box<dyn Endpoint>>;

/// Connection state as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// `connect()` is in progress; not yet usable
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Events published to subscribers
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Error(TransportError),
    /// A line that arrived while no command was awaiting a response
    Unsolicited(String),
}

/// The one outstanding "waiting for the next line" registration
struct PendingSlot {
    id: u64,
    tx: oneshot::Sender<TransportResult<String>>,
}

/// Everything mutated by connect/disconnect/cleanup and the read loop
struct Link {
    state: ConnectionState,
    /// Bumped on every successful open; stale read loops compare against it
    generation: u64,
    cancel: Option<CancellationToken>,
    reader: Option<JoinHandle<()>>,
    pending: Option<PendingSlot>,
    next_request: u64,
}

impl Link {
    fn is_idle(&self) -> bool {
        self.state == ConnectionState::Disconnected && self.cancel.is_none() && self.reader.is_none()
    }
}

/// Write half tagged with the generation of the connection it belongs to
struct WriterSlot {
    generation: u64,
    writer: Writer,
}

struct Shared {
    provider: Arc<dyn EndpointProvider>,
    settings: LinkSettings,
    link: Mutex<Link>,
    writer: tokio::sync::Mutex<Option<WriterSlot>>,
    events: broadcast::Sender<TransportEvent>,
}

/// Line-oriented transport over one endpoint at a time.
///
/// Cloning is cheap and every clone drives the same connection.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

impl Transport {
    pub fn new(provider: Arc<dyn EndpointProvider>) -> Self {
        Self::with_settings(provider, LinkSettings::default())
    }

    pub fn with_settings(provider: Arc<dyn EndpointProvider>, settings: LinkSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                provider,
                settings,
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    cancel: None,
                    reader: None,
                    pending: None,
                    next_request: 0,
                }),
                writer: tokio::sync::Mutex::new(None),
                events,
            }),
        }
    }

    /// Can the environment provide an endpoint at all?
    pub fn is_supported(&self) -> bool {
        self.shared.provider.is_supported()
    }

    /// Subscribe to lifecycle events and unsolicited lines
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.link.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn settings(&self) -> LinkSettings {
        self.shared.settings
    }

    /// Open a fresh endpoint and start reading from it.
    ///
    /// An existing connection is torn down first, so at most one endpoint is
    /// ever open. On failure nothing stays half-open.
    pub async fn connect(&self) -> TransportResult<()> {
        if !self.is_supported() {
            return Err(TransportError::Unsupported);
        }

        let idle = self.shared.link.lock().is_idle();
        if !idle {
            self.disconnect().await;
        }

        self.shared.link.lock().state = ConnectionState::Connecting;
        info!(endpoint = %self.shared.provider.describe(), "Connecting");

        let endpoint = match self.shared.provider.open(&self.shared.settings).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(error = %e, "Failed to open endpoint");
                self.shared.cleanup(None, TransportError::NotConnected, true).await;
                let err = TransportError::connection(e);
                self.shared.emit(TransportEvent::Error(err.clone()));
                return Err(err);
            }
        };

        let (reader, writer) = tokio::io::split(endpoint);

        // Held until the slot is tagged, so no cleanup sees a half-installed writer
        let mut writer_slot = self.shared.writer.lock().await;
        let cancel = CancellationToken::new();
        let generation = {
            let mut link = self.shared.link.lock();
            link.generation += 1;
            link.state = ConnectionState::Connected;
            link.cancel = Some(cancel.clone());
            let generation = link.generation;
            link.reader = Some(tokio::spawn(read_loop(
                self.shared.clone(),
                reader,
                cancel,
                generation,
            )));
            generation
        };
        *writer_slot = Some(WriterSlot { generation, writer });
        drop(writer_slot);

        info!(generation, baud = self.shared.settings.baud_rate, "Connected");
        self.shared.emit(TransportEvent::Connected);
        Ok(())
    }

    /// Tear down the connection. No-op when already disconnected.
    pub async fn disconnect(&self) {
        if self
            .shared
            .cleanup(None, TransportError::Disconnected, true)
            .await
        {
            info!("Disconnected");
            self.shared.emit(TransportEvent::Disconnected);
        }
    }

    /// Write one line followed by the terminator. No retry.
    ///
    /// An empty line writes a bare terminator.
    pub async fn send_command(&self, line: &str) -> TransportResult<()> {
        if line.as_bytes().contains(&TERMINATOR) {
            return Err(TransportError::InvalidLine);
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut guard = self.shared.writer.lock().await;
        let writer = guard
            .as_mut()
            .map(|slot| &mut slot.writer)
            .ok_or(TransportError::NotConnected)?;

        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line.as_bytes());
        frame.push(TERMINATOR);

        let result = match writer.write_all(&frame).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                debug!(line = %line, "Sent");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Write failed");
                let err = TransportError::write(e);
                self.shared.emit(TransportEvent::Error(err.clone()));
                Err(err)
            }
        }
    }

    /// Write a line and wait for exactly the next decoded line.
    ///
    /// The response slot is registered before the write, so an immediate
    /// reply cannot slip past it. Only one request may be outstanding;
    /// an overlapping call fails with [`TransportError::Busy`].
    pub async fn send_command_with_response(
        &self,
        line: &str,
        timeout: Duration,
    ) -> TransportResult<String> {
        if line.as_bytes().contains(&TERMINATOR) {
            return Err(TransportError::InvalidLine);
        }

        let (tx, mut rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        let id = {
            let mut link = self.shared.link.lock();
            if link.state != ConnectionState::Connected {
                return Err(TransportError::NotConnected);
            }
            if link.pending.is_some() {
                return Err(TransportError::Busy);
            }
            link.next_request += 1;
            let id = link.next_request;
            link.pending = Some(PendingSlot { id, tx });
            id
        };
        let _slot = SlotGuard {
            shared: &*self.shared,
            id,
        };

        self.send_command(line).await?;

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        tokio::select! {
            biased;
            reply = &mut rx => reply.unwrap_or(Err(TransportError::Disconnected)),
            _ = &mut sleep => {
                if self.shared.release(id) {
                    debug!(line = %line, ?timeout, "Command timed out");
                    Err(TransportError::Timeout(timeout))
                } else {
                    // The read loop took the slot in the same instant; its line wins.
                    rx.await.unwrap_or(Err(TransportError::Disconnected))
                }
            }
        }
    }
}

/// Releases the response slot if the awaiting call finishes or is dropped
/// without it being consumed.
struct SlotGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.shared.release(self.id);
    }
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Drop the slot registered as `id`. Returns false if it was already
    /// consumed or replaced.
    fn release(&self, id: u64) -> bool {
        let mut link = self.link.lock();
        if link.pending.as_ref().is_some_and(|slot| slot.id == id) {
            link.pending = None;
            true
        } else {
            false
        }
    }

    /// Route a decoded line to the waiting caller, or publish it as unsolicited.
    fn dispatch(&self, line: String) {
        let pending = self.link.lock().pending.take();
        match pending {
            Some(slot) => {
                debug!(line = %line, request = slot.id, "Response");
                if let Err(Ok(line)) = slot.tx.send(Ok(line)) {
                    self.emit(TransportEvent::Unsolicited(line));
                }
            }
            None => {
                debug!(line = %line, "Unsolicited");
                self.emit(TransportEvent::Unsolicited(line));
            }
        }
    }

    /// Release reader, writer and endpoint, then reset to `Disconnected`.
    ///
    /// Idempotent and infallible. A pending response slot is resolved with
    /// `cause`. With `generation` set, only that connection is torn down.
    /// Returns true if a live or half-open connection was actually released.
    async fn cleanup(
        &self,
        generation: Option<u64>,
        cause: TransportError,
        join_reader: bool,
    ) -> bool {
        let (current, cancel, reader, pending, released) = {
            let mut link = self.link.lock();
            if generation.is_some_and(|g| g != link.generation) {
                return false;
            }
            let released = !link.is_idle();
            link.state = ConnectionState::Disconnected;
            (
                link.generation,
                link.cancel.take(),
                link.reader.take(),
                link.pending.take(),
                released,
            )
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(reader) = reader {
            if join_reader {
                // Wait for the loop to drop its read half
                if let Err(e) = reader.await {
                    debug!(error = %e, "Read loop ended abnormally");
                }
            }
        }

        if let Some(mut writer) = self.take_writer(current).await {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Ignoring error while closing writer");
            }
        }

        if let Some(slot) = pending {
            let _ = slot.tx.send(Err(cause));
        }

        released
    }

    /// Take the write half only if it still belongs to `generation`; a newer
    /// connection may have installed its own while we waited for the lock.
    async fn take_writer(&self, generation: u64) -> Option<Writer> {
        let mut slot = self.writer.lock().await;
        if slot.as_ref().is_some_and(|s| s.generation == generation) {
            slot.take().map(|s| s.writer)
        } else {
            None
        }
    }
}

/// Background task: read chunks, frame lines, dispatch them in order.
///
/// Never fails out; every failure is reported through events.
async fn read_loop(shared: Arc<Shared>, mut reader: Reader, cancel: CancellationToken, generation: u64) {
    let mut lines = LineBuffer::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(generation, "Read loop cancelled");
                return;
            }
            result = reader.read(&mut buf) => result,
        };

        match result {
            Ok(0) => {
                info!(generation, "Endpoint closed");
                let cause = TransportError::DeviceLost("end of stream".into());
                if shared.cleanup(Some(generation), cause, false).await {
                    shared.emit(TransportEvent::Disconnected);
                }
                return;
            }
            Ok(n) => {
                let framed = lines.push(&buf[..n]);
                for line in framed.lines {
                    shared.dispatch(line);
                }
                if let Some(e) = framed.overflow {
                    warn!(generation, error = %e, "Discarding oversized line");
                }
            }
            Err(e) => {
                let err = TransportError::from_read(e);
                error!(generation, error = %err, "Read failed");
                if shared.cleanup(Some(generation), err.clone(), false).await {
                    shared.emit(TransportEvent::Disconnected);
                }
                shared.emit(TransportEvent::Error(err));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDevice, MemoryProvider};
    use std::io;

    fn setup() -> (Arc<MemoryProvider>, Transport) {
        let provider = Arc::new(MemoryProvider::new());
        let transport = Transport::new(provider.clone());
        (provider, transport)
    }

    async fn connected() -> (Arc<MemoryProvider>, Transport, MemoryDevice) {
        let (provider, transport) = setup();
        let device = provider.attach();
        transport.connect().await.unwrap();
        (provider, transport, device)
    }

    async fn next_unsolicited(events: &mut broadcast::Receiver<TransportEvent>) -> String {
        loop {
            if let TransportEvent::Unsolicited(line) = events.recv().await.unwrap() {
                return line;
            }
        }
    }

    fn drain(events: &mut broadcast::Receiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn count_disconnected(events: &[TransportEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, TransportEvent::Disconnected))
            .count()
    }

    #[tokio::test]
    async fn test_connect_unsupported() {
        let transport = Transport::new(Arc::new(MemoryProvider::unsupported()));
        assert!(!transport.is_supported());
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::Unsupported)
        ));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_failure_cleans_up() {
        let (_provider, transport) = setup();
        let mut events = transport.subscribe();

        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
        assert_eq!(transport.state(), ConnectionState::Disconnected);

        let seen = drain(&mut events);
        assert!(matches!(
            seen.as_slice(),
            [TransportEvent::Error(TransportError::Connection(_))]
        ));

        // Nothing to tear down afterwards
        transport.disconnect().await;
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_connect_emits_connected() {
        let (provider, transport) = setup();
        let _device = provider.attach();
        let mut events = transport.subscribe();

        transport.connect().await.unwrap();
        assert!(transport.is_connected());
        assert!(matches!(events.recv().await.unwrap(), TransportEvent::Connected));
        assert_eq!(provider.open_endpoints(), 1);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let (_provider, transport) = setup();
        assert!(matches!(
            transport.send_command("PING").await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport
                .send_command_with_response("PING", Duration::from_millis(50))
                .await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_send_appends_terminator() {
        let (_provider, transport, mut device) = connected().await;

        transport.send_command("OPEN_MENU").await.unwrap();
        transport.send_command("").await.unwrap();
        assert_eq!(device.recv_line().await.unwrap().as_deref(), Some("OPEN_MENU"));
        assert_eq!(device.recv_line().await.unwrap().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_embedded_terminator_rejected() {
        let (_provider, transport, _device) = connected().await;
        assert!(matches!(
            transport.send_command("SET a\nb").await,
            Err(TransportError::InvalidLine)
        ));
    }

    #[tokio::test]
    async fn test_unsolicited_lines_across_chunks() {
        let (_provider, transport, mut device) = connected().await;
        let mut events = transport.subscribe();

        device.send("OK\nST").await.unwrap();
        device.send("ATUS=1\n").await.unwrap();

        assert_eq!(next_unsolicited(&mut events).await, "OK");
        assert_eq!(next_unsolicited(&mut events).await, "STATUS=1");
    }

    #[tokio::test]
    async fn test_response_is_correlated() {
        let (_provider, transport, mut device) = connected().await;
        let mut events = transport.subscribe();

        let console = tokio::spawn(async move {
            let line = device.recv_line().await.unwrap();
            assert_eq!(line.as_deref(), Some("PING"));
            device.send_line("PONG").await.unwrap();
            device.send_line("BUTTON A").await.unwrap();
            device
        });

        let reply = transport
            .send_command_with_response("PING", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, "PONG");

        // The response is consumed by the slot, the next line is unsolicited
        assert_eq!(next_unsolicited(&mut events).await, "BUTTON A");
        let _device = console.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_line_is_never_a_response() {
        let (_provider, transport, mut device) = connected().await;

        let console = tokio::spawn(async move {
            let line = device.recv_line().await.unwrap();
            assert_eq!(line.as_deref(), Some("GET_MEMORY"));

            let mut oversized = b"MEMORY sram=1 note=".to_vec();
            oversized.extend(std::iter::repeat(b'a').take(5000));
            oversized.extend_from_slice(b" tail=1\n");
            for chunk in oversized.chunks(512) {
                device.send(chunk).await.unwrap();
            }
            device.send_line("MEMORY sram=812 flash=32256 eeprom=1024").await.unwrap();
            device
        });

        let reply = transport
            .send_command_with_response("GET_MEMORY", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, "MEMORY sram=812 flash=32256 eeprom=1024");
        assert!(transport.is_connected());
        let _device = console.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_connection() {
        let (_provider, transport, _device) = connected().await;

        let start = Instant::now();
        let err = transport
            .send_command_with_response("PING", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(d) if d == Duration::from_millis(100)));
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        assert!(transport.is_connected());

        // The slot was released, so a new request may be issued
        let err = transport
            .send_command_with_response("PING", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_overlapping_request_is_busy() {
        let (_provider, transport, mut device) = connected().await;

        let first = {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .send_command_with_response("GET_INFO", Duration::from_secs(5))
                    .await
            })
        };

        // Wait until the first request is on the wire
        assert_eq!(device.recv_line().await.unwrap().as_deref(), Some("GET_INFO"));

        let second = transport
            .send_command_with_response("GET_STATS", Duration::from_secs(5))
            .await;
        assert!(matches!(second, Err(TransportError::Busy)));

        device.send_line("INFO model=NOTCH").await.unwrap();
        assert_eq!(first.await.unwrap().unwrap(), "INFO model=NOTCH");
    }

    #[tokio::test]
    async fn test_dropped_request_releases_slot() {
        let (_provider, transport, mut device) = connected().await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            transport.send_command_with_response("GET_STATS", Duration::from_secs(60)),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(device.recv_line().await.unwrap().as_deref(), Some("GET_STATS"));

        let console = tokio::spawn(async move {
            device.recv_line().await.unwrap();
            device.send_line("PONG").await.unwrap();
            device
        });
        let reply = transport
            .send_command_with_response("PING", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, "PONG");
        let _device = console.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_failure_resolves_immediately() {
        let (_provider, transport, device) = connected().await;
        let mut events = transport.subscribe();
        device.fail_writes();

        let err = transport
            .send_command_with_response("PING", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Write(_)));
        assert!(matches!(
            events.recv().await.unwrap(),
            TransportEvent::Error(TransportError::Write(_))
        ));

        // No slot left behind
        let err = transport
            .send_command_with_response("PING", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Write(_)));
    }

    #[tokio::test]
    async fn test_device_lost_while_pending() {
        let (provider, transport, mut device) = connected().await;
        let mut events = transport.subscribe();

        let request = {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .send_command_with_response("GET_MEMORY", Duration::from_secs(60))
                    .await
            })
        };
        assert_eq!(device.recv_line().await.unwrap().as_deref(), Some("GET_MEMORY"));
        device.lose();

        let err = request.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::DeviceLost(_)));
        assert_eq!(transport.state(), ConnectionState::Disconnected);

        // Disconnected is emitted before the error, and only once
        assert!(matches!(events.recv().await.unwrap(), TransportEvent::Disconnected));
        assert!(matches!(
            events.recv().await.unwrap(),
            TransportEvent::Error(TransportError::DeviceLost(_))
        ));
        transport.disconnect().await;
        assert_eq!(count_disconnected(&drain(&mut events)), 0);

        tokio::task::yield_now().await;
        assert_eq!(provider.open_endpoints(), 0);
    }

    #[tokio::test]
    async fn test_fatal_read_error_disconnects() {
        let (_provider, transport, device) = connected().await;
        let mut events = transport.subscribe();

        device.fail_with(io::ErrorKind::InvalidData, "framing error");

        assert!(matches!(events.recv().await.unwrap(), TransportEvent::Disconnected));
        assert!(matches!(
            events.recv().await.unwrap(),
            TransportEvent::Error(TransportError::Read(_))
        ));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_end_of_stream_disconnects() {
        let (_provider, transport, device) = connected().await;
        let mut events = transport.subscribe();

        device.hang_up();
        assert!(matches!(events.recv().await.unwrap(), TransportEvent::Disconnected));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (provider, transport, _device) = connected().await;
        let mut events = transport.subscribe();

        transport.disconnect().await;
        transport.disconnect().await;

        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_eq!(count_disconnected(&drain(&mut events)), 1);
        assert_eq!(provider.open_endpoints(), 0);
        {
            let link = transport.shared.link.lock();
            assert!(link.is_idle());
            assert!(link.pending.is_none());
        }
        assert!(transport.shared.writer.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_resolves_pending() {
        let (_provider, transport, mut device) = connected().await;

        let request = {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .send_command_with_response("GET_SETTINGS", Duration::from_secs(60))
                    .await
            })
        };
        device.recv_line().await.unwrap();
        transport.disconnect().await;

        let err = request.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::Disconnected));
    }

    #[tokio::test]
    async fn test_reconnect_tears_down_first() {
        let (provider, transport, _first) = connected().await;
        let mut events = transport.subscribe();
        let mut second = provider.attach();

        transport.connect().await.unwrap();
        assert_eq!(provider.open_endpoints(), 1);
        assert_eq!(provider.opened_total(), 2);

        let seen = drain(&mut events);
        assert!(matches!(
            seen.as_slice(),
            [TransportEvent::Disconnected, TransportEvent::Connected]
        ));

        transport.send_command("PING").await.unwrap();
        assert_eq!(second.recv_line().await.unwrap().as_deref(), Some("PING"));
    }

    #[tokio::test]
    async fn test_stale_cleanup_keeps_new_writer() {
        let (provider, transport, _first) = connected().await;
        let mut second = provider.attach();
        transport.connect().await.unwrap();
        let current = transport.shared.link.lock().generation;

        // A cleanup for the previous connection that only now gets the writer lock
        assert!(transport.shared.take_writer(current - 1).await.is_none());

        assert!(transport.is_connected());
        transport.send_command("PING").await.unwrap();
        assert_eq!(second.recv_line().await.unwrap().as_deref(), Some("PING"));

        assert!(transport.shared.take_writer(current).await.is_some());
    }
}
