//! In-memory endpoints for tests and demos
//!
//! Each attached endpoint is one half of a `tokio::io::duplex` pair; the other
//! half is a [`MemoryDevice`] that plays the console.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf,
    ReadHalf, WriteHalf,
};

use crate::endpoint::{Endpoint, EndpointProvider, LinkSettings};

const DUPLEX_CAPACITY: usize = 4096;

/// Faults injected by the device side, observed by the endpoint side
#[derive(Default)]
struct Faults {
    read: Mutex<Option<(io::ErrorKind, String)>>,
    write: Mutex<Option<(io::ErrorKind, String)>>,
}

impl Faults {
    fn read_fault(&self) -> Option<io::Error> {
        self.read
            .lock()
            .as_ref()
            .map(|(kind, msg)| io::Error::new(*kind, msg.clone()))
    }

    fn write_fault(&self) -> Option<io::Error> {
        self.write
            .lock()
            .as_ref()
            .map(|(kind, msg)| io::Error::new(*kind, msg.clone()))
    }
}

/// Provider that hands out pre-attached in-memory endpoints in order.
pub struct MemoryProvider {
    supported: bool,
    queue: Mutex<VecDeque<MemoryEndpoint>>,
    open: Arc<AtomicUsize>,
    opened_total: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            supported: true,
            queue: Mutex::new(VecDeque::new()),
            open: Arc::new(AtomicUsize::new(0)),
            opened_total: AtomicUsize::new(0),
        }
    }

    /// An environment without serial support
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Queue an endpoint for the next `open` and return the console side.
    pub fn attach(&self) -> MemoryDevice {
        let (host, console) = tokio::io::duplex(DUPLEX_CAPACITY);
        let faults = Arc::new(Faults::default());

        self.queue.lock().push_back(MemoryEndpoint {
            io: host,
            faults: faults.clone(),
            open: None,
        });

        let (reader, writer) = tokio::io::split(console);
        MemoryDevice {
            reader: BufReader::new(reader),
            writer,
            faults,
        }
    }

    /// Endpoints handed out and not yet dropped
    pub fn open_endpoints(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Endpoints handed out since creation
    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EndpointProvider for MemoryProvider {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn open(&self, _settings: &LinkSettings) -> io::Result<Box<dyn Endpoint>> {
        let mut endpoint = self.queue.lock().pop_front().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no device selected")
        })?;

        self.open.fetch_add(1, Ordering::SeqCst);
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        endpoint.open = Some(self.open.clone());
        Ok(Box::new(endpoint))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Host side of an in-memory link
struct MemoryEndpoint {
    io: DuplexStream,
    faults: Arc<Faults>,
    open: Option<Arc<AtomicUsize>>,
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        if let Some(open) = self.open.take() {
            open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl AsyncRead for MemoryEndpoint {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(err) = this.faults.read_fault() {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryEndpoint {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Some(err) = this.faults.write_fault() {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}

/// Console side of an in-memory link.
pub struct MemoryDevice {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    faults: Arc<Faults>,
}

impl MemoryDevice {
    /// Write raw bytes exactly as given, no terminator added
    pub async fn send(&mut self, data: impl AsRef<[u8]>) -> io::Result<()> {
        self.writer.write_all(data.as_ref()).await?;
        self.writer.flush().await
    }

    pub async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.send(format!("{}\n", line)).await
    }

    /// Next line written by the host, without its terminator.
    /// `None` once the host side has closed.
    pub async fn recv_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Make every following host write fail
    pub fn fail_writes(&self) {
        *self.faults.write.lock() = Some((io::ErrorKind::Other, "write fault injected".into()));
    }

    /// Unplug the device: the host's pending read fails with a device-lost error.
    pub fn lose(self) {
        self.fail_with(io::ErrorKind::BrokenPipe, "The device has been lost.");
    }

    /// Fail the host's pending read with an arbitrary error, then close.
    pub fn fail_with(self, kind: io::ErrorKind, msg: &str) {
        *self.faults.read.lock() = Some((kind, msg.to_string()));
        // dropping our halves closes the duplex and wakes the host reader
    }

    /// Close the link cleanly; the host reads end-of-stream.
    pub fn hang_up(self) {}
}
