use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;

use crate::{
    codec,
    completion::{CompletionGuard, ResponseCompletion},
    frame::{Correlation, Frame},
    pending::{PendingRequests, ResponseHandler},
    Configuration, ConnectionDriver, Packet, PacketDescriptor, PacketRegistry,
};

/// Lifecycle of a connection. Transitions only go forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Sending and receiving
    Open,
    /// The transport failed; pending requests have been failed and the receive
    /// loop is shutting down
    Closing,
    /// Done. The transport is released.
    Closed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }

    fn as_u8(&self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Closing => 1,
            Self::Closed => 2,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ConnectionState::Open => "open",
                ConnectionState::Closing => "closing",
                ConnectionState::Closed => "closed",
            }
        )
    }
}

/// An encoded frame waiting for the connection driver to write it.
pub(crate) struct OutboundFrame {
    pub bytes: Bytes,
    pub written: oneshot::Sender<std::io::Result<()>>,
}

/// A packet connection over one byte-stream transport.
///
/// This is a handle: clone it freely. Sends from any number of tasks are queued
/// as whole frames; the [`ConnectionDriver`] owns the transport and writes them
/// one at a time while it runs the receive loop. A send that is cancelled after
/// its frame was queued still puts the whole frame on the wire.
///
/// Replies are correlated by token. A request's handler is recorded before the
/// request is queued, is called at most once, and is called with
/// `ConnectionClosed` if the connection closes first.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

struct Shared {
    registry: Arc<PacketRegistry>,
    configuration: Configuration,
    outbound: mpsc::Sender<OutboundFrame>,
    pending: Arc<PendingRequests>,
    state: AtomicU8,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

impl Connection {
    /// Wrap a transport. Run the returned driver to send and receive packets;
    /// nothing is written or dispatched until it runs.
    pub fn new<Transport>(
        transport: Transport,
        registry: Arc<PacketRegistry>,
        configuration: Configuration,
    ) -> (Self, ConnectionDriver)
    where
        Transport: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(transport);
        let (outbound, outbound_queue) = mpsc::channel(configuration.outbound_queue_limit());
        let connection = Self {
            shared: Arc::new(Shared {
                registry,
                configuration,
                outbound,
                pending: Default::default(),
                state: AtomicU8::new(ConnectionState::Open.as_u8()),
                shutdown: CancellationToken::new(),
            }),
        };
        let driver = ConnectionDriver::new(
            connection.clone(),
            Box::new(reader),
            Box::new(writer),
            outbound_queue,
        );
        (connection, driver)
    }

    /// Wrap a transport and spawn its driver on the current runtime.
    pub fn spawn<Transport>(
        transport: Transport,
        registry: Arc<PacketRegistry>,
        configuration: Configuration,
    ) -> Self
    where
        Transport: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (connection, driver) = Self::new(transport, registry, configuration);
        tokio::spawn(driver.run());
        connection
    }

    /// Where the connection is in its lifecycle.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// True until the transport fails or the connection is closed.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// The packet types this connection encodes and decodes.
    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.shared.registry
    }

    /// The configuration the connection was created with.
    pub fn configuration(&self) -> &Configuration {
        &self.shared.configuration
    }

    /// Requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Send a packet without asking for a response.
    ///
    /// Returns once the frame is written to the transport.
    pub async fn send(&self, packet: &Packet) -> crate::Result<()> {
        let (descriptor, payload) = self.prepare(packet)?;
        self.write_frame(&descriptor, Correlation::None, payload, None)
            .await
    }

    /// Send a packet as a request. `on_response` is called from the receive loop
    /// with the matching reply, exactly once, instead of the reply type's default
    /// receive behavior. Keep it short: the receive loop waits for it.
    pub async fn send_with_response(
        &self,
        packet: &Packet,
        on_response: impl FnOnce(crate::Result<Packet>) + Send + 'static,
    ) -> crate::Result<()> {
        let (descriptor, payload) = self.prepare(packet)?;
        let token = self.shared.pending.register(Box::new(on_response))?;
        // forgets the request if this future is dropped before the frame is written
        let mut registration = CompletionGuard::new(token, self.shared.pending.clone());
        log::trace!("{token} sending {} request", descriptor.alias());
        self.write_frame(&descriptor, Correlation::Request(token), payload, Some(token))
            .await?;
        registration.set_closed();
        Ok(())
    }

    /// Send a packet as a request and get a future for the reply.
    ///
    /// The request is sent when this returns. Drop the completion to stop waiting.
    #[must_use = "You must await the completion to get the response. If you drop the completion, the response is not waited for."]
    pub async fn request(&self, packet: &Packet) -> crate::Result<ResponseCompletion> {
        let (descriptor, payload) = self.prepare(packet)?;
        let (completor, completion) = oneshot::channel();
        let token = self
            .shared
            .pending
            .register(Box::new(move |response: crate::Result<Packet>| {
                if completor.send(response).is_err() {
                    log::debug!("completion dropped - did the caller lose interest in this request?");
                }
            }))?;
        let completion_guard = CompletionGuard::new(token, self.shared.pending.clone());
        self.write_frame(&descriptor, Correlation::Request(token), payload, Some(token))
            .await?;
        Ok(ResponseCompletion::new(completion, completion_guard))
    }

    /// Send a request and wait at most `timeout` for the reply. An unanswered
    /// request is forgotten and fails with `ResponseTimeout`.
    pub async fn request_timeout(
        &self,
        packet: &Packet,
        timeout: Duration,
    ) -> crate::Result<Packet> {
        let completion = self.request(packet).await?;
        let token = completion.token();
        match tokio::time::timeout(timeout, completion).await {
            Ok(response) => response,
            Err(_elapsed) => {
                log::debug!("{token} no response within {timeout:?}");
                Err(crate::Error::ResponseTimeout(timeout))
            }
        }
    }

    /// Send `reply` as the response to `original`, a packet received on this
    /// connection as a request.
    pub async fn respond(&self, original: &Packet, reply: &Packet) -> crate::Result<()> {
        match original.request_token() {
            Some(token) => self.send_response(token, reply).await,
            None => Err(crate::Error::NotARequest(original.alias().to_string())),
        }
    }

    pub(crate) async fn send_response(&self, token: u64, reply: &Packet) -> crate::Result<()> {
        let (descriptor, payload) = self.prepare(reply)?;
        log::trace!("{token} responding with {}", descriptor.alias());
        self.write_frame(&descriptor, Correlation::Response(token), payload, None)
            .await
    }

    /// Close the connection: stop the driver, fail pending requests with
    /// `ConnectionClosed` and refuse further sends. The driver shuts the
    /// transport down as it exits. Closing twice does nothing.
    pub fn close(&self) {
        let previous = ConnectionState::from_u8(
            self.shared
                .state
                .swap(ConnectionState::Closed.as_u8(), Ordering::AcqRel),
        );
        if previous == ConnectionState::Closed {
            return;
        }
        log::debug!("closing connection from {previous}");
        self.shared.shutdown.cancel();
        self.shared.pending.fail_all();
        self.shared.configuration.connection_observer().on_close();
    }

    pub(crate) fn shutdown_signal(&self) -> &CancellationToken {
        &self.shared.shutdown
    }

    pub(crate) fn take_pending(&self, token: u64) -> Option<ResponseHandler> {
        self.shared.pending.take(token)
    }

    /// The transport is broken: fail what is pending and let the driver finish
    /// closing.
    pub(crate) fn begin_closing(&self) {
        if self
            .shared
            .state
            .compare_exchange(
                ConnectionState::Open.as_u8(),
                ConnectionState::Closing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            log::debug!("connection is closing after a transport failure");
            self.shared.pending.fail_all();
            self.shared.shutdown.cancel();
        }
    }

    /// Resolve and encode, before anything is registered or queued.
    fn prepare(&self, packet: &Packet) -> crate::Result<(Arc<PacketDescriptor>, Vec<u8>)> {
        if !self.is_open() {
            return Err(crate::Error::ConnectionClosed);
        }
        let descriptor = self.shared.registry.resolve(packet.alias())?;
        let payload = codec::encode(&descriptor, packet)?;
        let max = self.shared.configuration.payload_limit();
        if max < payload.len() {
            log::error!(
                "tried to send too large a packet. Max {max}, attempted: {}",
                payload.len()
            );
            return Err(crate::Error::FrameTooLarge {
                length: payload.len(),
                max,
            });
        }
        Ok((descriptor, payload))
    }

    /// Queue a whole frame for the driver and wait until it is written.
    /// `request_token` is forgotten without calling its handler if the frame is
    /// not written.
    async fn write_frame(
        &self,
        descriptor: &PacketDescriptor,
        correlation: Correlation,
        payload: Vec<u8>,
        request_token: Option<u64>,
    ) -> crate::Result<()> {
        let frame = match Frame::new(descriptor.group(), descriptor.alias(), correlation, payload)
        {
            Ok(frame) => frame,
            Err(e) => {
                self.forget(request_token);
                return Err(e);
            }
        };
        let (written, completion) = oneshot::channel();
        let outbound = OutboundFrame {
            bytes: frame.to_bytes(),
            written,
        };
        if self.shared.outbound.send(outbound).await.is_err() {
            self.forget(request_token);
            return Err(crate::Error::ConnectionClosed);
        }
        match completion.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.forget(request_token);
                Err(crate::Error::SendError(Arc::new(e)))
            }
            Err(_dropped) => {
                self.forget(request_token);
                Err(crate::Error::ConnectionClosed)
            }
        }
    }

    fn forget(&self, request_token: Option<u64>) {
        if let Some(token) = request_token {
            self.shared.pending.deregister(token);
        }
    }
}
