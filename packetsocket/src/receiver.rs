use futures::future::BoxFuture;

use crate::{Connection, Packet};

/// The default receive behavior of a packet type.
///
/// A receiver is called from the connection's receive loop for every inbound
/// packet of its type that is not a reply to a local request. Packets are handled
/// one at a time: the loop awaits the returned future before reading the next
/// frame, so slow work should be spawned rather than awaited here.
///
/// Any `async` closure taking `(Packet, DispatchContext)` is a receiver.
pub trait PacketReceiver: Send + Sync + 'static {
    /// Handle one inbound packet.
    fn on_recv(&self, packet: Packet, context: DispatchContext) -> BoxFuture<'static, ()>;
}

impl<F, Fut> PacketReceiver for F
where
    F: Fn(Packet, DispatchContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    fn on_recv(&self, packet: Packet, context: DispatchContext) -> BoxFuture<'static, ()> {
        Box::pin(self(packet, context))
    }
}

/// Where an inbound packet came from, and how to answer it.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    connection: Connection,
    request_token: Option<u64>,
}

impl DispatchContext {
    pub(crate) fn new(connection: Connection, request_token: Option<u64>) -> Self {
        Self {
            connection,
            request_token,
        }
    }

    /// The connection the packet arrived on.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The peer's correlation token, when the packet was sent as a request.
    pub fn request_token(&self) -> Option<u64> {
        self.request_token
    }

    /// Send `reply` as the response to the packet being handled.
    ///
    /// Fails with `NotARequest` when the peer did not ask for a response.
    pub async fn respond(&self, reply: &Packet) -> crate::Result<()> {
        match self.request_token {
            Some(token) => self.connection.send_response(token, reply).await,
            None => Err(crate::Error::NotARequest(reply.alias().to_string())),
        }
    }
}
