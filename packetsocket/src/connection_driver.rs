use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

use crate::{
    codec,
    connection::OutboundFrame,
    frame::{self, Correlation},
    Connection, DispatchContext,
};

type Reader = Box<dyn AsyncRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// To be spawned, this is the task that owns a [`Connection`]'s transport.
///
/// It writes queued frames one whole frame at a time, and it runs the receive
/// loop: one frame at a time, filtered by group, decoded and handed to the
/// waiting request or to its type's default receiver. The connection is closed
/// and the transport shut down when it ends.
pub struct ConnectionDriver {
    connection: Connection,
    reader: Reader,
    writer: Writer,
    outbound: mpsc::Receiver<OutboundFrame>,
}

impl std::fmt::Debug for ConnectionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDriver")
            .field("connection", &self.connection)
            .field("queued", &self.outbound.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionDriver {
    pub(crate) fn new(
        connection: Connection,
        reader: Reader,
        writer: Writer,
        outbound: mpsc::Receiver<OutboundFrame>,
    ) -> Self {
        Self {
            connection,
            reader,
            writer,
            outbound,
        }
    }

    /// Drive the connection until it closes.
    pub async fn run(self) {
        let Self {
            connection,
            reader,
            writer,
            outbound,
        } = self;
        tokio::join!(
            async {
                receive(&connection, reader).await;
                // stops the writer too
                connection.shutdown_signal().cancel();
            },
            send_outbound(&connection, writer, outbound),
        );
        connection.close();
    }
}

async fn send_outbound(
    connection: &Connection,
    mut writer: Writer,
    mut outbound: mpsc::Receiver<OutboundFrame>,
) {
    let shutdown = connection.shutdown_signal();
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let result = tokio::select! {
            result = async {
                writer.write_all(&frame.bytes).await?;
                writer.flush().await
            } => result,
            _ = shutdown.cancelled() => {
                log::debug!("write abandoned: connection is closing");
                break;
            }
        };
        match result {
            Ok(()) => {
                log::trace!("wrote frame: {}b", frame.bytes.len());
                // the sender may have stopped waiting
                let _ = frame.written.send(Ok(()));
            }
            Err(e) => {
                log::warn!("error while writing to transport: {e:?}");
                connection.begin_closing();
                let _ = frame.written.send(Err(e));
                break;
            }
        }
    }
    // whatever is still queued fails with ConnectionClosed
    outbound.close();
    if let Err(e) = writer.shutdown().await {
        log::debug!("transport shutdown failed: {e:?}");
    }
}

async fn receive(connection: &Connection, mut reader: Reader) {
    let shutdown = connection.shutdown_signal();
    let configuration = connection.configuration();
    let max_payload_length = configuration.payload_limit();
    let mut consecutive_errors = 0;
    loop {
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                log::debug!("receive loop stopped");
                break;
            }
            result = async {
                let frame = frame::read_frame(&mut reader, max_payload_length).await?;
                dispatch(connection, frame).await
            } => result,
        };
        match result {
            Ok(()) => {
                consecutive_errors = 0;
            }
            Err(crate::Error::ConnectionClosed) => {
                log::info!("connection closed by peer");
                break;
            }
            Err(e) if e.is_fatal() => {
                log::error!("dropping connection: {e}");
                configuration.connection_observer().on_frame_error(&e);
                break;
            }
            Err(e) => {
                log::warn!("could not dispatch frame: {e}");
                configuration.connection_observer().on_frame_error(&e);
                consecutive_errors += 1;
                if configuration.frame_error_limit() < consecutive_errors {
                    log::error!("dropping connection after {consecutive_errors} frame errors in a row");
                    break;
                }
            }
        }
    }
}

async fn dispatch(connection: &Connection, frame: frame::Frame) -> crate::Result<()> {
    let configuration = connection.configuration();
    if !configuration.accepts_group(frame.group()) {
        log::debug!(
            "dropping {}/{}: group is not accepted",
            frame.group(),
            frame.alias()
        );
        configuration
            .connection_observer()
            .on_dropped_frame(frame.group(), frame.alias());
        return Ok(());
    }

    let descriptor = connection.registry().resolve(frame.alias())?;
    if descriptor.group() != frame.group() {
        return Err(crate::Error::InvalidFrame(format!(
            "{} belongs to group {:?}, the frame says {:?}",
            frame.alias(),
            descriptor.group(),
            frame.group()
        )));
    }
    let mut packet = codec::decode(&descriptor, frame.payload())?;

    let request_token = match frame.correlation() {
        Correlation::None => None,
        Correlation::Request(token) => Some(token),
        Correlation::Response(token) => {
            if let Some(on_response) = connection.take_pending(token) {
                log::trace!("{token} completing request with {}", packet.alias());
                on_response(Ok(packet));
                return Ok(());
            }
            log::debug!(
                "{token} response {} matches no pending request",
                packet.alias()
            );
            None
        }
    };
    packet.set_request_token(request_token);

    match descriptor.receiver() {
        Some(receiver) => {
            receiver
                .on_recv(
                    packet,
                    DispatchContext::new(connection.clone(), request_token),
                )
                .await;
        }
        None => {
            log::debug!("no receiver for {}, discarding", descriptor.alias());
        }
    }
    Ok(())
}
