//! Per-connection tasks.
//!
//! A session performs the handshake, then forwards every call the client
//! sends to the tick loop and writes whatever the tick loop queues for it.
//! Sessions never touch the simulation directly.

use std::time::Duration;

use forge_core::remote::{ConnectionId, RemoteMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};
use crate::frame::{read_frame, write_frame, Frame};
use crate::handshake::Handshake;

/// How long a new connection has to send its hello.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Notifications from sessions to the tick loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// Handshake passed. Frames sent on `outbound` go to the client.
    Joined {
        /// New peer.
        connection: ConnectionId,
        /// Writer queue for this peer.
        outbound: mpsc::UnboundedSender<Frame>,
    },
    /// The client sent a remote call.
    Message {
        /// Sender.
        connection: ConnectionId,
        /// Decoded call.
        message: RemoteMessage,
    },
    /// The connection closed or misbehaved.
    Left {
        /// Departed peer.
        connection: ConnectionId,
    },
}

/// Drive one client connection to completion.
///
/// Errors end the session; they are logged, and the tick loop is told the
/// client left if it had joined.
pub async fn run_session(
    stream: TcpStream,
    connection: ConnectionId,
    handshake: Handshake,
    events: mpsc::Sender<SessionEvent>,
) {
    let peer = stream
        .peer_addr()
        .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());
    match serve(stream, connection, &handshake, &events).await {
        Ok(()) => info!(connection = connection.0, %peer, "Client disconnected"),
        Err(e) => warn!(connection = connection.0, %peer, error = %e, "Session ended"),
    }
}

async fn serve(
    stream: TcpStream,
    connection: ConnectionId,
    handshake: &Handshake,
    events: &mpsc::Sender<SessionEvent>,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let hello = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame(&mut reader))
        .await
        .map_err(|_| ServerError::HandshakeTimeout)??;
    let verified = match hello {
        Some(Frame::Hello {
            version,
            fingerprint,
        }) => handshake.verify(&version, fingerprint).map_err(ServerError::from),
        Some(other) => Err(ServerError::UnexpectedFrame {
            expected: "hello",
            got: other.name(),
        }),
        None => return Ok(()),
    };
    if let Err(e) = verified {
        write_frame(&mut writer, &Frame::Reject { reason: e.to_string() }).await?;
        return Err(e);
    }

    let (outbound, mut queue) = mpsc::unbounded_channel();
    if events
        .send(SessionEvent::Joined {
            connection,
            outbound,
        })
        .await
        .is_err()
    {
        // Tick loop is gone; nothing to serve.
        return Ok(());
    }

    let write_task = tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            let last = matches!(frame, Frame::Reject { .. });
            write_frame(&mut writer, &frame).await?;
            if last {
                break;
            }
        }
        Ok::<(), ServerError>(())
    });

    let result = read_calls(&mut reader, connection, events).await;
    // The tick loop drops its sender on leave, which ends the writer.
    let _ = events.send(SessionEvent::Left { connection }).await;
    match write_task.await {
        Ok(Err(e)) => debug!(connection = connection.0, error = %e, "Writer stopped"),
        Err(e) => debug!(connection = connection.0, error = %e, "Writer task failed"),
        Ok(Ok(())) => {}
    }
    result
}

async fn read_calls(
    reader: &mut tokio::net::tcp::OwnedReadHalf,
    connection: ConnectionId,
    events: &mpsc::Sender<SessionEvent>,
) -> Result<()> {
    loop {
        match read_frame(reader).await? {
            None => return Ok(()),
            Some(Frame::Call(message)) => {
                let event = SessionEvent::Message {
                    connection,
                    message,
                };
                if events.send(event).await.is_err() {
                    return Ok(());
                }
            }
            Some(other) => {
                return Err(ServerError::UnexpectedFrame {
                    expected: "call",
                    got: other.name(),
                })
            }
        }
    }
}
