use std::{future::Future, io, net::SocketAddr};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    net::{TcpListener, TcpStream},
    select,
    sync::broadcast,
};
use tracing::{debug, info, warn};

use crate::{
    hub::{ConnectionId, HubHandle, Subscription},
    message::{ClientEvent, FrameReader, ServerEvent, write_message},
};

/// Newline-delimited JSON listener in front of a hub.
pub struct Server {
    listener: TcpListener,
    hub: HubHandle,
}

impl Server {
    pub fn new(listener: TcpListener, hub: HubHandle) -> Self {
        Self { listener, hub }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Connections that are already open keep running until the hub stops.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, hub } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("line listener shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &hub);
                }
            }
        }

        Ok(())
    }
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, hub: &HubHandle) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, hub),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(stream: TcpStream, peer: SocketAddr, hub: &HubHandle) {
    let hub = hub.clone();
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, hub).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, hub: HubHandle) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut frames = FrameReader::new(BufReader::new(reader));

    let mut subscription = hub.connect().await?;
    let id = subscription.id;
    debug!(connection = id, %peer, "line client accepted");

    let result = run_client_session(&hub, &mut subscription, &mut frames, &mut writer).await;
    hub.disconnect(id);
    result
}

/// Drives one client: greeting first, then inbound frames and broadcasts interleaved.
pub async fn run_client_session<R, W>(
    hub: &HubHandle,
    subscription: &mut Subscription,
    frames: &mut FrameReader<R>,
    writer: &mut W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    for frame in subscription.greeting() {
        write_message(writer, &frame).await?;
    }

    let id = subscription.id;
    loop {
        select! {
            client_message = frames.next_frame::<ClientEvent>() => {
                if !handle_client_message(client_message, hub, id)? {
                    break;
                }
            }
            broadcast_message = subscription.events.recv() => {
                if !handle_broadcast_message(broadcast_message, writer, hub, id).await? {
                    break;
                }
            }
        }
    }

    Ok(())
}

fn handle_client_message(
    message: io::Result<Option<ClientEvent>>,
    hub: &HubHandle,
    id: ConnectionId,
) -> Result<bool> {
    match message {
        Ok(Some(event)) => {
            hub.dispatch(event)?;
            Ok(true)
        }
        Ok(None) => Ok(false),
        Err(err) if err.kind() == io::ErrorKind::InvalidData => {
            warn!(connection = id, error = %err, "dropping malformed frame");
            Ok(true)
        }
        Err(err) => Err(err.into()),
    }
}

async fn handle_broadcast_message<W>(
    message: Result<ServerEvent, broadcast::error::RecvError>,
    writer: &mut W,
    hub: &HubHandle,
    id: ConnectionId,
) -> Result<bool>
where
    W: AsyncWrite + Unpin,
{
    match message {
        Ok(event) => {
            if let Err(err) = write_message(writer, &event).await {
                debug!(connection = id, ?err, "failed to deliver event to client");
                return Ok(false);
            }
            Ok(true)
        }
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(connection = id, skipped, "client lagged; resending state");
            let snapshot = hub.snapshot().await?;
            if let Err(err) = write_message(writer, &ServerEvent::StateUpdate(snapshot)).await {
                debug!(connection = id, ?err, "failed to resynchronise client");
                return Ok(false);
            }
            Ok(true)
        }
        Err(broadcast::error::RecvError::Closed) => Ok(false),
    }
}
