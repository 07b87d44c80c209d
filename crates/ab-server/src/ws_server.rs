//! WebSocket Server
//!
//! One listener serves both RPCs; the request path picks the stream:
//! `/broadcast` or `/deliver`. Every frame is a borsh-encoded binary message.

use crate::{
    broadcast::BroadcastHandler,
    deliver::{DeliverEvent, DeliverSession},
    AbContext,
};
use futures::{SinkExt, StreamExt};
use orderer_types::{BroadcastResponse, DeliverResponse, DeliverUpdate, Status};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{Request, Response},
        Message,
    },
};

/// Broadcast / Deliver server
pub struct AbServer {
    context: Arc<AbContext>,
}

impl AbServer {
    pub fn new(context: Arc<AbContext>) -> Self {
        Self { context }
    }

    /// Bind the listener. Returns the bound address and the accept loop.
    pub async fn bind(
        self,
        addr: &str,
    ) -> anyhow::Result<(SocketAddr, impl std::future::Future<Output = ()>)> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        tracing::info!("Atomic broadcast server listening on {}", local);

        let context = self.context;
        let serve = async move {
            while let Ok((stream, peer_addr)) = listener.accept().await {
                let ctx = context.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        tracing::warn!("WebSocket connection error from {}: {}", peer_addr, e);
                    }
                });
            }
        };
        Ok((local, serve))
    }

    /// Run the server
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let (_, serve) = self.bind(addr).await?;
        serve.await;
        Ok(())
    }
}

/// Handle a single WebSocket connection
async fn handle_connection(stream: TcpStream, context: Arc<AbContext>) -> anyhow::Result<()> {
    let mut path = String::new();
    let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
        path = req.uri().path().to_string();
        Ok(resp)
    })
    .await?;

    match path.as_str() {
        "/broadcast" => serve_broadcast(ws_stream, context).await,
        "/deliver" => serve_deliver(ws_stream, context).await,
        other => {
            tracing::debug!("Closing connection for unknown path {}", other);
            let (mut ws_sender, _) = ws_stream.split();
            ws_sender.send(Message::Close(None)).await?;
            Ok(())
        }
    }
}

type ServerStream = tokio_tungstenite::WebSocketStream<TcpStream>;

async fn serve_broadcast(ws_stream: ServerStream, context: Arc<AbContext>) -> anyhow::Result<()> {
    let handler = BroadcastHandler::new(context);
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    tracing::debug!("Broadcast stream opened");

    while let Some(msg) = ws_receiver.next().await {
        let data = match msg? {
            Message::Binary(data) => data,
            Message::Close(_) => break,
            _ => continue,
        };

        let response = BroadcastResponse {
            status: handler.handle(&data),
        };
        ws_sender.send(Message::Binary(response.to_bytes())).await?;
    }

    tracing::debug!("Broadcast stream closed");
    Ok(())
}

async fn serve_deliver(ws_stream: ServerStream, context: Arc<AbContext>) -> anyhow::Result<()> {
    let mut session = DeliverSession::new(context.ledger.clone(), context.settings.max_window_size);
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    tracing::debug!("Deliver stream opened");

    loop {
        let sending = session.can_send();

        tokio::select! {
            msg = ws_receiver.next() => {
                let data = match msg {
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                };

                let status = match DeliverUpdate::from_bytes(&data) {
                    Ok(update) => session.update(update),
                    Err(_) => Some(Status::BadRequest),
                };
                if let Some(status) = status {
                    ws_sender
                        .send(Message::Binary(DeliverResponse::Status(status).to_bytes()))
                        .await?;
                }
            }
            event = session.next(), if sending => {
                match event {
                    DeliverEvent::Block(block) => {
                        ws_sender
                            .send(Message::Binary(DeliverResponse::Block(block).to_bytes()))
                            .await?;
                    }
                    DeliverEvent::Status(status) => {
                        ws_sender
                            .send(Message::Binary(DeliverResponse::Status(status).to_bytes()))
                            .await?;
                        if status == Status::ServiceUnavailable {
                            ws_sender.send(Message::Close(None)).await?;
                            break;
                        }
                    }
                }
            }
        }
    }

    // Dropping the session releases the cursor
    tracing::debug!("Deliver stream closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{envelope, genesis, solo_context};
    use crate::ServerConfig;
    use orderer_types::{Block, SeekInfo, SeekPosition};
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    async fn start(context: Arc<AbContext>) -> SocketAddr {
        let (addr, serve) = AbServer::new(context).bind("127.0.0.1:0").await.unwrap();
        tokio::spawn(serve);
        addr
    }

    async fn recv<S>(stream: &mut S) -> Vec<u8>
    where
        S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let Message::Binary(data) = msg {
                return data;
            }
        }
    }

    #[tokio::test]
    async fn test_broadcast_then_deliver() {
        let context = solo_context(
            genesis(),
            ServerConfig {
                max_window_size: 5,
                ..Default::default()
            },
        );
        let addr = start(context).await;

        let (mut deliver, _) = connect_async(format!("ws://{}/deliver", addr)).await.unwrap();
        let seek = DeliverUpdate::Seek(SeekInfo {
            start: SeekPosition::Oldest,
            window_size: 5,
        });
        deliver.send(Message::Binary(seek.to_bytes())).await.unwrap();
        match DeliverResponse::from_bytes(&recv(&mut deliver).await).unwrap() {
            DeliverResponse::Block(block) => assert_eq!(block.number, 0),
            other => panic!("unexpected {:?}", other),
        }

        let (mut broadcast, _) = connect_async(format!("ws://{}/broadcast", addr)).await.unwrap();
        broadcast.send(Message::Binary(envelope(1).to_bytes())).await.unwrap();
        broadcast.send(Message::Binary(vec![0xde, 0xad])).await.unwrap();
        let first = BroadcastResponse::from_bytes(&recv(&mut broadcast).await).unwrap();
        let second = BroadcastResponse::from_bytes(&recv(&mut broadcast).await).unwrap();
        assert_eq!(first.status, Status::Success);
        assert_eq!(second.status, Status::BadRequest);

        // Solo default timeout cuts the single envelope
        let block: Block = match DeliverResponse::from_bytes(&recv(&mut deliver).await).unwrap() {
            DeliverResponse::Block(block) => block,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(block.number, 1);
        assert_eq!(block.transactions, vec![envelope(1).to_bytes()]);
    }

    #[tokio::test]
    async fn test_deliver_rejects_bad_seek() {
        let context = solo_context(genesis(), ServerConfig::default());
        let addr = start(context).await;

        let (mut deliver, _) = connect_async(format!("ws://{}/deliver", addr)).await.unwrap();
        let seek = DeliverUpdate::Seek(SeekInfo {
            start: SeekPosition::Specified(42),
            window_size: 1,
        });
        deliver.send(Message::Binary(seek.to_bytes())).await.unwrap();
        assert_eq!(
            DeliverResponse::from_bytes(&recv(&mut deliver).await).unwrap(),
            DeliverResponse::Status(Status::NotFound)
        );

        deliver.send(Message::Binary(vec![0xff])).await.unwrap();
        assert_eq!(
            DeliverResponse::from_bytes(&recv(&mut deliver).await).unwrap(),
            DeliverResponse::Status(Status::BadRequest)
        );
    }
}
