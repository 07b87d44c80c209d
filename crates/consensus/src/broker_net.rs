//! Broker server and client over WebSocket
//!
//! `--mode broker` runs a [`BrokerServer`] in front of an in-memory log;
//! replicated orderers connect to it with [`RemoteBroker`]. Frames are
//! borsh-encoded [`BrokerRequest`] / [`BrokerResponse`] values.

use crate::broker::{LogBroker, LogConsumer, LogRecord, PartitionId};
use crate::error::BrokerError;
use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_async, connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum BrokerRequest {
    Produce { partition: PartitionId, payload: Vec<u8> },
    HighWatermark { partition: PartitionId },
    /// Turns the connection into a record stream starting at `offset`
    Subscribe { partition: PartitionId, offset: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum BrokerResponse {
    Produced { offset: u64 },
    HighWatermark { offset: u64 },
    Subscribed,
    Record(LogRecord),
    Error(BrokerError),
}

impl BrokerRequest {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("BrokerRequest serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

impl BrokerResponse {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("BrokerResponse serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// Serves a [`LogBroker`] to remote orderers
pub struct BrokerServer {
    broker: Arc<dyn LogBroker>,
}

impl BrokerServer {
    pub fn new(broker: Arc<dyn LogBroker>) -> Self {
        Self { broker }
    }

    /// Start listening. Returns the bound address.
    pub async fn start(&self, addr: &str) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        tracing::info!("Broker server listening on {}", local);

        let broker = self.broker.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        tracing::debug!("Broker client connected from {}", peer_addr);
                        let broker = broker.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, broker).await {
                                tracing::warn!("Broker connection error: {}", e);
                            }
                            tracing::debug!("Broker client {} disconnected", peer_addr);
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        });

        Ok(local)
    }
}

async fn handle_connection(stream: TcpStream, broker: Arc<dyn LogBroker>) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    while let Some(msg) = ws_receiver.next().await {
        let data = match msg? {
            Message::Binary(data) => data,
            Message::Close(_) => break,
            _ => continue,
        };

        let request = match BrokerRequest::from_bytes(&data) {
            Ok(request) => request,
            Err(e) => {
                let response = BrokerResponse::Error(BrokerError::Protocol(e.to_string()));
                ws_sender.send(Message::Binary(response.to_bytes())).await?;
                continue;
            }
        };

        let response = match request {
            BrokerRequest::Produce { partition, payload } => {
                match broker.produce(&partition, payload).await {
                    Ok(offset) => BrokerResponse::Produced { offset },
                    Err(e) => BrokerResponse::Error(e),
                }
            }
            BrokerRequest::HighWatermark { partition } => {
                match broker.high_watermark(&partition).await {
                    Ok(offset) => BrokerResponse::HighWatermark { offset },
                    Err(e) => BrokerResponse::Error(e),
                }
            }
            BrokerRequest::Subscribe { partition, offset } => {
                let mut consumer = match broker.consume(&partition, offset).await {
                    Ok(consumer) => consumer,
                    Err(e) => {
                        ws_sender.send(Message::Binary(BrokerResponse::Error(e).to_bytes())).await?;
                        continue;
                    }
                };
                ws_sender.send(Message::Binary(BrokerResponse::Subscribed.to_bytes())).await?;
                tracing::info!("Streaming {} from offset {}", partition, offset);

                loop {
                    tokio::select! {
                        record = consumer.recv() => {
                            let response = match record {
                                Ok(record) => BrokerResponse::Record(record),
                                Err(e) => {
                                    ws_sender.send(Message::Binary(BrokerResponse::Error(e).to_bytes())).await?;
                                    return Ok(());
                                }
                            };
                            ws_sender.send(Message::Binary(response.to_bytes())).await?;
                        }
                        msg = ws_receiver.next() => match msg {
                            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return Ok(()),
                            Some(Ok(_)) => {}
                        },
                    }
                }
            }
        };

        ws_sender.send(Message::Binary(response.to_bytes())).await?;
    }

    Ok(())
}

/// [`LogBroker`] backed by a remote [`BrokerServer`].
///
/// Requests share one connection that is re-opened after a failure;
/// each consumer gets its own connection.
pub struct RemoteBroker {
    url: String,
    conn: tokio::sync::Mutex<Option<ClientStream>>,
}

impl RemoteBroker {
    pub fn new(broker_addr: &str) -> Self {
        Self {
            url: format!("ws://{}", broker_addr),
            conn: tokio::sync::Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<ClientStream, BrokerError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(ws_stream)
    }

    async fn request(&self, request: BrokerRequest) -> Result<BrokerResponse, BrokerError> {
        let mut conn = self.conn.lock().await;
        let mut stream = match conn.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        // A failed connection is dropped so the next request reconnects
        let result = roundtrip(&mut stream, &request).await;
        if result.is_ok() {
            *conn = Some(stream);
        }
        result
    }
}

async fn roundtrip(
    stream: &mut ClientStream,
    request: &BrokerRequest,
) -> Result<BrokerResponse, BrokerError> {
    stream
        .send(Message::Binary(request.to_bytes()))
        .await
        .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
    read_response(stream).await
}

async fn read_response(stream: &mut ClientStream) -> Result<BrokerResponse, BrokerError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Binary(data))) => {
                return BrokerResponse::from_bytes(&data)
                    .map_err(|e| BrokerError::Protocol(e.to_string()));
            }
            Some(Ok(Message::Close(_))) | None => return Err(BrokerError::Disconnected),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(BrokerError::Unavailable(e.to_string())),
        }
    }
}

fn unexpected(response: BrokerResponse) -> BrokerError {
    match response {
        BrokerResponse::Error(e) => e,
        other => BrokerError::Protocol(format!("unexpected response {:?}", other)),
    }
}

#[async_trait]
impl LogBroker for RemoteBroker {
    async fn produce(&self, partition: &PartitionId, payload: Vec<u8>) -> Result<u64, BrokerError> {
        let request = BrokerRequest::Produce {
            partition: partition.clone(),
            payload,
        };
        match self.request(request).await? {
            BrokerResponse::Produced { offset } => Ok(offset),
            other => Err(unexpected(other)),
        }
    }

    async fn consume(
        &self,
        partition: &PartitionId,
        offset: u64,
    ) -> Result<Box<dyn LogConsumer>, BrokerError> {
        let mut stream = self.connect().await?;
        let request = BrokerRequest::Subscribe {
            partition: partition.clone(),
            offset,
        };
        match roundtrip(&mut stream, &request).await? {
            BrokerResponse::Subscribed => Ok(Box::new(RemoteConsumer { stream })),
            other => Err(unexpected(other)),
        }
    }

    async fn high_watermark(&self, partition: &PartitionId) -> Result<u64, BrokerError> {
        let request = BrokerRequest::HighWatermark {
            partition: partition.clone(),
        };
        match self.request(request).await? {
            BrokerResponse::HighWatermark { offset } => Ok(offset),
            other => Err(unexpected(other)),
        }
    }
}

struct RemoteConsumer {
    stream: ClientStream,
}

#[async_trait]
impl LogConsumer for RemoteConsumer {
    async fn recv(&mut self) -> Result<LogRecord, BrokerError> {
        match read_response(&mut self.stream).await? {
            BrokerResponse::Record(record) => Ok(record),
            BrokerResponse::Error(BrokerError::Unavailable(_)) => Err(BrokerError::Disconnected),
            other => Err(unexpected(other)),
        }
    }
}
