use super::protocol::{self, op, Frame, Hello, MixerEvent, RequestResponse};
use crate::config::MixerConfig;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>>;

/// obs-websocket close code for a rejected authentication string.
const CLOSE_AUTHENTICATION_FAILED: u16 = 4009;

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Event(MixerEvent),
    Closed(Option<String>),
}

/// An identified RPC connection to the mixer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MixerLink: Send + Sync {
    async fn call(&self, request_type: &str, data: Value) -> Result<Value>;
    async fn close(&self);
}

/// Opens links; push events and the final close go to `events`.
#[async_trait]
pub trait MixerConnector: Send + Sync {
    async fn open(
        &self,
        config: &MixerConfig,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn MixerLink>>;
}

pub struct WsConnector {
    request_timeout: Duration,
}

impl WsConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl MixerConnector for WsConnector {
    async fn open(
        &self,
        config: &MixerConfig,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn MixerLink>> {
        let url = config.url();
        tracing::debug!(%url, "opening mixer websocket");
        let (mut stream, _) = tokio::time::timeout(
            self.request_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        .map_err(|_| SyncError::Timeout {
            operation: "mixer connect".to_string(),
            millis: self.request_timeout.as_millis() as u64,
        })?
        .map_err(|err| SyncError::Connection(format!("mixer {url}: {err}")))?;
        identify(&mut stream, &config.password).await?;
        Ok(Arc::new(WsLink::spawn(stream, events, self.request_timeout)))
    }
}

async fn identify(stream: &mut WsStream, password: &str) -> Result<()> {
    let hello = next_frame(stream).await?;
    if hello.op != op::HELLO {
        return Err(SyncError::protocol(format!("expected Hello, got op {}", hello.op)));
    }
    let hello: Hello = serde_json::from_value(hello.d)?;
    tracing::debug!(
        version = hello.obs_web_socket_version.as_deref().unwrap_or("-"),
        rpc_version = hello.rpc_version,
        "mixer hello"
    );
    let authentication = hello
        .authentication
        .map(|challenge| protocol::auth_string(password, &challenge.salt, &challenge.challenge));
    stream
        .send(Message::Text(protocol::identify(authentication).to_string()))
        .await
        .map_err(SyncError::connection)?;
    let identified = next_frame(stream).await?;
    if identified.op != op::IDENTIFIED {
        return Err(SyncError::protocol(format!(
            "expected Identified, got op {}",
            identified.op
        )));
    }
    Ok(())
}

async fn next_frame(stream: &mut WsStream) -> Result<Frame> {
    while let Some(message) = stream.next().await {
        match message.map_err(SyncError::connection)? {
            Message::Text(text) => return Frame::parse(&text),
            Message::Close(frame) => return Err(close_error(frame)),
            _ => continue,
        }
    }
    Err(SyncError::Connection("mixer closed the connection".to_string()))
}

fn close_error(frame: Option<CloseFrame<'_>>) -> SyncError {
    match frame {
        Some(frame) if u16::from(frame.code) == CLOSE_AUTHENTICATION_FAILED => {
            SyncError::Auth("mixer".to_string())
        }
        Some(frame) => {
            SyncError::Connection(format!("mixer closed the connection: {}", frame.reason))
        }
        None => SyncError::Connection("mixer closed the connection".to_string()),
    }
}

pub struct WsLink {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    request_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WsLink {
    fn spawn(
        stream: WsStream,
        events: mpsc::UnboundedSender<LinkEvent>,
        request_timeout: Duration,
    ) -> Self {
        let (sink, source) = stream.split();
        let (outgoing, queue) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let writer = tokio::spawn(write_loop(sink, queue));
        let reader = tokio::spawn(read_loop(source, pending.clone(), events));
        Self {
            outgoing,
            pending,
            request_timeout,
            reader,
            writer,
        }
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[async_trait]
impl MixerLink for WsLink {
    async fn call(&self, request_type: &str, data: Value) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        let (reply, response) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), reply);
        tracing::debug!(request_type, %request_id, "mixer request");
        let frame = protocol::request(request_type, &request_id, data);
        if self.outgoing.send(Message::Text(frame.to_string())).is_err() {
            self.pending.lock().await.remove(&request_id);
            return Err(SyncError::NotConnected);
        }
        match tokio::time::timeout(self.request_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SyncError::NotConnected),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(SyncError::Timeout {
                    operation: request_type.to_string(),
                    millis: self.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn close(&self) {
        let _ = self.outgoing.send(Message::Close(None));
        self.reader.abort();
        self.pending.lock().await.clear();
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut queue: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = queue.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(err) = sink.send(message).await {
            tracing::debug!(error = %err, "mixer write failed");
            break;
        }
        if closing {
            break;
        }
    }
}

async fn read_loop(
    mut source: SplitStream<WsStream>,
    pending: Pending,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let reason = loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => match Frame::parse(&text) {
                Ok(frame) => dispatch(frame, &pending, &events).await,
                Err(err) => tracing::warn!(error = %err, "unreadable mixer frame"),
            },
            Some(Ok(Message::Close(frame))) => break frame.map(|frame| frame.reason.to_string()),
            Some(Ok(_)) => {}
            Some(Err(err)) => break Some(err.to_string()),
            None => break None,
        }
    };
    // Dropping the reply senders fails the waiting calls.
    pending.lock().await.clear();
    let _ = events.send(LinkEvent::Closed(reason));
}

async fn dispatch(frame: Frame, pending: &Pending, events: &mpsc::UnboundedSender<LinkEvent>) {
    match frame.op {
        op::REQUEST_RESPONSE => match serde_json::from_value::<RequestResponse>(frame.d) {
            Ok(response) => {
                let waiter = pending.lock().await.remove(&response.request_id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(response.into_result());
                    }
                    None => tracing::debug!(request_id = %response.request_id, "late mixer response"),
                }
            }
            Err(err) => tracing::warn!(error = %err, "unreadable mixer response"),
        },
        op::EVENT => match protocol::parse_event(frame.d) {
            Ok(Some(event)) => {
                let _ = events.send(LinkEvent::Event(event));
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "unreadable mixer event"),
        },
        other => tracing::debug!(op = other, "ignored mixer frame"),
    }
}
