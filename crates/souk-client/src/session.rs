use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use souk_types::close::{self, DisconnectCause};
use souk_types::events::{ClientCommand, ErrorCode, ServerEvent};
use souk_types::models::{Message, MessageBody};

use crate::dedup::{self, DedupWindow};
use crate::error::ClientError;
use crate::reconnect::{Decision, ReconnectPolicy, ReconnectState};
use crate::typing::{self, TypingTracker};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Sink = SplitSink<Socket, Frame>;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Gateway endpoint, e.g. `ws://127.0.0.1:3000/gateway`.
    pub url: String,
    pub token: String,
    pub heartbeat_interval: Duration,
    /// Bound on the upgrade plus the server's `Ready`.
    pub handshake_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub typing_expiry: Duration,
    pub dedup_capacity: usize,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            heartbeat_interval: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            typing_expiry: typing::DEFAULT_EXPIRY,
            dedup_capacity: dedup::DEFAULT_CAPACITY,
        }
    }
}

/// Everything the session reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connecting,
    Connected { user_id: Uuid, connection_id: Uuid },
    /// `attempt` 0 is the immediate retry after a server-initiated disconnect.
    Reconnecting { attempt: u32 },
    /// Retry budget exhausted.
    Lost,
    /// The gateway refused the credentials. No retry follows.
    Unauthorized { code: u16 },
    /// The session task has ended. Always the last event.
    Closed,

    Message(Message),
    /// Server echo of our own submission, carrying the assigned id.
    Accepted(Message),
    Delivered { message_id: Uuid, receiver_id: Uuid },
    Read { message_id: Uuid, reader_id: Uuid },
    Failed {
        client_nonce: Option<String>,
        receiver_id: Uuid,
        reason: String,
    },

    Online(Uuid),
    Offline { user_id: Uuid, last_active_at: DateTime<Utc> },
    LastActive {
        user_id: Uuid,
        online: bool,
        last_active_at: Option<DateTime<Utc>>,
    },
    TypingStarted(Uuid),
    TypingStopped(Uuid),
    HistoryChanged(Uuid),
    Error { code: ErrorCode, message: String },
}

/// Handle to a reconnecting gateway session.
///
/// A single task owns the socket. Commands issued while disconnected wait
/// in the queue until the next `Ready`; submissions the server has not
/// echoed yet are replayed under the same nonce after a reconnect.
pub struct ChatSession {
    commands: mpsc::UnboundedSender<ClientCommand>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ChatSession {
    pub fn connect(config: SessionConfig) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (typing, typing_expired) = TypingTracker::new(config.typing_expiry);
        let cancel = CancellationToken::new();

        let actor = Actor {
            reconnect: ReconnectState::new(config.reconnect),
            dedup: DedupWindow::new(config.dedup_capacity),
            config,
            commands,
            events,
            cancel: cancel.clone(),
            typing,
            typing_expired,
            unconfirmed: VecDeque::new(),
        };
        let task = tokio::spawn(actor.run());

        let session = Self {
            commands: commands_tx,
            cancel,
            task,
        };
        (session, events_rx)
    }

    /// Queue a message. Returns the nonce that will come back on the
    /// matching `Accepted` or `Failed` event.
    pub fn send_message(&self, receiver_id: Uuid, body: MessageBody) -> Result<String, ClientError> {
        let nonce = Uuid::new_v4().to_string();
        self.command(ClientCommand::SendMessage {
            receiver_id,
            body,
            client_nonce: Some(nonce.clone()),
        })?;
        Ok(nonce)
    }

    pub fn typing(&self, receiver_id: Uuid) -> Result<(), ClientError> {
        self.command(ClientCommand::Typing { receiver_id })
    }

    pub fn ack_delivered(&self, message_id: Uuid) -> Result<(), ClientError> {
        self.command(ClientCommand::AckDelivered { message_id })
    }

    pub fn mark_read(&self, message_ids: Vec<Uuid>) -> Result<(), ClientError> {
        self.command(ClientCommand::MarkRead { message_ids })
    }

    pub fn query_last_active(&self, user_id: Uuid) -> Result<(), ClientError> {
        self.command(ClientCommand::QueryLastActive { user_id })
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    /// Close the socket, drop pending typing timers and wait for the task.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("session task ended abnormally: {}", e);
        }
    }

    fn command(&self, cmd: ClientCommand) -> Result<(), ClientError> {
        self.commands.send(cmd).map_err(|_| ClientError::Closed)
    }
}

enum Ended {
    Shutdown,
    Disconnected {
        cause: DisconnectCause,
        code: Option<u16>,
    },
}

impl Ended {
    fn transport() -> Self {
        Self::Disconnected {
            cause: DisconnectCause::Transport,
            code: None,
        }
    }
}

struct Actor {
    config: SessionConfig,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
    reconnect: ReconnectState,
    dedup: DedupWindow,
    typing: TypingTracker,
    typing_expired: mpsc::UnboundedReceiver<(Uuid, u64)>,
    /// Submissions not yet echoed, keyed by nonce, in submission order.
    unconfirmed: VecDeque<(String, ClientCommand)>,
}

impl Actor {
    async fn run(mut self) {
        self.emit(SessionEvent::Connecting);

        loop {
            let opened = tokio::select! {
                () = self.cancel.cancelled() => break,
                opened = self.open() => opened,
            };
            let ended = match opened {
                Ok(socket) => self.drive(socket).await,
                Err(e) => {
                    debug!("gateway connect failed: {}", e);
                    Ended::transport()
                }
            };

            for peer in self.typing.clear() {
                self.emit(SessionEvent::TypingStopped(peer));
            }

            let (cause, code) = match ended {
                Ended::Shutdown => break,
                Ended::Disconnected { cause, code } => (cause, code),
            };

            match self.reconnect.on_disconnect(cause) {
                Decision::Retry { attempt, delay } => {
                    info!("reconnecting to gateway (attempt {}) in {:?}", attempt, delay);
                    self.emit(SessionEvent::Reconnecting { attempt });
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = time::sleep(delay) => {}
                    }
                }
                Decision::GiveUp => {
                    warn!(
                        "gateway unreachable after {} attempt(s), giving up",
                        self.reconnect.attempts()
                    );
                    self.emit(SessionEvent::Lost);
                    break;
                }
                Decision::Terminal => {
                    let code = code.unwrap_or(close::AUTH_REQUIRED);
                    warn!("gateway rejected credentials (close {})", code);
                    self.emit(SessionEvent::Unauthorized { code });
                    break;
                }
            }
        }

        self.typing.clear();
        self.emit(SessionEvent::Closed);
    }

    async fn open(&self) -> Result<Socket, ClientError> {
        let mut request = self.config.url.as_str().into_client_request()?;
        request.headers_mut().insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.config.token))?,
        );

        let (socket, _) = time::timeout(self.config.handshake_timeout, connect_async(request))
            .await
            .map_err(|_| ClientError::Timeout)??;
        Ok(socket)
    }

    async fn drive(&mut self, socket: Socket) -> Ended {
        let (mut sink, mut stream) = socket.split();

        let handshake = time::sleep(self.config.handshake_timeout);
        tokio::pin!(handshake);
        let mut ready = false;

        let period = self.config.heartbeat_interval;
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut awaiting_ack = false;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = sink.send(Frame::Close(None)).await;
                    return Ended::Shutdown;
                }

                cmd = self.commands.recv(), if ready => {
                    let Some(cmd) = cmd else {
                        // Every handle is gone
                        let _ = sink.send(Frame::Close(None)).await;
                        return Ended::Shutdown;
                    };
                    if let Err(e) = self.submit(&mut sink, cmd).await {
                        warn!("gateway write failed: {}", e);
                        return Ended::transport();
                    }
                }

                frame = stream.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            debug!("gateway read failed: {}", e);
                            return Ended::transport();
                        }
                        None => return Ended::transport(),
                    };

                    match frame {
                        Frame::Text(text) => {
                            let event = match serde_json::from_str::<ServerEvent>(text.as_str()) {
                                Ok(event) => event,
                                Err(e) => {
                                    warn!("unparseable server event: {}", e);
                                    continue;
                                }
                            };
                            match event {
                                ServerEvent::Ready { user_id, connection_id, .. } => {
                                    ready = true;
                                    awaiting_ack = false;
                                    heartbeat.reset();
                                    self.reconnect.on_connected();
                                    info!("gateway ready as {} (connection {})", user_id, connection_id);
                                    self.emit(SessionEvent::Connected { user_id, connection_id });
                                    if let Err(e) = self.replay(&mut sink).await {
                                        warn!("gateway write failed: {}", e);
                                        return Ended::transport();
                                    }
                                }
                                ServerEvent::HeartbeatAck => awaiting_ack = false,
                                ServerEvent::HeartbeatProbe => {
                                    if let Err(e) = send(&mut sink, &ClientCommand::HeartbeatAck).await {
                                        warn!("gateway write failed: {}", e);
                                        return Ended::transport();
                                    }
                                }
                                other => self.dispatch(other),
                            }
                        }
                        Frame::Close(frame) => {
                            let code = frame.map(|f| u16::from(f.code));
                            debug!("gateway closed the connection ({:?})", code);
                            return Ended::Disconnected {
                                cause: DisconnectCause::classify(code),
                                code,
                            };
                        }
                        _ => {}
                    }
                }

                _ = heartbeat.tick(), if ready => {
                    if awaiting_ack {
                        warn!("gateway missed a heartbeat, dropping connection");
                        return Ended::transport();
                    }
                    awaiting_ack = true;
                    if let Err(e) = send(&mut sink, &ClientCommand::HeartbeatProbe).await {
                        warn!("gateway write failed: {}", e);
                        return Ended::transport();
                    }
                }

                () = &mut handshake, if !ready => {
                    warn!("gateway did not send Ready within {:?}", self.config.handshake_timeout);
                    return Ended::transport();
                }

                Some((peer, generation)) = self.typing_expired.recv() => {
                    if self.typing.expire(peer, generation) {
                        self.emit(SessionEvent::TypingStopped(peer));
                    }
                }
            }
        }
    }

    async fn submit(&mut self, sink: &mut Sink, cmd: ClientCommand) -> Result<(), ClientError> {
        if let ClientCommand::SendMessage {
            client_nonce: Some(nonce),
            ..
        } = &cmd
        {
            self.unconfirmed.push_back((nonce.clone(), cmd.clone()));
        }
        send(sink, &cmd).await
    }

    async fn replay(&mut self, sink: &mut Sink) -> Result<(), ClientError> {
        if !self.unconfirmed.is_empty() {
            info!("resubmitting {} unconfirmed message(s)", self.unconfirmed.len());
        }
        for (_, cmd) in &self.unconfirmed {
            send(sink, cmd).await?;
        }
        Ok(())
    }

    fn confirm(&mut self, nonce: Option<&String>) {
        if let Some(nonce) = nonce {
            self.unconfirmed.retain(|(n, _)| n != nonce);
        }
    }

    fn dispatch(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage { message } => {
                if self.typing.stop(message.sender_id) {
                    self.emit(SessionEvent::TypingStopped(message.sender_id));
                }
                if self.dedup.observe(&message) {
                    self.emit(SessionEvent::Message(message));
                } else {
                    debug!("duplicate message {} suppressed", message.id);
                }
            }
            ServerEvent::MessageSent { message } => {
                self.confirm(message.client_nonce.as_ref());
                if self.dedup.observe(&message) {
                    self.emit(SessionEvent::Accepted(message));
                }
            }
            ServerEvent::MessageDelivered {
                message_id,
                receiver_id,
            } => self.emit(SessionEvent::Delivered {
                message_id,
                receiver_id,
            }),
            ServerEvent::MessageRead {
                message_id,
                reader_id,
            } => self.emit(SessionEvent::Read {
                message_id,
                reader_id,
            }),
            ServerEvent::MessageFailed {
                client_nonce,
                receiver_id,
                reason,
            } => {
                self.confirm(client_nonce.as_ref());
                warn!("message to {} failed: {}", receiver_id, reason);
                self.emit(SessionEvent::Failed {
                    client_nonce,
                    receiver_id,
                    reason,
                });
            }
            ServerEvent::UserOnline { user_id } => self.emit(SessionEvent::Online(user_id)),
            ServerEvent::UserOffline {
                user_id,
                last_active_at,
            } => self.emit(SessionEvent::Offline {
                user_id,
                last_active_at,
            }),
            ServerEvent::LastActive {
                user_id,
                online,
                last_active_at,
            } => self.emit(SessionEvent::LastActive {
                user_id,
                online,
                last_active_at,
            }),
            ServerEvent::Typing { sender_id } => {
                if self.typing.observe(sender_id) {
                    self.emit(SessionEvent::TypingStarted(sender_id));
                }
            }
            ServerEvent::HistoryChanged { partner_id } => {
                self.emit(SessionEvent::HistoryChanged(partner_id))
            }
            ServerEvent::Error { code, message } => {
                warn!("gateway error {:?}: {}", code, message);
                self.emit(SessionEvent::Error { code, message });
            }
            ServerEvent::Ready { .. } | ServerEvent::HeartbeatProbe | ServerEvent::HeartbeatAck => {}
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

async fn send(sink: &mut Sink, cmd: &ClientCommand) -> Result<(), ClientError> {
    let json = serde_json::to_string(cmd)?;
    sink.send(Frame::text(json)).await?;
    Ok(())
}
