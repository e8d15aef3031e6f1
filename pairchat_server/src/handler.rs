//! WebSocket handlers for the signaling server
//!
//! Each accepted connection gets a read loop that parses client requests and
//! a writer task that drains the connection's event channel onto the socket.
//! Closing the socket, a transport error, or a client that stops answering
//! pings tears the user down.

use crate::error::ClientRequestError;
use crate::state::{PeerSender, ServerState};
use futures_util::{SinkExt, StreamExt};
use pairchat_protocol::{ClientRequest, NegotiationKind, NegotiationPayload, ServerEvent, UserId};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Liveness checking for idle connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Send a ping after this long without hearing from the client
    pub interval: Duration,
    /// Drop the connection when a ping goes unanswered this long
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(25),
            timeout: Duration::from_secs(20),
        }
    }
}

impl Heartbeat {
    fn check_period(&self) -> Duration {
        (self.interval.min(self.timeout) / 2).max(Duration::from_millis(10))
    }
}

/// Accept connections forever, one task per client
pub async fn serve(listener: TcpListener, state: ServerState, heartbeat: Heartbeat) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, state, heartbeat).await {
                debug!(%addr, error = %e, "connection ended with error");
            }
        });
    }
}

/// Run one client connection to completion
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: ServerState,
    heartbeat: Heartbeat,
) -> Result<(), ClientRequestError> {
    let ws = accept_async(stream).await?;
    info!(%addr, "websocket connection established");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let (ping_tx, mut ping_rx) = mpsc::unbounded_channel::<Message>();

    let mut writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => Message::text(event.to_string()),
                    None => break,
                },
                Some(ping) = ping_rx.recv() => ping,
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut connection = Connection::new(tx);
    let mut liveness = Liveness::new(Instant::now());
    let period = heartbeat.check_period();
    let mut ticker = time::interval_at(Instant::now() + period, period);

    let result = loop {
        tokio::select! {
            frame = ws_rx.next() => {
                liveness.touch(Instant::now());
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = connection.handle_text(&state, text.as_str()) {
                            connection.reject(e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(e.into()),
                }
            }
            _ = ticker.tick() => match liveness.check(&heartbeat, Instant::now()) {
                PingCheck::Alive => {}
                PingCheck::SendPing => {
                    debug!(%addr, "pinging idle client");
                    let _ = ping_tx.send(Message::Ping(Default::default()));
                }
                PingCheck::TimedOut { idle } => {
                    warn!(
                        %addr,
                        user = ?connection.user_id,
                        idle_ms = idle.as_millis() as u64,
                        "ping timeout, dropping connection"
                    );
                    break Ok(());
                }
            },
        }
    };

    if let Some(id) = connection.close(&state) {
        info!(%addr, user = %id, "websocket connection closed");
    }
    drop(ping_tx);
    // A dead peer can stall the closing handshake
    if time::timeout(heartbeat.timeout, &mut writer).await.is_err() {
        writer.abort();
    }
    result
}

/// Outcome of a periodic liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PingCheck {
    Alive,
    SendPing,
    TimedOut { idle: Duration },
}

/// Tracks when the client was last heard from and whether a ping is pending
#[derive(Debug)]
struct Liveness {
    last_activity: Instant,
    ping_sent_at: Option<Instant>,
}

impl Liveness {
    fn new(now: Instant) -> Self {
        Self {
            last_activity: now,
            ping_sent_at: None,
        }
    }

    /// Any frame from the client, pongs included, counts as activity
    fn touch(&mut self, now: Instant) {
        self.last_activity = now;
        self.ping_sent_at = None;
    }

    fn check(&mut self, heartbeat: &Heartbeat, now: Instant) -> PingCheck {
        match self.ping_sent_at {
            Some(sent_at) if now.duration_since(sent_at) >= heartbeat.timeout => {
                PingCheck::TimedOut {
                    idle: now.duration_since(self.last_activity),
                }
            }
            Some(_) => PingCheck::Alive,
            None if now.duration_since(self.last_activity) >= heartbeat.interval => {
                self.ping_sent_at = Some(now);
                PingCheck::SendPing
            }
            None => PingCheck::Alive,
        }
    }
}

/// Per-connection protocol state
struct Connection {
    user_id: Option<UserId>,
    sender: PeerSender,
}

impl Connection {
    fn new(sender: PeerSender) -> Self {
        Self {
            user_id: None,
            sender,
        }
    }

    fn joined(&self) -> Result<&UserId, ClientRequestError> {
        self.user_id.as_ref().ok_or(ClientRequestError::NotJoined)
    }

    fn handle_text(&mut self, state: &ServerState, text: &str) -> Result<(), ClientRequestError> {
        let request = ClientRequest::from_str(text)?;
        self.handle_request(state, request)
    }

    fn handle_request(
        &mut self,
        state: &ServerState,
        request: ClientRequest,
    ) -> Result<(), ClientRequestError> {
        match request {
            ClientRequest::Join { id, display_name } => {
                if let Some(existing) = &self.user_id {
                    return Err(ClientRequestError::AlreadyJoined(existing.to_string()));
                }
                state.join(id.clone(), display_name, self.sender.clone())?;
                self.user_id = Some(id);
            }
            ClientRequest::FindNewChat => {
                state.find_new_chat(self.joined()?)?;
            }
            ClientRequest::EndCall => {
                state.end_call(self.joined()?);
            }
            ClientRequest::WaitingForMatch => state.waiting_status(self.joined()?),
            ClientRequest::Offer { to, payload } => {
                self.relay(state, NegotiationKind::Offer, &to, payload)?
            }
            ClientRequest::Answer { to, payload } => {
                self.relay(state, NegotiationKind::Answer, &to, payload)?
            }
            ClientRequest::IceCandidate { to, payload } => {
                self.relay(state, NegotiationKind::IceCandidate, &to, payload)?
            }
            ClientRequest::ChatMessage { to, message } => {
                state.chat(self.joined()?, &to, message)?;
            }
            ClientRequest::ReportUser {
                user_id,
                reason,
                details,
            } => state.report(self.joined()?, &user_id, reason, &details),
            ClientRequest::BlockUser { user_id } => state.block(self.joined()?, &user_id),
        }
        Ok(())
    }

    fn relay(
        &self,
        state: &ServerState,
        kind: NegotiationKind,
        to: &UserId,
        payload: NegotiationPayload,
    ) -> Result<(), ClientRequestError> {
        state.relay(self.joined()?, to, kind, payload)?;
        Ok(())
    }

    /// Log a failed request and tell the client when it is owed an answer
    fn reject(&self, error: ClientRequestError) {
        match error.client_reason() {
            Some(reason) => {
                warn!(user = ?self.user_id, %error, "request rejected");
                let _ = self.sender.send(ServerEvent::Error { reason });
            }
            None => debug!(user = ?self.user_id, %error, "request dropped"),
        }
    }

    /// Tear down the joined user, if any
    fn close(self, state: &ServerState) -> Option<UserId> {
        let id = self.user_id?;
        state.disconnect(&id);
        Some(id)
    }
}
