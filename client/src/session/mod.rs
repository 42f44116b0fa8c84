//! Control-channel session: transport fallback, login handshake, and the
//! steady-state frame loop.
//!
//! One task owns the session end to end. Rendezvous channels spawned from
//! here get their own tasks and report back through the event sink, so the
//! control loop never blocks on a transfer.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use oft_protocol::packets::LoginRequest;
use oft_protocol::{
  Packet, ProtocolError, RawCodec, RendezvousKind, RendezvousPropose, Uin, UserStatus,
};
use crate::core::SharedClientState;
use crate::events::{ClientEvent, EventSink};
use crate::rendezvous::transfer::FileEntry;
use crate::rendezvous::{self, CookieJar, PendingOffer};
use crate::resolver::{self, ResolveError};

/// Longest HTTP reply the tunnel preamble will buffer before giving up.
const MAX_HTTP_REPLY: usize = 4096;

/// One rung of the connect fallback ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
  /// HTTP CONNECT tunnel, usually through port 80.
  HttpTunnel(u16),
  /// Plain TCP to the native control port.
  Direct(u16),
  /// Plain TCP disguised on the HTTPS port; no TLS is spoken.
  HttpsPort(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Idle,
  Resolving,
  Connecting(Transport),
  AwaitingWelcome,
  AwaitingLoginReply,
  Authenticated,
  Disconnected,
  Failed(FailureReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
  Resolve,
  Connect,
  InvalidCredentials,
  MalformedReply,
  Io,
  Timeout,
}

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("session shut down")]
  Shutdown,
  #[error("server closed the connection")]
  Disconnected,
  #[error("no login reply within the timeout")]
  LoginTimeout,
  #[error("server rejected the credentials")]
  InvalidCredentials,
  #[error("unexpected reply during login")]
  MalformedReply,
  #[error("every transport in the fallback chain failed")]
  ConnectExhausted,
  #[error(transparent)]
  Resolve(#[from] ResolveError),
  #[error(transparent)]
  Protocol(#[from] ProtocolError),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

/// Monotonic message sequence numbers, one stream per session.
#[derive(Debug, Default)]
pub struct SequenceGen(u32);

impl SequenceGen {
  pub fn next_id(&mut self) -> u32 {
    self.0 = self.0.wrapping_add(1);
    self.0
  }
}

/// Requests from the UI layer into the session task.
#[derive(Debug)]
pub enum SessionCommand {
  SetStatus { status: UserStatus },
  SendMessage { to: Uin, text: String },
  SendFile { to: Uin, entry: FileEntry, listing_only: bool },
  /// Stage the entry served to peers that browse us with a get-file request.
  ShareFile { entry: FileEntry },
  /// Ask a peer to connect back and serve the listing of what it shares.
  BrowseFiles { to: Uin },
  ProposeDirectIm { to: Uin },
  AcceptOffer { cookie: [u8; 8] },
  DeclineOffer { cookie: [u8; 8] },
  Logoff,
}

pub struct Session {
  app: SharedClientState,
  state: ConnectionState,
  seq: SequenceGen,
  cookies: CookieJar,
  /// Inbound proposals waiting for the local user's accept or decline.
  offers: HashMap<[u8; 8], PendingOffer>,
  shared_entry: Option<FileEntry>,
  events: EventSink,
  shutdown: CancellationToken,
}

impl Session {
  pub fn new(app: SharedClientState, events: EventSink, shutdown: CancellationToken) -> Self {
    Self {
      app,
      state: ConnectionState::Idle,
      seq: SequenceGen::default(),
      cookies: CookieJar::new(),
      offers: HashMap::new(),
      shared_entry: None,
      events,
      shutdown,
    }
  }

  pub fn state(&self) -> ConnectionState {
    self.state
  }

  async fn set_state(&mut self, state: ConnectionState) {
    if self.state != state {
      tracing::debug!(from = ?self.state, to = ?state, "connection state change");
      self.state = state;
      self.events.post(ClientEvent::ConnectionState(state)).await;
    }
  }

  async fn fail(&mut self, reason: FailureReason) {
    self.set_state(ConnectionState::Failed(reason)).await;
  }

  /// Resolve the server and walk the transport fallback chain until one
  /// rung yields a connection. Only connectivity failures advance the
  /// chain; anything after the TCP stream is up is terminal.
  pub async fn connect(&mut self) -> Result<Framed<TcpStream, RawCodec>, SessionError> {
    let config = self.app.config().clone();

    self.set_state(ConnectionState::Resolving).await;
    let resolved = match resolver::resolve_host(
      &config.server,
      config.direct_port,
      config.resolve_timeout(),
    )
    .await
    {
      Ok(addr) => addr,
      Err(e) => {
        self.fail(FailureReason::Resolve).await;
        return Err(e.into());
      }
    };
    let ip = *resolved.ip();

    for transport in config.transport_chain() {
      self.set_state(ConnectionState::Connecting(transport)).await;
      match self.connect_transport(ip, transport).await {
        Ok(stream) => {
          tracing::info!(%ip, ?transport, "control connection established");
          return Ok(Framed::new(stream, RawCodec));
        }
        Err(e) => {
          tracing::warn!(%ip, ?transport, error = %e, "transport failed, trying next");
        }
      }
    }

    self.fail(FailureReason::Connect).await;
    Err(SessionError::ConnectExhausted)
  }

  async fn connect_transport(
    &self,
    ip: Ipv4Addr,
    transport: Transport,
  ) -> std::io::Result<TcpStream> {
    match transport {
      Transport::Direct(port) | Transport::HttpsPort(port) => {
        TcpStream::connect((ip, port)).await
      }
      Transport::HttpTunnel(port) => {
        let config = self.app.config();
        let mut stream = TcpStream::connect((ip, port)).await?;
        http_connect(&mut stream, &config.server, config.direct_port).await?;
        Ok(stream)
      }
    }
  }

  /// Run the login handshake on an established connection.
  pub async fn authenticate<S>(
    &mut self,
    framed: &mut Framed<S, RawCodec>,
  ) -> Result<(), SessionError>
  where
    S: AsyncRead + AsyncWrite + Unpin,
  {
    let config = self.app.config().clone();
    self.set_state(ConnectionState::AwaitingWelcome).await;

    let deadline = tokio::time::sleep(config.login_timeout());
    tokio::pin!(deadline);

    loop {
      tokio::select! {
        _ = self.shutdown.cancelled() => return Err(SessionError::Shutdown),

        _ = &mut deadline => {
          self.fail(FailureReason::Timeout).await;
          return Err(SessionError::LoginTimeout);
        }

        frame = framed.next() => match (self.state, frame) {
          (ConnectionState::AwaitingWelcome, Some(Ok(Packet::Welcome { key }))) => {
            let login = LoginRequest::login(config.uin, key, &config.password);
            if let Err(e) = framed.send(Packet::Login(login)).await {
              self.fail(FailureReason::Io).await;
              return Err(e.into());
            }
            self.set_state(ConnectionState::AwaitingLoginReply).await;
          }

          (ConnectionState::AwaitingLoginReply, Some(Ok(Packet::LoginOk))) => {
            self.set_state(ConnectionState::Authenticated).await;
            return Ok(());
          }

          (ConnectionState::AwaitingLoginReply, Some(Ok(Packet::LoginFailed))) => {
            self.fail(FailureReason::InvalidCredentials).await;
            return Err(SessionError::InvalidCredentials);
          }

          (_, Some(Ok(other))) => {
            tracing::warn!(packet = ?other, "unexpected reply during login");
            self.fail(FailureReason::MalformedReply).await;
            return Err(SessionError::MalformedReply);
          }

          (_, Some(Err(e))) => {
            let reason = match &e {
              ProtocolError::Io(_) => FailureReason::Io,
              _ => FailureReason::MalformedReply,
            };
            self.fail(reason).await;
            return Err(e.into());
          }

          (_, None) => {
            self.fail(FailureReason::Io).await;
            return Err(SessionError::Disconnected);
          }
        },
      }
    }
  }

  /// Steady-state loop: keepalives, UI commands, and inbound frames.
  pub async fn run<S>(
    &mut self,
    mut framed: Framed<S, RawCodec>,
    mut commands: mpsc::Receiver<SessionCommand>,
  ) -> Result<(), SessionError>
  where
    S: AsyncRead + AsyncWrite + Unpin,
  {
    let config = self.app.config().clone();
    let mut ping = tokio::time::interval(config.ping_interval());

    loop {
      tokio::select! {
        _ = self.shutdown.cancelled() => return Err(SessionError::Shutdown),

        _ = ping.tick() => {
          framed.send(Packet::Ping).await?;
          self.cookies.sweep_expired(config.cookie_max_age());
          // Inbound offers the user never answered expire on the same clock
          self.offers.retain(|_, offer| offer.received_at.elapsed() < config.cookie_max_age());
        }

        command = commands.recv() => match command {
          Some(command) => self.handle_command(&mut framed, command).await?,
          // UI dropped its handle; nothing left to drive the session
          None => return Err(SessionError::Shutdown),
        },

        frame = framed.next() => match frame {
          Some(Ok(packet)) => self.dispatch(&mut framed, packet).await?,
          Some(Err(e)) => return Err(e.into()),
          None => {
            self.set_state(ConnectionState::Disconnected).await;
            return Err(SessionError::Disconnected);
          }
        },
      }
    }
  }

  async fn handle_command<S>(
    &mut self,
    framed: &mut Framed<S, RawCodec>,
    command: SessionCommand,
  ) -> Result<(), SessionError>
  where
    S: AsyncRead + AsyncWrite + Unpin,
  {
    match command {
      SessionCommand::SetStatus { status } => {
        framed.send(Packet::SetStatus { status }).await?;
      }

      SessionCommand::SendMessage { to, text } => {
        let seq = self.seq.next_id();
        framed.send(Packet::SendMessage { recipient: to, seq, text }).await?;
      }

      SessionCommand::SendFile { to, entry, listing_only } => {
        let staged = rendezvous::propose_send_file(
          &mut self.cookies,
          self.app.host_ip(),
          self.app.config().uin,
          to,
          entry,
          listing_only,
        )
        .await;
        match staged {
          Ok(propose) => framed.send(Packet::RendezvousPropose(propose)).await?,
          Err(e) => self.report_staging_failure(e).await,
        }
      }

      SessionCommand::ShareFile { entry } => {
        self.shared_entry = Some(entry);
      }

      SessionCommand::BrowseFiles { to } => {
        let staged = rendezvous::propose_get_file(
          &mut self.cookies,
          self.app.host_ip(),
          self.app.config().uin,
          to,
        )
        .await;
        match staged {
          Ok(propose) => framed.send(Packet::RendezvousPropose(propose)).await?,
          Err(e) => self.report_staging_failure(e).await,
        }
      }

      SessionCommand::ProposeDirectIm { to } => {
        let staged = rendezvous::propose_direct_im(
          &mut self.cookies,
          self.app.host_ip(),
          self.app.config().uin,
          to,
        )
        .await;
        match staged {
          Ok(propose) => framed.send(Packet::RendezvousPropose(propose)).await?,
          Err(e) => self.report_staging_failure(e).await,
        }
      }

      SessionCommand::AcceptOffer { cookie } => {
        if let Some(offer) = self.offers.remove(&cookie) {
          framed
            .send(Packet::RendezvousAccept { cookie, kind: offer.kind as u16 })
            .await?;
          rendezvous::spawn_inbound(
            cookie,
            offer,
            self.shared_entry.clone(),
            self.events.clone(),
          );
        } else {
          tracing::warn!("accept for an unknown offer, ignoring");
        }
      }

      SessionCommand::DeclineOffer { cookie } => {
        if let Some(offer) = self.offers.remove(&cookie) {
          framed
            .send(Packet::RendezvousCancel { cookie, kind: offer.kind as u16 })
            .await?;
        }
      }

      SessionCommand::Logoff => return Err(SessionError::Shutdown),
    }

    Ok(())
  }

  /// A proposal that cannot even be staged locally is a transfer failure,
  /// not a session failure; the control connection stays up.
  async fn report_staging_failure(&mut self, e: std::io::Error) {
    tracing::warn!(error = %e, "could not stage a rendezvous proposal");
    self.events.post(ClientEvent::TransferFailed {
      cookie: [0; 8],
      reason: e.to_string(),
    }).await;
  }

  async fn dispatch<S>(
    &mut self,
    framed: &mut Framed<S, RawCodec>,
    packet: Packet,
  ) -> Result<(), SessionError>
  where
    S: AsyncRead + AsyncWrite + Unpin,
  {
    match packet {
      Packet::Pong => tracing::trace!("pong"),
      Packet::Ping => framed.send(Packet::Pong).await?,

      Packet::Disconnect => {
        self.set_state(ConnectionState::Disconnected).await;
        return Err(SessionError::Disconnected);
      }

      Packet::RecvMessage { sender, text, .. } => {
        self.events.post(ClientEvent::Message { sender, text }).await;
      }

      Packet::StatusChange { who, status } => {
        self.events.post(ClientEvent::StatusChange { who, status }).await;
      }

      Packet::RendezvousPropose(propose) => self.handle_propose(propose).await,

      Packet::RendezvousAccept { cookie, kind } => {
        let Ok(kind) = RendezvousKind::try_from(kind) else {
          tracing::warn!(kind, "accept with unknown rendezvous kind, dropping");
          return Ok(());
        };
        match self.cookies.claim(&cookie, kind) {
          Some(state) => rendezvous::spawn_accepted(cookie, state, self.events.clone()),
          None => tracing::warn!("accept for an unknown cookie, dropping"),
        }
      }

      Packet::RendezvousCancel { cookie, kind } => {
        let Ok(kind) = RendezvousKind::try_from(kind) else {
          tracing::warn!(kind, "cancel with unknown rendezvous kind, dropping");
          return Ok(());
        };
        if self.cookies.claim(&cookie, kind).is_some() {
          self.events.post(ClientEvent::TransferFailed {
            cookie,
            reason: "declined by peer".to_string(),
          }).await;
        } else if self.offers.remove(&cookie).is_some() {
          // The peer withdrew its own proposal before we answered
          self.events.post(ClientEvent::TransferFailed {
            cookie,
            reason: "withdrawn by peer".to_string(),
          }).await;
        }
      }

      other => tracing::warn!(packet = ?other, "unexpected control frame, ignoring"),
    }

    Ok(())
  }

  async fn handle_propose(&mut self, propose: RendezvousPropose) {
    let Some(kind) = propose.kind() else {
      tracing::warn!("proposal with unknown capability, dropping");
      return;
    };

    let (file_name, size) = match &propose.file_info {
      Some(info) => (info.name.clone(), info.total_size),
      None => (String::new(), 0),
    };

    let offer = PendingOffer {
      kind,
      from: propose.requester,
      addr: SocketAddrV4::new(propose.internal_ip, propose.port),
      file: propose.file_info.clone(),
      received_at: tokio::time::Instant::now(),
    };
    self.offers.insert(propose.cookie, offer);

    self.events.post(ClientEvent::FileOffer {
      cookie: propose.cookie,
      from: propose.requester,
      file_name,
      size,
    }).await;
  }
}

/// Speak the CONNECT preamble on a freshly opened tunnel socket. Anything
/// but a 200-class status line fails the transport.
async fn http_connect<S>(io: &mut S, host: &str, port: u16) -> std::io::Result<()>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let request = format!("CONNECT {host}:{port} HTTP/1.0\r\n\r\n");
  io.write_all(request.as_bytes()).await?;
  io.flush().await?;

  let mut reply = BytesMut::new();
  while !reply.windows(4).any(|w| w == b"\r\n\r\n") {
    if reply.len() > MAX_HTTP_REPLY {
      return Err(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "oversize proxy reply",
      ));
    }
    if io.read_buf(&mut reply).await? == 0 {
      return Err(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "proxy closed during CONNECT",
      ));
    }
  }

  let head = String::from_utf8_lossy(&reply);
  if head.starts_with("HTTP/") && head.contains(" 200 ") {
    Ok(())
  } else {
    Err(std::io::Error::new(
      std::io::ErrorKind::ConnectionRefused,
      "proxy refused CONNECT",
    ))
  }
}
