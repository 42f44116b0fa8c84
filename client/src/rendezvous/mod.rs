//! Rendezvous negotiation: staging proposals, correlating replies, and
//! running the direct peer channels they establish.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Encoder;
use oft_protocol::oft::{FileHeader, OftCodec, OftFrame, OftMagic, OftType};
use oft_protocol::packets::FileInfo;
use oft_protocol::{decode_cp1252, encode_cp1252, ProtocolError};
use oft_protocol::{RendezvousKind, RendezvousPropose, Uin};
use crate::events::{ClientEvent, EventSink};

mod cookie;
pub mod transfer;

pub use cookie::{Cookie, CookieJar};
use transfer::{FileEntry, TransferError, TransferPhase, TransferState};

/// How long an accepted proposal waits for the peer to connect back.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Private payload owned by a pending cookie. Moving it out of the jar on a
/// matched reply transfers ownership to the connection task.
#[derive(Debug)]
pub enum RendezvousState {
  DirectIm(DirectImState),
  Transfer(TransferState),
}

#[derive(Debug)]
pub struct DirectImState {
  pub peer: Uin,
  pub listener: Option<TcpListener>,
}

impl DirectImState {
  pub fn new(peer: Uin) -> Self {
    Self { peer, listener: None }
  }
}

/// An inbound proposal awaiting the local user's decision. The cookie was
/// chosen by the peer, so it lives outside the jar.
#[derive(Debug, Clone)]
pub struct PendingOffer {
  pub kind: RendezvousKind,
  pub from: Uin,
  pub addr: SocketAddrV4,
  pub file: Option<FileInfo>,
  /// When the proposal arrived; unanswered offers expire on the cookie sweep.
  pub received_at: tokio::time::Instant,
}

/// Bind a listener and stage a send-file proposal. The jar owns the staged
/// transfer until the peer's reply claims it or a sweep discards it.
pub async fn propose_send_file(
  jar: &mut CookieJar,
  local_ip: Ipv4Addr,
  requester: Uin,
  peer: Uin,
  entry: FileEntry,
  listing_only: bool,
) -> std::io::Result<RendezvousPropose> {
  let listener = TcpListener::bind((local_ip, 0)).await?;
  let port = listener.local_addr()?.port();
  let file_info = FileInfo {
    name: entry.name.clone(),
    total_files: 1,
    total_size: entry.data.len() as u32,
  };

  let state = TransferState {
    peer,
    phase: TransferPhase::Proposed,
    entry: Some(entry),
    listener: Some(listener),
    listing_only,
  };
  let cookie = jar.issue(RendezvousKind::SendFile, RendezvousState::Transfer(state));

  Ok(RendezvousPropose {
    cookie: cookie.bytes(),
    capability: RendezvousKind::SendFile.capability(),
    seq: 1,
    requester,
    internal_ip: local_ip,
    port,
    file_info: Some(file_info),
  })
}

/// Stage a get-file proposal: invite the peer to connect back and serve the
/// listing of what it shares.
pub async fn propose_get_file(
  jar: &mut CookieJar,
  local_ip: Ipv4Addr,
  requester: Uin,
  peer: Uin,
) -> std::io::Result<RendezvousPropose> {
  let listener = TcpListener::bind((local_ip, 0)).await?;
  let port = listener.local_addr()?.port();

  let state = TransferState {
    peer,
    phase: TransferPhase::Proposed,
    entry: None,
    listener: Some(listener),
    listing_only: true,
  };
  let cookie = jar.issue(RendezvousKind::GetFile, RendezvousState::Transfer(state));

  Ok(RendezvousPropose {
    cookie: cookie.bytes(),
    capability: RendezvousKind::GetFile.capability(),
    seq: 1,
    requester,
    internal_ip: local_ip,
    port,
    file_info: None,
  })
}

/// Stage a direct-IM invitation.
pub async fn propose_direct_im(
  jar: &mut CookieJar,
  local_ip: Ipv4Addr,
  requester: Uin,
  peer: Uin,
) -> std::io::Result<RendezvousPropose> {
  let listener = TcpListener::bind((local_ip, 0)).await?;
  let port = listener.local_addr()?.port();

  let state = DirectImState { peer, listener: Some(listener) };
  let cookie = jar.issue(RendezvousKind::DirectIm, RendezvousState::DirectIm(state));

  Ok(RendezvousPropose {
    cookie: cookie.bytes(),
    capability: RendezvousKind::DirectIm.capability(),
    seq: 1,
    requester,
    internal_ip: local_ip,
    port,
    file_info: None,
  })
}

/// The peer accepted one of our proposals: wait for it on the staged
/// listener and run the channel. Failures surface as transfer events, never
/// as session errors.
pub fn spawn_accepted(cookie: [u8; 8], state: RendezvousState, events: EventSink) {
  tokio::spawn(async move {
    if let Err(e) = run_accepted(cookie, state, &events).await {
      tracing::error!(error = %e, "rendezvous channel failed");
      events.post(ClientEvent::TransferFailed { cookie, reason: e.to_string() }).await;
    }
  });
}

async fn run_accepted(
  cookie: [u8; 8],
  state: RendezvousState,
  events: &EventSink,
) -> Result<(), TransferError> {
  match state {
    RendezvousState::Transfer(mut transfer_state) => {
      let listener = transfer_state.listener.take().ok_or(TransferError::NothingStaged)?;
      let (stream, peer_addr) = accept_back_connection(&listener).await?;
      tracing::info!(%peer_addr, "transfer peer connected");

      match transfer_state.entry.take() {
        // We have the file: stream it (or just its listing)
        Some(entry) => {
          transfer::send_file(stream, cookie, entry, transfer_state.listing_only, events).await
        }
        // Get-file: the peer serves us its listing
        None => {
          let listing = transfer::receive_listing(stream, cookie).await?;
          events.post(ClientEvent::FileOffer {
            cookie,
            from: transfer_state.peer,
            file_name: listing.name.clone(),
            size: listing.size,
          }).await;
          Ok(())
        }
      }
    }

    RendezvousState::DirectIm(mut im) => {
      let listener = im.listener.take().ok_or(TransferError::NothingStaged)?;
      let (stream, peer_addr) = accept_back_connection(&listener).await?;
      tracing::info!(%peer_addr, "direct IM peer connected");
      run_direct_im(stream, cookie, im.peer, events).await
    }
  }
}

async fn accept_back_connection(
  listener: &TcpListener,
) -> Result<(TcpStream, std::net::SocketAddr), TransferError> {
  tokio::time::timeout(ACCEPT_TIMEOUT, listener.accept())
    .await
    .map_err(|_| TransferError::AcceptTimeout)?
    .map_err(TransferError::Io)
}

/// We accepted a peer's proposal: connect back to the advertised address and
/// run the channel. `shared` is the local entry served to get-file browsers.
pub fn spawn_inbound(
  cookie: [u8; 8],
  offer: PendingOffer,
  shared: Option<FileEntry>,
  events: EventSink,
) {
  tokio::spawn(async move {
    if let Err(e) = run_inbound(cookie, offer, shared, &events).await {
      tracing::error!(error = %e, "inbound rendezvous channel failed");
      events.post(ClientEvent::TransferFailed { cookie, reason: e.to_string() }).await;
    }
  });
}

async fn run_inbound(
  cookie: [u8; 8],
  offer: PendingOffer,
  shared: Option<FileEntry>,
  events: &EventSink,
) -> Result<(), TransferError> {
  let stream = TcpStream::connect(offer.addr).await?;

  match offer.kind {
    RendezvousKind::SendFile => {
      let (header, _data) = transfer::receive_file(stream, cookie, events).await?;
      tracing::info!(name = %header.name, size = header.size, "file received");
      Ok(())
    }
    RendezvousKind::GetFile => {
      let entry = shared.ok_or(TransferError::NothingStaged)?;
      transfer::send_file(stream, cookie, entry, true, events).await
    }
    RendezvousKind::DirectIm => run_direct_im(stream, cookie, offer.from, events).await,
  }
}

/// Serialize one direct-IM message: an ODC2-magic frame whose header
/// declares the text length, followed by the raw text bytes.
pub fn encode_direct_im(cookie: [u8; 8], text: &str) -> Result<BytesMut, ProtocolError> {
  let encoded = encode_cp1252(text);
  let mut header = FileHeader { cookie, ..Default::default() };
  header.size = encoded.len() as u32;
  let frame = OftFrame { magic: OftMagic::Odc2, kind: OftType::Prompt, header };

  let mut buf = BytesMut::new();
  OftCodec.encode(frame, &mut buf)?;
  buf.extend_from_slice(&encoded);
  Ok(buf)
}

/// Pump an established direct-IM channel: each inbound frame announces a
/// text payload which is surfaced as a message event.
pub async fn run_direct_im<S>(
  stream: S,
  cookie: [u8; 8],
  peer: Uin,
  events: &EventSink,
) -> Result<(), TransferError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut io = stream;
  let mut buf = BytesMut::new();

  loop {
    // Frame header, then exactly the declared payload
    let frame = loop {
      use tokio_util::codec::Decoder;
      if let Some(frame) = OftCodec.decode(&mut buf)? {
        break frame;
      }
      if io.read_buf(&mut buf).await? == 0 {
        // Peer hung up between messages: normal teardown
        return Ok(());
      }
    };

    if frame.header.cookie != cookie {
      return Err(TransferError::CookieMismatch);
    }

    let size = frame.header.size as usize;
    while buf.len() < size {
      if io.read_buf(&mut buf).await? == 0 {
        return Err(TransferError::PeerClosed);
      }
    }
    let text = decode_cp1252(&buf.split_to(size));

    events.post(ClientEvent::Message { sender: peer, text }).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::StreamExt;
  use tokio::io::AsyncWriteExt as _;

  #[tokio::test]
  async fn accepted_direct_im_pumps_messages() {
    let mut jar = CookieJar::new();
    let propose = propose_direct_im(&mut jar, Ipv4Addr::LOCALHOST, 111, 222)
      .await
      .unwrap();
    assert_eq!(propose.kind(), Some(RendezvousKind::DirectIm));

    // Peer accepts: claim with the mandatory kind check and hand the state
    // to the channel task
    let state = jar.claim(&propose.cookie, RendezvousKind::DirectIm).unwrap();
    let (events, mut stream) = EventSink::channel(16);
    spawn_accepted(propose.cookie, state, events);

    // Peer connects back and sends two messages
    let mut peer = TcpStream::connect((Ipv4Addr::LOCALHOST, propose.port))
      .await
      .unwrap();
    let hello = encode_direct_im(propose.cookie, "hello").unwrap();
    let world = encode_direct_im(propose.cookie, "world").unwrap();
    peer.write_all(&hello).await.unwrap();
    peer.write_all(&world).await.unwrap();

    for expected in ["hello", "world"] {
      match stream.next().await {
        Some(ClientEvent::Message { sender, text }) => {
          assert_eq!(sender, 222);
          assert_eq!(text, expected);
        }
        other => panic!("unexpected event: {other:?}"),
      }
    }
  }

  #[tokio::test]
  async fn get_file_proposal_yields_the_peers_listing() {
    let mut jar = CookieJar::new();
    let propose = propose_get_file(&mut jar, Ipv4Addr::LOCALHOST, 111, 222)
      .await
      .unwrap();
    assert_eq!(propose.kind(), Some(RendezvousKind::GetFile));
    assert_eq!(propose.file_info, None);

    let state = jar.claim(&propose.cookie, RendezvousKind::GetFile).unwrap();
    let (events, mut stream) = EventSink::channel(16);
    spawn_accepted(propose.cookie, state, events);

    // The peer connects back and serves the listing of its shared file
    let cookie = propose.cookie;
    let peer = tokio::spawn(async move {
      let shared = FileEntry {
        name: "shared.zip".to_string(),
        modtime: 1_700_000_000,
        data: bytes::Bytes::from(vec![7u8; 4096]),
      };
      let (peer_events, _peer_stream) = EventSink::channel(16);
      let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, propose.port))
        .await
        .unwrap();
      transfer::send_file(stream, cookie, shared, true, &peer_events).await
    });

    match stream.next().await {
      Some(ClientEvent::FileOffer { from, file_name, size, .. }) => {
        assert_eq!(from, 222);
        assert_eq!(file_name, "shared.zip");
        assert_eq!(size, 4096);
      }
      other => panic!("unexpected event: {other:?}"),
    }
    peer.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn proposal_advertises_the_bound_listener() {
    let mut jar = CookieJar::new();
    let entry = FileEntry {
      name: "a.txt".to_string(),
      modtime: 0,
      data: bytes::Bytes::from_static(b"abc"),
    };
    let propose = propose_send_file(&mut jar, Ipv4Addr::LOCALHOST, 111, 222, entry, false)
      .await
      .unwrap();

    assert_ne!(propose.port, 0);
    assert_eq!(propose.internal_ip, Ipv4Addr::LOCALHOST);
    assert_eq!(propose.requester, 111);
    assert_eq!(propose.file_info.as_ref().unwrap().total_size, 3);
    assert_eq!(jar.len(), 1);
  }
}
