//! OFT file-transfer engine: the per-connection handshake and data phase.
//!
//! The handshake frames ride an `OftCodec`; the data phase is an unframed
//! byte stream of the declared length, so the framed connection is taken
//! apart with `Framed::into_parts` and bytes that were already buffered
//! behind the last frame are credited to the data phase.

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::codec::{Decoder, Framed};
use oft_protocol::oft::{oft_checksum, oft_checksum_chunk, FileHeader, OftCodec, OftFrame, OftType};
use oft_protocol::{ProtocolError, Uin};
use crate::events::{ClientEvent, EventSink};

/// Data-phase write granularity; also how often progress events fire.
const CHUNK_SIZE: usize = 8192;

/// Ceiling on buffer capacity reserved up front from a peer-declared size.
/// The declared size is untrusted until the bytes actually arrive, so the
/// buffer grows with the data instead of pre-committing the full amount.
const MAX_PREALLOC: usize = 256 * 1024;

/// Per-transfer lifecycle. A transfer that is declined or fails never
/// re-enters the machine; there is no resume on this wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
  Proposed,
  Accepted,
  Declined,
  ListingSent,
  DataTransfer,
  Complete,
  Failed,
}

/// One local file staged for sending, fully materialized. Retro-scale
/// transfers fit in memory; the engine only sees bytes.
#[derive(Debug, Clone)]
pub struct FileEntry {
  pub name: String,
  pub modtime: u32,
  pub data: bytes::Bytes,
}

/// Private payload owned by a pending send/get cookie.
#[derive(Debug)]
pub struct TransferState {
  pub peer: Uin,
  pub phase: TransferPhase,
  /// Present on the sending side.
  pub entry: Option<FileEntry>,
  /// Listener the peer connects back to; bound at proposal time.
  pub listener: Option<TcpListener>,
  /// Peer asked for directory metadata only, not the file body.
  pub listing_only: bool,
}

#[derive(Error, Debug)]
pub enum TransferError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error(transparent)]
  Protocol(#[from] ProtocolError),
  #[error("peer closed the connection mid-transfer")]
  PeerClosed,
  #[error("unexpected frame {0:?} for the current phase")]
  UnexpectedFrame(OftType),
  #[error("frame echoed a foreign cookie")]
  CookieMismatch,
  #[error("checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
  ChecksumMismatch { expected: u32, computed: u32 },
  #[error("transfer has no staged file entry")]
  NothingStaged,
  #[error("timed out waiting for the peer to connect back")]
  AcceptTimeout,
}

/// Read one OFT frame from a dismantled stream, continuing to fill `buf`
/// across short reads.
async fn read_frame<S>(io: &mut S, buf: &mut BytesMut) -> Result<OftFrame, TransferError>
where
  S: AsyncRead + Unpin,
{
  loop {
    if let Some(frame) = OftCodec.decode(buf)? {
      return Ok(frame);
    }
    if io.read_buf(buf).await? == 0 {
      return Err(TransferError::PeerClosed);
    }
  }
}

fn expect_cookie(frame: &OftFrame, cookie: &[u8; 8]) -> Result<(), TransferError> {
  if &frame.header.cookie == cookie {
    Ok(())
  } else {
    Err(TransferError::CookieMismatch)
  }
}

/// Sender side: `Prompt` → `Ack` → raw data → `Done`. For a listing-only
/// peer, the synthetic single-entry listing is exchanged instead of the
/// data phase.
pub async fn send_file<S>(
  stream: S,
  cookie: [u8; 8],
  entry: FileEntry,
  listing_only: bool,
  events: &EventSink,
) -> Result<(), TransferError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut framed = Framed::new(stream, OftCodec);
  let size = entry.data.len() as u32;
  let checksum = oft_checksum(&entry.data);

  if listing_only {
    let listing = FileHeader {
      checksum,
      ..FileHeader::listing(cookie, &entry.name, size, entry.modtime)
    };
    framed.send(OftFrame::new(OftType::Listing, listing.clone())).await?;

    let reply = framed.next().await.ok_or(TransferError::PeerClosed)??;
    if reply.kind != OftType::ListingAck {
      return Err(TransferError::UnexpectedFrame(reply.kind));
    }
    expect_cookie(&reply, &cookie)?;

    framed.send(OftFrame::new(OftType::ListingDone, listing)).await?;
    events.post(ClientEvent::TransferComplete { cookie }).await;
    return Ok(());
  }

  let header = FileHeader {
    checksum,
    ..FileHeader::for_file(cookie, &entry.name, size, entry.modtime)
  };
  framed.send(OftFrame::new(OftType::Prompt, header.clone())).await?;

  let ack = framed.next().await.ok_or(TransferError::PeerClosed)??;
  if ack.kind != OftType::Ack {
    return Err(TransferError::UnexpectedFrame(ack.kind));
  }
  expect_cookie(&ack, &cookie)?;

  // Data phase: raw bytes, no framing
  let total = u64::from(size);
  let mut done: u64 = 0;
  let io = framed.get_mut();
  for chunk in entry.data.chunks(CHUNK_SIZE) {
    io.write_all(chunk).await?;
    done += chunk.len() as u64;
    events.post(ClientEvent::TransferProgress {
      cookie,
      bytes_done: done,
      bytes_total: total,
    }).await;
  }
  io.flush().await?;

  let fin = FileHeader {
    nrecvd: size,
    recvcsum: checksum,
    ..header
  };
  framed.send(OftFrame::new(OftType::Done, fin)).await?;

  events.post(ClientEvent::TransferComplete { cookie }).await;
  Ok(())
}

/// Receiver side: read `Prompt`, `Ack` it, drain exactly the declared byte
/// count, then expect the terminating `Done` frame. Any shortfall is fatal;
/// partial transfers are not resumed.
pub async fn receive_file<S>(
  stream: S,
  cookie: [u8; 8],
  events: &EventSink,
) -> Result<(FileHeader, bytes::Bytes), TransferError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut framed = Framed::new(stream, OftCodec);

  let prompt = framed.next().await.ok_or(TransferError::PeerClosed)??;
  if prompt.kind != OftType::Prompt {
    return Err(TransferError::UnexpectedFrame(prompt.kind));
  }
  expect_cookie(&prompt, &cookie)?;

  framed.send(OftFrame::new(OftType::Ack, prompt.header.clone())).await?;

  let size = prompt.header.size as usize;
  let total = prompt.header.size as u64;
  let parts = framed.into_parts();
  let mut io = parts.io;
  // Bytes already buffered behind the prompt belong to the data phase
  let mut pending = parts.read_buf;

  let mut data = BytesMut::with_capacity(size.min(MAX_PREALLOC));
  let mut checksum = oft_checksum(b"");

  while data.len() < size {
    if pending.is_empty() && io.read_buf(&mut pending).await? == 0 {
      return Err(TransferError::PeerClosed);
    }
    let take = pending.len().min(size - data.len());
    let chunk = pending.split_to(take);
    checksum = oft_checksum_chunk(&chunk, checksum, data.len() % 2 == 1);
    data.extend_from_slice(&chunk);
    events.post(ClientEvent::TransferProgress {
      cookie,
      bytes_done: data.len() as u64,
      bytes_total: total,
    }).await;
  }

  // Whatever trails the data is the start of the Done frame
  let done = read_frame(&mut io, &mut pending).await?;
  if done.kind != OftType::Done {
    return Err(TransferError::UnexpectedFrame(done.kind));
  }
  expect_cookie(&done, &cookie)?;

  if checksum != prompt.header.checksum {
    return Err(TransferError::ChecksumMismatch {
      expected: prompt.header.checksum,
      computed: checksum,
    });
  }

  events.post(ClientEvent::TransferComplete { cookie }).await;
  Ok((prompt.header, data.freeze()))
}

/// Receiver side of a listing-only exchange: parse the synthetic listing,
/// acknowledge it, and wait for `ListingDone`.
pub async fn receive_listing<S>(
  stream: S,
  cookie: [u8; 8],
) -> Result<FileHeader, TransferError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let mut framed = Framed::new(stream, OftCodec);

  let listing = framed.next().await.ok_or(TransferError::PeerClosed)??;
  if listing.kind != OftType::Listing {
    return Err(TransferError::UnexpectedFrame(listing.kind));
  }
  expect_cookie(&listing, &cookie)?;

  framed.send(OftFrame::new(OftType::ListingAck, listing.header.clone())).await?;

  let done = framed.next().await.ok_or(TransferError::PeerClosed)??;
  if done.kind != OftType::ListingDone {
    return Err(TransferError::UnexpectedFrame(done.kind));
  }

  Ok(listing.header)
}
