use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use crate::codec_helpers::{decode_cp1252, encode_cp1252, get_ipv4, put_ipv4};
use crate::consts::{frame_kind, UserStatus, COOKIE_LEN, MAX_FRAME_LEN};
use crate::error::ProtocolError;
use crate::packets::{LoginRequest, Packet, RendezvousPropose};

/// A decoded control frame before packet-level interpretation: the `{kind,
/// length}` header with the raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
  pub kind: u32,
  pub payload: Bytes,
}

/// Codec for the control-channel framing: an 8-byte `{u32 kind, u32 length}`
/// little-endian header followed by `length` payload bytes.
///
/// Partial reads are resumed by construction: `decode` leaves the buffer
/// untouched until header and payload have both accumulated, so a read that
/// stalls mid-payload picks up where it left off and never re-reads the
/// header.
#[derive(Debug, Default)]
pub struct RawCodec;

impl RawCodec {
  /// Split one raw frame off the front of `src`, or `None` if the frame is
  /// still incomplete. Enforces the length ceiling before any allocation;
  /// on violation no bytes are consumed and the connection must be closed.
  pub fn decode_raw(src: &mut BytesMut) -> Result<Option<RawPacket>, ProtocolError> {
    if src.len() < 8 {
      return Ok(None);
    }

    // Peek at the kind and length without consuming
    let kind = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
    let length = u32::from_le_bytes([src[4], src[5], src[6], src[7]]);

    if length > MAX_FRAME_LEN {
      return Err(ProtocolError::LengthOutOfRange { length, max: MAX_FRAME_LEN });
    }

    // Check if we have enough data for the full packet
    if src.len() < 8 + length as usize {
      return Ok(None);
    }

    src.advance(8);
    let payload = src.split_to(length as usize).freeze();
    Ok(Some(RawPacket { kind, payload }))
  }
}

impl Encoder<Packet> for RawCodec {
  type Error = ProtocolError;

  fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
    match item {
      Packet::Welcome { key } => {
        dst.put_u32_le(frame_kind::WELCOME);
        dst.put_u32_le(4);
        dst.put_u32_le(key);
      }

      Packet::Login(login) => {
        let mut payload = BytesMut::new();
        payload.put_u32_le(login.uin);
        payload.put_u32_le(login.hash);
        payload.put_u32_le(login.status as u32);
        payload.put_u32_le(login.version);
        put_ipv4(&mut payload, login.local_ip);
        payload.put_u16_le(login.local_port);

        dst.put_u32_le(frame_kind::LOGIN);
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&payload);
      }

      Packet::LoginOk => {
        dst.put_u32_le(frame_kind::LOGIN_OK);
        dst.put_u32_le(0);
      }

      Packet::LoginFailed => {
        dst.put_u32_le(frame_kind::LOGIN_FAILED);
        dst.put_u32_le(0);
      }

      Packet::Ping => {
        dst.put_u32_le(frame_kind::PING);
        dst.put_u32_le(0);
      }

      Packet::Pong => {
        dst.put_u32_le(frame_kind::PONG);
        dst.put_u32_le(0);
      }

      Packet::Disconnect => {
        dst.put_u32_le(frame_kind::DISCONNECTING);
        dst.put_u32_le(0);
      }

      Packet::SetStatus { status } => {
        dst.put_u32_le(frame_kind::NEW_STATUS);
        dst.put_u32_le(4);
        dst.put_u32_le(status as u32);
      }

      Packet::SendMessage { recipient, seq, text } => {
        let mut payload = BytesMut::new();
        payload.put_u32_le(recipient);
        payload.put_u32_le(seq);
        payload.put_slice(&encode_cp1252(&text));
        payload.put_u8(0); // NUL terminator

        dst.put_u32_le(frame_kind::SEND_MSG);
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&payload);
      }

      Packet::RecvMessage { sender, seq, time, text } => {
        let mut payload = BytesMut::new();
        payload.put_u32_le(sender);
        payload.put_u32_le(seq);
        payload.put_u32_le(time);
        payload.put_slice(&encode_cp1252(&text));
        payload.put_u8(0); // NUL terminator

        dst.put_u32_le(frame_kind::RECV_MSG);
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&payload);
      }

      Packet::StatusChange { who, status } => {
        dst.put_u32_le(frame_kind::STATUS_CHANGE);
        dst.put_u32_le(8);
        dst.put_u32_le(who);
        dst.put_u32_le(status as u32);
      }

      Packet::RendezvousPropose(propose) => {
        let mut payload = BytesMut::new();
        propose.encode_to(&mut payload);

        dst.put_u32_le(frame_kind::RENDEZVOUS_PROPOSE);
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&payload);
      }

      Packet::RendezvousAccept { cookie, kind } => {
        dst.put_u32_le(frame_kind::RENDEZVOUS_ACCEPT);
        dst.put_u32_le(10);
        dst.put_slice(&cookie);
        dst.put_u16_le(kind);
      }

      Packet::RendezvousCancel { cookie, kind } => {
        dst.put_u32_le(frame_kind::RENDEZVOUS_CANCEL);
        dst.put_u32_le(10);
        dst.put_slice(&cookie);
        dst.put_u16_le(kind);
      }
    }
    Ok(())
  }
}

impl Decoder for RawCodec {
  type Item = Packet;
  type Error = ProtocolError;

  fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
    let raw = match Self::decode_raw(src)? {
      Some(raw) => raw,
      None => return Ok(None),
    };

    let mut payload = BytesMut::from(raw.payload.as_ref());
    let length = payload.len();

    match raw.kind {
      frame_kind::WELCOME => {
        if length < 4 {
          return Err(ProtocolError::Truncated);
        }
        let key = payload.get_u32_le();
        Ok(Some(Packet::Welcome { key }))
      }

      frame_kind::LOGIN => {
        // 4 + 4 + 4 + 4 + 4 + 2 fixed bytes
        if length < 22 {
          return Err(ProtocolError::Truncated);
        }
        let uin = payload.get_u32_le();
        let hash = payload.get_u32_le();
        let status_raw = payload.get_u32_le();
        let version = payload.get_u32_le();
        let local_ip = get_ipv4(&mut payload);
        let local_port = payload.get_u16_le();

        Ok(Some(Packet::Login(LoginRequest {
          uin,
          hash,
          status: status_raw.try_into().unwrap_or_default(),
          version,
          local_ip,
          local_port,
        })))
      }

      frame_kind::LOGIN_OK => Ok(Some(Packet::LoginOk)),
      frame_kind::LOGIN_FAILED => Ok(Some(Packet::LoginFailed)),
      frame_kind::PING => Ok(Some(Packet::Ping)),
      frame_kind::PONG => Ok(Some(Packet::Pong)),
      frame_kind::DISCONNECTING => Ok(Some(Packet::Disconnect)),

      frame_kind::NEW_STATUS => {
        if length < 4 {
          return Err(ProtocolError::Truncated);
        }
        let status_raw = payload.get_u32_le();
        Ok(Some(Packet::SetStatus {
          status: status_raw.try_into().unwrap_or_default(),
        }))
      }

      frame_kind::SEND_MSG => {
        if length < 8 {
          return Err(ProtocolError::Truncated);
        }
        let recipient = payload.get_u32_le();
        let seq = payload.get_u32_le();
        let text = read_nul_terminated(&mut payload);
        Ok(Some(Packet::SendMessage { recipient, seq, text }))
      }

      frame_kind::RECV_MSG => {
        if length < 12 {
          return Err(ProtocolError::Truncated);
        }
        let sender = payload.get_u32_le();
        let seq = payload.get_u32_le();
        let time = payload.get_u32_le();
        let text = read_nul_terminated(&mut payload);
        Ok(Some(Packet::RecvMessage { sender, seq, time, text }))
      }

      frame_kind::STATUS_CHANGE => {
        if length < 8 {
          return Err(ProtocolError::Truncated);
        }
        let who = payload.get_u32_le();
        let status_raw = payload.get_u32_le();
        Ok(Some(Packet::StatusChange {
          who,
          status: status_raw.try_into().unwrap_or_default(),
        }))
      }

      frame_kind::RENDEZVOUS_PROPOSE => {
        let propose = RendezvousPropose::decode_from(&mut payload)?;
        Ok(Some(Packet::RendezvousPropose(propose)))
      }

      frame_kind::RENDEZVOUS_ACCEPT => {
        let (cookie, kind) = read_cookie_reply(&mut payload)?;
        Ok(Some(Packet::RendezvousAccept { cookie, kind }))
      }

      frame_kind::RENDEZVOUS_CANCEL => {
        let (cookie, kind) = read_cookie_reply(&mut payload)?;
        Ok(Some(Packet::RendezvousCancel { cookie, kind }))
      }

      other => Err(ProtocolError::UnsupportedKind(other)),
    }
  }
}

fn read_nul_terminated(payload: &mut BytesMut) -> String {
  let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
  let text = decode_cp1252(&payload[..end]);
  payload.advance(payload.len());
  text
}

fn read_cookie_reply(payload: &mut BytesMut) -> Result<([u8; COOKIE_LEN], u16), ProtocolError> {
  if payload.len() < COOKIE_LEN + 2 {
    return Err(ProtocolError::Truncated);
  }
  let mut cookie = [0u8; COOKIE_LEN];
  cookie.copy_from_slice(&payload.split_to(COOKIE_LEN));
  let kind = payload.get_u16_le();
  Ok((cookie, kind))
}

#[cfg(test)]
mod tests {
  use std::net::Ipv4Addr;
  use claims::{assert_ok, assert_ok_eq};
  use super::*;
  use crate::consts::caps;
  use crate::packets::{FileInfo, RendezvousPropose};

  fn encode(packet: Packet) -> BytesMut {
    let mut buf = BytesMut::new();
    assert_ok!(RawCodec.encode(packet, &mut buf));
    buf
  }

  #[test]
  fn it_handles_welcome_packet() {
    let mut output = BytesMut::new();
    let mut codec = RawCodec;

    assert_ok!(codec.encode(Packet::Welcome { key: 0x5eed }, &mut output));
    insta::assert_binary_snapshot!(".packet", output.to_vec());

    let packet = codec.decode(&mut output.clone());
    assert_ok_eq!(packet, Some(Packet::Welcome { key: 0x5eed }));
  }

  #[test]
  fn it_handles_status_change_packet() {
    let mut output = BytesMut::new();
    let mut codec = RawCodec;

    let packet = Packet::StatusChange { who: 777, status: UserStatus::Away };
    assert_ok!(codec.encode(packet.clone(), &mut output));
    insta::assert_binary_snapshot!(".packet", output.to_vec());

    let decoded = codec.decode(&mut output.clone());
    assert_ok_eq!(decoded, Some(packet));
  }

  #[test]
  fn round_trips_every_packet_shape() {
    let packets = vec![
      Packet::Welcome { key: 0x5eed },
      Packet::Login(LoginRequest::login(12345, 0x5eed, "secret")),
      Packet::LoginOk,
      Packet::LoginFailed,
      Packet::Ping,
      Packet::Pong,
      Packet::Disconnect,
      Packet::SetStatus { status: UserStatus::Invisible },
      Packet::SendMessage { recipient: 777, seq: 3, text: "hello".into() },
      Packet::RecvMessage { sender: 777, seq: 3, time: 1_700_000_000, text: "hi".into() },
      Packet::StatusChange { who: 777, status: UserStatus::Away },
      Packet::RendezvousPropose(RendezvousPropose {
        cookie: *b"q7rm2xk\0",
        capability: caps::SEND_FILE,
        seq: 1,
        requester: 12345,
        internal_ip: Ipv4Addr::new(10, 0, 0, 2),
        port: 5190,
        file_info: Some(FileInfo {
          name: "notes.txt".into(),
          total_files: 1,
          total_size: 512,
        }),
      }),
      Packet::RendezvousAccept { cookie: *b"q7rm2xk\0", kind: 0x0002 },
      Packet::RendezvousCancel { cookie: *b"q7rm2xk\0", kind: 0x0002 },
    ];

    for packet in packets {
      let mut buf = encode(packet.clone());
      assert_ok_eq!(RawCodec.decode(&mut buf), Some(packet.clone()));
      assert!(buf.is_empty(), "decoder left bytes behind for {packet:?}");
    }
  }

  #[test]
  fn incomplete_header_yields_none() {
    let mut buf = BytesMut::from(&[0x01, 0x00, 0x00][..]);
    assert_ok_eq!(RawCodec.decode(&mut buf), None);
    assert_eq!(buf.len(), 3);
  }

  #[test]
  fn resumes_after_partial_payload() {
    let full = encode(Packet::RecvMessage {
      sender: 42,
      seq: 1,
      time: 0,
      text: "partial read".into(),
    });

    // Feed the header plus half the payload, as a stalled non-blocking
    // read would leave it
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&full[..12]);
    assert_ok_eq!(RawCodec.decode(&mut buf), None);

    // Second call continues filling; it must not re-read the header
    buf.extend_from_slice(&full[12..]);
    let expected =
      Packet::RecvMessage { sender: 42, seq: 1, time: 0, text: "partial read".into() };
    assert_ok_eq!(RawCodec.decode(&mut buf), Some(expected.clone()));

    // One-chunk decode agrees with the two-chunk decode
    let mut whole = full.clone();
    assert_ok_eq!(RawCodec.decode(&mut whole), Some(expected));
  }

  #[test]
  fn oversize_length_is_fatal_and_consumes_nothing() {
    let mut buf = BytesMut::new();
    buf.put_u32_le(frame_kind::PING);
    buf.put_u32_le(65536);
    let before = buf.clone();

    match RawCodec.decode(&mut buf) {
      Err(ProtocolError::LengthOutOfRange { length, max }) => {
        assert_eq!(length, 65536);
        assert_eq!(max, MAX_FRAME_LEN);
      }
      other => panic!("expected LengthOutOfRange, got {other:?}"),
    }
    // No partial payload is silently accepted
    assert_eq!(buf, before);
  }

  #[test]
  fn length_at_the_bound_is_accepted() {
    let mut buf = BytesMut::new();
    buf.put_u32_le(0x00f0); // raw frame, kind not interpreted here
    buf.put_u32_le(MAX_FRAME_LEN);
    buf.put_bytes(0xab, MAX_FRAME_LEN as usize);

    let raw = assert_ok!(RawCodec::decode_raw(&mut buf)).unwrap();
    assert_eq!(raw.kind, 0x00f0);
    assert_eq!(raw.payload.len(), MAX_FRAME_LEN as usize);
    assert!(buf.is_empty());
  }

  #[test]
  fn unknown_kind_is_rejected() {
    let mut buf = BytesMut::new();
    buf.put_u32_le(0xdead);
    buf.put_u32_le(0);
    assert!(matches!(
      RawCodec.decode(&mut buf),
      Err(ProtocolError::UnsupportedKind(0xdead))
    ));
  }
}
