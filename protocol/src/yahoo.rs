//! Yahoo-style raw packet framing.
//!
//! A fixed 104-byte header - version string, content length, service code,
//! connection id, magic id, message type, and two fixed-width nick fields -
//! followed by `length` bytes of content. Little-endian, like everything
//! else at this layer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use crate::codec_helpers::{get_fixed_str, put_fixed_str};
use crate::consts::MAX_FRAME_LEN;
use crate::error::ProtocolError;

/// Size of the fixed header.
pub const YAHOO_PACKET_HEADER_SIZE: usize = 104;

/// Width of each nick field.
const NICK_LEN: usize = 36;
/// Width of the version field.
const VERSION_LEN: usize = 12;

/// Service codes carried in the header.
pub mod service {
  pub const LOGON: u32 = 0x01;
  pub const LOGOFF: u32 = 0x02;
  pub const MESSAGE: u32 = 0x06;
  pub const NEW_CONTACT: u32 = 0x0f;
  pub const PING: u32 = 0x12;
  pub const FILE_TRANSFER: u32 = 0x46;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YahooPacket {
  /// Protocol version string, e.g. "YPNS1.4" or "YHOO1.0".
  pub version: String,
  pub service: u32,
  pub connection_id: u32,
  pub magic_id: u32,
  pub msgtype: u32,
  /// Sender nick.
  pub nick1: String,
  /// Recipient nick.
  pub nick2: String,
  pub content: Bytes,
}

impl YahooPacket {
  pub fn new(service: u32, nick1: &str, nick2: &str, content: impl Into<Bytes>) -> Self {
    Self {
      version: "YPNS1.4".to_string(),
      service,
      connection_id: 0,
      magic_id: 0,
      msgtype: 0,
      nick1: nick1.to_string(),
      nick2: nick2.to_string(),
      content: content.into(),
    }
  }
}

#[derive(Debug, Default)]
pub struct YahooCodec;

impl Encoder<YahooPacket> for YahooCodec {
  type Error = ProtocolError;

  fn encode(&mut self, item: YahooPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
    dst.reserve(YAHOO_PACKET_HEADER_SIZE + item.content.len());
    put_fixed_str(dst, &item.version, VERSION_LEN);
    dst.put_u32_le(item.content.len() as u32);
    dst.put_u32_le(item.service);
    dst.put_u32_le(item.connection_id);
    dst.put_u32_le(item.magic_id);
    dst.put_u32_le(item.msgtype);
    put_fixed_str(dst, &item.nick1, NICK_LEN);
    put_fixed_str(dst, &item.nick2, NICK_LEN);
    dst.put_slice(&item.content);
    Ok(())
  }
}

impl Decoder for YahooCodec {
  type Item = YahooPacket;
  type Error = ProtocolError;

  fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
    if src.len() < YAHOO_PACKET_HEADER_SIZE {
      return Ok(None);
    }

    // Content length sits right after the version field; bound-check it
    // before waiting for (or allocating) the body
    let length = u32::from_le_bytes([
      src[VERSION_LEN],
      src[VERSION_LEN + 1],
      src[VERSION_LEN + 2],
      src[VERSION_LEN + 3],
    ]);
    if length > MAX_FRAME_LEN {
      return Err(ProtocolError::LengthOutOfRange { length, max: MAX_FRAME_LEN });
    }

    if src.len() < YAHOO_PACKET_HEADER_SIZE + length as usize {
      return Ok(None);
    }

    let version = get_fixed_str(src, VERSION_LEN);
    src.advance(4); // length, already read
    let service = src.get_u32_le();
    let connection_id = src.get_u32_le();
    let magic_id = src.get_u32_le();
    let msgtype = src.get_u32_le();
    let nick1 = get_fixed_str(src, NICK_LEN);
    let nick2 = get_fixed_str(src, NICK_LEN);
    let content = src.split_to(length as usize).freeze();

    Ok(Some(YahooPacket {
      version,
      service,
      connection_id,
      magic_id,
      msgtype,
      nick1,
      nick2,
      content,
    }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn header_is_exactly_104_bytes() {
    let mut buf = BytesMut::new();
    YahooCodec.encode(YahooPacket::new(service::PING, "alice", "", ""), &mut buf).unwrap();
    assert_eq!(buf.len(), YAHOO_PACKET_HEADER_SIZE);
    assert_eq!(&buf[0..7], b"YPNS1.4");
    assert_eq!(&buf[12..16], &0u32.to_le_bytes());
    assert_eq!(&buf[16..20], &service::PING.to_le_bytes());
    assert_eq!(&buf[32..37], b"alice");
  }

  #[test]
  fn round_trips_with_content() {
    let packet = YahooPacket::new(service::MESSAGE, "alice", "bob", &b"hey there"[..]);
    let mut buf = BytesMut::new();
    YahooCodec.encode(packet.clone(), &mut buf).unwrap();

    let decoded = YahooCodec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(decoded, packet);
    assert!(buf.is_empty());
  }

  #[test]
  fn waits_for_full_content() {
    let packet = YahooPacket::new(service::MESSAGE, "alice", "bob", &b"split body"[..]);
    let mut full = BytesMut::new();
    YahooCodec.encode(packet.clone(), &mut full).unwrap();

    let mut buf = BytesMut::new();
    buf.extend_from_slice(&full[..YAHOO_PACKET_HEADER_SIZE + 3]);
    assert_eq!(YahooCodec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(&full[YAHOO_PACKET_HEADER_SIZE + 3..]);
    assert_eq!(YahooCodec.decode(&mut buf).unwrap().unwrap(), packet);
  }

  #[test]
  fn oversize_content_length_is_fatal() {
    let mut buf = BytesMut::new();
    YahooCodec.encode(YahooPacket::new(service::PING, "a", "b", ""), &mut buf).unwrap();
    buf[12..16].copy_from_slice(&0x0001_0000u32.to_le_bytes());

    assert!(matches!(
      YahooCodec.decode(&mut buf),
      Err(ProtocolError::LengthOutOfRange { length: 0x0001_0000, .. })
    ));
  }
}
