//! Helper functions shared by the wire codecs.

use std::borrow::Cow;
use std::net::Ipv4Addr;
use bytes::{Buf, BufMut, BytesMut};
use encoding_rs::WINDOWS_1252;

/// Decode CP1252 (Windows-1252) bytes to a Rust String.
pub fn decode_cp1252(bytes: &[u8]) -> String {
  let (decoded, _, _) = WINDOWS_1252.decode(bytes);
  decoded.into_owned()
}

/// Encode a Rust String to CP1252 (Windows-1252) bytes.
pub fn encode_cp1252(s: &str) -> Cow<'_, [u8]> {
  let (encoded, _, _) = WINDOWS_1252.encode(s);
  encoded
}

/// Write a string into a zero-padded fixed-width field. Over-long input is
/// truncated; the field is never NUL-terminated if the text fills it exactly.
pub fn put_fixed_str(dst: &mut BytesMut, s: &str, width: usize) {
  let bytes = encode_cp1252(s);
  let take = bytes.len().min(width);
  dst.put_slice(&bytes[..take]);
  dst.put_bytes(0, width - take);
}

/// Read a fixed-width field, trimming trailing NUL padding.
pub fn get_fixed_str(src: &mut BytesMut, width: usize) -> String {
  let end = src[..width].iter().position(|&b| b == 0).unwrap_or(width);
  let s = decode_cp1252(&src[..end]);
  src.advance(width);
  s
}

pub fn put_ipv4(dst: &mut BytesMut, ip: Ipv4Addr) {
  dst.put_slice(&ip.octets());
}

pub fn get_ipv4(src: &mut BytesMut) -> Ipv4Addr {
  let ip = Ipv4Addr::new(src[0], src[1], src[2], src[3]);
  src.advance(4);
  ip
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fixed_str_pads_and_trims() {
    let mut buf = BytesMut::new();
    put_fixed_str(&mut buf, "listing.txt", 64);
    assert_eq!(buf.len(), 64);
    assert_eq!(&buf[..11], b"listing.txt");
    assert!(buf[11..].iter().all(|&b| b == 0));

    assert_eq!(get_fixed_str(&mut buf, 64), "listing.txt");
    assert!(buf.is_empty());
  }

  #[test]
  fn fixed_str_truncates_overlong_input() {
    let mut buf = BytesMut::new();
    put_fixed_str(&mut buf, "abcdef", 4);
    assert_eq!(&buf[..], b"abcd");
  }
}
