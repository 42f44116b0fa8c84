//! Type-length-value sub-fields used inside rendezvous payloads.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::error::ProtocolError;

/// A single `{u16 kind, u16 length, value}` field, little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
  pub kind: u16,
  pub value: Bytes,
}

impl Tlv {
  pub fn new(kind: u16, value: impl Into<Bytes>) -> Self {
    Self { kind, value: value.into() }
  }

  pub fn u16(kind: u16, value: u16) -> Self {
    Self::new(kind, value.to_le_bytes().to_vec())
  }

  pub fn u32(kind: u16, value: u32) -> Self {
    Self::new(kind, value.to_le_bytes().to_vec())
  }

  pub fn write_to(&self, dst: &mut BytesMut) {
    dst.put_u16_le(self.kind);
    dst.put_u16_le(self.value.len() as u16);
    dst.put_slice(&self.value);
  }

  pub fn read_from(src: &mut BytesMut) -> Result<Self, ProtocolError> {
    if src.remaining() < 4 {
      return Err(ProtocolError::Truncated);
    }
    let kind = src.get_u16_le();
    let len = src.get_u16_le() as usize;
    if src.remaining() < len {
      return Err(ProtocolError::Truncated);
    }
    let value = src.split_to(len).freeze();
    Ok(Self { kind, value })
  }
}

/// An ordered chain of TLVs, as carried in a rendezvous proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlvList(Vec<Tlv>);

impl TlvList {
  pub fn new() -> Self {
    Self(Vec::new())
  }

  pub fn push(&mut self, tlv: Tlv) {
    self.0.push(tlv);
  }

  /// Consume every remaining byte of `src` as a TLV chain.
  pub fn read_all(src: &mut BytesMut) -> Result<Self, ProtocolError> {
    let mut tlvs = Vec::new();
    while src.has_remaining() {
      tlvs.push(Tlv::read_from(src)?);
    }
    Ok(Self(tlvs))
  }

  pub fn write_to(&self, dst: &mut BytesMut) {
    for tlv in &self.0 {
      tlv.write_to(dst);
    }
  }

  /// First TLV with the given kind, if any.
  pub fn get(&self, kind: u16) -> Option<&Tlv> {
    self.0.iter().find(|t| t.kind == kind)
  }

  pub fn get_u16(&self, kind: u16) -> Option<u16> {
    let tlv = self.get(kind)?;
    let bytes: [u8; 2] = tlv.value.as_ref().try_into().ok()?;
    Some(u16::from_le_bytes(bytes))
  }

  pub fn get_u32(&self, kind: u16) -> Option<u32> {
    let tlv = self.get(kind)?;
    let bytes: [u8; 4] = tlv.value.as_ref().try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
  }

  pub fn get_bytes(&self, kind: u16) -> Option<&[u8]> {
    self.get(kind).map(|t| t.value.as_ref())
  }
}
