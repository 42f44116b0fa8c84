//! Rendezvous proposal payloads.
//!
//! A proposal rides on the control channel and invites the peer to open a
//! direct connection: `cookie[8] + capability[16]` followed by a TLV chain
//! with the initiator's address and, for file sends, the file metadata.

use std::net::Ipv4Addr;
use bytes::BytesMut;
use crate::codec_helpers::{decode_cp1252, encode_cp1252, get_ipv4};
use crate::consts::caps;
use crate::error::ProtocolError;
use crate::tlv::{Tlv, TlvList};

/// TLV kinds used inside a rendezvous proposal.
pub mod tlv_kind {
  /// Proposal sequence number (u16).
  pub const SEQ: u16 = 0x000a;
  /// Initiator's internal IPv4 address (4 bytes).
  pub const INTERNAL_IP: u16 = 0x0003;
  /// Initiator's listening port (u16).
  pub const PORT: u16 = 0x0005;
  /// Initiator's UIN (u32).
  pub const REQUESTER: u16 = 0x0004;
  /// File metadata: u16 total files, u32 total size, NUL-terminated name.
  pub const FILE_INFO: u16 = 0x2711;
}

/// The negotiation family a cookie belongs to. Stored with each pending
/// cookie and checked on every lookup; a mismatch is treated as "not found".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RendezvousKind {
  DirectIm = 0x0001,
  SendFile = 0x0002,
  GetFile = 0x0003,
}

impl RendezvousKind {
  pub fn capability(self) -> [u8; 16] {
    match self {
      RendezvousKind::DirectIm => caps::DIRECT_IM,
      RendezvousKind::SendFile => caps::SEND_FILE,
      RendezvousKind::GetFile => caps::GET_FILE,
    }
  }

  pub fn from_capability(guid: &[u8; 16]) -> Option<Self> {
    match *guid {
      caps::DIRECT_IM => Some(RendezvousKind::DirectIm),
      caps::SEND_FILE => Some(RendezvousKind::SendFile),
      caps::GET_FILE => Some(RendezvousKind::GetFile),
      _ => None,
    }
  }
}

impl TryFrom<u16> for RendezvousKind {
  type Error = u16;

  fn try_from(value: u16) -> Result<Self, Self::Error> {
    match value {
      0x0001 => Ok(RendezvousKind::DirectIm),
      0x0002 => Ok(RendezvousKind::SendFile),
      0x0003 => Ok(RendezvousKind::GetFile),
      _ => Err(value),
    }
  }
}

/// File metadata carried in a send-file proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
  pub name: String,
  pub total_files: u16,
  pub total_size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RendezvousPropose {
  /// Correlation cookie; the reply must echo these exact bytes.
  pub cookie: [u8; 8],
  /// Capability GUID identifying the negotiation family.
  pub capability: [u8; 16],
  /// Proposal sequence number (1 = initial proposal).
  pub seq: u16,
  /// Initiator's UIN.
  pub requester: u32,
  pub internal_ip: Ipv4Addr,
  pub port: u16,
  /// Present for send-file proposals only.
  pub file_info: Option<FileInfo>,
}

impl RendezvousPropose {
  pub fn kind(&self) -> Option<RendezvousKind> {
    RendezvousKind::from_capability(&self.capability)
  }

  pub fn encode_to(&self, dst: &mut BytesMut) {
    dst.extend_from_slice(&self.cookie);
    dst.extend_from_slice(&self.capability);

    let mut tlvs = TlvList::new();
    tlvs.push(Tlv::u16(tlv_kind::SEQ, self.seq));
    tlvs.push(Tlv::u32(tlv_kind::REQUESTER, self.requester));
    tlvs.push(Tlv::new(tlv_kind::INTERNAL_IP, self.internal_ip.octets().to_vec()));
    tlvs.push(Tlv::u16(tlv_kind::PORT, self.port));

    if let Some(ref info) = self.file_info {
      let mut value = BytesMut::new();
      value.extend_from_slice(&info.total_files.to_le_bytes());
      value.extend_from_slice(&info.total_size.to_le_bytes());
      value.extend_from_slice(&encode_cp1252(&info.name));
      value.extend_from_slice(&[0]); // NUL terminator
      tlvs.push(Tlv::new(tlv_kind::FILE_INFO, value.freeze()));
    }

    tlvs.write_to(dst);
  }

  pub fn decode_from(src: &mut BytesMut) -> Result<Self, ProtocolError> {
    if src.len() < 24 {
      return Err(ProtocolError::Truncated);
    }

    let mut cookie = [0u8; 8];
    cookie.copy_from_slice(&src.split_to(8));
    let mut capability = [0u8; 16];
    capability.copy_from_slice(&src.split_to(16));

    let tlvs = TlvList::read_all(src)?;
    let seq = tlvs.get_u16(tlv_kind::SEQ).ok_or(ProtocolError::Truncated)?;
    let requester = tlvs.get_u32(tlv_kind::REQUESTER).ok_or(ProtocolError::Truncated)?;
    let port = tlvs.get_u16(tlv_kind::PORT).ok_or(ProtocolError::Truncated)?;
    let internal_ip = match tlvs.get_bytes(tlv_kind::INTERNAL_IP) {
      Some(octets) if octets.len() == 4 => {
        let mut buf = BytesMut::from(octets);
        get_ipv4(&mut buf)
      }
      _ => return Err(ProtocolError::Truncated),
    };

    let file_info = match tlvs.get_bytes(tlv_kind::FILE_INFO) {
      Some(value) if value.len() >= 7 => {
        let total_files = u16::from_le_bytes([value[0], value[1]]);
        let total_size = u32::from_le_bytes([value[2], value[3], value[4], value[5]]);
        let name_bytes = &value[6..];
        let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
        Some(FileInfo {
          name: decode_cp1252(&name_bytes[..end]),
          total_files,
          total_size,
        })
      }
      Some(_) => return Err(ProtocolError::Truncated),
      None => None,
    };

    Ok(Self {
      cookie,
      capability,
      seq,
      requester,
      internal_ip,
      port,
      file_info,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> RendezvousPropose {
    RendezvousPropose {
      cookie: *b"a1b2c3d\0",
      capability: caps::SEND_FILE,
      seq: 1,
      requester: 12345,
      internal_ip: Ipv4Addr::new(192, 168, 1, 7),
      port: 5190,
      file_info: Some(FileInfo {
        name: "listing.txt".to_string(),
        total_files: 1,
        total_size: 4096,
      }),
    }
  }

  #[test]
  fn round_trips_send_file_proposal() {
    let propose = sample();
    let mut buf = BytesMut::new();
    propose.encode_to(&mut buf);

    let decoded = RendezvousPropose::decode_from(&mut buf).unwrap();
    assert_eq!(decoded, propose);
    assert_eq!(decoded.kind(), Some(RendezvousKind::SendFile));
  }

  #[test]
  fn round_trips_direct_im_proposal_without_file_info() {
    let propose = RendezvousPropose {
      capability: caps::DIRECT_IM,
      file_info: None,
      ..sample()
    };
    let mut buf = BytesMut::new();
    propose.encode_to(&mut buf);

    let decoded = RendezvousPropose::decode_from(&mut buf).unwrap();
    assert_eq!(decoded.file_info, None);
    assert_eq!(decoded.kind(), Some(RendezvousKind::DirectIm));
  }

  #[test]
  fn unknown_capability_has_no_kind() {
    let propose = RendezvousPropose {
      capability: [0xff; 16],
      ..sample()
    };
    assert_eq!(propose.kind(), None);
  }

  #[test]
  fn rejects_short_payload() {
    let mut buf = BytesMut::from(&b"too short"[..]);
    assert!(matches!(
      RendezvousPropose::decode_from(&mut buf),
      Err(ProtocolError::Truncated)
    ));
  }
}
