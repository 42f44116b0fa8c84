//! Login packet structures.

use std::net::Ipv4Addr;
use crate::consts::{Uin, UserStatus, CLIENT_VERSION};
use crate::hash::legacy_login_hash;

/// Login packet - sent by the client to authenticate.
///
/// After receiving `Welcome` with the session key, the client computes the
/// legacy 32-bit password hash and sends this packet.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginRequest {
  /// User identification number.
  pub uin: Uin,
  /// Password hash (32-bit, computed with `legacy_login_hash`).
  pub hash: u32,
  /// Initial presence status.
  pub status: UserStatus,
  /// Client version constant.
  pub version: u32,
  /// Local IP advertised for rendezvous connections.
  pub local_ip: Ipv4Addr,
  /// Local port advertised for rendezvous connections.
  pub local_port: u16,
}

impl Default for LoginRequest {
  fn default() -> Self {
    Self {
      uin: 0,
      hash: 0,
      status: UserStatus::Available,
      version: CLIENT_VERSION,
      local_ip: Ipv4Addr::UNSPECIFIED,
      local_port: 0,
    }
  }
}

impl LoginRequest {
  /// Create a login packet with the given credentials.
  pub fn login(uin: Uin, server_key: u32, password: &str) -> Self {
    let hash = legacy_login_hash(password, server_key);
    Self {
      uin,
      hash,
      ..Default::default()
    }
  }
}
