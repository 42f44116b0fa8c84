//! Legacy password hashing.

/// Compute the 32-bit legacy login hash.
///
/// The server's welcome packet carries a per-session key; the client folds
/// the password into a multiplicative hash and mixes the key in at the end.
/// Cryptographically weak, but it must be reproduced exactly for wire
/// compatibility with historical clients - do not strengthen it.
pub fn legacy_login_hash(password: &str, server_key: u32) -> u32 {
  let mut hash: u32 = 1;

  for byte in password.bytes() {
    hash = hash.wrapping_mul(byte as u32 + 1);
  }

  hash.wrapping_mul(server_key)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_hashes_password() {
    // Same password + key should produce same hash
    assert_eq!(
      legacy_login_hash("Hello world", 333),
      legacy_login_hash("Hello world", 333)
    );

    // Different key should produce different hash
    assert_ne!(
      legacy_login_hash("Hello world", 333),
      legacy_login_hash("Hello world", 334)
    );

    // Different password should produce different hash
    assert_ne!(
      legacy_login_hash("Hello", 333),
      legacy_login_hash("Hello world!", 333)
    );

    // Empty password leaves the hash at 1, so the result is the key itself
    assert_eq!(legacy_login_hash("", 0x1234), 0x1234);

    // "A" folds to 66, times key 3
    assert_eq!(legacy_login_hash("A", 3), 198);

    // Snapshot test for consistent hash output
    let hash = legacy_login_hash("abc", 0x5eed);
    insta::assert_debug_snapshot!(hash);
  }
}
