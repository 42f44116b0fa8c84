//! Cookie correlation for rendezvous requests.
//!
//! Every outbound rendezvous request that expects a correlated reply gets an
//! 8-byte cookie: 7 random alphanumeric bytes plus a NUL terminator, kept
//! short for wire compatibility with text-based companion protocols. The jar
//! owns the per-request state until the reply claims it or an expiry sweep
//! discards it.

use std::collections::HashMap;
use std::time::Duration;
use rand::Rng;
use tokio::time::Instant;
use oft_protocol::consts::COOKIE_LEN;
use oft_protocol::RendezvousKind;
use crate::rendezvous::RendezvousState;

const COOKIE_ALPHABET: &[u8] =
  b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cookie(pub [u8; COOKIE_LEN]);

impl Cookie {
  fn generate() -> Self {
    let mut rng = rand::rng();
    let mut bytes = [0u8; COOKIE_LEN];
    for byte in bytes[..COOKIE_LEN - 1].iter_mut() {
      *byte = COOKIE_ALPHABET[rng.random_range(0..COOKIE_ALPHABET.len())];
    }
    Self(bytes)
  }

  pub fn bytes(&self) -> [u8; COOKIE_LEN] {
    self.0
  }
}

#[derive(Debug)]
struct PendingCookie {
  kind: RendezvousKind,
  issued_at: Instant,
  state: RendezvousState,
}

/// Table of pending cookies for one session. Mutated only by the session's
/// own task, so it needs no locking.
#[derive(Debug, Default)]
pub struct CookieJar {
  pending: HashMap<[u8; COOKIE_LEN], PendingCookie>,
}

impl CookieJar {
  pub fn new() -> Self {
    Self::default()
  }

  /// Issue a fresh cookie owning `state`. 7 alphanumeric bytes collide
  /// non-trivially at scale, so regenerate until the bytes are unused.
  pub fn issue(&mut self, kind: RendezvousKind, state: RendezvousState) -> Cookie {
    loop {
      let cookie = Cookie::generate();
      if !self.pending.contains_key(&cookie.0) {
        self.pending.insert(cookie.0, PendingCookie {
          kind,
          issued_at: Instant::now(),
          state,
        });
        return cookie;
      }
    }
  }

  /// Claim the state for a reply. Lookup is by exact byte match and the
  /// kind must agree; a mismatch is treated as "not found". On success the
  /// entry is removed and ownership of the state transfers to the caller.
  pub fn claim(&mut self, bytes: &[u8; COOKIE_LEN], kind: RendezvousKind) -> Option<RendezvousState> {
    match self.pending.get(bytes) {
      Some(pending) if pending.kind == kind => {
        self.pending.remove(bytes).map(|p| p.state)
      }
      Some(pending) => {
        tracing::warn!(
          expected = ?pending.kind,
          got = ?kind,
          "cookie kind mismatch, treating as unknown cookie"
        );
        None
      }
      None => None,
    }
  }

  /// Borrow the state without consuming the cookie.
  pub fn peek(&self, bytes: &[u8; COOKIE_LEN], kind: RendezvousKind) -> Option<&RendezvousState> {
    self.pending.get(bytes)
      .filter(|p| p.kind == kind)
      .map(|p| &p.state)
  }

  /// Drop cookies older than `max_age`. Best-effort cleanup: a reply that is
  /// still in flight for a swept cookie will be dropped as unknown.
  pub fn sweep_expired(&mut self, max_age: Duration) -> usize {
    let before = self.pending.len();
    self.pending.retain(|_, p| p.issued_at.elapsed() < max_age);
    let swept = before - self.pending.len();
    if swept > 0 {
      tracing::debug!(swept, "swept expired rendezvous cookies");
    }
    swept
  }

  pub fn len(&self) -> usize {
    self.pending.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use oft_protocol::Uin;
  use crate::rendezvous::DirectImState;

  fn im_state(peer: Uin) -> RendezvousState {
    RendezvousState::DirectIm(DirectImState::new(peer))
  }

  #[test]
  fn cookie_is_seven_alphanumerics_and_a_nul() {
    let cookie = Cookie::generate();
    assert!(cookie.0[..COOKIE_LEN - 1].iter().all(|b| COOKIE_ALPHABET.contains(b)));
    assert_eq!(cookie.0[COOKIE_LEN - 1], 0);
  }

  #[test]
  fn issue_then_claim_round_trips() {
    let mut jar = CookieJar::new();
    let cookie = jar.issue(RendezvousKind::DirectIm, im_state(42));

    match jar.claim(&cookie.bytes(), RendezvousKind::DirectIm) {
      Some(RendezvousState::DirectIm(state)) => assert_eq!(state.peer, 42),
      other => panic!("expected direct-IM state, got {other:?}"),
    }

    // Claim consumes the entry
    assert!(jar.claim(&cookie.bytes(), RendezvousKind::DirectIm).is_none());
    assert!(jar.is_empty());
  }

  #[test]
  fn unknown_bytes_miss() {
    let mut jar = CookieJar::new();
    jar.issue(RendezvousKind::DirectIm, im_state(1));
    assert!(jar.claim(b"zzzzzzz\0", RendezvousKind::DirectIm).is_none());
    assert_eq!(jar.len(), 1);
  }

  #[test]
  fn kind_mismatch_is_treated_as_not_found() {
    let mut jar = CookieJar::new();
    let cookie = jar.issue(RendezvousKind::GetFile, im_state(7));

    assert!(jar.claim(&cookie.bytes(), RendezvousKind::SendFile).is_none());
    // The entry survives a mismatched claim
    assert!(jar.peek(&cookie.bytes(), RendezvousKind::GetFile).is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn sweep_removes_only_expired_cookies() {
    let max_age = Duration::from_secs(60);
    let mut jar = CookieJar::new();
    let old = jar.issue(RendezvousKind::DirectIm, im_state(1));

    tokio::time::advance(Duration::from_secs(59)).await;
    assert_eq!(jar.sweep_expired(max_age), 0);
    assert!(jar.peek(&old.bytes(), RendezvousKind::DirectIm).is_some());

    let young = jar.issue(RendezvousKind::DirectIm, im_state(2));
    tokio::time::advance(Duration::from_secs(2)).await;

    assert_eq!(jar.sweep_expired(max_age), 1);
    assert!(jar.peek(&old.bytes(), RendezvousKind::DirectIm).is_none());
    assert!(jar.peek(&young.bytes(), RendezvousKind::DirectIm).is_some());
  }
}
