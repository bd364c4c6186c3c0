//! Challenge-response authentication
//!
//! A server that requires authentication sends SECURE_CHALLENGE with a
//! 32-byte nonce. The client answers inside the START arguments with
//! HMAC-SHA256(pre-shared key, nonce).

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use std::time::{Duration, Instant};

use crate::error::AuthError;
use crate::protocol::{StartArgs, CHALLENGE_LEN};

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of `message` under `key`
pub fn sign_challenge(key: &[u8], message: &[u8]) -> Result<[u8; CHALLENGE_LEN], AuthError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| AuthError::InvalidKey)?;
    mac.update(message);
    let digest = mac.finalize().into_bytes();

    let mut signed = [0u8; CHALLENGE_LEN];
    signed.copy_from_slice(&digest);
    Ok(signed)
}

/// Nonce received from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    nonce: [u8; CHALLENGE_LEN],
    received_at: Instant,
}

impl Challenge {
    pub fn new(nonce: [u8; CHALLENGE_LEN]) -> Self {
        Self {
            nonce,
            received_at: Instant::now(),
        }
    }

    /// Build from SECURE_CHALLENGE arguments; extra bytes are ignored
    pub fn from_args(args: &[u8]) -> Option<Self> {
        let nonce: [u8; CHALLENGE_LEN] = args.get(..CHALLENGE_LEN)?.try_into().ok()?;
        Some(Self::new(nonce))
    }

    pub fn nonce(&self) -> &[u8; CHALLENGE_LEN] {
        &self.nonce
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Time since the challenge arrived. Not enforced as an expiry.
    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }

    pub fn sign(&self, key: &[u8]) -> Result<[u8; CHALLENGE_LEN], AuthError> {
        sign_challenge(key, &self.nonce)
    }
}

/// Handshake state for one session: no challenge, or one pending challenge
#[derive(Debug, Default)]
pub struct Handshake {
    challenge: Mutex<Option<Challenge>>,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a SECURE_CHALLENGE. Returns false for a short nonce.
    pub fn on_challenge(&self, args: &[u8]) -> bool {
        match Challenge::from_args(args) {
            Some(challenge) => {
                tracing::info!("Server requested authentication");
                *self.challenge.lock() = Some(challenge);
                true
            }
            None => {
                tracing::warn!("Ignoring short challenge of {} bytes", args.len());
                false
            }
        }
    }

    pub fn challenge(&self) -> Option<Challenge> {
        self.challenge.lock().clone()
    }

    /// START arguments answering the outstanding challenge, if any.
    ///
    /// Fails with [`AuthError::MissingCredential`] when a challenge is
    /// pending and no key is available; nothing must be sent in that case.
    pub fn start_args(
        &self,
        key: Option<&[u8]>,
        tx_prebuffer_msec: i32,
    ) -> Result<StartArgs, AuthError> {
        let signed = match (self.challenge.lock().as_ref(), key) {
            (None, _) => [0u8; CHALLENGE_LEN],
            (Some(_), None) => return Err(AuthError::MissingCredential),
            (Some(_), Some(key)) if key.is_empty() => return Err(AuthError::MissingCredential),
            (Some(challenge), Some(key)) => {
                tracing::debug!("Signing challenge received {:?} ago", challenge.age());
                challenge.sign(key)?
            }
        };
        Ok(StartArgs::new(signed, tx_prebuffer_msec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_hmac_reference_vector() {
        // RFC 4231, test case 2
        let signed = sign_challenge(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            hex(&signed),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_signature_is_deterministic() {
        let challenge = Challenge::new([0x01; CHALLENGE_LEN]);
        let a = challenge.sign(b"secret").unwrap();
        let b = Challenge::new([0x01; CHALLENGE_LEN]).sign(b"secret").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, challenge.sign(b"other").unwrap());
    }

    #[test]
    fn test_short_nonce_ignored() {
        let handshake = Handshake::new();
        assert!(!handshake.on_challenge(&[1u8; 16]));
        assert!(handshake.challenge().is_none());
    }

    #[test]
    fn test_start_args_without_challenge() {
        let handshake = Handshake::new();
        let args = handshake.start_args(None, 120).unwrap();
        assert_eq!(args.signed_challenge, [0u8; CHALLENGE_LEN]);
        assert_eq!(args.tx_prebuffer_msec, 120);
    }

    #[test]
    fn test_missing_credential() {
        let handshake = Handshake::new();
        assert!(handshake.on_challenge(&[0x01; CHALLENGE_LEN]));

        assert_eq!(handshake.start_args(None, 0), Err(AuthError::MissingCredential));
        assert_eq!(handshake.start_args(Some(b""), 0), Err(AuthError::MissingCredential));

        let args = handshake.start_args(Some(b"key"), 0).unwrap();
        assert_eq!(
            args.signed_challenge,
            sign_challenge(b"key", &[0x01; CHALLENGE_LEN]).unwrap()
        );
    }
}
