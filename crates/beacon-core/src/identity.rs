//! Rotating broadcast identity.
//!
//! The [`IdentityManager`] owns the token this device advertises. Tokens are
//! `<marker><suffix>`, where the suffix is drawn uniformly from `A-Z0-9`
//! using the OS entropy source.
//!
//! An entropy source that fails, or that keeps producing the token already
//! on air, is treated as fatal: advertising is stopped and the caller gets
//! [`IdentityError::EntropyUnavailable`]. The device halts instead of
//! broadcasting a predictable or repeated identifier.

use rand::RngCore;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::IdentityConfig;
use crate::radio::{Advertiser, RadioError};
use crate::types::{SelfIdentity, Timestamp};

/// Characters a token suffix is drawn from.
pub const TOKEN_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Largest multiple of the alphabet size that fits in a byte; bytes at or
/// above it are rejected so every character is equally likely.
const REJECTION_BOUND: u8 = 252;

/// A fresh draw equal to the current token is retried this many times
/// before the entropy source is declared stuck.
const MAX_REDRAWS: usize = 8;

/// Identity-specific errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The random source failed or is not producing fresh values.
    #[error("entropy unavailable: {message}")]
    EntropyUnavailable {
        /// What went wrong.
        message: String,
    },

    /// The radio refused the new advertisement.
    #[error(transparent)]
    Advertise(#[from] RadioError),
}

/// Owns and rotates the broadcast token.
pub struct IdentityManager<A, R> {
    advertiser: A,
    rng: R,
    marker: String,
    token_length: usize,
    current: SelfIdentity,
}

impl<A, R> IdentityManager<A, R>
where
    A: Advertiser,
    R: RngCore + Send,
{
    /// Generate the first token and put it on air.
    ///
    /// # Errors
    ///
    /// Fails if no token can be drawn or the advertiser rejects it.
    pub async fn new(
        mut advertiser: A,
        mut rng: R,
        config: &IdentityConfig,
        now: Timestamp,
    ) -> Result<Self, IdentityError> {
        let token = draw_token(&mut rng, &config.marker, config.token_length)?;
        advertiser.advertise(&token).await?;
        info!(token = %token, "Broadcast identity initialized");

        Ok(Self {
            advertiser,
            rng,
            marker: config.marker.clone(),
            token_length: config.token_length,
            current: SelfIdentity {
                token,
                generated_at: now,
            },
        })
    }

    /// Token currently on air.
    #[must_use]
    pub fn current_token(&self) -> &str {
        &self.current.token
    }

    /// Full identity currently on air.
    #[must_use]
    pub const fn identity(&self) -> &SelfIdentity {
        &self.current
    }

    /// Protocol marker every token starts with.
    #[must_use]
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// The advertiser this manager drives.
    #[must_use]
    pub const fn advertiser(&self) -> &A {
        &self.advertiser
    }

    /// Replace the broadcast token with a fresh one and return it.
    ///
    /// The advertisement is updated before this returns, so the previous
    /// token is never on air afterwards.
    ///
    /// # Errors
    ///
    /// On entropy or advertiser failure, advertising is stopped and the
    /// error returned. Both are fatal for the device.
    pub async fn rotate(&mut self, now: Timestamp) -> Result<String, IdentityError> {
        let token = match self.draw_fresh_token() {
            Ok(token) => token,
            Err(err) => {
                error!(error = %err, "Token generation failed, taking identity off air");
                self.silence().await;
                return Err(err);
            }
        };

        if let Err(err) = self.advertiser.advertise(&token).await {
            error!(error = %err, "Advertiser rejected rotated token, taking identity off air");
            self.silence().await;
            return Err(err.into());
        }

        debug!(previous = %self.current.token, next = %token, "Rotated broadcast identity");
        self.current = SelfIdentity {
            token: token.clone(),
            generated_at: now,
        };
        Ok(token)
    }

    fn draw_fresh_token(&mut self) -> Result<String, IdentityError> {
        for _ in 0..MAX_REDRAWS {
            let token = draw_token(&mut self.rng, &self.marker, self.token_length)?;
            if token != self.current.token {
                return Ok(token);
            }
        }
        Err(IdentityError::EntropyUnavailable {
            message: format!("entropy source repeated the current token {MAX_REDRAWS} times"),
        })
    }

    async fn silence(&mut self) {
        if let Err(err) = self.advertiser.stop().await {
            error!(error = %err, "Failed to stop advertising");
        }
    }
}

/// Draw `<marker><length random alphabet chars>` without modulo bias.
fn draw_token<R: RngCore>(
    rng: &mut R,
    marker: &str,
    length: usize,
) -> Result<String, IdentityError> {
    let mut token = String::with_capacity(marker.len() + length);
    token.push_str(marker);

    let mut suffix = 0;
    let mut buf = [0u8; 32];
    while suffix < length {
        rng.try_fill_bytes(&mut buf)
            .map_err(|e| IdentityError::EntropyUnavailable {
                message: e.to_string(),
            })?;
        for &byte in buf.iter().filter(|&&b| b < REJECTION_BOUND) {
            if suffix == length {
                break;
            }
            token.push(char::from(TOKEN_ALPHABET[usize::from(byte) % TOKEN_ALPHABET.len()]));
            suffix += 1;
        }
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdvertiser;
    use rand::rngs::mock::StepRng;
    use rand::rngs::OsRng;

    struct FailingRng;

    impl RngCore for FailingRng {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }
        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "hardware RNG not ready",
            )))
        }
    }

    fn config() -> IdentityConfig {
        IdentityConfig::default()
    }

    #[tokio::test]
    async fn test_new_advertises_first_token() {
        let manager = IdentityManager::new(MockAdvertiser::default(), OsRng, &config(), 10)
            .await
            .unwrap();

        let token = manager.current_token();
        assert_eq!(token.len(), 3 + 8);
        assert!(token.starts_with("CTB"));
        assert!(token[3..].bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
        assert_eq!(manager.advertiser().on_air(), Some(token));
        assert_eq!(manager.identity().generated_at, 10);
    }

    #[tokio::test]
    async fn test_rotate_replaces_token_on_air() {
        let mut manager = IdentityManager::new(MockAdvertiser::default(), OsRng, &config(), 0)
            .await
            .unwrap();
        let before = manager.current_token().to_string();

        let after = manager.rotate(15).await.unwrap();

        assert_ne!(before, after);
        assert_eq!(manager.current_token(), after);
        assert_eq!(manager.advertiser().on_air(), Some(after.as_str()));
        assert_eq!(manager.advertiser().history().len(), 2);
        assert_eq!(manager.identity().generated_at, 15);
    }

    #[tokio::test]
    async fn test_failing_entropy_is_fatal() {
        let result = IdentityManager::new(MockAdvertiser::default(), FailingRng, &config(), 0).await;
        assert!(matches!(
            result,
            Err(IdentityError::EntropyUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_stuck_entropy_stops_advertising() {
        // A constant source always yields the same token.
        let rng = StepRng::new(0, 0);
        let mut manager = IdentityManager::new(MockAdvertiser::default(), rng, &config(), 0)
            .await
            .unwrap();
        assert_eq!(manager.current_token(), "CTBAAAAAAAA");

        let result = manager.rotate(15).await;

        assert!(matches!(
            result,
            Err(IdentityError::EntropyUnavailable { .. })
        ));
        assert_eq!(manager.advertiser().on_air(), None);
    }

    #[tokio::test]
    async fn test_rejected_advertisement_takes_identity_off_air() {
        let mut manager = IdentityManager::new(MockAdvertiser::default(), OsRng, &config(), 0)
            .await
            .unwrap();
        manager.advertiser.fail_next_advertise();

        let result = manager.rotate(15).await;

        assert!(matches!(result, Err(IdentityError::Advertise(_))));
        assert_eq!(manager.advertiser().on_air(), None);
    }

    #[test]
    fn test_draw_token_skips_biased_bytes() {
        // Bytes >= 252 are rejected; 0 maps to 'A', 35 maps to '9'.
        let mut rng = StepRng::new(u64::from_le_bytes([255, 0, 253, 35, 252, 1, 254, 2]), 0);
        let token = draw_token(&mut rng, "X", 4).unwrap();
        assert_eq!(token, "XA9BC");
    }
}
