//! Protocol-membership filter for observed advertisements.
//!
//! Relevance is about *who* is advertising, never about how close they are:
//! the signal-strength gates live in the scan cycle and the ledger.

use regex::Regex;
use tracing::trace;

use crate::config::IdentityConfig;
use crate::types::PeerObservation;

/// Decides whether an observation comes from another beacon of this family.
#[derive(Debug, Clone)]
pub struct PeerFilter {
    token_pattern: Regex,
}

impl PeerFilter {
    /// Build a filter for tokens of the configured family.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker produces an invalid pattern, which
    /// cannot happen for a validated [`IdentityConfig`].
    pub fn new(config: &IdentityConfig) -> Result<Self, regex::Error> {
        let pattern = format!(
            "^{}[A-Z0-9]{{{}}}$",
            regex::escape(&config.marker),
            config.token_length
        );
        Ok(Self {
            token_pattern: Regex::new(&pattern)?,
        })
    }

    /// `true` iff the advertised token belongs to this beacon family, is not
    /// our own, and the address can be logged as a record field.
    #[must_use]
    pub fn is_relevant(&self, observation: &PeerObservation, self_token: &str) -> bool {
        let token = observation.advertised_token.as_str();

        if token.is_empty() || !self.token_pattern.is_match(token) {
            trace!(address = %observation.address, "Ignoring advertisement without protocol marker");
            return false;
        }
        if token == self_token {
            trace!("Ignoring our own advertisement");
            return false;
        }
        if !is_loggable_address(&observation.address) {
            trace!(address = ?observation.address, "Ignoring peer with unusable address");
            return false;
        }
        true
    }
}

fn is_loggable_address(address: &str) -> bool {
    !address.is_empty() && !address.contains([',', '\r', '\n'])
}
