//! Bayeux Session
//!
//! Tracks the CometD session for the dxFeed stream and builds every outbound
//! envelope that needs it. No I/O happens here.
//!
//! # Handshake Flow
//!
//! 1. Connect to the WebSocket endpoint (streaming token as bearer header)
//! 2. Send `/meta/handshake` with the token in `ext`
//! 3. Receive `{"successful": true, "clientId": "..."}` or a rejection
//! 4. Every later message carries `clientId`
//!
//! A rejected handshake is terminal for the connection attempt.

use thiserror::Error;

use super::codec::{CodecError, EnvelopeCodec};
use super::connection::MessageId;
use super::credentials::Credential;
use super::messages::{Envelope, SubscriptionData};
use crate::domain::subscription::SubscriptionChanges;

// =============================================================================
// Error Types
// =============================================================================

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Server refused the handshake.
    #[error("handshake rejected: {}", .error.as_deref().unwrap_or("no reason given"))]
    HandshakeRejected {
        /// Server error text.
        error: Option<String>,
    },

    /// A session-scoped message was built before the handshake completed.
    #[error("no client session: handshake has not completed")]
    NoClientSession,

    /// Operation not valid in the current state.
    #[error("unexpected session state: expected {expected:?}, was {actual:?}")]
    UnexpectedState {
        /// State the operation requires.
        expected: SessionState,
        /// State the session was in.
        actual: SessionState,
    },

    /// Envelope encoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

// =============================================================================
// Session State
// =============================================================================

/// Bayeux session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No handshake sent.
    #[default]
    Idle,
    /// Handshake sent, awaiting reply.
    Handshaking,
    /// Handshake accepted; client id available.
    Connected,
    /// Handshake refused.
    Rejected,
}

impl SessionState {
    /// Check if a client session exists.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

// =============================================================================
// Session
// =============================================================================

/// Bayeux session for one connection attempt.
#[derive(Debug)]
pub struct BayeuxSession {
    streaming_token: Credential,
    state: SessionState,
    client_id: Option<String>,
    codec: EnvelopeCodec,
}

impl BayeuxSession {
    /// Create a session in the `Idle` state.
    #[must_use]
    pub const fn new(streaming_token: Credential) -> Self {
        Self {
            streaming_token,
            state: SessionState::Idle,
            client_id: None,
            codec: EnvelopeCodec::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Server-assigned client id, once the handshake has completed.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Build the handshake frame and move to `Handshaking`.
    ///
    /// # Errors
    ///
    /// Returns an error unless the session is `Idle`.
    pub fn handshake_frame(&mut self, id: MessageId) -> Result<String, SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::UnexpectedState {
                expected: SessionState::Idle,
                actual: self.state,
            });
        }

        let frame = self.codec.encode(&Envelope::handshake(
            id.to_string(),
            self.streaming_token.expose(),
        ))?;
        self.state = SessionState::Handshaking;
        Ok(frame)
    }

    /// Apply a `/meta/handshake` reply.
    ///
    /// Returns the client id on success.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::HandshakeRejected`] if the reply is not
    /// successful or carries no client id, and
    /// [`SessionError::UnexpectedState`] if no handshake is in flight.
    pub fn on_handshake_reply(&mut self, reply: &Envelope) -> Result<String, SessionError> {
        if self.state != SessionState::Handshaking {
            return Err(SessionError::UnexpectedState {
                expected: SessionState::Handshaking,
                actual: self.state,
            });
        }

        match (&reply.client_id, reply.is_successful()) {
            (Some(client_id), true) if !client_id.is_empty() => {
                self.client_id = Some(client_id.clone());
                self.state = SessionState::Connected;
                Ok(client_id.clone())
            }
            _ => {
                self.state = SessionState::Rejected;
                Err(SessionError::HandshakeRejected {
                    error: reply.error.clone(),
                })
            }
        }
    }

    /// Build a `/meta/connect` keep-alive frame.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoClientSession`] before the handshake completes.
    pub fn connect_frame(&self, id: MessageId) -> Result<String, SessionError> {
        let client_id = self.require_client_id()?;
        Ok(self
            .codec
            .encode(&Envelope::connect(id.to_string(), client_id))?)
    }

    /// Build a `/service/sub` frame.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoClientSession`] before the handshake completes.
    pub fn subscription_frame(
        &self,
        id: MessageId,
        changes: SubscriptionChanges,
    ) -> Result<String, SessionError> {
        let client_id = self.require_client_id()?;
        let data = SubscriptionData::from(changes);
        Ok(self
            .codec
            .encode(&Envelope::subscription(id.to_string(), client_id, &data))?)
    }

    /// Forget the client session, back to `Idle`.
    pub fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.client_id = None;
    }

    fn require_client_id(&self) -> Result<&str, SessionError> {
        match (&self.state, &self.client_id) {
            (SessionState::Connected, Some(id)) => Ok(id),
            _ => Err(SessionError::NoClientSession),
        }
    }
}
