//! Negotiation and rewrite engine
//!
//! [`Negotiator`] decides what happens to every message of one connection
//! pair until the login is through. It performs no IO: the pair driver feeds
//! it framed messages and acts on what it returns.
//!
//! ```text
//!  AwaitingPrelogin --PRELOGIN--> AwaitingLogin --LOGIN7--> (TLS) --> Established
//!                    force REQUIRED                hold       rewrite credentials
//! ```

use zeroize::Zeroizing;

use crate::config::CredentialsConfig;
use crate::error::{ProxyError, Result};
use crate::protocol::sqlserver::login7::rewrite_credentials;
use crate::protocol::sqlserver::prelogin::rewrite_encryption;
use crate::protocol::sqlserver::{
    classify_request, EncryptionLevel, EncryptionState, Message, Request, Response,
    ResponseClassifier, TdsHeader,
};

/// Where a connection pair is in the login sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingPrelogin,
    AwaitingLogin,
    Established,
}

/// What the driver should do with a client message
#[derive(Debug)]
pub enum RequestAction {
    /// Write this message to the server
    Forward(Message),
    /// A LOGIN7 is held; run the upstream TLS handshake, then call
    /// [`Negotiator::on_tls_established`]
    StartTls,
}

/// A LOGIN7 waiting for the upstream handshake
struct HeldLogin {
    header: TdsHeader,
    payload: Zeroizing<Vec<u8>>,
}

/// Per-pair negotiation state
pub struct Negotiator {
    phase: Phase,
    held_login: Option<HeldLogin>,
    responses: ResponseClassifier,
    credentials: CredentialsConfig,
}

impl Negotiator {
    /// Create the state for a fresh connection pair
    pub fn new(credentials: CredentialsConfig) -> Self {
        Self {
            phase: Phase::AwaitingPrelogin,
            held_login: None,
            responses: ResponseClassifier::new(),
            credentials,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn has_held_login(&self) -> bool {
        self.held_login.is_some()
    }

    /// Handle a message read from the client
    pub fn on_request(&mut self, message: Message) -> Result<RequestAction> {
        let request = classify_request(message);
        debug!(
            "Client message classified as {} ({} bytes)",
            request.kind(),
            request.message().len()
        );

        match request {
            Request::Prelogin(message) => {
                if self.phase == Phase::Established {
                    warn!("PRELOGIN after login completed, forwarding unchanged");
                    return Ok(RequestAction::Forward(message));
                }
                let forced = EncryptionState::new(EncryptionLevel::Required, false);
                let rewritten = rewrite_prelogin(&message, forced)?;
                self.phase = Phase::AwaitingLogin;
                Ok(RequestAction::Forward(rewritten))
            }
            Request::Login(message) => self.hold_login(message),
            Request::Generic(message) => Ok(RequestAction::Forward(message)),
        }
    }

    /// Handle a message read from the server
    pub fn on_response(&mut self, message: Message) -> Result<Message> {
        let response = self.responses.classify(message);
        debug!(
            "Server message classified as {} ({} bytes)",
            response.kind(),
            response.message().len()
        );

        match response {
            Response::Prelogin(message) => {
                let forced = EncryptionState::new(EncryptionLevel::NotSupported, false);
                rewrite_prelogin(&message, forced)
            }
            Response::Generic(message) => Ok(message),
        }
    }

    /// Produce the LOGIN7 to send over the freshly established TLS channel
    ///
    /// The held login is decoded, given the configured credentials and
    /// re-encoded under its original header.
    pub fn on_tls_established(&mut self) -> Result<Message> {
        let held = self
            .held_login
            .take()
            .ok_or_else(|| ProxyError::Protocol("TLS established with no LOGIN7 held".into()))?;

        let (payload, client_user) = rewrite_credentials(
            &held.payload,
            &self.credentials.username,
            &self.credentials.password,
        )?;
        let payload = Zeroizing::new(payload);
        let message = Message::with_header(held.header, &payload)?;

        self.phase = Phase::Established;
        debug!(
            "LOGIN7 rewritten: user {:?} -> {:?}",
            client_user, self.credentials.username
        );
        Ok(message)
    }

    /// Drop a held LOGIN7 after a failed upstream handshake
    pub fn discard_held_login(&mut self) {
        if self.held_login.take().is_some() {
            debug!("Discarded held LOGIN7");
        }
    }

    fn hold_login(&mut self, message: Message) -> Result<RequestAction> {
        match self.phase {
            Phase::AwaitingPrelogin => Err(ProxyError::Protocol(
                "LOGIN7 received before PRELOGIN".into(),
            )),
            Phase::Established => Err(ProxyError::Protocol(
                "LOGIN7 received after login completed".into(),
            )),
            Phase::AwaitingLogin if self.held_login.is_some() => Err(ProxyError::Protocol(
                "second LOGIN7 while one is already held".into(),
            )),
            Phase::AwaitingLogin => {
                if !message.header().is_end_of_message() {
                    return Err(ProxyError::Protocol(
                        "LOGIN7 spanning multiple packets is not supported".into(),
                    ));
                }
                self.held_login = Some(HeldLogin {
                    header: *message.header(),
                    payload: Zeroizing::new(message.payload().to_vec()),
                });
                debug!("LOGIN7 held ({} bytes), starting upstream TLS", message.len());
                Ok(RequestAction::StartTls)
            }
        }
    }
}

impl std::fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator")
            .field("phase", &self.phase)
            .field("held_login", &self.held_login.is_some())
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

fn rewrite_prelogin(message: &Message, state: EncryptionState) -> Result<Message> {
    let (payload, previous) = rewrite_encryption(message.payload(), state)?;
    debug!(
        "PRELOGIN encryption rewritten: {} -> {}",
        previous.level, state.level
    );
    Ok(message.with_payload(&payload)?)
}
