//! Authentication exchange.
//!
//! [`Authenticator`] is a sans-io state machine, fed with every `Authentication` request
//! and returning the response to send, [`authenticate`] drives it over a [`PgTransport`].
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>
use std::fmt;

use crate::{
    Result,
    postgres::{
        backend::{Authentication, sasl_mechanisms},
        frontend::{PasswordMessage, SaslInitialResponse, SaslResponse},
    },
    transport::PgTransport,
};

pub mod md5;
pub mod scram;

use scram::{SCRAM_SHA_256, ScramSession};

/// Progress of an [`Authenticator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Waiting for the next `Authentication` request.
    AwaitingAuthRequest,
    /// Backend sent `AuthenticationOk`.
    Authenticated,
    /// Terminal, the exchange cannot continue.
    Failed,
}

/// Response to an authentication request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResponse {
    /// `PasswordMessage` carrying a cleartext or md5 hashed password.
    Password(String),
    /// `SASLInitialResponse` carrying the selected mechanism and `client-first-message`.
    SaslInitial { mechanism: &'static str, data: String },
    /// `SASLResponse` carrying `client-final-message`.
    Sasl(String),
}

impl AuthResponse {
    fn send<IO: PgTransport>(&self, io: &mut IO) -> Result<()> {
        match self {
            Self::Password(password) => io.send(PasswordMessage { password }),
            Self::SaslInitial { mechanism, data } => io.send(SaslInitialResponse {
                mechanism,
                data: data.as_bytes(),
            }),
            Self::Sasl(data) => io.send(SaslResponse { data: data.as_bytes() }),
        }
    }
}

/// Authentication state machine.
///
/// ```text
/// AwaitingAuthRequest --Ok----------------------------> Authenticated
/// AwaitingAuthRequest --password/SASL step-----------> AwaitingAuthRequest
/// AwaitingAuthRequest --error or unsupported method--> Failed
/// ```
pub struct Authenticator<'a> {
    user: &'a str,
    password: Option<&'a str>,
    state: AuthState,
    /// Retained between SASL rounds, includes the client nonce and expected server signature.
    scram: Option<ScramSession>,
}

impl<'a> Authenticator<'a> {
    pub fn new(user: &'a str, password: Option<&'a str>) -> Self {
        Self {
            user,
            password,
            state: AuthState::AwaitingAuthRequest,
            scram: None,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Process one request, returns the response to send, if any.
    ///
    /// Any error moves the state machine to [`AuthState::Failed`].
    pub fn step(&mut self, request: Authentication) -> Result<Option<AuthResponse>, AuthError> {
        if self.state != AuthState::AwaitingAuthRequest {
            return Err(AuthError::UnexpectedRequest(request.method_name()));
        }

        let result = self.dispatch(request);
        if result.is_err() {
            self.state = AuthState::Failed;
            self.scram = None;
        }
        result
    }

    fn dispatch(&mut self, request: Authentication) -> Result<Option<AuthResponse>, AuthError> {
        match request {
            Authentication::Ok => {
                if self.scram.is_some() {
                    // SASL exchange must end with a verified `AuthenticationSASLFinal`
                    return Err(AuthError::MissingSignature);
                }
                self.state = AuthState::Authenticated;
                Ok(None)
            }
            Authentication::CleartextPassword => {
                Ok(Some(AuthResponse::Password(self.password()?.to_owned())))
            }
            Authentication::MD5Password { salt } => {
                let hashed = md5::hash_password(self.user, self.password()?, salt);
                Ok(Some(AuthResponse::Password(hashed)))
            }
            Authentication::SASL { mechanisms } => {
                if !sasl_mechanisms(&mechanisms).any(|m| m == SCRAM_SHA_256) {
                    let offered = sasl_mechanisms(&mechanisms).map(String::from).collect();
                    return Err(AuthError::UnsupportedSasl(offered));
                }
                let scram = ScramSession::new(self.user, self.password()?);
                let data = scram.client_first();
                self.scram = Some(scram);
                Ok(Some(AuthResponse::SaslInitial { mechanism: SCRAM_SHA_256, data }))
            }
            Authentication::SASLContinue { data } => {
                let Some(scram) = self.scram.as_mut() else {
                    return Err(AuthError::UnexpectedRequest("SASLContinue"));
                };
                Ok(Some(AuthResponse::Sasl(scram.handle_server_first(&data)?)))
            }
            Authentication::SASLFinal { data } => {
                let Some(scram) = self.scram.take() else {
                    return Err(AuthError::UnexpectedRequest("SASLFinal"));
                };
                scram.verify_server_final(&data)?;
                Ok(None)
            }
            other => Err(AuthError::UnsupportedMethod(other.method_name())),
        }
    }

    fn password(&self) -> Result<&'a str, AuthError> {
        self.password.ok_or(AuthError::PasswordRequired)
    }
}

/// Run the authentication exchange until `AuthenticationOk`.
///
/// The `StartupMessage` should already be sent. On error, nothing more is sent to the backend.
pub async fn authenticate<IO: PgTransport>(
    io: &mut IO,
    user: &str,
    password: Option<&str>,
) -> Result<()> {
    let mut auth = Authenticator::new(user, password);

    loop {
        let request = io.recv::<Authentication>().await?;

        if let Some(response) = auth.step(request)? {
            response.send(io)?;
            io.flush().await?;
        }

        if auth.state() == AuthState::Authenticated {
            return Ok(());
        }
    }
}

/// An error when authenticating.
pub enum AuthError {
    /// Backend requested a password, but none is configured.
    PasswordRequired,
    /// Backend requested an authentication method that is not supported.
    UnsupportedMethod(&'static str),
    /// None of the SASL mechanisms offered by the backend is supported.
    UnsupportedSasl(Vec<String>),
    /// Request received out of order.
    UnexpectedRequest(&'static str),
    /// Server nonce does not start with the client nonce.
    NonceMismatch,
    /// Malformed SASL message from the backend.
    InvalidServerMessage(String),
    /// `e=` attribute of `server-final-message`.
    ServerError(String),
    /// Server signature does not match the expected one.
    SignatureMismatch,
    /// SASL exchange completed without a server signature.
    MissingSignature,
    InvalidKeyLength,
}

impl std::error::Error for AuthError { }

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("authentication failed, ")?;
        match self {
            Self::PasswordRequired => f.write_str("password required"),
            Self::UnsupportedMethod(m) => write!(f, "unsupported method {m}"),
            Self::UnsupportedSasl(m) => write!(f, "unsupported SASL mechanisms: {}", m.join(", ")),
            Self::UnexpectedRequest(m) => write!(f, "unexpected {m} request"),
            Self::NonceMismatch => f.write_str("server nonce does not match client nonce"),
            Self::InvalidServerMessage(e) => write!(f, "invalid server message, {e}"),
            Self::ServerError(e) => write!(f, "server error: {e}"),
            Self::SignatureMismatch => f.write_str("server signature mismatch"),
            Self::MissingSignature => f.write_str("missing server signature"),
            Self::InvalidKeyLength => f.write_str("invalid hmac key length"),
        }
    }
}

impl fmt::Debug for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn ok_without_password() {
        let mut auth = Authenticator::new("postgres", None);
        assert_eq!(auth.step(Authentication::Ok).unwrap(), None);
        assert_eq!(auth.state(), AuthState::Authenticated);
    }

    #[test]
    fn md5_response() {
        let mut auth = Authenticator::new("postgres", Some("password"));
        let response = auth
            .step(Authentication::MD5Password { salt: [1, 2, 3, 4] })
            .unwrap();
        assert_eq!(
            response,
            Some(AuthResponse::Password("md598511ceaec347a656f032c7f2a16ef17".into()))
        );
        assert_eq!(auth.state(), AuthState::AwaitingAuthRequest);
    }

    #[test]
    fn cleartext_requires_password() {
        let mut auth = Authenticator::new("postgres", None);
        let err = auth.step(Authentication::CleartextPassword).unwrap_err();
        assert!(matches!(err, AuthError::PasswordRequired));
        assert_eq!(auth.state(), AuthState::Failed);
        assert!(auth.step(Authentication::Ok).is_err());
    }

    #[test]
    fn unsupported_method() {
        let mut auth = Authenticator::new("postgres", Some("pw"));
        let err = auth.step(Authentication::KerberosV5).unwrap_err();
        assert!(matches!(err, AuthError::UnsupportedMethod(_)));

        let mut auth = Authenticator::new("postgres", Some("pw"));
        let mechanisms = Bytes::from_static(b"SCRAM-SHA-256-PLUS\0OAUTHBEARER\0\0");
        let err = auth.step(Authentication::SASL { mechanisms }).unwrap_err();
        assert!(matches!(&err, AuthError::UnsupportedSasl(m) if m.len() == 2));
    }

    #[test]
    fn sasl_selects_scram() {
        let mut auth = Authenticator::new("postgres", Some("pw"));
        let mechanisms = Bytes::from_static(b"SCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0");
        let Some(AuthResponse::SaslInitial { mechanism, data }) =
            auth.step(Authentication::SASL { mechanisms }).unwrap()
        else {
            panic!("expected SASLInitialResponse");
        };
        assert_eq!(mechanism, "SCRAM-SHA-256");
        assert!(data.starts_with("n,,n=postgres,r="));

        // `AuthenticationOk` before the server signature is verified
        assert!(matches!(
            auth.step(Authentication::Ok).unwrap_err(),
            AuthError::MissingSignature
        ));
    }
}
