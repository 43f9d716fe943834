//! `SCRAM-SHA-256` client, without channel binding.
//!
//! <https://www.postgresql.org/docs/current/sasl-authentication.html>
use base64::prelude::{BASE64_STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use stringprep::saslprep;

use super::AuthError;

pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

const GS2_HEADER: &str = "n,,";

/// `c=` followed by base64 of [`GS2_HEADER`].
const CHANNEL_BINDING: &str = "c=biws";

const NONCE_LEN: usize = 16;

/// Client side of one SCRAM exchange.
///
/// Created when the backend requests SASL, dropped when the server signature is verified.
pub struct ScramSession {
    password: String,
    client_nonce: String,
    client_first_bare: String,
    /// `HMAC(ServerKey, AuthMessage)` is computed against this once the server-first is received.
    server_signature: Option<Hmac<Sha256>>,
}

impl ScramSession {
    /// Start a session with a random nonce.
    pub fn new(user: &str, password: &str) -> Self {
        let nonce: [u8; NONCE_LEN] = rand::random();
        Self::with_nonce(user, password, BASE64_STANDARD.encode(nonce))
    }

    pub(crate) fn with_nonce(user: &str, password: &str, client_nonce: String) -> Self {
        // not a valid stringprep input, use the raw password as postgres does
        let password = saslprep(password).map(Into::into).unwrap_or_else(|_| password.to_owned());
        let client_first_bare = format!("n={},r={client_nonce}", escape_username(user));
        Self {
            password,
            client_nonce,
            client_first_bare,
            server_signature: None,
        }
    }

    /// `client-first-message`, sent within `SASLInitialResponse`.
    pub fn client_first(&self) -> String {
        format!("{GS2_HEADER}{}", self.client_first_bare)
    }

    /// Process `server-first-message`, returns `client-final-message`.
    pub fn handle_server_first(&mut self, data: &[u8]) -> Result<String, AuthError> {
        let server_first = std::str::from_utf8(data)
            .map_err(|_| AuthError::InvalidServerMessage("server-first is not utf8".into()))?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;

        for attr in server_first.split(',') {
            let Some((key, value)) = attr.split_once('=') else {
                return Err(AuthError::InvalidServerMessage(format!("malformed attribute {attr:?}")));
            };
            match key {
                "r" => nonce = Some(value),
                "s" => salt = Some(value),
                "i" => iterations = Some(value),
                _ => {
                    return Err(AuthError::InvalidServerMessage(format!(
                        "unexpected server-first attribute {key:?}"
                    )));
                }
            }
        }

        let (Some(nonce), Some(salt), Some(iterations)) = (nonce, salt, iterations) else {
            return Err(AuthError::InvalidServerMessage("incomplete server-first".into()));
        };

        if !nonce.starts_with(&self.client_nonce) || nonce.len() == self.client_nonce.len() {
            return Err(AuthError::NonceMismatch);
        }

        let salt = BASE64_STANDARD
            .decode(salt)
            .map_err(|_| AuthError::InvalidServerMessage("salt is not base64".into()))?;
        let iterations: u32 = match iterations.parse() {
            Ok(i) if i > 0 => i,
            _ => {
                return Err(AuthError::InvalidServerMessage(format!(
                    "invalid iteration count {iterations:?}"
                )));
            }
        };

        // SaltedPassword := Hi(Normalize(password), salt, i)
        let salted_password = hi(self.password.as_bytes(), &salt, iterations)?;
        self.password.clear();

        // ClientKey := HMAC(SaltedPassword, "Client Key")
        let mut mac = hmac(&salted_password)?;
        mac.update(b"Client Key");
        let client_key = mac.finalize().into_bytes();

        // StoredKey := H(ClientKey)
        let stored_key = Sha256::digest(client_key);

        let client_final_without_proof = format!("{CHANNEL_BINDING},r={nonce}");

        // AuthMessage := client-first-message-bare + "," + server-first-message + "," + client-final-message-without-proof
        let auth_message = format!(
            "{},{server_first},{client_final_without_proof}",
            self.client_first_bare
        );

        // ClientSignature := HMAC(StoredKey, AuthMessage)
        let mut mac = hmac(&stored_key)?;
        mac.update(auth_message.as_bytes());
        let client_signature = mac.finalize().into_bytes();

        // ClientProof := ClientKey XOR ClientSignature
        let client_proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(&a, &b)| a ^ b)
            .collect();

        // ServerKey := HMAC(SaltedPassword, "Server Key")
        let mut mac = hmac(&salted_password)?;
        mac.update(b"Server Key");
        let server_key = mac.finalize().into_bytes();

        // ServerSignature := HMAC(ServerKey, AuthMessage)
        let mut mac = hmac(&server_key)?;
        mac.update(auth_message.as_bytes());
        self.server_signature = Some(mac);

        Ok(format!(
            "{client_final_without_proof},p={}",
            BASE64_STANDARD.encode(client_proof)
        ))
    }

    /// Verify `server-final-message` against the retained server signature.
    pub fn verify_server_final(self, data: &[u8]) -> Result<(), AuthError> {
        let server_final = std::str::from_utf8(data)
            .map_err(|_| AuthError::InvalidServerMessage("server-final is not utf8".into()))?;

        let Some(mac) = self.server_signature else {
            return Err(AuthError::InvalidServerMessage(
                "server-final received before server-first".into(),
            ));
        };

        let mut verifier = None;
        for attr in server_final.split(',') {
            match attr.split_once('=') {
                Some(("e", reason)) => return Err(AuthError::ServerError(reason.into())),
                Some(("v", value)) => verifier = Some(value),
                _ => {}
            }
        }

        let verifier = verifier.ok_or(AuthError::MissingSignature)?;
        let verifier = BASE64_STANDARD
            .decode(verifier)
            .map_err(|_| AuthError::InvalidServerMessage("server signature is not base64".into()))?;

        mac.verify_slice(&verifier)
            .map_err(|_| AuthError::SignatureMismatch)
    }
}

fn hmac(key: &[u8]) -> Result<Hmac<Sha256>, AuthError> {
    Hmac::<Sha256>::new_from_slice(key).map_err(|_| AuthError::InvalidKeyLength)
}

// Hi(str, salt, i):
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Result<[u8; 32], AuthError> {
    let mut mac = hmac(password)?;

    mac.update(salt);
    mac.update(&1u32.to_be_bytes());

    let mut u = mac.finalize_reset().into_bytes();
    let mut hi = u;

    for _ in 1..iterations {
        mac.update(u.as_slice());
        u = mac.finalize_reset().into_bytes();
        hi = hi.iter().zip(u.iter()).map(|(&a, &b)| a ^ b).collect();
    }

    Ok(hi.into())
}

/// `saslname` escapes `,` and `=`.
fn escape_username(user: &str) -> String {
    user.replace('=', "=3D").replace(',', "=2C")
}

#[cfg(test)]
mod test {
    use super::*;

    const CLIENT_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";

    fn session() -> ScramSession {
        ScramSession::with_nonce("user", "pencil", CLIENT_NONCE.into())
    }

    // RFC 7677, section 3
    #[test]
    fn rfc7677_exchange() {
        let mut scram = session();
        assert_eq!(scram.client_first(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

        let client_final = scram.handle_server_first(SERVER_FIRST.as_bytes()).unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
             p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );

        scram
            .verify_server_final(b"v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap();
    }

    #[test]
    fn wrong_server_signature() {
        let mut scram = session();
        scram.handle_server_first(SERVER_FIRST.as_bytes()).unwrap();
        let err = scram
            .verify_server_final(b"v=AAAATRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .unwrap_err();
        assert!(matches!(err, AuthError::SignatureMismatch));
    }

    #[test]
    fn server_final_error() {
        let mut scram = session();
        scram.handle_server_first(SERVER_FIRST.as_bytes()).unwrap();
        let err = scram.verify_server_final(b"e=invalid-proof").unwrap_err();
        assert!(matches!(err, AuthError::ServerError(reason) if reason == "invalid-proof"));
    }

    #[test]
    fn nonce_not_prefixed() {
        let mut scram = session();
        let err = scram
            .handle_server_first(b"r=somethingElse123,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096")
            .unwrap_err();
        assert!(matches!(err, AuthError::NonceMismatch));
    }

    #[test]
    fn malformed_server_first() {
        for input in [
            &b"r=rOprNGfwEbeRWgbNEkqOabc,i=4096"[..],
            b"r=rOprNGfwEbeRWgbNEkqOabc,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=zero",
            b"m=ext,r=rOprNGfwEbeRWgbNEkqOabc,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=1",
            b"r=rOprNGfwEbeRWgbNEkqOabc,s=@@@,i=1",
        ] {
            let err = session().handle_server_first(input).unwrap_err();
            assert!(matches!(err, AuthError::InvalidServerMessage(_)), "{input:?}");
        }
    }

    #[test]
    fn random_nonce_is_base64_of_16_bytes() {
        let scram = ScramSession::new("a,b", "secret");
        let nonce = BASE64_STANDARD.decode(&scram.client_nonce).unwrap();
        assert_eq!(nonce.len(), NONCE_LEN);
        assert!(scram.client_first().starts_with("n,,n=a=2Cb,r="));
    }
}
