//! `AuthenticationMD5Password` response.
use md5::{Digest, Md5};

/// Returns `"md5" + hex(md5(hex(md5(password + user)) + salt))`.
pub fn hash_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut hasher = Md5::new();
    hasher.update(password);
    hasher.update(user);
    let inner = hex::encode(hasher.finalize_reset());

    hasher.update(inner);
    hasher.update(salt);
    format!("md5{}", hex::encode(hasher.finalize()))
}
