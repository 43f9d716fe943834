//! Transport layer, plain and encrypted stream.
mod socket;
mod tls;

pub use socket::{RawStream, Socket};
pub use tls::{TlsConfig, TlsError, negotiate};
