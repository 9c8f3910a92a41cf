//! Transport protection shared by the agent and server.
//!
//! - `hash`: HMAC-SHA256 integrity tags
//! - `crypto`: RSA-OAEP payload encryption, chunked by key size
//! - `codec`: gzip body encoding
//! - `subnet`: trusted source CIDR check

pub mod codec;
pub mod crypto;
pub mod hash;
pub mod subnet;

pub use codec::{gunzip, gzip};
pub use crypto::{CryptoError, Decryptor, Encryptor};
pub use hash::{IntegrityError, Signer};
pub use subnet::{SubnetError, TrustedSubnet};
