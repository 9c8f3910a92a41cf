use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("integrity tag missing")]
    Missing,
    #[error("integrity tag is not valid hex")]
    Malformed,
    #[error("integrity tag mismatch")]
    Mismatch,
    #[error("hmac failure: {0}")]
    Hmac(String),
}

impl From<openssl::error::ErrorStack> for IntegrityError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        IntegrityError::Hmac(e.to_string())
    }
}

/// HMAC-SHA256 keyed with the shared secret. Tags are lowercase hex.
#[derive(Clone)]
pub struct Signer {
    key: PKey<Private>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Signer(..)")
    }
}

impl Signer {
    pub fn new(secret: &[u8]) -> Result<Self, IntegrityError> {
        Ok(Self {
            key: PKey::hmac(secret)?,
        })
    }

    fn mac(&self, payload: &[u8]) -> Result<Vec<u8>, IntegrityError> {
        let mut signer = openssl::sign::Signer::new(MessageDigest::sha256(), &self.key)?;
        signer.update(payload)?;
        Ok(signer.sign_to_vec()?)
    }

    pub fn sign(&self, payload: &[u8]) -> Result<String, IntegrityError> {
        self.mac(payload).map(hex::encode)
    }

    /// Checks `tag` against the payload in constant time.
    pub fn verify(&self, payload: &[u8], tag: Option<&str>) -> Result<(), IntegrityError> {
        let tag = tag.ok_or(IntegrityError::Missing)?;
        let given = hex::decode(tag.trim()).map_err(|_| IntegrityError::Malformed)?;
        let expected = self.mac(payload)?;
        if given.len() != expected.len() || !openssl::memcmp::eq(&given, &expected) {
            return Err(IntegrityError::Mismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let signer = Signer::new(b"Jefe").unwrap();
        assert_eq!(
            signer.sign(b"what do ya want for nothing?").unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify() {
        let signer = Signer::new(b"secret").unwrap();
        let tag = signer.sign(b"payload").unwrap();

        assert!(signer.verify(b"payload", Some(&tag)).is_ok());
        assert!(signer.verify(b"payload", Some(&tag.to_uppercase())).is_ok());
        assert_eq!(signer.verify(b"payloaD", Some(&tag)), Err(IntegrityError::Mismatch));
        assert_eq!(signer.verify(b"payload", None), Err(IntegrityError::Missing));
        assert_eq!(signer.verify(b"payload", Some("zz")), Err(IntegrityError::Malformed));
        assert_eq!(signer.verify(b"payload", Some("abcd")), Err(IntegrityError::Mismatch));
    }

    #[test]
    fn test_different_keys_disagree() {
        let a = Signer::new(b"a").unwrap();
        let b = Signer::new(b"b").unwrap();
        let tag = a.sign(b"x").unwrap();
        assert_eq!(b.verify(b"x", Some(&tag)), Err(IntegrityError::Mismatch));
    }
}
