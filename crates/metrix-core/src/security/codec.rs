use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::CryptoError;

/// Upper bound on a decompressed body.
pub const MAX_DECODED_LEN: u64 = 32 * 1024 * 1024;

pub fn gzip(data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data).map_err(CryptoError::codec)?;
    encoder.finish().map_err(CryptoError::codec)
}

pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(MAX_DECODED_LEN + 1)
        .read_to_end(&mut out)
        .map_err(CryptoError::codec)?;
    if out.len() as u64 > MAX_DECODED_LEN {
        return Err(CryptoError::Codec("decoded body too large".to_string()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_is_readable_by_gunzip() {
        let body = br#"[{"id":"Alloc","type":"gauge","value":3.4}]"#.repeat(50);
        let packed = gzip(&body).unwrap();
        assert!(packed.len() < body.len());
        assert_eq!(&packed[..2], &[0x1f, 0x8b]);
        assert_eq!(gunzip(&packed).unwrap(), body);
    }

    #[test]
    fn test_gunzip_rejects_plain_bytes() {
        assert!(matches!(gunzip(b"not gzip"), Err(CryptoError::Codec(_))));
    }
}
