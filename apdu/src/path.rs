// Copyright (c) 2022-2023 The MobileCoin Foundation

//! BIP32 derivation path encoding
//!
//! Paths are encoded as a one byte component count followed by each
//! component as a big-endian `u32`, with hardened components carrying
//! the top bit.

use crate::ApduError;

/// Maximum supported derivation depth
pub const MAX_PATH_DEPTH: usize = 10;

/// Hardened derivation flag
pub const HARDENED: u32 = 0x8000_0000;

/// Bounded derivation path
pub type Path = heapless::Vec<u32, MAX_PATH_DEPTH>;

/// Build a [Path] from a slice of components
pub fn path_from(components: &[u32]) -> Result<Path, ApduError> {
    Path::from_slice(components).map_err(|_| ApduError::InvalidPath)
}

/// Encoded length of a path
pub fn enc_len(p: &Path) -> Result<usize, ApduError> {
    Ok(1 + p.len() * 4)
}

/// Encode a path into the provided buffer
pub fn enc(p: &Path, buff: &mut [u8]) -> Result<usize, ApduError> {
    let n = enc_len(p)?;
    if buff.len() < n {
        return Err(ApduError::InvalidLength);
    }

    buff[0] = p.len() as u8;
    for (i, c) in p.iter().enumerate() {
        buff[1 + i * 4..][..4].copy_from_slice(&c.to_be_bytes());
    }

    Ok(n)
}

/// Decode a path from the provided buffer
pub fn dec(buff: &[u8]) -> Result<(Path, usize), ApduError> {
    let depth = *buff.first().ok_or(ApduError::InvalidLength)? as usize;
    if depth > MAX_PATH_DEPTH {
        return Err(ApduError::InvalidPath);
    }
    if buff.len() < 1 + depth * 4 {
        return Err(ApduError::InvalidLength);
    }

    let mut p = Path::new();
    for i in 0..depth {
        let mut d = [0u8; 4];
        d.copy_from_slice(&buff[1 + i * 4..][..4]);
        p.push(u32::from_be_bytes(d))
            .map_err(|_| ApduError::InvalidPath)?;
    }

    Ok((p, 1 + depth * 4))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn path_encoding() {
        let p = path_from(&[44 | HARDENED, HARDENED, HARDENED, 0, 7]).unwrap();

        let mut buff = [0u8; 64];
        let n = enc(&p, &mut buff).unwrap();

        assert_eq!(n, 21);
        assert_eq!(
            &buff[..n],
            &[
                0x05, 0x80, 0x00, 0x00, 0x2c, 0x80, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07
            ]
        );

        assert_eq!(dec(&buff[..n]), Ok((p, n)));
    }

    #[test]
    fn path_limits() {
        assert_eq!(path_from(&[0u32; 11]), Err(ApduError::InvalidPath));
        assert_eq!(dec(&[11]), Err(ApduError::InvalidPath));
        assert_eq!(dec(&[2, 0, 0, 0, 1]), Err(ApduError::InvalidLength));
    }
}
