// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Encoding helpers shared by APDU objects

use crate::ApduError;

/// Write `d` into `buff` at `index`, advancing the index
pub fn put(buff: &mut [u8], index: &mut usize, d: &[u8]) -> Result<(), ApduError> {
    let end = *index + d.len();
    if buff.len() < end {
        return Err(ApduError::InvalidLength);
    }

    buff[*index..end].copy_from_slice(d);
    *index = end;

    Ok(())
}

/// Read `n` bytes from `buff` at `index`, advancing the index
pub fn take<'a>(buff: &'a [u8], index: &mut usize, n: usize) -> Result<&'a [u8], ApduError> {
    let end = *index + n;
    if buff.len() < end {
        return Err(ApduError::InvalidLength);
    }

    let d = &buff[*index..end];
    *index = end;

    Ok(d)
}

/// Read a fixed size array from `buff` at `index`, advancing the index
pub fn take_arr<const N: usize>(buff: &[u8], index: &mut usize) -> Result<[u8; N], ApduError> {
    let mut d = [0u8; N];
    d.copy_from_slice(take(buff, index, N)?);
    Ok(d)
}

/// Bitcoin compact-size (varint) integers
pub mod varint {
    use super::ApduError;

    /// Encoded length of a varint
    pub const fn len(n: u64) -> usize {
        match n {
            0..=0xfc => 1,
            0xfd..=0xffff => 3,
            0x1_0000..=0xffff_ffff => 5,
            _ => 9,
        }
    }

    /// Encode a varint into the provided buffer
    pub fn enc(n: u64, buff: &mut [u8]) -> Result<usize, ApduError> {
        let l = len(n);
        if buff.len() < l {
            return Err(ApduError::InvalidLength);
        }

        match l {
            1 => buff[0] = n as u8,
            3 => {
                buff[0] = 0xfd;
                buff[1..3].copy_from_slice(&(n as u16).to_le_bytes());
            }
            5 => {
                buff[0] = 0xfe;
                buff[1..5].copy_from_slice(&(n as u32).to_le_bytes());
            }
            _ => {
                buff[0] = 0xff;
                buff[1..9].copy_from_slice(&n.to_le_bytes());
            }
        }

        Ok(l)
    }

    /// Encode a varint to a small stack buffer, returning the buffer and used length
    pub fn to_bytes(n: u64) -> ([u8; 9], usize) {
        let mut b = [0u8; 9];
        // Buffer always fits the largest varint
        let l = enc(n, &mut b).unwrap_or(0);
        (b, l)
    }

    /// Decode a varint from the provided buffer
    pub fn dec(buff: &[u8]) -> Result<(u64, usize), ApduError> {
        let prefix = *buff.first().ok_or(ApduError::InvalidLength)?;

        let l = match prefix {
            0xfd => 3,
            0xfe => 5,
            0xff => 9,
            _ => return Ok((prefix as u64, 1)),
        };

        if buff.len() < l {
            return Err(ApduError::InvalidLength);
        }

        let mut d = [0u8; 8];
        d[..l - 1].copy_from_slice(&buff[1..l]);

        Ok((u64::from_le_bytes(d), l))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn varint_boundaries() {
        let tests: &[(u64, &[u8])] = &[
            (0, &[0x00]),
            (0xfc, &[0xfc]),
            (0xfd, &[0xfd, 0xfd, 0x00]),
            (0xffff, &[0xfd, 0xff, 0xff]),
            (0x1_0000, &[0xfe, 0x00, 0x00, 0x01, 0x00]),
            (
                0x1_0000_0000,
                &[0xff, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00],
            ),
        ];

        for (n, expected) in tests {
            let (b, l) = varint::to_bytes(*n);
            assert_eq!(&b[..l], *expected, "encode {n:#x}");
            assert_eq!(varint::len(*n), l);
            assert_eq!(varint::dec(expected), Ok((*n, l)), "decode {n:#x}");
        }
    }

    #[test]
    fn varint_truncated() {
        assert_eq!(varint::dec(&[]), Err(ApduError::InvalidLength));
        assert_eq!(varint::dec(&[0xfd, 0x01]), Err(ApduError::InvalidLength));
        assert_eq!(varint::dec(&[0xfe, 0x01, 0x02]), Err(ApduError::InvalidLength));
    }
}
