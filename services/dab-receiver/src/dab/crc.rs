//! CRC-16 used by FIBs, AUs, PAD data groups, and the DAB+ fire code

use crc::{Crc, CRC_16_GENIBUS};

/// CCITT CRC-16 with inverted init and output, as DAB transmits it
pub const DAB_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_GENIBUS);

/// Fire code generator x^16 + x^14 + x^13 + x^12 + x^11 + x^5 + x^3 + x^2 + x + 1
const FIRECODE_POLY: u16 = 0x782F;

/// Check a block whose last two bytes are the CRC over the rest
pub fn check_crc16(data: &[u8]) -> bool {
    if data.len() < 3 {
        return false;
    }
    let (payload, crc) = data.split_at(data.len() - 2);
    DAB_CRC.checksum(payload) == u16::from_be_bytes([crc[0], crc[1]])
}

/// Append the CRC over `data`
pub fn append_crc16(data: &mut Vec<u8>) {
    let crc = DAB_CRC.checksum(data);
    data.extend_from_slice(&crc.to_be_bytes());
}

/// Compute the fire code over message bytes
pub fn compute_firecode(msg: &[u8]) -> u16 {
    let mut crc: u16 = 0;

    for &byte in msg {
        for bit in (0..8).rev() {
            let input = (byte >> bit) & 1 != 0;
            let feedback = (crc & 0x8000 != 0) ^ input;
            crc <<= 1;
            if feedback {
                crc ^= FIRECODE_POLY;
            }
        }
    }

    crc
}

/// Check the fire code at the start of a DAB+ superframe.
///
/// Bytes 0..2 carry the code over bytes 2..11. An all-zero header would pass
/// trivially and is rejected.
pub fn check_firecode(frame: &[u8]) -> bool {
    if frame.len() < 11 || frame[..11].iter().all(|&b| b == 0) {
        return false;
    }
    compute_firecode(&frame[2..11]) == u16::from_be_bytes([frame[0], frame[1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_round_trip() {
        let mut fib = hex::decode("0508401200CE1500001520010002FF").unwrap();
        fib.resize(30, 0xFF);
        append_crc16(&mut fib);
        assert_eq!(fib.len(), 32);
        assert!(check_crc16(&fib));
        fib[4] ^= 0x01;
        assert!(!check_crc16(&fib));
    }

    #[test]
    fn test_crc16_known_value() {
        // CRC-16/GENIBUS check value
        assert_eq!(DAB_CRC.checksum(b"123456789"), 0xD64E);
    }

    #[test]
    fn test_firecode() {
        let mut header = vec![0u8, 0, 0x42, 0x80, 0x0A, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB];
        let code = compute_firecode(&header[2..11]);
        header[..2].copy_from_slice(&code.to_be_bytes());
        assert!(check_firecode(&header));
        header[5] ^= 0x10;
        assert!(!check_firecode(&header));
        assert!(!check_firecode(&[0u8; 11]));
    }
}
