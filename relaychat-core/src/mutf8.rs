//! "Modified UTF-8", the body encoding of every text value on the
//! wire.
//!
//! It differs from standard UTF-8 in two places: U+0000 is written as the
//! two-byte sequence `C0 80`, and characters outside the BMP are written as
//! two separately encoded UTF-16 surrogates (three bytes each) instead of one
//! four-byte sequence.

use bytes::{BufMut, BytesMut};

use crate::FrameError;

pub(crate) fn encoded_len(text: &str) -> usize {
    text.encode_utf16().map(unit_len).sum()
}

pub(crate) fn encode_into(text: &str, out: &mut BytesMut) {
    for unit in text.encode_utf16() {
        match unit_len(unit) {
            1 => out.put_u8(unit as u8),
            2 => {
                out.put_u8(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.put_u8(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.put_u8(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.put_u8(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.put_u8(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
}

pub(crate) fn decode(bytes: &[u8]) -> Result<String, FrameError> {
    if bytes.is_ascii() && !bytes.contains(&0) {
        return Ok(String::from_utf8_lossy(bytes).into_owned());
    }

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let lead = bytes[i];
        match lead >> 4 {
            0x0..=0x7 => {
                units.push(u16::from(lead));
                i += 1;
            }
            0xC | 0xD => {
                let b1 = continuation(bytes, i + 1)?;
                units.push((u16::from(lead & 0x1F) << 6) | u16::from(b1 & 0x3F));
                i += 2;
            }
            0xE => {
                let b1 = continuation(bytes, i + 1)?;
                let b2 = continuation(bytes, i + 2)?;
                units.push(
                    (u16::from(lead & 0x0F) << 12)
                        | (u16::from(b1 & 0x3F) << 6)
                        | u16::from(b2 & 0x3F),
                );
                i += 3;
            }
            _ => {
                return Err(FrameError::MalformedText(format!(
                    "invalid lead byte {lead:#04x} at offset {i}"
                )));
            }
        }
    }

    String::from_utf16(&units).map_err(|err| FrameError::MalformedText(err.to_string()))
}

fn unit_len(unit: u16) -> usize {
    match unit {
        0x0001..=0x007F => 1,
        0x0000 | 0x0080..=0x07FF => 2,
        _ => 3,
    }
}

fn continuation(bytes: &[u8], at: usize) -> Result<u8, FrameError> {
    match bytes.get(at) {
        Some(byte) if byte & 0xC0 == 0x80 => Ok(*byte),
        Some(byte) => Err(FrameError::MalformedText(format!(
            "invalid continuation byte {byte:#04x} at offset {at}"
        ))),
        None => Err(FrameError::MalformedText(
            "truncated multi-byte sequence".to_owned(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(text: &str) -> Vec<u8> {
        let mut out = BytesMut::new();
        encode_into(text, &mut out);
        out.to_vec()
    }

    #[test]
    fn ascii_is_unchanged() {
        assert_eq!(encode("USERLIST:a,b"), b"USERLIST:a,b".to_vec());
        assert_eq!(encoded_len("USERLIST:a,b"), 12);
    }

    #[test]
    fn nul_uses_two_byte_form() {
        assert_eq!(encode("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
        assert_eq!(decode(&[b'a', 0xC0, 0x80, b'b']).unwrap(), "a\0b");
    }

    #[test]
    fn supplementary_chars_are_split_into_surrogates() {
        let bytes = encode("😀");
        assert_eq!(bytes, vec![0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]);
        assert_eq!(encoded_len("😀"), 6);
        assert_eq!(decode(&bytes).unwrap(), "😀");
    }

    #[test]
    fn two_byte_chars_match_standard_utf8() {
        assert_eq!(encode("ñé"), "ñé".as_bytes().to_vec());
        assert_eq!(decode("ñé".as_bytes()).unwrap(), "ñé");
    }

    #[test]
    fn rejects_bad_continuation_and_truncation() {
        assert!(matches!(
            decode(&[0xC3, 0x41]),
            Err(FrameError::MalformedText(_))
        ));
        assert!(matches!(decode(&[0xE2, 0x82]), Err(FrameError::MalformedText(_))));
        assert!(matches!(decode(&[0xF0, 0x9F, 0x98, 0x80]), Err(FrameError::MalformedText(_))));
    }

    #[test]
    fn rejects_unpaired_surrogate() {
        assert!(matches!(
            decode(&[0xED, 0xA0, 0xBD]),
            Err(FrameError::MalformedText(_))
        ));
    }
}
