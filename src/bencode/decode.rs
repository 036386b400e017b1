use super::{Error, Result, Value};
use std::collections::BTreeMap;

/// Decodes a single bencode value from `input`, rejecting any trailing bytes.
///
/// Most callers want this; [`decode_prefix`] is for callers that need to
/// know where the value ended (e.g. to keep decoding siblings).
pub fn decode(input: &[u8]) -> Result<Value> {
    let (value, rest) = decode_prefix(input)?;
    if rest != input.len() {
        return Err(Error::TrailingBytes);
    }
    Ok(value)
}

/// Decodes a single bencode value starting at byte 0 of `input` and returns
/// the value along with the cursor position immediately after it.
pub fn decode_prefix(input: &[u8]) -> Result<(Value, usize)> {
    decode_at(input, 0)
}

fn decode_at(input: &[u8], pos: usize) -> Result<(Value, usize)> {
    match input.get(pos) {
        Some(b'i') => decode_int(input, pos),
        Some(b'0'..=b'9') => decode_bytes(input, pos).map(|(b, p)| (Value::Bytes(b), p)),
        Some(b'l') => decode_list(input, pos),
        Some(b'd') => decode_dict(input, pos),
        Some(_) => Err(Error::Malformed("unknown value prefix")),
        None => Err(Error::Malformed("unexpected end of input")),
    }
}

fn decode_int(input: &[u8], pos: usize) -> Result<(Value, usize)> {
    debug_assert_eq!(input.get(pos), Some(&b'i'));
    let start = pos + 1;
    let end = find(input, b'e', start).ok_or(Error::Malformed("unterminated integer"))?;
    let digits = &input[start..end];
    let text =
        std::str::from_utf8(digits).map_err(|_| Error::Malformed("integer is not ASCII"))?;

    if text.is_empty() {
        return Err(Error::Malformed("empty integer"));
    }
    let is_negative = text.starts_with('-');
    let magnitude = if is_negative { &text[1..] } else { text };
    if magnitude.is_empty() || (magnitude.len() > 1 && magnitude.starts_with('0')) {
        return Err(Error::Malformed("invalid integer digits"));
    }
    if text == "-0" {
        return Err(Error::Malformed("negative zero is not canonical"));
    }

    let value: i64 = text
        .parse()
        .map_err(|_| Error::Malformed("integer out of range"))?;
    Ok((Value::Int(value), end + 1))
}

fn decode_bytes(input: &[u8], pos: usize) -> Result<(Vec<u8>, usize)> {
    let colon = find(input, b':', pos).ok_or(Error::Malformed("unterminated string length"))?;
    let len_text = std::str::from_utf8(&input[pos..colon])
        .map_err(|_| Error::Malformed("string length is not ASCII"))?;
    let len: usize = len_text
        .parse()
        .map_err(|_| Error::Malformed("invalid string length"))?;

    let start = colon + 1;
    let end = start
        .checked_add(len)
        .ok_or(Error::Malformed("string length overflow"))?;
    if end > input.len() {
        return Err(Error::Malformed("string length exceeds remaining input"));
    }
    Ok((input[start..end].to_vec(), end))
}

fn decode_list(input: &[u8], pos: usize) -> Result<(Value, usize)> {
    debug_assert_eq!(input.get(pos), Some(&b'l'));
    let mut items = Vec::new();
    let mut cursor = pos + 1;
    loop {
        match input.get(cursor) {
            Some(b'e') => return Ok((Value::List(items), cursor + 1)),
            Some(_) => {
                let (value, next) = decode_at(input, cursor)?;
                items.push(value);
                cursor = next;
            }
            None => return Err(Error::Malformed("unterminated list")),
        }
    }
}

fn decode_dict(input: &[u8], pos: usize) -> Result<(Value, usize)> {
    debug_assert_eq!(input.get(pos), Some(&b'd'));
    let mut entries = BTreeMap::new();
    let mut cursor = pos + 1;
    loop {
        match input.get(cursor) {
            Some(b'e') => return Ok((Value::Dict(entries), cursor + 1)),
            Some(b'0'..=b'9') => {
                let (key, after_key) = decode_bytes(input, cursor)?;
                let (value, after_value) = decode_at(input, after_key)?;
                entries.insert(key, value);
                cursor = after_value;
            }
            Some(_) => return Err(Error::Malformed("dictionary key must be a byte string")),
            None => return Err(Error::Malformed("unterminated dictionary")),
        }
    }
}

fn find(haystack: &[u8], needle: u8, from: usize) -> Option<usize> {
    haystack[from..]
        .iter()
        .position(|&b| b == needle)
        .map(|i| from + i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_prefix_reports_cursor_after_value() {
        let (value, cursor) = decode_prefix(b"i1ei2e").unwrap();
        assert_eq!(value, Value::Int(1));
        assert_eq!(cursor, 3);
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        assert_eq!(decode(b"i1ei2e"), Err(Error::TrailingBytes));
    }

    #[test]
    fn decode_zero_is_allowed() {
        assert_eq!(decode(b"i0e").unwrap(), Value::Int(0));
    }

    #[test]
    fn decode_empty_string() {
        assert_eq!(decode(b"0:").unwrap(), Value::Bytes(Vec::new()));
    }
}
