use super::Value;

/// Encodes a bencode value into its canonical byte representation.
///
/// Total function: every [`Value`] has exactly one valid encoding, and
/// dictionary keys are always emitted in ascending byte order (free, since
/// `Value::Dict` is a `BTreeMap`).
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(i) => {
            out.push(b'i');
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(b'e');
        }
        Value::Bytes(bytes) => {
            out.extend_from_slice(bytes.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(bytes);
        }
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                encode_into(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(entries) => {
            out.push(b'd');
            for (key, value) in entries {
                encode_into(&Value::Bytes(key.clone()), out);
                encode_into(value, out);
            }
            out.push(b'e');
        }
    }
}
