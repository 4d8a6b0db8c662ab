//! Assignment-batch codec.
//!
//! A `MultipleAssignment` payload is a flat string of `key = value ;`
//! pairs. Receipt goes through a minimal, quote-aware splitter — not the
//! full KaRL parser — since payloads only ever contain literal values.

use crate::error::{KarlResult, TransportError};
use crate::record::{KnowledgeRecord, KnowledgeValue};

fn encode_value(value: &KnowledgeValue, out: &mut String) {
    match value {
        KnowledgeValue::Uncreated => out.push('0'),
        KnowledgeValue::Integer(v) => out.push_str(&v.to_string()),
        // Debug formatting keeps a trailing ".0" so the value re-parses
        // as a double.
        KnowledgeValue::Double(v) => out.push_str(&format!("{v:?}")),
        KnowledgeValue::String(s) => {
            out.push('\'');
            for c in s.chars() {
                if c == '\'' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('\'');
        }
        KnowledgeValue::IntegerArray(vs) => {
            out.push('[');
            for (i, v) in vs.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&v.to_string());
            }
            out.push(']');
        }
        KnowledgeValue::DoubleArray(vs) => {
            out.push('[');
            for (i, v) in vs.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&format!("{v:?}"));
            }
            out.push(']');
        }
        // Binary payloads are sent as single assignments, never batched.
        KnowledgeValue::Binary(_) => out.push('0'),
    }
}

/// Renders a batch of records as `key = value ;` pairs.
#[must_use]
pub fn encode_assignments(batch: &[(String, KnowledgeRecord)]) -> String {
    let mut out = String::new();
    for (key, record) in batch {
        out.push_str(key);
        out.push_str(" = ");
        encode_value(&record.value, &mut out);
        out.push_str(" ; ");
    }
    out
}

fn malformed(message: impl Into<String>) -> crate::error::KarlError {
    TransportError::MalformedPayload {
        message: message.into(),
    }
    .into()
}

fn parse_scalar(text: &str) -> KarlResult<KnowledgeValue> {
    let text = text.trim();
    if text.is_empty() {
        return Err(malformed("empty value"));
    }
    if let Ok(v) = text.parse::<i64>() {
        return Ok(KnowledgeValue::Integer(v));
    }
    if let Ok(v) = text.parse::<f64>() {
        return Ok(KnowledgeValue::Double(v));
    }
    Err(malformed(format!("unparseable value '{text}'")))
}

fn parse_array(text: &str) -> KarlResult<KnowledgeValue> {
    let inner = text.trim();
    if inner.is_empty() {
        return Ok(KnowledgeValue::IntegerArray(Vec::new()));
    }
    let parts: Vec<&str> = inner.split(',').collect();
    if parts
        .iter()
        .all(|p| p.trim().parse::<i64>().is_ok())
    {
        let vs = parts
            .iter()
            .map(|p| p.trim().parse::<i64>().map_err(|e| malformed(e.to_string())))
            .collect::<KarlResult<Vec<i64>>>()?;
        return Ok(KnowledgeValue::IntegerArray(vs));
    }
    let vs = parts
        .iter()
        .map(|p| p.trim().parse::<f64>().map_err(|e| malformed(e.to_string())))
        .collect::<KarlResult<Vec<f64>>>()?;
    Ok(KnowledgeValue::DoubleArray(vs))
}

/// Splits a `MultipleAssignment` payload back into key/value pairs.
pub fn split_assignments(payload: &str) -> KarlResult<Vec<(String, KnowledgeValue)>> {
    let mut pairs = Vec::new();
    let bytes = payload.as_bytes();
    let mut pos = 0usize;

    while pos < bytes.len() {
        while pos < bytes.len() && (bytes[pos].is_ascii_whitespace() || bytes[pos] == b';') {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }

        let key_start = pos;
        while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() && bytes[pos] != b'=' {
            pos += 1;
        }
        let key = payload[key_start..pos].to_string();
        if key.is_empty() {
            return Err(malformed("missing key"));
        }

        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= bytes.len() || bytes[pos] != b'=' {
            return Err(malformed(format!("missing '=' after key '{key}'")));
        }
        pos += 1;
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= bytes.len() {
            return Err(malformed(format!("missing value for key '{key}'")));
        }

        let value = match bytes[pos] {
            b'\'' | b'"' => {
                let quote = bytes[pos];
                pos += 1;
                let mut text = String::new();
                loop {
                    match bytes.get(pos) {
                        None => return Err(malformed("unterminated string value")),
                        Some(&c) if c == quote => {
                            pos += 1;
                            break;
                        }
                        Some(b'\\') => {
                            let Some(&escaped) = bytes.get(pos + 1) else {
                                return Err(malformed("unterminated escape"));
                            };
                            text.push(escaped as char);
                            pos += 2;
                        }
                        Some(&c) => {
                            text.push(c as char);
                            pos += 1;
                        }
                    }
                }
                KnowledgeValue::String(text)
            }
            b'[' => {
                let start = pos + 1;
                let Some(close) = payload[start..].find(']') else {
                    return Err(malformed("unterminated array value"));
                };
                let value = parse_array(&payload[start..start + close])?;
                pos = start + close + 1;
                value
            }
            _ => {
                let start = pos;
                while pos < bytes.len() && bytes[pos] != b';' {
                    pos += 1;
                }
                parse_scalar(&payload[start..pos])?
            }
        };

        pairs.push((key, value));

        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos < bytes.len() {
            if bytes[pos] != b';' {
                return Err(malformed("expected ';' between assignments"));
            }
            pos += 1;
        }
    }

    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(entries: &[(&str, KnowledgeValue)]) -> Vec<(String, KnowledgeRecord)> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), KnowledgeRecord::new(v.clone())))
            .collect()
    }

    #[test]
    fn encodes_and_splits_mixed_batch() {
        let encoded = encode_assignments(&batch(&[
            ("position", KnowledgeValue::Integer(7)),
            ("speed", KnowledgeValue::Double(1.5)),
            ("name", KnowledgeValue::String("rover one".into())),
            ("path", KnowledgeValue::IntegerArray(vec![1, 2, 3])),
        ]));
        let pairs = split_assignments(&encoded).unwrap();
        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs[0], ("position".into(), KnowledgeValue::Integer(7)));
        assert_eq!(pairs[1], ("speed".into(), KnowledgeValue::Double(1.5)));
        assert_eq!(
            pairs[2],
            ("name".into(), KnowledgeValue::String("rover one".into()))
        );
        assert_eq!(
            pairs[3],
            ("path".into(), KnowledgeValue::IntegerArray(vec![1, 2, 3]))
        );
    }

    #[test]
    fn whole_doubles_stay_doubles() {
        let encoded = encode_assignments(&batch(&[("x", KnowledgeValue::Double(3.0))]));
        let pairs = split_assignments(&encoded).unwrap();
        assert_eq!(pairs[0].1, KnowledgeValue::Double(3.0));
    }

    #[test]
    fn quotes_and_semicolons_inside_strings_survive() {
        let encoded = encode_assignments(&batch(&[(
            "msg",
            KnowledgeValue::String("it's a = b ; test".into()),
        )]));
        let pairs = split_assignments(&encoded).unwrap();
        assert_eq!(
            pairs[0].1,
            KnowledgeValue::String("it's a = b ; test".into())
        );
    }

    #[test]
    fn splitter_tolerates_loose_whitespace() {
        let pairs = split_assignments("a=1;b = 2 ;  c   =   'x'").unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[2].1, KnowledgeValue::String("x".into()));
    }

    #[test]
    fn malformed_payloads_fail() {
        assert!(split_assignments("a").is_err());
        assert!(split_assignments("a = ").is_err());
        assert!(split_assignments("a = 'oops").is_err());
        assert!(split_assignments("a = what").is_err());
        assert!(split_assignments("= 1 ;").is_err());
    }

    #[test]
    fn empty_payload_is_empty() {
        assert!(split_assignments("").unwrap().is_empty());
        assert!(split_assignments("  ;  ").unwrap().is_empty());
    }
}
