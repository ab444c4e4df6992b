use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::errors::FusionError;

const DATA_IMAGE_PREFIX: &str = "data:image/";
const BASE64_MARKER: &str = ";base64,";

/// Removes leading `data:image/<subtype>;base64,` headers.
///
/// Anything that does not start with that exact shape is returned as-is.
/// Repeated headers are all removed, so stripping twice equals stripping once.
pub fn strip_data_prefix(raw: &str) -> &str {
    let mut payload = raw;
    while let Some(rest) = strip_one_prefix(payload) {
        payload = rest;
    }
    payload
}

fn strip_one_prefix(raw: &str) -> Option<&str> {
    let rest = raw.strip_prefix(DATA_IMAGE_PREFIX)?;
    let marker = rest.find(BASE64_MARKER)?;
    let subtype = &rest[..marker];
    if subtype.is_empty() || !subtype.chars().all(is_subtype_char) {
        return None;
    }
    Some(&rest[marker + BASE64_MARKER.len()..])
}

fn is_subtype_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.')
}

pub fn encode_bytes(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decodes a payload after stripping any data-URI header. Whitespace from
/// wrapped input is ignored.
pub fn decode_payload(raw: &str) -> Result<Vec<u8>, FusionError> {
    let stripped = strip_data_prefix(raw.trim());
    let compact: String = stripped.chars().filter(|ch| !ch.is_whitespace()).collect();
    BASE64
        .decode(compact.as_bytes())
        .map_err(|err| FusionError::Validation(format!("Invalid base64 image data: {err}")))
}

pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", encode_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIXEL_PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

    #[test]
    fn strip_removes_known_image_prefixes() {
        assert_eq!(strip_data_prefix("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_prefix("data:image/jpeg;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_prefix("data:image/svg+xml;base64,PHN2Zz4="), "PHN2Zz4=");
    }

    #[test]
    fn strip_leaves_plain_and_foreign_payloads_alone() {
        assert_eq!(strip_data_prefix("AAAA"), "AAAA");
        assert_eq!(strip_data_prefix(""), "");
        assert_eq!(
            strip_data_prefix("data:text/plain;base64,QUJD"),
            "data:text/plain;base64,QUJD"
        );
        assert_eq!(strip_data_prefix("data:image/;base64,QUJD"), "data:image/;base64,QUJD");
        assert_eq!(strip_data_prefix("data:image/png,QUJD"), "data:image/png,QUJD");
    }

    #[test]
    fn strip_is_idempotent() {
        let samples = [
            "data:image/png;base64,AAAA",
            "data:image/png;base64,data:image/png;base64,AAAA",
            "AAAA",
            "",
            "data:image/webp;base64,",
            "data:image/x y;base64,AAAA",
        ];
        for sample in samples {
            let once = strip_data_prefix(sample);
            assert_eq!(strip_data_prefix(once), once, "sample {sample:?}");
        }
    }

    #[test]
    fn decode_round_trips_encoded_bytes() -> anyhow::Result<()> {
        let original: Vec<u8> = (0u8..=255).collect();
        let encoded = encode_bytes(&original);
        assert_eq!(decode_payload(&encoded)?, original);

        let with_prefix = format!("data:image/png;base64,{encoded}");
        assert_eq!(decode_payload(&with_prefix)?, original);
        Ok(())
    }

    #[test]
    fn decode_accepts_wrapped_lines_and_rejects_garbage() -> anyhow::Result<()> {
        let pixel = decode_payload(PIXEL_PNG_B64)?;
        assert_eq!(&pixel[1..4], b"PNG");

        let wrapped = format!("{}\n{}", &PIXEL_PNG_B64[..20], &PIXEL_PNG_B64[20..]);
        assert_eq!(decode_payload(&wrapped)?, pixel);

        let err = decode_payload("not base64 at all!").unwrap_err();
        assert!(matches!(err, FusionError::Validation(_)));
        Ok(())
    }

    #[test]
    fn data_url_prefix_is_strippable() {
        let url = data_url("image/png", b"abc");
        assert_eq!(url, "data:image/png;base64,YWJj");
        assert_eq!(strip_data_prefix(&url), "YWJj");
    }
}
