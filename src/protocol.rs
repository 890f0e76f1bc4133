//! Smush.it wire contract
//!
//! Everything that depends on the exact shape of the third-party responses
//! lives here so it can be exercised without a transport.

use crate::{Error, Result};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Marker preceding the session token in the bootstrap page.
pub const SUBTASK_MARKER: &str = "smush.smusher_subtask = \"";

pub const OPTIMIZE_ENDPOINT: &str = "ws.php";
pub const ARCHIVE_ENDPOINT: &str = "zip.php";

/// Form field carrying an uploaded local file.
pub const UPLOAD_FIELD: &str = "files[]";

/// Extract the subtask token from the bootstrap page.
///
/// The token is everything between the marker and the last `";` on the same
/// line, trimmed.
pub fn parse_subtask(page: &str) -> Result<String> {
    page.lines()
        .filter_map(|line| {
            let start = line.find(SUBTASK_MARKER)? + SUBTASK_MARKER.len();
            let rest = &line[start..];
            let end = rest.rfind("\";")?;
            Some(rest[..end].trim())
        })
        .find(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Protocol("Can not find subtask information in bootstrap page".to_string())
        })
}

/// Result fields of a successful optimize call.
#[derive(Debug, Clone, PartialEq)]
pub struct Optimized {
    pub destination: String,
    pub dst_size: u64,
    pub percent: f64,
    pub src_size: u64,
}

/// Per-record result of one dispatch. A `RecordError` never aborts the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Success(Optimized),
    RecordError(String),
}

#[derive(Debug, Deserialize)]
struct OptimizeResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    dest: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    dest_size: u64,
    #[serde(default, deserialize_with = "lenient_f64")]
    percent: f64,
    #[serde(default, deserialize_with = "lenient_u64")]
    src_size: u64,
}

#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    #[serde(default)]
    url: Option<String>,
}

/// Interpret the body returned by the optimize endpoint.
pub fn parse_optimize_response(body: &[u8]) -> DispatchOutcome {
    let response: OptimizeResponse = match serde_json::from_slice(body) {
        Ok(response) => response,
        Err(e) => {
            return DispatchOutcome::RecordError(format!("Invalid optimize response: {}", e))
        }
    };

    if let Some(error) = response.error {
        return DispatchOutcome::RecordError(error);
    }

    match response.dest.filter(|dest| !dest.is_empty()) {
        Some(dest) => DispatchOutcome::Success(Optimized {
            destination: decode_destination(&dest),
            dst_size: response.dest_size,
            percent: response.percent,
            src_size: response.src_size,
        }),
        None => DispatchOutcome::RecordError("Optimize response has no dest".to_string()),
    }
}

/// Extract the download url from the archive endpoint body.
pub fn parse_archive_response(body: &[u8]) -> Result<String> {
    let response: ArchiveResponse = serde_json::from_slice(body)
        .map_err(|e| Error::Protocol(format!("Invalid archive response: {}", e)))?;

    response
        .url
        .filter(|url| !url.is_empty())
        .ok_or(Error::MissingArchiveUrl)
}

/// Percent-decode a destination url; `+` is kept literally.
pub fn decode_destination(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

// The service is loose about numeric types; accept numbers and numeric strings.
fn lenient_number(value: Option<Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    let n = lenient_number(Option::<Value>::deserialize(deserializer)?);
    Ok(if n.is_finite() && n > 0.0 { n as u64 } else { 0 })
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    let n = lenient_number(Option::<Value>::deserialize(deserializer)?);
    Ok(if n.is_finite() { n } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PAGE: &str = r#"<html><script>
        var smush = {};
        smush.smusher_subtask = "4f1c2e9a";
    </script></html>"#;

    #[test]
    fn test_parse_subtask_extracts_token() {
        assert_eq!(parse_subtask(PAGE).unwrap(), "4f1c2e9a");
    }

    #[test]
    fn test_parse_subtask_trims_token() {
        let page = "smush.smusher_subtask = \" abc \";";
        assert_eq!(parse_subtask(page).unwrap(), "abc");
    }

    #[test]
    fn test_parse_subtask_missing_marker() {
        let err = parse_subtask("<html>maintenance</html>").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_parse_subtask_empty_token() {
        let err = parse_subtask("smush.smusher_subtask = \"\";").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_parse_optimize_success() {
        let body = br#"{"src":"a.png","dest":"http%3A%2F%2Fcdn.example.com%2Fa%20b.png","src_size":2048,"dest_size":1024,"percent":"50.00"}"#;
        assert_eq!(
            parse_optimize_response(body),
            DispatchOutcome::Success(Optimized {
                destination: "http://cdn.example.com/a b.png".to_string(),
                dst_size: 1024,
                percent: 50.0,
                src_size: 2048,
            })
        );
    }

    #[test]
    fn test_parse_optimize_numeric_strings() {
        let body = br#"{"dest":"http://x/y.png","src_size":"300","dest_size":"200","percent":33.33}"#;
        match parse_optimize_response(body) {
            DispatchOutcome::Success(optimized) => {
                assert_eq!(optimized.src_size, 300);
                assert_eq!(optimized.dst_size, 200);
                assert!((optimized.percent - 33.33).abs() < f64::EPSILON);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_parse_optimize_error_shape() {
        assert_eq!(
            parse_optimize_response(br#"{"error":"too large"}"#),
            DispatchOutcome::RecordError("too large".to_string())
        );
    }

    #[test]
    fn test_parse_optimize_missing_dest() {
        assert!(matches!(
            parse_optimize_response(br#"{"src_size":10}"#),
            DispatchOutcome::RecordError(_)
        ));
    }

    #[test]
    fn test_parse_optimize_not_json() {
        match parse_optimize_response(b"<html>502</html>") {
            DispatchOutcome::RecordError(message) => {
                assert!(message.starts_with("Invalid optimize response"))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_parse_archive_response() {
        assert_eq!(
            parse_archive_response(br#"{"url":"http://x/t.zip"}"#).unwrap(),
            "http://x/t.zip"
        );
        assert!(matches!(
            parse_archive_response(br#"{"status":"ok"}"#),
            Err(Error::MissingArchiveUrl)
        ));
        assert!(matches!(
            parse_archive_response(b"oops"),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_destination_keeps_plus() {
        assert_eq!(decode_destination("a+b%2Bc"), "a+b+c");
    }
}
