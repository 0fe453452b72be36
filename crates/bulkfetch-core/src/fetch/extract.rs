//! Extractors turn a fetched body into a record.
//!
//! Page-specific scraping lives outside this crate; callers plug their own
//! `Extractor` into `CurlFetcher`. The two shipped here cover JSON endpoints
//! and raw-text capture.

use crate::model::Record;

/// Turns a fetched body into a structured record. An empty record means
/// "nothing usable" and is reported as a content error.
pub trait Extractor: Send + Sync {
    fn extract(&self, resource: &str, body: &[u8]) -> Record;
}

/// Top-level JSON object becomes the record; anything else yields an empty record.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExtractor;

impl Extractor for JsonExtractor {
    fn extract(&self, resource: &str, body: &[u8]) -> Record {
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) => Record::new(),
            Err(e) => {
                tracing::debug!(resource, "body is not JSON: {}", e);
                Record::new()
            }
        }
    }
}

/// Stores the body (lossy UTF-8) under `"body"`; empty bodies yield an empty record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextExtractor;

impl Extractor for TextExtractor {
    fn extract(&self, _resource: &str, body: &[u8]) -> Record {
        let mut record = Record::new();
        let text = String::from_utf8_lossy(body);
        if !text.trim().is_empty() {
            record.insert("body".to_string(), text.into_owned().into());
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_object_becomes_record() {
        let r = JsonExtractor.extract("u", br#"{"title":"Lamp","price":12}"#);
        assert_eq!(r.get("title"), Some(&json!("Lamp")));
        assert_eq!(r.get("price"), Some(&json!(12)));
    }

    #[test]
    fn json_non_object_or_garbage_is_empty() {
        assert!(JsonExtractor.extract("u", b"[1,2,3]").is_empty());
        assert!(JsonExtractor.extract("u", b"<html>").is_empty());
    }

    #[test]
    fn text_extractor_keeps_body() {
        let r = TextExtractor.extract("u", b"hello");
        assert_eq!(r.get("body"), Some(&json!("hello")));
        assert!(TextExtractor.extract("u", b"   \n").is_empty());
    }
}
