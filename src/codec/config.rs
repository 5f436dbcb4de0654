//! Reader and writer settings.

use serde::{Deserialize, Serialize};

/// On-disk rendering of the node tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    Cbor,
}

/// Settings shared by [`Reader`](super::Reader) and [`Writer`](super::Writer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub format: Format,
    /// Indent JSON output.
    pub pretty: bool,
    /// Resolve form and denotator references that the document does not
    /// define against the repository's registered names.
    pub catalog_fallback: bool,
    /// Keep at most this many errors; later ones are only counted.
    pub max_errors: Option<usize>,
    /// Register the document's top-level forms and named denotators in the
    /// repository after a clean read.
    pub register_decoded: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            format: Format::Json,
            pretty: true,
            catalog_fallback: true,
            max_errors: None,
            register_decoded: false,
        }
    }
}

impl CodecConfig {
    /// CBOR output with otherwise default settings.
    pub fn cbor() -> Self {
        Self {
            format: Format::Cbor,
            ..Self::default()
        }
    }

    /// Parses settings from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = CodecConfig::from_json(r#"{"format":"cbor","max_errors":3}"#).unwrap();
        assert_eq!(config.format, Format::Cbor);
        assert_eq!(config.max_errors, Some(3));
        assert!(config.pretty);
        assert!(config.catalog_fallback);
        assert!(!config.register_decoded);
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(CodecConfig::from_json(r#"{"format":"xml"}"#).is_err());
    }
}
