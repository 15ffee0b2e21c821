//! Encoding format descriptors.
//!
//! Formats are exchanged as MIME strings with an optional codecs
//! parameter, e.g. `video/webm;codecs=vp9,opus`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A parsed container + codec combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodingFormat {
    mime_type: String,
    container: String,
    codecs: Vec<String>,
}

impl EncodingFormat {
    /// Parse a MIME string. Anything after the first `/` up to a `;` is
    /// the container; a `codecs=` parameter lists codecs, comma separated.
    pub fn parse(mime_type: &str) -> Self {
        let mime_type = mime_type.trim();
        let mut parts = mime_type.split(';');
        let essence = parts.next().unwrap_or_default().trim();
        let container = essence
            .split_once('/')
            .map(|(_, sub)| sub)
            .unwrap_or(essence)
            .to_ascii_lowercase();

        let codecs = parts
            .filter_map(|param| {
                let (key, value) = param.split_once('=')?;
                key.trim()
                    .eq_ignore_ascii_case("codecs")
                    .then(|| value.trim().trim_matches('"').to_string())
            })
            .flat_map(|list| {
                list.split(',')
                    .map(|c| c.trim().to_ascii_lowercase())
                    .filter(|c| !c.is_empty())
                    .collect::<Vec<_>>()
            })
            .collect();

        Self {
            mime_type: mime_type.to_string(),
            container,
            codecs,
        }
    }

    /// The full MIME string used as the artifact content type.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Container name (`webm`, `mp4`, ...).
    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn codecs(&self) -> &[String] {
        &self.codecs
    }

    pub fn has_codec(&self, codec: &str) -> bool {
        self.codecs.iter().any(|c| c == codec)
    }

    /// File extension matching the container.
    pub fn extension(&self) -> &'static str {
        match self.container.as_str() {
            "webm" => "webm",
            "mp4" => "mp4",
            "x-matroska" | "matroska" => "mkv",
            "ogg" => "ogg",
            _ => "bin",
        }
    }
}

impl fmt::Display for EncodingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mime_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_webm_with_codecs() {
        let format = EncodingFormat::parse("video/webm;codecs=vp9,opus");
        assert_eq!(format.container(), "webm");
        assert_eq!(format.codecs(), &["vp9".to_string(), "opus".to_string()]);
        assert_eq!(format.extension(), "webm");
        assert_eq!(format.mime_type(), "video/webm;codecs=vp9,opus");
    }

    #[test]
    fn test_parse_without_codecs() {
        let format = EncodingFormat::parse("video/mp4");
        assert_eq!(format.container(), "mp4");
        assert!(format.codecs().is_empty());
        assert_eq!(format.extension(), "mp4");
    }

    #[test]
    fn test_parse_quoted_codecs_and_spaces() {
        let format = EncodingFormat::parse("video/webm; codecs=\"VP8, Opus\"");
        assert!(format.has_codec("vp8"));
        assert!(format.has_codec("opus"));
    }

    #[test]
    fn test_unknown_container_extension() {
        assert_eq!(EncodingFormat::parse("video/x-matroska").extension(), "mkv");
        assert_eq!(EncodingFormat::parse("").extension(), "bin");
    }
}
