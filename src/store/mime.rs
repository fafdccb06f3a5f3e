//! Media type ↔ file extension mapping for blob filenames.
//!
//! The table is deliberately small: it covers the payload types producers
//! emit today, and anything unknown stores as `.bin`. Extensions exist for
//! humans poking around the blob directory; content identity is the hash.

const TABLE: &[(&str, &str)] = &[
    ("application/json", "json"),
    ("application/octet-stream", "bin"),
    ("application/pdf", "pdf"),
    ("audio/mpeg", "mp3"),
    ("audio/wav", "wav"),
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/webp", "webp"),
    ("text/html", "html"),
    ("text/markdown", "md"),
    ("text/plain", "txt"),
    ("video/mp4", "mp4"),
    ("video/webm", "webm"),
];

/// File extension for a media type, `bin` when unknown.
#[must_use]
pub fn extension_for(mime_type: &str) -> &'static str {
    TABLE
        .iter()
        .find(|(mime, _)| *mime == mime_type)
        .map(|(_, ext)| *ext)
        .unwrap_or("bin")
}

/// Media type for a file extension, when the table knows it.
#[must_use]
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    TABLE
        .iter()
        .find(|(_, ext)| *ext == extension)
        .map(|(mime, _)| *mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_types_round_trip() {
        for (mime, ext) in TABLE {
            assert_eq!(extension_for(mime), *ext);
            assert_eq!(mime_for_extension(ext), Some(*mime));
        }
    }

    #[test]
    fn unknown_type_falls_back_to_bin() {
        assert_eq!(extension_for("application/x-mystery"), "bin");
        assert_eq!(mime_for_extension("mystery"), None);
    }
}
