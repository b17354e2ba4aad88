//! Content sniffing for downloaded platform media.

/// Leading signatures checked in order; the first match wins.
static MAGIC_BYTES: &[(&[u8], &str)] = &[
    (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
    (&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A], "image/png"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"BM", "image/bmp"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"Rar!\x1A\x07", "application/vnd.rar"),
    (&[0x1F, 0x8B, 0x08], "application/gzip"),
    (&[0x1A, 0x45, 0xDF, 0xA3], "video/webm"),
    (b"ID3", "audio/mpeg"),
    (&[0xFF, 0xFB], "audio/mpeg"),
    (&[0xFF, 0xF3], "audio/mpeg"),
    (&[0xFF, 0xF2], "audio/mpeg"),
    (b"OggS", "audio/ogg"),
    (b"fLaC", "audio/flac"),
];

/// Preferred extensions for the types above; `mime_guess` covers the rest.
static EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/bmp", "bmp"),
    ("image/webp", "webp"),
    ("application/pdf", "pdf"),
    ("application/zip", "zip"),
    ("application/vnd.rar", "rar"),
    ("application/gzip", "gz"),
    ("application/json", "json"),
    ("application/octet-stream", "bin"),
    ("video/mp4", "mp4"),
    ("video/quicktime", "mov"),
    ("video/webm", "webm"),
    ("audio/mpeg", "mp3"),
    ("audio/ogg", "ogg"),
    ("audio/flac", "flac"),
    ("audio/wav", "wav"),
    ("audio/mp4", "m4a"),
    ("text/plain", "txt"),
];

/// Detect the MIME type of `data` from its leading bytes.
#[must_use]
pub fn detect_mime(data: &[u8]) -> &'static str {
    if let Some(kind) = detect_container(data) {
        return kind;
    }

    for &(magic, mime) in MAGIC_BYTES {
        if data.starts_with(magic) {
            return mime;
        }
    }

    match std::str::from_utf8(data) {
        Ok(text) if text.trim_start().starts_with('{') || text.trim_start().starts_with('[') => {
            "application/json"
        }
        Ok(text) if !text.is_empty() => "text/plain",
        _ => "application/octet-stream",
    }
}

/// RIFF and ISO-BMFF containers carry their brand after a size/tag prefix.
fn detect_container(data: &[u8]) -> Option<&'static str> {
    if data.len() >= 12 && data.starts_with(b"RIFF") {
        return match &data[8..12] {
            b"WEBP" => Some("image/webp"),
            b"WAVE" => Some("audio/wav"),
            b"AVI " => Some("video/x-msvideo"),
            _ => None,
        };
    }

    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return match &data[8..12] {
            b"qt  " => Some("video/quicktime"),
            b"M4A " => Some("audio/mp4"),
            _ => Some("video/mp4"),
        };
    }

    None
}

/// File extension (without dot) for a MIME type.
#[must_use]
pub fn extension_for(mime: &str) -> &'static str {
    EXTENSIONS
        .iter()
        .find(|(m, _)| *m == mime)
        .map(|(_, ext)| *ext)
        .or_else(|| {
            mime_guess::get_mime_extensions_str(mime).and_then(|exts| exts.first().copied())
        })
        .unwrap_or("bin")
}

/// MIME type for a file name, used when a platform reports one.
#[must_use]
pub fn mime_from_name(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
