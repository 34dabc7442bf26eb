//! Container hints: declared MIME type, filename extension, or magic bytes

use std::path::Path;
use tracing::debug;

/// MIME types that carry no information about the container
const GENERIC_MIME_TYPES: &[&str] = &["application/octet-stream", "binary/octet-stream"];

/// What the caller declared about the payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerHint {
    /// Declared media type, e.g. from a `Content-Type` header
    pub mime_type: Option<String>,
    /// Original filename, if the payload was an upload
    pub filename: Option<String>,
}

/// Hint after resolution against the payload bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedHint {
    /// Lower-case extension without the dot
    pub extension: Option<String>,
    /// Effective MIME type
    pub mime_type: Option<String>,
    /// True when the result came from magic bytes rather than the caller
    pub sniffed: bool,
}

impl ContainerHint {
    pub fn from_mime(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: Some(mime_type.into()),
            filename: None,
        }
    }

    pub fn from_filename(filename: impl Into<String>) -> Self {
        Self {
            mime_type: None,
            filename: Some(filename.into()),
        }
    }

    /// Declared MIME type, if it names something more specific than "bytes"
    fn specific_mime(&self) -> Option<String> {
        let mime = self.mime_type.as_deref()?;
        // Strip parameters such as "; codecs=opus"
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        if essence.is_empty() || GENERIC_MIME_TYPES.contains(&essence.as_str()) {
            None
        } else {
            Some(essence)
        }
    }

    fn filename_extension(&self) -> Option<String> {
        let filename = self.filename.as_deref()?;
        Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .map(|ext| ext.to_ascii_lowercase())
    }

    /// Resolve in priority order: declared MIME type, filename extension, magic bytes
    pub fn resolve(&self, bytes: &[u8]) -> ResolvedHint {
        if let Some(mime) = self.specific_mime() {
            if let Some(ext) = extension_for_mime(&mime) {
                return ResolvedHint {
                    extension: Some(ext.to_string()),
                    mime_type: Some(mime),
                    sniffed: false,
                };
            }
            debug!(mime = %mime, "Declared MIME type not recognized, trying other hints");
        }

        if let Some(ext) = self.filename_extension() {
            return ResolvedHint {
                mime_type: self.specific_mime(),
                extension: Some(ext),
                sniffed: false,
            };
        }

        match infer::get(bytes) {
            Some(kind) => ResolvedHint {
                extension: Some(kind.extension().to_string()),
                mime_type: Some(kind.mime_type().to_string()),
                sniffed: true,
            },
            None => ResolvedHint {
                extension: None,
                mime_type: self.specific_mime(),
                sniffed: true,
            },
        }
    }
}

/// Map an audio/video MIME essence to the extension decoders understand
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let ext = match mime {
        "audio/wav" | "audio/x-wav" | "audio/wave" | "audio/vnd.wave" => "wav",
        "audio/mpeg" | "audio/mp3" | "audio/mpeg3" | "audio/x-mpeg-3" => "mp3",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => "m4a",
        "video/mp4" => "mp4",
        "audio/aac" | "audio/x-aac" | "audio/aacp" => "aac",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/ogg" | "application/ogg" | "audio/vorbis" => "ogg",
        "audio/opus" => "opus",
        "audio/webm" | "video/webm" => "webm",
        "audio/x-matroska" | "video/x-matroska" => "mka",
        "audio/aiff" | "audio/x-aiff" => "aiff",
        "audio/x-caf" => "caf",
        "audio/amr" | "audio/amr-wb" => "amr",
        "audio/3gpp" | "video/3gpp" | "audio/3gpp2" => "3gp",
        "audio/x-ms-wma" => "wma",
        _ => return None,
    };
    Some(ext)
}
