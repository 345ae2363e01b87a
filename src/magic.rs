//! UTI inference and file-icon eligibility (C5 Ask-payload helper).
//!
//! Both "UTI inference from magic bytes" and "file-icon generation from
//! image headers" are named in SPEC_FULL §1 as external collaborators: the
//! core only needs to decide *whether* a file looks like an image (to
//! gate auto-inclusion of `FileIcon`) and to produce *some* UTI string for
//! `FileType`. The exact taxonomy is an Open Question resolved in
//! SPEC_FULL §9 as "a small magic-byte table with a generic fallback,
//! behind a trait so a richer table can be swapped in."

use std::path::Path;

/// Apple's generic-binary UTI, used when no more specific type is known.
pub const FALLBACK_UTI: &str = "public.data";

/// Infers a UTI string for a file from its leading bytes.
///
/// Implementations are only required to read the first 128 bytes of the
/// file (SPEC_FULL §4.5's `FileType` rule), matching the Python original's
/// `f.read(128)` before magic sniffing.
pub trait UtiDetector: Send + Sync {
    fn detect(&self, header: &[u8]) -> DetectedType;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectedType {
    pub uti: String,
    pub mime_type: Option<String>,
}

impl DetectedType {
    pub fn is_image(&self) -> bool {
        self.mime_type
            .as_deref()
            .map(|m| m.starts_with("image"))
            .unwrap_or(false)
    }
}

/// Default detector: `infer`'s magic-byte matcher mapped onto a small table
/// of well-known UTIs, falling back to [`FALLBACK_UTI`].
pub struct MagicByteUtiDetector;

impl UtiDetector for MagicByteUtiDetector {
    fn detect(&self, header: &[u8]) -> DetectedType {
        let Some(kind) = infer::get(header) else {
            return DetectedType {
                uti: FALLBACK_UTI.to_string(),
                mime_type: None,
            };
        };
        let mime = kind.mime_type().to_string();
        let uti = uti_for_mime(&mime, kind.extension()).to_string();
        DetectedType {
            uti,
            mime_type: Some(mime),
        }
    }
}

fn uti_for_mime(mime: &str, extension: &str) -> &'static str {
    match (mime, extension) {
        ("image/png", _) => "public.png",
        ("image/jpeg", _) => "public.jpeg",
        ("image/gif", _) => "com.compuserve.gif",
        ("image/bmp", _) => "com.microsoft.bmp",
        ("image/webp", _) => "org.webmproject.webp",
        ("image/heic", _) => "public.heic",
        (m, _) if m.starts_with("image/") => "public.image",
        ("application/pdf", _) => "com.adobe.pdf",
        ("application/zip", _) => "public.zip-archive",
        ("application/gzip", _) => "org.gnu.gnu-zip-archive",
        ("video/mp4", _) => "public.mpeg-4",
        ("video/quicktime", _) => "com.apple.quicktime-movie",
        ("audio/mpeg", _) => "public.mp3",
        ("text/plain", _) => "public.plain-text",
        _ => FALLBACK_UTI,
    }
}

/// Reads the leading header bytes used by UTI inference (at most 128, per
/// SPEC_FULL §4.5).
pub fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; 128];
    let n = file.read(&mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

/// Produces icon bytes for a file believed to be an image. A no-op by
/// default: actual icon generation from image headers is an external
/// collaborator per SPEC_FULL §1, so the built-in implementation declines
/// every file and callers may plug in a real generator (e.g. a thumbnailer)
/// without this crate needing to depend on one.
pub trait IconGenerator: Send + Sync {
    fn generate(&self, path: &Path) -> Option<Vec<u8>>;
}

pub struct NullIconGenerator;

impl IconGenerator for NullIconGenerator {
    fn generate(&self, _path: &Path) -> Option<Vec<u8>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_magic_maps_to_public_png() {
        let header = [0x89u8, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        let detected = MagicByteUtiDetector.detect(&header);
        assert_eq!(detected.uti, "public.png");
        assert!(detected.is_image());
    }

    #[test]
    fn unrecognized_bytes_fall_back_to_public_data() {
        let detected = MagicByteUtiDetector.detect(b"not a known magic header");
        assert_eq!(detected.uti, FALLBACK_UTI);
        assert!(!detected.is_image());
    }

    #[test]
    fn null_icon_generator_always_declines() {
        assert!(NullIconGenerator.generate(Path::new("/tmp/whatever.png")).is_none());
    }
}
