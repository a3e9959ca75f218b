//! Content typing for downloaded and fetched bytes.
//!
//! Browsers hand over downloads without a trustworthy `Content-Type`, and the
//! FTP fetch has none at all, so the MIME type is sniffed from magic numbers
//! (with the URL's file extension as a hint) and the text encoding is guessed
//! from the bytes themselves.

use base64::Engine;
use chardetng::EncodingDetector;
use encoding_rs::Encoding;

/// Encoding label used for content that is not text.
pub const BINARY_ENCODING: &str = "binary";

const OCTET_STREAM: &str = "application/octet-stream";

/// Magic-number signatures checked at offset zero.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b", "application/gzip"),
    (b"BZh", "application/x-bzip2"),
    (b"\xfd7zXZ\x00", "application/x-xz"),
    (b"7z\xbc\xaf\x27\x1c", "application/x-7z-compressed"),
    (b"II*\x00", "image/tiff"),
    (b"MM\x00*", "image/tiff"),
    (b"\x00\x00\x01\x00", "image/x-icon"),
    (b"\x89HDF\r\n\x1a\n", "application/x-hdf5"),
    (b"ID3", "audio/mpeg"),
    (b"OggS", "audio/ogg"),
    (b"\x7fELF", "application/x-executable"),
];

/// File extensions used when the bytes carry no recognisable signature.
const EXTENSIONS: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("csv", "text/csv"),
    ("tsv", "text/tab-separated-values"),
    ("tab", "text/tab-separated-values"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("xml", "application/xml"),
    ("rdf", "application/rdf+xml"),
    ("owl", "application/rdf+xml"),
    ("ttl", "text/turtle"),
    ("json", "application/json"),
    ("jsonld", "application/ld+json"),
    ("svg", "image/svg+xml"),
    ("fasta", "text/plain"),
    ("fa", "text/plain"),
    ("obo", "text/plain"),
    ("pdb", "chemical/x-pdb"),
    ("mol", "chemical/x-mdl-molfile"),
    ("sdf", "chemical/x-mdl-sdfile"),
];

/// Sniffs the MIME type of `content`, using the extension of `url`'s last path
/// segment as a hint.
///
/// Binary signatures win over the extension. Textual markup is recognised from
/// its leading bytes. Otherwise the extension decides, and failing that the
/// detected encoding separates `text/plain` from `application/octet-stream`.
pub fn sniff_mime(content: &[u8], url: &str) -> String {
    if let Some(mime) = sniff_signature(content) {
        return mime.to_string();
    }

    let extension = url_extension(url);
    if let Some(mime) = sniff_markup(content, extension.as_deref()) {
        return mime.to_string();
    }

    if let Some(mime) = extension.as_deref().and_then(mime_for_extension) {
        return mime.to_string();
    }

    if sniff_encoding(content) == BINARY_ENCODING {
        OCTET_STREAM.to_string()
    } else {
        "text/plain".to_string()
    }
}

fn sniff_signature(content: &[u8]) -> Option<&'static str> {
    if content.len() >= 12 && &content[..4] == b"RIFF" && &content[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    SIGNATURES
        .iter()
        .find(|(magic, _)| content.starts_with(magic))
        .map(|(_, mime)| *mime)
}

fn sniff_markup(content: &[u8], extension: Option<&str>) -> Option<&'static str> {
    let start = content
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(content.len());
    let head: Vec<u8> = content[start..]
        .iter()
        .take(64)
        .map(|b| b.to_ascii_lowercase())
        .collect();

    if head.starts_with(b"<!doctype html") || head.starts_with(b"<html") {
        return Some("text/html");
    }
    if head.starts_with(b"<svg") {
        return Some("image/svg+xml");
    }
    if head.starts_with(b"<?xml") {
        return Some(match extension {
            Some("svg") => "image/svg+xml",
            Some("rdf") | Some("owl") => "application/rdf+xml",
            Some("html") | Some("htm") | Some("xhtml") => "application/xhtml+xml",
            _ => "application/xml",
        });
    }
    if (head.starts_with(b"{") || head.starts_with(b"["))
        && serde_json::from_slice::<serde_json::Value>(&content[start..]).is_ok()
    {
        return Some("application/json");
    }
    None
}

fn mime_for_extension(extension: &str) -> Option<&'static str> {
    EXTENSIONS
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| *mime)
}

fn url_extension(url: &str) -> Option<String> {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    };
    let file_name = path.rsplit('/').next()?;
    let (_, extension) = file_name.rsplit_once('.')?;
    if extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

/// Guesses the text encoding of `content`.
///
/// Returns the lower-cased encoding name (`utf-8`, `utf-16le`, `ascii`,
/// `shift_jis`, ...) or [`BINARY_ENCODING`] when the bytes do not look like
/// text. Empty content counts as binary. Legacy encodings are guessed by
/// `chardetng` from byte statistics.
pub fn sniff_encoding(content: &[u8]) -> String {
    if content.is_empty() {
        return BINARY_ENCODING.to_string();
    }
    if let Some((encoding, _)) = Encoding::for_bom(content) {
        return encoding.name().to_ascii_lowercase();
    }
    if looks_binary(content) {
        return BINARY_ENCODING.to_string();
    }
    if content.is_ascii() {
        return "ascii".to_string();
    }
    if std::str::from_utf8(content).is_ok() {
        return "utf-8".to_string();
    }
    let mut detector = EncodingDetector::new();
    detector.feed(content, true);
    detector.guess(None, false).name().to_ascii_lowercase()
}

/// NUL bytes or a high share of control characters mark non-text content.
fn looks_binary(content: &[u8]) -> bool {
    if content.contains(&0) {
        return true;
    }
    let controls = content
        .iter()
        .filter(|&&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c | 0x1b))
        .count();
    controls * 10 > content.len()
}

/// Formats a `Content-Type` value from a MIME type and an encoding.
pub fn content_type(mime_type: &str, encoding: &str) -> String {
    format!("{mime_type}; charset={encoding}")
}

/// Decodes `content` as text in `encoding`, or wraps it in a base64 `data:`
/// URI when the encoding is [`BINARY_ENCODING`].
pub fn decode_content(content: &[u8], mime_type: &str, encoding: &str) -> String {
    if encoding == BINARY_ENCODING {
        return format!(
            "data:{};base64,{}",
            mime_type,
            base64::engine::general_purpose::STANDARD.encode(content)
        );
    }
    match Encoding::for_label(encoding.as_bytes()) {
        Some(encoding) => encoding.decode(content).0.into_owned(),
        None => String::from_utf8_lossy(content).into_owned(),
    }
}

/// Decodes a response body using the charset of its `Content-Type`, falling
/// back to a BOM and then to UTF-8.
pub fn decode_text(content: &[u8], header_content_type: Option<&str>) -> String {
    let label = header_content_type.and_then(|value| {
        value.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"').to_string())
        })
    });
    let encoding = label
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);
    encoding.decode(content).0.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_mime_signatures() {
        assert_eq!(sniff_mime(b"%PDF-1.7\n...", "https://a.example/x"), "application/pdf");
        assert_eq!(
            sniff_mime(b"\x89PNG\r\n\x1a\n\x00\x00", "https://a.example/x.txt"),
            "image/png"
        );
        assert_eq!(
            sniff_mime(b"\x1f\x8b\x08\x00rest", "ftp://a.example/pub/data.gz"),
            "application/gzip"
        );
        assert_eq!(
            sniff_mime(b"RIFF\x10\x00\x00\x00WEBPVP8 ", "https://a.example/i"),
            "image/webp"
        );
    }

    #[test]
    fn test_sniff_mime_markup() {
        assert_eq!(
            sniff_mime(b"  <!DOCTYPE html><html></html>", "https://a.example/"),
            "text/html"
        );
        assert_eq!(
            sniff_mime(b"<?xml version=\"1.0\"?><root/>", "https://a.example/entry"),
            "application/xml"
        );
        assert_eq!(
            sniff_mime(b"<?xml version=\"1.0\"?><svg/>", "https://a.example/logo.svg"),
            "image/svg+xml"
        );
        assert_eq!(
            sniff_mime(br#"{"id": "CHEBI:15377"}"#, "https://a.example/api"),
            "application/json"
        );
    }

    #[test]
    fn test_sniff_mime_falls_back_to_extension_then_encoding() {
        assert_eq!(sniff_mime(b"a,b\n1,2\n", "https://a.example/t.CSV"), "text/csv");
        assert_eq!(sniff_mime(b"water", "https://a.example/CHEBI:15377"), "text/plain");
        assert_eq!(
            sniff_mime(b"\x00\x01\x02\x03", "https://a.example/blob"),
            "application/octet-stream"
        );
        // Brace without valid JSON is just text
        assert_eq!(sniff_mime(b"{not json", "https://a.example/x"), "text/plain");
    }

    #[test]
    fn test_sniff_encoding_detects_legacy_encodings() {
        let text = "水は水素と酸素からなる化合物である。常温では透明な液体で、生命にとって欠かせない物質です。";
        let (shift_jis, _, _) = encoding_rs::SHIFT_JIS.encode(text);
        assert_eq!(sniff_encoding(&shift_jis), "shift_jis");

        let encoding = sniff_encoding(&shift_jis);
        assert_eq!(decode_content(&shift_jis, "text/plain", &encoding).chars().next(), Some('水'));
    }

    #[test]
    fn test_sniff_encoding() {
        assert_eq!(sniff_encoding(b"water"), "ascii");
        assert_eq!(sniff_encoding("eau \u{e9}l\u{e9}mentaire".as_bytes()), "utf-8");
        assert_eq!(sniff_encoding(b"\xef\xbb\xbfwater"), "utf-8");
        assert_eq!(sniff_encoding(b"\xff\xfew\x00"), "utf-16le");
        assert_eq!(sniff_encoding(b"caf\xe9 au lait"), "windows-1252");
        assert_eq!(sniff_encoding(b"\x89PNG\r\n\x1a\n\x00"), BINARY_ENCODING);
        assert_eq!(sniff_encoding(b""), BINARY_ENCODING);
    }

    #[test]
    fn test_content_type_format() {
        assert_eq!(content_type("text/plain", "utf-8"), "text/plain; charset=utf-8");
    }

    #[test]
    fn test_decode_content() {
        assert_eq!(decode_content(b"water", "text/plain", "ascii"), "water");
        assert_eq!(decode_content(b"caf\xe9", "text/plain", "windows-1252"), "caf\u{e9}");
        assert_eq!(
            decode_content(b"\x00\x01", "application/octet-stream", BINARY_ENCODING),
            "data:application/octet-stream;base64,AAE="
        );
    }

    #[test]
    fn test_decode_text_uses_header_charset() {
        assert_eq!(
            decode_text(b"caf\xe9", Some("text/html; charset=ISO-8859-1")),
            "caf\u{e9}"
        );
        assert_eq!(decode_text("caf\u{e9}".as_bytes(), Some("text/plain")), "caf\u{e9}");
        assert_eq!(decode_text(b"water", None), "water");
    }
}
