//! Writes title/description/tags into an asset's XMP metadata container.
//!
//! The rest of the crate only talks to the [`MetadataEmbedder`] trait;
//! the shipped [`XmpEmbedder`] covers the containers e621 serves that
//! can hold XMP (JPEG and PNG). Everything else is reported as
//! [`EmbedError::UnsupportedFormat`], which callers downgrade to a
//! warning instead of failing the download.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use img_parts::jpeg::{markers, Jpeg, JpegSegment};
use img_parts::png::{Png, PngChunk};
use img_parts::Bytes;
use thiserror::Error;

/// The metadata payload written into an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetMetadata {
    /// Becomes `dc:title`.
    pub title: String,
    /// Becomes `dc:description`; `None` leaves any existing description alone.
    pub description: Option<String>,
    /// Becomes the `dc:subject` bag, in this exact order.
    pub tags: Vec<String>,
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EmbedError {
    /// The file's format has no place for the required metadata.
    /// Callers treat this as a warning, not a failure.
    #[error("`{0}` files cannot hold XMP metadata")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The file does not parse as the container its extension claims.
    #[error("malformed image container: {0}")]
    Container(#[from] img_parts::Error),
}

/// The collaborator that persists metadata into an asset file.
///
/// `embed` is one scoped open → mutate → persist operation; on every
/// failure path the file on disk must be left exactly as it was.
pub trait MetadataEmbedder {
    fn embed(&self, filepath: &Path, metadata: &AssetMetadata) -> Result<(), EmbedError>;
}

/// The shipped embedder: an XMP packet carrying `dc:title`,
/// `dc:description` and a `dc:subject` bag, stored in a JPEG APP1
/// segment or a PNG iTXt chunk.
///
/// Embedding twice replaces the previous packet instead of stacking a
/// second one.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmpEmbedder;

/// The APP1 namespace header that marks a JPEG segment as XMP.
const JPEG_XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

/// The iTXt keyword that marks a PNG chunk as XMP, followed by the
/// null separators and the uncompressed/no-language header fields.
const PNG_XMP_KEYWORD: &[u8] = b"XML:com.adobe.xmp\0";
const PNG_ITXT_HEADER_TAIL: &[u8] = b"\0\0\0\0";

impl MetadataEmbedder for XmpEmbedder {
    fn embed(&self, filepath: &Path, metadata: &AssetMetadata) -> Result<(), EmbedError> {
        let ext = filepath
            .extension()
            .and_then(OsStr::to_str)
            .unwrap_or_default()
            .to_ascii_lowercase();

        let rewrite = match ext.as_str() {
            "jpg" | "jpeg" => embed_jpeg,
            "png" => embed_png,
            _ => return Err(EmbedError::UnsupportedFormat(ext)),
        };

        let packet = xmp_packet(metadata);
        let input = Bytes::from(std::fs::read(filepath)?);
        let output = rewrite(input, &packet)?;

        persist(filepath, &output)
    }
}

/// Replace the file only after the rewritten bytes are fully on disk,
/// so a crash or a full disk never leaves a half-written asset.
fn persist(filepath: &Path, bytes: &[u8]) -> Result<(), EmbedError> {
    let mut tmp = filepath.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    if let Err(err) = std::fs::write(&tmp, bytes) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err.into());
    }
    std::fs::rename(&tmp, filepath)?;
    Ok(())
}

fn embed_jpeg(input: Bytes, packet: &str) -> Result<Bytes, EmbedError> {
    let mut jpeg = Jpeg::from_bytes(input)?;

    jpeg.segments_mut().retain(|segment| {
        !(segment.marker() == markers::APP1 && segment.contents().starts_with(JPEG_XMP_HEADER))
    });

    let mut contents = Vec::with_capacity(JPEG_XMP_HEADER.len() + packet.len());
    contents.extend_from_slice(JPEG_XMP_HEADER);
    contents.extend_from_slice(packet.as_bytes());
    jpeg.segments_mut().insert(
        0,
        JpegSegment::new_with_contents(markers::APP1, Bytes::from(contents)),
    );

    Ok(jpeg.encoder().bytes())
}

fn embed_png(input: Bytes, packet: &str) -> Result<Bytes, EmbedError> {
    let mut png = Png::from_bytes(input)?;

    png.chunks_mut().retain(|chunk| {
        !(&chunk.kind() == b"iTXt" && chunk.contents().starts_with(PNG_XMP_KEYWORD))
    });

    let mut contents =
        Vec::with_capacity(PNG_XMP_KEYWORD.len() + PNG_ITXT_HEADER_TAIL.len() + packet.len());
    contents.extend_from_slice(PNG_XMP_KEYWORD);
    contents.extend_from_slice(PNG_ITXT_HEADER_TAIL);
    contents.extend_from_slice(packet.as_bytes());
    let chunk = PngChunk::new(*b"iTXt", Bytes::from(contents));

    // before IEND, which is always the last stored chunk
    let pos = png
        .chunks()
        .iter()
        .position(|chunk| &chunk.kind() == b"IEND")
        .unwrap_or(png.chunks().len());
    png.chunks_mut().insert(pos, chunk);

    Ok(png.encoder().bytes())
}

/// Serialize `metadata` as a minimal Dublin-Core XMP packet.
fn xmp_packet(metadata: &AssetMetadata) -> String {
    let mut properties = String::new();

    properties.push_str(&format!(
        "<dc:title><rdf:Alt><rdf:li xml:lang=\"x-default\">{}</rdf:li></rdf:Alt></dc:title>",
        xml_escape(&metadata.title)
    ));

    if let Some(description) = &metadata.description {
        properties.push_str(&format!(
            "<dc:description><rdf:Alt><rdf:li xml:lang=\"x-default\">{}</rdf:li></rdf:Alt></dc:description>",
            xml_escape(description)
        ));
    }

    if !metadata.tags.is_empty() {
        properties.push_str("<dc:subject><rdf:Bag>");
        for tag in &metadata.tags {
            properties.push_str(&format!("<rdf:li>{}</rdf:li>", xml_escape(tag)));
        }
        properties.push_str("</rdf:Bag></dc:subject>");
    }

    format!(
        "<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\
         <x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\
         <rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\
         <rdf:Description rdf:about=\"\" xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\
         {properties}\
         </rdf:Description></rdf:RDF></x:xmpmeta>\
         <?xpacket end=\"w\"?>"
    )
}

fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    // the canonical 1x1 transparent PNG
    const TINY_PNG: &[u8] = &[
        0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, // signature
        0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52, // IHDR
        0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
        0x15, 0xc4, 0x89, //
        0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, // IDAT
        0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, //
        0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82, // IEND
    ];

    fn metadata() -> AssetMetadata {
        AssetMetadata {
            title: String::from("https://e621.net/posts/123"),
            description: Some(String::from("a <fox> & \"friends\"")),
            tags: vec![String::from("fox"), String::from("artist: bob")],
        }
    }

    fn xmp_chunk_contents(path: &Path) -> Vec<Vec<u8>> {
        let png = Png::from_bytes(Bytes::from(std::fs::read(path).unwrap())).unwrap();
        png.chunks()
            .iter()
            .filter(|chunk| {
                &chunk.kind() == b"iTXt" && chunk.contents().starts_with(PNG_XMP_KEYWORD)
            })
            .map(|chunk| chunk.contents().to_vec())
            .collect()
    }

    #[test]
    fn test_embed_png() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("tiny.png");
        std::fs::write(&path, TINY_PNG).unwrap();

        XmpEmbedder.embed(&path, &metadata()).unwrap();

        let chunks = xmp_chunk_contents(&path);
        assert_eq!(chunks.len(), 1);
        let text = String::from_utf8_lossy(&chunks[0]).into_owned();
        assert!(text.contains("https://e621.net/posts/123"));
        assert!(text.contains("<rdf:li>fox</rdf:li>"));
        assert!(text.contains("<rdf:li>artist: bob</rdf:li>"));
        // escaped, never raw
        assert!(text.contains("a &lt;fox&gt; &amp; &quot;friends&quot;"));

        // no stray temp file
        assert!(!temp_dir.path().join("tiny.png.tmp").exists());
        temp_dir.close().unwrap();
    }

    #[test]
    fn test_embed_png_twice_replaces_packet() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("tiny.png");
        std::fs::write(&path, TINY_PNG).unwrap();

        XmpEmbedder.embed(&path, &metadata()).unwrap();
        let mut second = metadata();
        second.tags.push(String::from("second_pass"));
        XmpEmbedder.embed(&path, &second).unwrap();

        let chunks = xmp_chunk_contents(&path);
        assert_eq!(chunks.len(), 1, "re-embedding must not stack packets");
        let text = String::from_utf8_lossy(&chunks[0]).into_owned();
        assert!(text.contains("second_pass"));

        temp_dir.close().unwrap();
    }

    #[test]
    fn test_embed_skips_description_when_absent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("tiny.png");
        std::fs::write(&path, TINY_PNG).unwrap();

        let mut meta = metadata();
        meta.description = None;
        XmpEmbedder.embed(&path, &meta).unwrap();

        let chunks = xmp_chunk_contents(&path);
        let text = String::from_utf8_lossy(&chunks[0]).into_owned();
        assert!(!text.contains("dc:description"));

        temp_dir.close().unwrap();
    }

    #[test]
    fn test_unsupported_format_leaves_file_untouched() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("video.webm");
        std::fs::write(&path, b"definitely not xmp capable").unwrap();

        let result = XmpEmbedder.embed(&path, &metadata());
        assert!(matches!(result, Err(EmbedError::UnsupportedFormat(ext)) if ext == "webm"));
        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"definitely not xmp capable"
        );

        temp_dir.close().unwrap();
    }

    #[test]
    fn test_malformed_container() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("broken.png");
        std::fs::write(&path, b"not a png at all").unwrap();

        let result = XmpEmbedder.embed(&path, &metadata());
        assert!(matches!(result, Err(EmbedError::Container(_))));
        // failure must not corrupt the original
        assert_eq!(std::fs::read(&path).unwrap(), b"not a png at all");

        temp_dir.close().unwrap();
    }
}
