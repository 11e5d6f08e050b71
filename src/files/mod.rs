//! Upload validation gate and file-format probing.
//!
//! Everything here is pure byte-level inspection: extension rules, magic
//! bytes, ZIP central-directory checks, and the page/encryption probes the
//! pipeline router reuses. No I/O.

use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

/// Accepted resume container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Docx,
    Doc,
    Hwp,
    Hwpx,
}

impl FileKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(FileKind::Pdf),
            "docx" => Some(FileKind::Docx),
            "doc" => Some(FileKind::Doc),
            "hwp" => Some(FileKind::Hwp),
            "hwpx" => Some(FileKind::Hwpx),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Docx => "docx",
            FileKind::Doc => "doc",
            FileKind::Hwp => "hwp",
            FileKind::Hwpx => "hwpx",
        }
    }

    /// OOXML/OWPML containers are ZIP archives
    pub fn is_zip_based(&self) -> bool {
        matches!(self, FileKind::Docx | FileKind::Hwpx)
    }

    /// Legacy formats are OLE compound files
    pub fn is_ole_based(&self) -> bool {
        matches!(self, FileKind::Doc | FileKind::Hwp)
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Extension segments that reject a file name outright when they appear
/// anywhere before the final extension (`report.exe.pdf`).
const DANGEROUS_SEGMENTS: &[&str] = &[
    "exe", "bat", "cmd", "com", "js", "vbs", "php", "sh", "scr", "msi", "jar", "dll",
];

const PDF_MAGIC: &[u8] = b"%PDF-";
const ZIP_MAGIC: &[u8] = &[0x50, 0x4B, 0x03, 0x04];
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

#[derive(Debug, Error, PartialEq)]
pub enum FileValidationError {
    #[error("unsupported extension: {0}")]
    UnsupportedExtension(String),
    #[error("file name contains a dangerous extension segment: {0}")]
    DangerousFileName(String),
    #[error("file is empty")]
    Empty,
    #[error("file exceeds the size limit: {0} bytes")]
    TooLarge(u64),
    #[error("file content does not match claimed {0} format")]
    MagicMismatch(FileKind),
    #[error("archive is missing required {0} members")]
    MissingZipMember(FileKind),
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),
}

/// Validate an upload before any job row is written.
///
/// Checks, in order: file name (extension allow-list + dangerous double
/// extensions), size bounds, magic bytes, and ZIP central-directory members
/// for the ZIP-based formats.
pub fn validate_upload(
    file_name: &str,
    size: u64,
    bytes: &[u8],
    max_size: u64,
) -> Result<FileKind, FileValidationError> {
    let kind = validate_file_name(file_name)?;

    if size == 0 || bytes.is_empty() {
        return Err(FileValidationError::Empty);
    }
    if size > max_size {
        return Err(FileValidationError::TooLarge(size));
    }

    if !magic_matches(kind, bytes) {
        return Err(FileValidationError::MagicMismatch(kind));
    }

    if kind.is_zip_based() {
        check_zip_members(kind, bytes)?;
    }

    Ok(kind)
}

/// Extension allow-list plus the double-extension rule
pub fn validate_file_name(file_name: &str) -> Result<FileKind, FileValidationError> {
    let segments: Vec<&str> = file_name.split('.').collect();
    if segments.len() < 2 {
        return Err(FileValidationError::UnsupportedExtension(String::new()));
    }

    let ext = segments[segments.len() - 1];
    let kind = FileKind::from_extension(ext)
        .ok_or_else(|| FileValidationError::UnsupportedExtension(ext.to_string()))?;

    // every segment between base name and final extension is suspect
    for segment in &segments[1..segments.len() - 1] {
        let lowered = segment.to_ascii_lowercase();
        if DANGEROUS_SEGMENTS.contains(&lowered.as_str()) {
            return Err(FileValidationError::DangerousFileName(lowered));
        }
    }

    Ok(kind)
}

fn magic_matches(kind: FileKind, bytes: &[u8]) -> bool {
    match kind {
        FileKind::Pdf => bytes.starts_with(PDF_MAGIC),
        FileKind::Docx | FileKind::Hwpx => bytes.starts_with(ZIP_MAGIC),
        FileKind::Doc | FileKind::Hwp => bytes.starts_with(OLE_MAGIC),
    }
}

/// The central directory must list at least one member under the format's
/// document root, otherwise the archive is some other ZIP wearing the
/// extension.
fn check_zip_members(kind: FileKind, bytes: &[u8]) -> Result<(), FileValidationError> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| FileValidationError::CorruptArchive(e.to_string()))?;

    let required_prefix = match kind {
        FileKind::Docx => "word/",
        FileKind::Hwpx => "Contents/",
        _ => return Ok(()),
    };

    if archive.file_names().any(|name| name.starts_with(required_prefix)) {
        Ok(())
    } else {
        Err(FileValidationError::MissingZipMember(kind))
    }
}

/// Router-stage probe results
#[derive(Debug, Clone, PartialEq)]
pub struct FileProbe {
    pub kind: FileKind,
    /// Known only for PDFs
    pub page_count: Option<u32>,
    pub encrypted: bool,
}

/// Inspect a validated file for page count and encryption/DRM markers
pub fn probe(kind: FileKind, bytes: &[u8]) -> FileProbe {
    match kind {
        FileKind::Pdf => FileProbe {
            kind,
            page_count: Some(pdf_page_count(bytes)),
            encrypted: contains(bytes, b"/Encrypt"),
        },
        FileKind::Docx | FileKind::Hwpx => FileProbe {
            kind,
            page_count: None,
            encrypted: zip_has_encrypted_entry(bytes),
        },
        FileKind::Doc | FileKind::Hwp => FileProbe {
            kind,
            page_count: None,
            encrypted: ole_has_encryption_marker(bytes),
        },
    }
}

/// Count `/Type /Page` object markers, excluding the `/Pages` tree nodes
fn pdf_page_count(bytes: &[u8]) -> u32 {
    let mut count = 0u32;
    let mut i = 0;
    let needle = b"/Type";
    while let Some(pos) = find_from(bytes, needle, i) {
        let mut j = pos + needle.len();
        while j < bytes.len() && (bytes[j] == b' ' || bytes[j] == b'\r' || bytes[j] == b'\n') {
            j += 1;
        }
        if bytes[j..].starts_with(b"/Page") {
            let after = j + b"/Page".len();
            let next = bytes.get(after).copied().unwrap_or(b' ');
            if !next.is_ascii_alphabetic() {
                count += 1;
            }
        }
        i = pos + 1;
    }
    count
}

/// Local file headers carry the encryption flag in general-purpose bit 0
fn zip_has_encrypted_entry(bytes: &[u8]) -> bool {
    let mut i = 0;
    while let Some(pos) = find_from(bytes, ZIP_MAGIC, i) {
        if let Some(flags) = bytes.get(pos + 6) {
            if flags & 0x01 != 0 {
                return true;
            }
        }
        i = pos + 1;
    }
    false
}

/// Heuristic: OOXML agile encryption stores an `EncryptedPackage` stream and
/// HWP DRM documents carry a `FileHeader` password flag; both leave these
/// marker strings in the compound file directory, which we scan for without
/// walking the FAT.
fn ole_has_encryption_marker(bytes: &[u8]) -> bool {
    contains_utf16le(bytes, "EncryptedPackage")
        || contains_utf16le(bytes, "EncryptionInfo")
        || contains(bytes, b"EncryptedPackage")
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find_from(haystack, needle, 0).is_some()
}

fn find_from(haystack: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    if needle.is_empty() || start >= haystack.len() {
        return None;
    }
    haystack[start..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + start)
}

fn contains_utf16le(haystack: &[u8], needle: &str) -> bool {
    let mut encoded = Vec::with_capacity(needle.len() * 2);
    for b in needle.bytes() {
        encoded.push(b);
        encoded.push(0);
    }
    contains(haystack, &encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn minimal_pdf(pages: u32) -> Vec<u8> {
        let mut out = b"%PDF-1.4\n".to_vec();
        out.extend_from_slice(b"1 0 obj << /Type /Pages /Count 1 >> endobj\n");
        for i in 0..pages {
            out.extend_from_slice(
                format!("{} 0 obj << /Type /Page /Parent 1 0 R >> endobj\n", i + 2).as_bytes(),
            );
        }
        out.extend_from_slice(b"%%EOF\n");
        out
    }

    pub(crate) fn minimal_docx() -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("word/document.xml", options).unwrap();
            writer
                .write_all(b"<w:document><w:body><w:p><w:r><w:t>hello</w:t></w:r></w:p></w:body></w:document>")
                .unwrap();
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_accepts_valid_pdf() {
        let bytes = minimal_pdf(2);
        let kind = validate_upload("resume.pdf", bytes.len() as u64, &bytes, 1024 * 1024).unwrap();
        assert_eq!(kind, FileKind::Pdf);
    }

    #[test]
    fn test_rejects_unknown_extension() {
        let err = validate_upload("resume.txt", 10, b"0123456789", 1024).unwrap_err();
        assert!(matches!(err, FileValidationError::UnsupportedExtension(_)));
    }

    #[test]
    fn test_rejects_dangerous_double_extension() {
        let err = validate_file_name("resume.exe.pdf").unwrap_err();
        assert_eq!(err, FileValidationError::DangerousFileName("exe".into()));
        // a harmless middle segment is fine
        assert!(validate_file_name("resume.final.pdf").is_ok());
    }

    #[test]
    fn test_size_bounds_are_inclusive() {
        let bytes = minimal_pdf(1);
        let max = bytes.len() as u64;
        assert!(validate_upload("a.pdf", max, &bytes, max).is_ok());
        assert!(matches!(
            validate_upload("a.pdf", max + 1, &bytes, max).unwrap_err(),
            FileValidationError::TooLarge(_)
        ));
        assert_eq!(
            validate_upload("a.pdf", 0, &[], max).unwrap_err(),
            FileValidationError::Empty
        );
    }

    #[test]
    fn test_magic_mismatch() {
        let err = validate_upload("a.pdf", 9, b"PK\x03\x04xxxxx", 1024).unwrap_err();
        assert_eq!(err, FileValidationError::MagicMismatch(FileKind::Pdf));
    }

    #[test]
    fn test_docx_requires_word_member() {
        let bytes = minimal_docx();
        assert_eq!(
            validate_upload("a.docx", bytes.len() as u64, &bytes, 1 << 20).unwrap(),
            FileKind::Docx
        );
        // same archive claimed as hwpx lacks Contents/
        let err = validate_upload("a.hwpx", bytes.len() as u64, &bytes, 1 << 20).unwrap_err();
        assert_eq!(err, FileValidationError::MissingZipMember(FileKind::Hwpx));
    }

    #[test]
    fn test_pdf_page_count_excludes_pages_tree() {
        assert_eq!(pdf_page_count(&minimal_pdf(3)), 3);
        assert_eq!(pdf_page_count(&minimal_pdf(0)), 0);
    }

    #[test]
    fn test_probe_detects_pdf_encryption() {
        let mut bytes = minimal_pdf(1);
        assert!(!probe(FileKind::Pdf, &bytes).encrypted);
        bytes.extend_from_slice(b"trailer << /Encrypt 5 0 R >>\n");
        let p = probe(FileKind::Pdf, &bytes);
        assert!(p.encrypted);
        assert_eq!(p.page_count, Some(1));
    }

    #[test]
    fn test_probe_detects_ole_encryption_marker() {
        let mut bytes = OLE_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        assert!(!probe(FileKind::Doc, &bytes).encrypted);
        for b in "EncryptedPackage".bytes() {
            bytes.push(b);
            bytes.push(0);
        }
        assert!(probe(FileKind::Doc, &bytes).encrypted);
    }
}
