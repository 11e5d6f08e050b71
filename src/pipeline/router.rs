//! Router stage: confirm the stored bytes still match the job's claimed
//! format, count pages, and reject encrypted/DRM documents before any
//! parsing work is spent.

use crate::files::{self, FileKind, FileProbe};
use crate::model::ErrorCode;

use super::StageError;

pub fn route(kind: FileKind, bytes: &[u8], max_pages: u32) -> Result<FileProbe, StageError> {
    let magic_ok = match kind {
        FileKind::Pdf => bytes.starts_with(b"%PDF-"),
        FileKind::Docx | FileKind::Hwpx => bytes.starts_with(&[0x50, 0x4B, 0x03, 0x04]),
        FileKind::Doc | FileKind::Hwp => {
            bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1])
        }
    };
    if !magic_ok {
        return Err(StageError::fatal(
            ErrorCode::UnsupportedFormat,
            format!("stored object does not look like {kind}"),
        ));
    }

    let probe = files::probe(kind, bytes);

    if probe.encrypted {
        return Err(StageError::fatal(
            ErrorCode::Encrypted,
            "document is encrypted or DRM-protected",
        ));
    }

    if let Some(pages) = probe.page_count {
        if pages > max_pages {
            return Err(StageError::fatal(
                ErrorCode::TooManyPages,
                format!("{pages} pages exceeds the limit of {max_pages}"),
            ));
        }
    }

    Ok(probe)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf_with_pages(pages: u32) -> Vec<u8> {
        let mut out = b"%PDF-1.4\n".to_vec();
        for i in 0..pages {
            out.extend_from_slice(
                format!("{} 0 obj << /Type /Page >> endobj\n", i + 1).as_bytes(),
            );
        }
        out
    }

    #[test]
    fn test_routes_clean_pdf() {
        let probe = route(FileKind::Pdf, &pdf_with_pages(2), 50).unwrap();
        assert_eq!(probe.page_count, Some(2));
        assert!(!probe.encrypted);
    }

    #[test]
    fn test_rejects_magic_mismatch() {
        let err = route(FileKind::Pdf, b"PK\x03\x04zipzip", 50).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedFormat);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_rejects_encrypted_pdf() {
        let mut bytes = pdf_with_pages(1);
        bytes.extend_from_slice(b"trailer << /Encrypt 9 0 R >>");
        let err = route(FileKind::Pdf, &bytes, 50).unwrap_err();
        assert_eq!(err.code, ErrorCode::Encrypted);
    }

    #[test]
    fn test_rejects_page_overflow_at_boundary() {
        assert!(route(FileKind::Pdf, &pdf_with_pages(50), 50).is_ok());
        let err = route(FileKind::Pdf, &pdf_with_pages(51), 50).unwrap_err();
        assert_eq!(err.code, ErrorCode::TooManyPages);
    }
}
