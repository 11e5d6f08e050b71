//! Parser stage: raw text extraction per container format, plus the
//! quick-extraction pass that fills the placeholder candidate right after
//! `parsed`.
//!
//! PDF: FlateDecode content streams are inflated and text-showing
//! operator strings collected. DOCX/HWPX: ZIP members are read and text
//! runs pulled from the XML. Legacy DOC/HWP (OLE compound files): printable
//! ASCII and UTF-16LE runs are extracted without walking the FAT — no
//! corpus-grade CFB reader exists in our stack, and resumes survive this
//! fine (the router has already rejected encrypted documents).

use std::io::Read;
use thiserror::Error;

use crate::files::FileKind;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("parse failed: {0}")]
    ParseFailed(String),

    #[error("extracted text too short: {0} chars")]
    TextTooShort(usize),
}

/// Extract raw text from a validated upload
pub fn extract_text(kind: FileKind, bytes: &[u8], min_len: usize) -> Result<String, ParseError> {
    let text = match kind {
        FileKind::Pdf => pdf_text(bytes)?,
        FileKind::Docx => docx_text(bytes)?,
        FileKind::Hwpx => hwpx_text(bytes)?,
        FileKind::Doc | FileKind::Hwp => legacy_text(bytes)?,
    };

    let trimmed = text.trim().to_string();
    let char_count = trimmed.chars().count();
    if char_count < min_len {
        return Err(ParseError::TextTooShort(char_count));
    }
    Ok(trimmed)
}

// --- PDF ---

fn pdf_text(bytes: &[u8]) -> Result<String, ParseError> {
    let mut out = String::new();

    for stream in pdf_streams(bytes) {
        // only content streams carry text blocks
        if find(&stream, b"BT").is_some() {
            collect_pdf_strings(&stream, &mut out);
        }
    }

    if out.trim().is_empty() {
        return Err(ParseError::ParseFailed("no text content found".into()));
    }
    Ok(out)
}

/// Slice out every `stream … endstream` body, inflating FlateDecode bodies
fn pdf_streams(bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut result = Vec::new();
    let mut cursor = 0;

    while let Some(start) = find_from(bytes, b"stream", cursor) {
        let mut body_start = start + b"stream".len();
        if bytes.get(body_start) == Some(&b'\r') {
            body_start += 1;
        }
        if bytes.get(body_start) == Some(&b'\n') {
            body_start += 1;
        }

        let Some(end) = find_from(bytes, b"endstream", body_start) else {
            break;
        };
        let body = &bytes[body_start..end];

        let mut inflated = Vec::new();
        let mut decoder = flate2::read::ZlibDecoder::new(body);
        if decoder.read_to_end(&mut inflated).is_ok() && !inflated.is_empty() {
            result.push(inflated);
        } else {
            result.push(body.to_vec());
        }

        cursor = end + b"endstream".len();
    }

    result
}

/// Collect `(…)` string literals from a content stream. Hex strings are
/// skipped: without the font CMap they decode to glyph indices, not text.
fn collect_pdf_strings(stream: &[u8], out: &mut String) {
    let mut i = 0;
    while i < stream.len() {
        if stream[i] == b'(' {
            let (literal, next) = parse_pdf_literal(stream, i + 1);
            push_pdf_literal(&literal, out);
            i = next;
        } else if stream[i] == b'<' {
            // skip hex string
            i += 1;
            while i < stream.len() && stream[i] != b'>' {
                i += 1;
            }
            i += 1;
        } else {
            if stream[i] == b'E'
                && stream.get(i + 1) == Some(&b'T')
                && !out.ends_with('\n')
            {
                out.push('\n');
            }
            i += 1;
        }
    }
}

/// Parse one literal starting after `(`, honoring nesting and escapes.
/// Returns the raw bytes and the index after the closing `)`.
fn parse_pdf_literal(stream: &[u8], mut i: usize) -> (Vec<u8>, usize) {
    let mut literal = Vec::new();
    let mut depth = 1;

    while i < stream.len() {
        match stream[i] {
            b'\\' => {
                if let Some(&next) = stream.get(i + 1) {
                    match next {
                        b'n' => literal.push(b'\n'),
                        b'r' => literal.push(b'\r'),
                        b't' => literal.push(b'\t'),
                        b'(' => literal.push(b'('),
                        b')' => literal.push(b')'),
                        b'\\' => literal.push(b'\\'),
                        b'0'..=b'7' => {
                            // up to three octal digits
                            let mut value = 0u32;
                            let mut digits = 0;
                            while digits < 3 {
                                match stream.get(i + 1 + digits) {
                                    Some(&d @ b'0'..=b'7') => {
                                        value = value * 8 + (d - b'0') as u32;
                                        digits += 1;
                                    }
                                    _ => break,
                                }
                            }
                            literal.push(value as u8);
                            i += digits - 1;
                        }
                        _ => literal.push(next),
                    }
                    i += 2;
                    continue;
                }
                i += 1;
            }
            b'(' => {
                depth += 1;
                literal.push(b'(');
                i += 1;
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return (literal, i + 1);
                }
                literal.push(b')');
                i += 1;
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    (literal, i)
}

/// Literals with a UTF-16BE BOM decode as UTF-16; everything else is
/// treated byte-per-char
fn push_pdf_literal(literal: &[u8], out: &mut String) {
    if literal.is_empty() {
        return;
    }
    if literal.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = literal[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        out.push_str(&String::from_utf16_lossy(&units));
    } else {
        for &b in literal {
            out.push(b as char);
        }
    }
    out.push(' ');
}

// --- ZIP-based formats ---

fn docx_text(bytes: &[u8]) -> Result<String, ParseError> {
    let xml = read_zip_member(bytes, "word/document.xml")?;
    xml_text_runs(&xml)
}

fn hwpx_text(bytes: &[u8]) -> Result<String, ParseError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ParseError::ParseFailed(e.to_string()))?;

    let section_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("Contents/") && n.ends_with(".xml"))
        .map(String::from)
        .collect();

    let mut out = String::new();
    for name in section_names {
        let mut xml = String::new();
        archive
            .by_name(&name)
            .map_err(|e| ParseError::ParseFailed(e.to_string()))?
            .read_to_string(&mut xml)
            .map_err(|e| ParseError::ParseFailed(e.to_string()))?;
        if let Ok(text) = xml_text_runs(&xml) {
            out.push_str(&text);
            out.push('\n');
        }
    }

    if out.trim().is_empty() {
        return Err(ParseError::ParseFailed("no text content found".into()));
    }
    Ok(out)
}

fn read_zip_member(bytes: &[u8], member: &str) -> Result<String, ParseError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ParseError::ParseFailed(e.to_string()))?;
    let mut content = String::new();
    archive
        .by_name(member)
        .map_err(|e| ParseError::ParseFailed(format!("{member}: {e}")))?
        .read_to_string(&mut content)
        .map_err(|e| ParseError::ParseFailed(e.to_string()))?;
    Ok(content)
}

/// Pull character data out of `<w:t>` / `<hp:t>` runs, with paragraph
/// boundaries as newlines
fn xml_text_runs(xml: &str) -> Result<String, ParseError> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_text_run = 0u32;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => {
                in_text_run += 1;
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = in_text_run.saturating_sub(1),
                b"p" => {
                    if !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => {
                out.push(' ');
            }
            Ok(Event::Text(t)) if in_text_run > 0 => {
                if let Ok(decoded) = t.decode() {
                    if let Ok(unescaped) = quick_xml::escape::unescape(&decoded) {
                        out.push_str(&unescaped);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::ParseFailed(format!("xml: {e}"))),
            _ => {}
        }
    }

    if out.trim().is_empty() {
        return Err(ParseError::ParseFailed("no text content found".into()));
    }
    Ok(out)
}

// --- legacy OLE formats ---

const MIN_RUN: usize = 4;

fn legacy_text(bytes: &[u8]) -> Result<String, ParseError> {
    let mut out = String::new();

    // UTF-16LE runs (Hangul syllables and basic latin)
    let mut run = String::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        let unit = u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let ch = char::from_u32(unit as u32).filter(|c| is_textual(*c));
        match ch {
            Some(c) => {
                run.push(c);
                i += 2;
            }
            None => {
                flush_run(&mut run, &mut out);
                i += 2;
            }
        }
    }
    flush_run(&mut run, &mut out);

    // printable ASCII runs for 8-bit text sections
    let mut ascii = String::new();
    for &b in bytes {
        if b.is_ascii_graphic() || b == b' ' {
            ascii.push(b as char);
        } else {
            flush_run(&mut ascii, &mut out);
        }
    }
    flush_run(&mut ascii, &mut out);

    if out.trim().is_empty() {
        return Err(ParseError::ParseFailed("no text content found".into()));
    }
    Ok(out)
}

fn is_textual(c: char) -> bool {
    c == ' '
        || c.is_ascii_graphic()
        || ('\u{AC00}'..='\u{D7A3}').contains(&c) // Hangul syllables
        || ('\u{1100}'..='\u{11FF}').contains(&c) // Hangul jamo
}

fn flush_run(run: &mut String, out: &mut String) {
    if run.trim().chars().count() >= MIN_RUN {
        out.push_str(run.trim());
        out.push('\n');
    }
    run.clear();
}

// --- quick extraction ---

/// Plaintext basics pulled from raw text right after parsing. The runner
/// seals the contact fields before anything is persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuickExtract {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub position: Option<String>,
}

fn email_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap()
    })
}

fn phone_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        // domestic 010-1234-5678 and international +82 10 1234 5678 forms
        regex::Regex::new(r"(?:\+?82[ \-]?)?0?1[016789][ \-]?\d{3,4}[ \-]?\d{4}").unwrap()
    })
}

fn labeled_re(labels: &str) -> regex::Regex {
    regex::Regex::new(&format!(r"(?im)^\s*(?:{labels})\s*[:：]\s*(.{{1,60}})$")).unwrap()
}

pub fn quick_extract(raw_text: &str) -> QuickExtract {
    let email = email_re().find(raw_text).map(|m| m.as_str().to_string());
    let phone = phone_re().find(raw_text).map(|m| m.as_str().to_string());

    // first short line without digits or separators tends to be the name
    let name = raw_text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(5)
        .find(|line| {
            line.chars().count() <= 40
                && !line.chars().any(|c| c.is_ascii_digit())
                && !line.contains('@')
                && !line.contains(':')
        })
        .map(String::from);

    let company = labeled_re("company|employer|회사|회사명|직장")
        .captures(raw_text)
        .map(|c| c[1].trim().to_string());
    let position = labeled_re("position|title|role|직책|직무|포지션")
        .captures(raw_text)
        .map(|c| c[1].trim().to_string());

    QuickExtract {
        name,
        phone,
        email,
        company,
        position,
    }
}

/// Distinct contact identities in the document, used by the identity check
pub fn contact_clusters(raw_text: &str) -> (Vec<String>, Vec<String>) {
    use crate::crosscheck::normalize::{normalize_email, normalize_phone};

    let mut emails: Vec<String> = Vec::new();
    for m in email_re().find_iter(raw_text) {
        let normalized = normalize_email(m.as_str());
        if !emails.contains(&normalized) {
            emails.push(normalized);
        }
    }

    let mut phones: Vec<String> = Vec::new();
    for m in phone_re().find_iter(raw_text) {
        let mut normalized = normalize_phone(m.as_str());
        // fold +82 forms into the domestic 0-prefixed form
        if normalized.starts_with("820") {
            normalized = normalized[2..].to_string();
        } else if normalized.starts_with("82") {
            normalized = format!("0{}", &normalized[2..]);
        }
        if !phones.contains(&normalized) {
            phones.push(normalized);
        }
    }

    (emails, phones)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    find_from(haystack, needle, 0)
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_resume_text() -> &'static str {
        "Kim Jiwoo\nBackend Engineer\nEmail: jiwoo@example.com\nPhone: 010-1234-5678\nCompany: Acme Inc\nPosition: Backend Engineer\nExperience: 6 years building payment systems in Rust and Go."
    }

    fn pdf_with_text(text: &str) -> Vec<u8> {
        let content = format!("BT /F1 12 Tf ({}) Tj ET", text.replace('\n', ") Tj T* ("));
        let mut out = b"%PDF-1.4\n1 0 obj << /Type /Page >> endobj\n2 0 obj << /Length 99 >>\nstream\n".to_vec();
        out.extend_from_slice(content.as_bytes());
        out.extend_from_slice(b"\nendstream\nendobj\n%%EOF");
        out
    }

    fn docx_with_text(paragraphs: &[&str]) -> Vec<u8> {
        let mut body = String::new();
        for p in paragraphs {
            body.push_str(&format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p));
        }
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"ns\"><w:body>{}</w:body></w:document>",
            body
        );
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("word/document.xml", options).unwrap();
            writer.write_all(xml.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_pdf_text_extraction() {
        let bytes = pdf_with_text(sample_resume_text());
        let text = extract_text(FileKind::Pdf, &bytes, 40).unwrap();
        assert!(text.contains("Kim Jiwoo"));
        assert!(text.contains("jiwoo@example.com"));
    }

    #[test]
    fn test_pdf_escapes_in_literals() {
        let bytes = pdf_with_text(r"Worked at Acme \(Seoul\) since 2021");
        let text = extract_text(FileKind::Pdf, &bytes, 10).unwrap();
        assert!(text.contains("Acme (Seoul)"));
    }

    #[test]
    fn test_pdf_without_text_fails() {
        let bytes = b"%PDF-1.4\nno streams here\n%%EOF".to_vec();
        assert!(matches!(
            extract_text(FileKind::Pdf, &bytes, 10),
            Err(ParseError::ParseFailed(_))
        ));
    }

    #[test]
    fn test_docx_text_extraction() {
        let bytes = docx_with_text(&["Kim Jiwoo", "Backend Engineer", "Email: jiwoo@example.com"]);
        let text = extract_text(FileKind::Docx, &bytes, 20).unwrap();
        assert!(text.contains("Kim Jiwoo"));
        assert!(text.contains("Backend Engineer"));
        // paragraphs become separate lines
        assert!(text.lines().count() >= 3);
    }

    #[test]
    fn test_text_too_short() {
        let bytes = docx_with_text(&["hi"]);
        assert!(matches!(
            extract_text(FileKind::Docx, &bytes, 80),
            Err(ParseError::TextTooShort(_))
        ));
    }

    #[test]
    fn test_legacy_utf16_run_extraction() {
        let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        bytes.extend_from_slice(&[0u8; 16]);
        for c in "Kim Jiwoo Backend Engineer jiwoo@example.com 010-1234-5678 six years of experience"
            .encode_utf16()
        {
            bytes.extend_from_slice(&c.to_le_bytes());
        }
        let text = extract_text(FileKind::Doc, &bytes, 40).unwrap();
        assert!(text.contains("Kim Jiwoo"));
    }

    #[test]
    fn test_quick_extract_finds_basics() {
        let quick = quick_extract(sample_resume_text());
        assert_eq!(quick.name.as_deref(), Some("Kim Jiwoo"));
        assert_eq!(quick.email.as_deref(), Some("jiwoo@example.com"));
        assert_eq!(quick.phone.as_deref(), Some("010-1234-5678"));
        assert_eq!(quick.company.as_deref(), Some("Acme Inc"));
        assert_eq!(quick.position.as_deref(), Some("Backend Engineer"));
    }

    #[test]
    fn test_contact_clusters_dedupe_formats() {
        let text = "jiwoo@example.com JIWOO@example.com 010-1234-5678 +82 10 1234 5678";
        let (emails, phones) = contact_clusters(text);
        assert_eq!(emails.len(), 1);
        assert_eq!(phones, vec!["01012345678"]);
    }

    #[test]
    fn test_contact_clusters_detect_two_people() {
        let text = "a@example.com 010-1111-2222 and b@example.com 010-3333-4444";
        let (emails, phones) = contact_clusters(text);
        assert_eq!(emails.len(), 2);
        assert_eq!(phones.len(), 2);
    }
}
