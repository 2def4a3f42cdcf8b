//! Text extraction and chunking-mode inference for source files.
//!
//! One document per file: UTF-8 read for text/code/markdown, `pdf-extract`
//! for PDF, and a `zip` + `quick-xml` walk for XLSX that emits one line per
//! spreadsheet row (cells tab-joined) so the lines chunking mode can treat
//! every row as a retrievable unit.
//!
//! Mode inference is a pure mapping over the file extension
//! ([`mode_for_extension`]), keeping the chunker and the ingestion
//! coordinator free of filesystem concerns. Unrecognized extensions are a
//! skip (`Ok(None)`), not an error.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

use crate::models::{ChunkMode, ExtractedDocument};

/// Extensions chunked as blank-line-delimited code blocks.
const CODE_EXTENSIONS: &[&str] = &[
    "ts", "js", "tsx", "jsx", "py", "java", "cpp", "c", "h", "cs", "go", "rs", "php", "swift",
    "kt",
];

/// Non-code text extensions chunked as word windows.
const TEXT_EXTENSIONS: &[&str] = &["txt", "json", "html", "css", "yaml", "yml", "xml", "toml"];

/// Maximum worksheets to process per workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Map a file extension (without the dot, any case) to its chunking mode.
///
/// `None` means the format is unsupported and the file should be skipped.
pub fn mode_for_extension(ext: &str) -> Option<ChunkMode> {
    let ext = ext.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(ChunkMode::Words),
        "xlsx" => Some(ChunkMode::Lines),
        "md" => Some(ChunkMode::Markdown),
        e if CODE_EXTENSIONS.contains(&e) => Some(ChunkMode::Code),
        e if TEXT_EXTENSIONS.contains(&e) => Some(ChunkMode::Words),
        _ => None,
    }
}

/// Extract one document from `path`.
///
/// Returns `Ok(None)` for unsupported extensions; extraction failures on
/// supported formats are errors the caller is expected to log and skip.
pub fn extract_file(path: &Path) -> Result<Option<ExtractedDocument>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let Some(mode) = mode_for_extension(&ext) else {
        return Ok(None);
    };

    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let text = match ext.as_str() {
        "pdf" => extract_pdf(path)?,
        "xlsx" => extract_xlsx(path)?,
        _ => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
    };

    Ok(Some(ExtractedDocument { text, mode, source }))
}

fn extract_pdf(path: &Path) -> Result<String> {
    pdf_extract::extract_text(path)
        .map_err(|e| anyhow::anyhow!("PDF extraction failed for {}: {}", path.display(), e))
}

/// Extract all worksheet rows from an XLSX workbook, one text line per row.
fn extract_xlsx(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.as_slice()))
        .map_err(|e| anyhow::anyhow!("XLSX archive invalid for {}: {}", path.display(), e))?;

    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet_names = list_worksheet_names(&mut archive);

    let mut lines: Vec<String> = Vec::new();
    for name in sheet_names.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        extract_sheet_rows(&xml, &shared_strings, &mut lines)?;
    }
    Ok(lines.join("\n"))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| anyhow::anyhow!("ZIP entry {} unreadable: {}", name, e))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| anyhow::anyhow!("ZIP entry {} unreadable: {}", name, e))?;
    if out.len() as u64 >= max_bytes {
        anyhow::bail!("ZIP entry {} exceeds size limit ({} bytes)", name, max_bytes);
    }
    Ok(out)
}

/// The shared-string table is optional; workbooks with only numeric cells
/// omit it.
fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>> {
    if archive.by_name("xl/sharedStrings.xml").is_err() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                } else if in_si && e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        strings.push(te.unescape().unwrap_or_default().into_owned());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => anyhow::bail!("sharedStrings.xml malformed: {}", e),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Worksheet entries ordered by their numeric suffix (sheet1, sheet2, …).
fn list_worksheet_names(archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Walk one worksheet's XML, appending a tab-joined line per non-empty row.
fn extract_sheet_rows(
    xml: &[u8],
    shared_strings: &[String],
    lines: &mut Vec<String>,
) -> Result<()> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut row_cells: Vec<String> = Vec::new();
    let mut cell_is_shared = false;
    let mut in_v = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row_cells.clear(),
                b"c" => {
                    cell_is_shared = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                b"v" => in_v = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_v => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if !s.is_empty() {
                    if cell_is_shared {
                        if let Ok(i) = s.parse::<usize>() {
                            if let Some(text) = shared_strings.get(i) {
                                row_cells.push(text.clone());
                            }
                        }
                    } else {
                        row_cells.push(s.to_string());
                    }
                }
                in_v = false;
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"row" => {
                    if !row_cells.is_empty() {
                        lines.push(row_cells.join("\t"));
                        row_cells.clear();
                    }
                }
                b"c" => cell_is_shared = false,
                b"v" => in_v = false,
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => anyhow::bail!("worksheet XML malformed: {}", e),
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}
