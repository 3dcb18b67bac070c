//! Multi-format text extraction for uploaded documents.
//!
//! Turns raw file bytes into the [`Parsed`] contract consumed by the
//! segmenter: full UTF-8 text plus location-annotated segments (PDF pages,
//! spreadsheet sheets). Plain text formats pass through with no segments.
//!
//! Spreadsheets are rendered one line per row, `ColLetter Row: value |
//! value...`, so row-level citations can name a sheet instead of a page.

use std::io::Read;

use crate::error::{EngineError, Result};
use crate::models::{Parsed, Segment};

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// File extensions handled as plain UTF-8 text.
const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "csv", "log", "json", "rs", "py"];

/// Parse file bytes into text + segments, dispatching on the filename
/// extension.
pub fn parse(bytes: &[u8], filename: &str) -> Result<Parsed> {
    let ext = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => parse_pdf(bytes),
        "docx" => parse_docx(bytes),
        "pptx" => parse_pptx(bytes),
        "xlsx" => parse_xlsx(bytes),
        e if TEXT_EXTENSIONS.contains(&e) => Ok(Parsed {
            text: String::from_utf8_lossy(bytes).into_owned(),
            segments: Vec::new(),
        }),
        other => Err(EngineError::InvalidInput(format!(
            "unsupported file type: '{}' ({})",
            other, filename
        ))),
    }
}

fn parse_pdf(bytes: &[u8]) -> Result<Parsed> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| EngineError::InvalidInput(format!("PDF extraction failed: {}", e)))?;

    // pdf-extract emits a form feed between pages; without one, the whole
    // body is treated as page 1.
    let pages: Vec<&str> = text.split('\u{c}').collect();
    let mut segments = Vec::new();
    let mut body = String::new();
    let mut line = 1usize;

    for (i, page) in pages.iter().enumerate() {
        let trimmed = page.trim_matches('\n');
        if trimmed.trim().is_empty() {
            continue;
        }
        let line_count = trimmed.lines().count().max(1);
        segments.push(Segment {
            text: trimmed.to_string(),
            line_start: line,
            line_end: line + line_count - 1,
            page: Some((i + 1) as u32),
            sheet: None,
            sheet_index: None,
        });
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(trimmed);
        line += line_count;
    }

    Ok(Parsed {
        text: body,
        segments,
    })
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| EngineError::InvalidInput(format!("OOXML entry {}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| EngineError::InvalidInput(format!("OOXML read failed: {}", e)))?;
    if out.len() as u64 >= max_bytes {
        return Err(EngineError::InvalidInput(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn open_archive(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| EngineError::InvalidInput(format!("not a valid OOXML archive: {}", e)))
}

fn parse_docx(bytes: &[u8]) -> Result<Parsed> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;

    // One output line per paragraph (w:p); run text accumulates from w:t.
    let mut out = String::new();
    let mut para = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        para.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(&para);
                    para.clear();
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(EngineError::InvalidInput(format!("DOCX parse: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    if !para.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&para);
    }

    Ok(Parsed {
        text: out,
        segments: Vec::new(),
    })
}

fn parse_pptx(bytes: &[u8]) -> Result<Parsed> {
    let mut archive = open_archive(bytes)?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut segments = Vec::new();
    let mut body = String::new();
    let mut line = 1usize;

    for (i, name) in slide_names.into_iter().enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = collect_t_text(&xml)?;
        if text.trim().is_empty() {
            continue;
        }
        let line_count = text.lines().count().max(1);
        segments.push(Segment {
            text: text.clone(),
            line_start: line,
            line_end: line + line_count - 1,
            page: Some((i + 1) as u32),
            sheet: None,
            sheet_index: None,
        });
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(&text);
        line += line_count;
    }

    Ok(Parsed {
        text: body,
        segments,
    })
}

/// Collect the text of every `t` element, space-separated.
fn collect_t_text(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        if !out.is_empty() {
                            out.push(' ');
                        }
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(EngineError::InvalidInput(format!("OOXML parse: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn parse_xlsx(bytes: &[u8]) -> Result<Parsed> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet_names = read_sheet_names(&mut archive)?;

    let mut worksheet_paths: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    worksheet_paths.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut segments = Vec::new();
    let mut body = String::new();
    let mut line = 1usize;

    for (idx, path) in worksheet_paths.into_iter().take(XLSX_MAX_SHEETS).enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, &path, MAX_XML_ENTRY_BYTES)?;
        let rows = extract_sheet_rows(&xml, &shared_strings)?;
        if rows.is_empty() {
            continue;
        }
        let sheet_name = sheet_names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("Sheet{}", idx + 1));
        let text = rows.join("\n");
        let line_count = rows.len();

        segments.push(Segment {
            text: text.clone(),
            line_start: line,
            line_end: line + line_count - 1,
            page: None,
            sheet: Some(sheet_name),
            sheet_index: Some(idx),
        });
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(&text);
        line += line_count;
    }

    Ok(Parsed {
        text: body,
        segments,
    })
}

/// Worksheet names from `xl/workbook.xml`, in declaration order.
fn read_sheet_names(archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>) -> Result<Vec<String>> {
    let xml = match read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES) {
        Ok(xml) => xml,
        Err(_) => return Ok(Vec::new()),
    };
    let mut names = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) | Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"name" {
                            names.push(String::from_utf8_lossy(&attr.value).into_owned());
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(EngineError::InvalidInput(format!("XLSX workbook: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>> {
    // Workbooks with only inline/numeric cells have no sharedStrings part.
    let xml = match read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES) {
        Ok(xml) => xml,
        Err(_) => return Ok(Vec::new()),
    };
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    let mut current = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                    current.clear();
                } else if in_si && e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        current.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(EngineError::InvalidInput(format!("XLSX strings: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Render each populated row as `ColLetter Row: value | value...`.
fn extract_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<String>> {
    let mut rows: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut row_number = 0u32;
    let mut row_cells: Vec<String> = Vec::new();
    let mut first_col = String::new();
    let mut cell_is_shared = false;
    let mut cell_col = String::new();
    let mut in_v = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row_number += 1;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"r" {
                            if let Ok(n) = String::from_utf8_lossy(&attr.value).parse::<u32>() {
                                row_number = n;
                            }
                        }
                    }
                    row_cells.clear();
                    first_col.clear();
                }
                b"c" => {
                    cell_is_shared = false;
                    cell_col.clear();
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"t" if attr.value.as_ref() == b"s" => cell_is_shared = true,
                            b"r" => {
                                cell_col = String::from_utf8_lossy(&attr.value)
                                    .chars()
                                    .take_while(|c| c.is_ascii_alphabetic())
                                    .collect();
                            }
                            _ => {}
                        }
                    }
                }
                b"v" => in_v = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_v => {
                let raw = te.unescape().unwrap_or_default();
                let value = raw.trim();
                if !value.is_empty() {
                    let rendered = if cell_is_shared {
                        value
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i))
                            .cloned()
                    } else {
                        Some(value.to_string())
                    };
                    if let Some(v) = rendered {
                        if row_cells.is_empty() {
                            first_col = if cell_col.is_empty() {
                                "A".to_string()
                            } else {
                                cell_col.clone()
                            };
                        }
                        row_cells.push(v);
                        cell_count += 1;
                    }
                }
                in_v = false;
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"c" => cell_is_shared = false,
                b"row" => {
                    if !row_cells.is_empty() {
                        rows.push(format!(
                            "{} {}: {}",
                            first_col,
                            row_number,
                            row_cells.join(" | ")
                        ));
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(EngineError::InvalidInput(format!("XLSX sheet: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}
