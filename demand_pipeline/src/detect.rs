//! Format detection for raw operator exports.
//!
//! Exports arrive with an arbitrary preamble (titles, report dates, blank
//! lines) before the real header, sometimes a footer after the data, and use
//! either `;` or `,` as delimiter. Detection picks the delimiter, finds the
//! header line and decides between the wide layout (one column per zone) and
//! the long layout (a `Sistema` column naming the zone of each row).

use crate::config::PipelineConfig;
use crate::error::{IngestError, Result};
use crate::models::{RawTable, Zone};
use log::debug;

const HOUR_TOKEN: &str = "HORA";
const SYSTEM_TOKEN: &str = "SISTEMA";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    /// One column per zone, one row per hour.
    Wide,
    /// One row per (zone, hour), zone named in the `Sistema` column.
    Long,
}

#[derive(Debug, Clone, Copy)]
pub struct DetectOptions {
    pub sample_bytes: usize,
    pub scan_lines: usize,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            sample_bytes: 3000,
            scan_lines: 200,
        }
    }
}

impl From<&PipelineConfig> for DetectOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            sample_bytes: config.delimiter_sample_bytes,
            scan_lines: config.header_scan_lines,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub delimiter: u8,
    /// Zero-based line number of the header row.
    pub header_row: usize,
    pub schema: SchemaKind,
    /// Cleaned header cells.
    pub headers: Vec<String>,
}

/// `;` wins ties: the operator's Spanish-locale exports default to it.
pub fn detect_delimiter(bytes: &[u8], sample_bytes: usize) -> u8 {
    let sample = &bytes[..bytes.len().min(sample_bytes)];
    let semicolons = sample.iter().filter(|b| **b == b';').count();
    let commas = sample.iter().filter(|b| **b == b',').count();
    if semicolons >= commas {
        b';'
    } else {
        b','
    }
}

fn clean_cell(cell: &str) -> &str {
    cell.trim().trim_matches('"').trim()
}

fn upper_cells(line: &str, delimiter: u8) -> Vec<String> {
    line.split(delimiter as char)
        .map(|cell| clean_cell(cell).to_uppercase())
        .collect()
}

fn decode(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_prefix('\u{feff}')
        .unwrap_or(&*text)
        .to_string()
}

/// Byte offset of every line start, bounded to `limit` lines.
fn line_starts(text: &str, limit: usize) -> Vec<(usize, &str)> {
    let mut offset = 0;
    text.split_inclusive('\n')
        .take(limit)
        .map(|line| {
            let start = offset;
            offset += line.len();
            (start, line.trim_end_matches(['\r', '\n']))
        })
        .collect()
}

/// Line number of the header row.
///
/// Preferred: a line holding the hour token and at least one zone code.
/// Fallback: the first line holding the hour token alone (long layout,
/// zones live in a `Sistema` column).
pub fn find_header_row(text: &str, delimiter: u8, file: &str, scan_lines: usize) -> Result<usize> {
    let lines = line_starts(text, scan_lines);
    let cells: Vec<Vec<String>> = lines
        .iter()
        .map(|(_, line)| upper_cells(line, delimiter))
        .collect();

    let has_hour = |cells: &[String]| cells.iter().any(|c| c == HOUR_TOKEN);
    let has_zone = |cells: &[String]| cells.iter().any(|c| Zone::parse(c).is_some());

    cells
        .iter()
        .position(|c| has_hour(c) && has_zone(c))
        .or_else(|| cells.iter().position(|c| has_hour(c)))
        .ok_or_else(|| IngestError::HeaderNotFound {
            file: file.to_string(),
        })
}

fn reader_from(text: &str, offset: usize, delimiter: u8) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text[offset..].as_bytes())
}

fn classify(headers: &[String], file: &str) -> Result<SchemaKind> {
    if headers.iter().any(|h| h.eq_ignore_ascii_case(SYSTEM_TOKEN)) {
        return Ok(SchemaKind::Long);
    }
    if headers.iter().any(|h| Zone::parse(h).is_some()) {
        return Ok(SchemaKind::Wide);
    }
    Err(IngestError::NoZoneColumns {
        file: file.to_string(),
        columns: headers.to_vec(),
    })
}

fn header_offset(text: &str, header_row: usize) -> usize {
    line_starts(text, header_row + 1)
        .get(header_row)
        .map(|(offset, _)| *offset)
        .unwrap_or(text.len())
}

/// Infers delimiter, header row and schema kind of a raw export.
pub fn detect(bytes: &[u8], file: &str, options: DetectOptions) -> Result<Detection> {
    let text = decode(bytes);
    let delimiter = detect_delimiter(text.as_bytes(), options.sample_bytes);
    let header_row = find_header_row(&text, delimiter, file, options.scan_lines)?;

    let mut reader = reader_from(&text, header_offset(&text, header_row), delimiter);
    let headers: Vec<String> = match reader.records().next() {
        Some(record) => record?.iter().map(|c| clean_cell(c).to_string()).collect(),
        None => {
            return Err(IngestError::HeaderNotFound {
                file: file.to_string(),
            })
        }
    };
    let schema = classify(&headers, file)?;

    debug!(
        "{}: delimiter '{}', header at line {}, {:?} layout",
        file, delimiter as char, header_row, schema
    );

    Ok(Detection {
        delimiter,
        header_row,
        schema,
        headers,
    })
}

/// Parses the rows below a detected header. Blank records are skipped.
pub fn read_table(bytes: &[u8], detection: &Detection) -> Result<RawTable> {
    let text = decode(bytes);
    let offset = header_offset(&text, detection.header_row);
    let mut reader = reader_from(&text, offset, detection.delimiter);

    let mut rows = Vec::new();
    for record in reader.records().skip(1) {
        let record = record?;
        if record.iter().all(|c| clean_cell(c).is_empty()) {
            continue;
        }
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(RawTable {
        headers: detection.headers.clone(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDE: &str = "Reporte de demanda\nFecha de consulta: 01/01/2024\n\n\"Hora\",\"SIN\",\"BCA\",\"BCS\"\n1,30000,2000,400\n2,29000,1900,390\n";

    #[test]
    fn test_delimiter_ties_go_to_semicolon() {
        assert_eq!(detect_delimiter(b"a;b,c", 3000), b';');
        assert_eq!(detect_delimiter(b"a,b,c;d", 3000), b',');
        assert_eq!(detect_delimiter(b"", 3000), b';');
        // only the prefix counts
        assert_eq!(detect_delimiter(b"a,b,c;;;;;", 5), b',');
    }

    #[test]
    fn test_wide_header_after_preamble() {
        let detection = detect(WIDE.as_bytes(), "2024-01-01.csv", DetectOptions::default()).unwrap();
        assert_eq!(detection.delimiter, b',');
        assert_eq!(detection.header_row, 3);
        assert_eq!(detection.schema, SchemaKind::Wide);
        assert_eq!(detection.headers, vec!["Hora", "SIN", "BCA", "BCS"]);

        let table = read_table(WIDE.as_bytes(), &detection).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.cell(1, 2), Some("1900"));
    }

    #[test]
    fn test_long_header_falls_back_to_hour_only() {
        let text = "Titulo;;\nSistema;Area;Hora;Demanda Balance\nSIN;NORTE;1;100\nBCA;MEXICALI;1;50\n";
        let detection = detect(text.as_bytes(), "2024-01-02.csv", DetectOptions::default()).unwrap();
        assert_eq!(detection.delimiter, b';');
        assert_eq!(detection.header_row, 1);
        assert_eq!(detection.schema, SchemaKind::Long);
    }

    #[test]
    fn test_zone_header_preferred_over_earlier_hour_line() {
        let text = "Hora,Nota\nx,y\nHora,SIN\n1,10\n";
        let detection = detect(text.as_bytes(), "f.csv", DetectOptions::default()).unwrap();
        assert_eq!(detection.header_row, 2);
        assert_eq!(detection.schema, SchemaKind::Wide);
    }

    #[test]
    fn test_hour_only_header_without_zones_fails() {
        let text = "Hora,Valor\n1,10\n";
        let err = detect(text.as_bytes(), "sin_zonas.csv", DetectOptions::default()).unwrap_err();
        match err {
            IngestError::NoZoneColumns { file, columns } => {
                assert_eq!(file, "sin_zonas.csv");
                assert_eq!(columns, vec!["Hora", "Valor"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_header_scan_is_bounded() {
        let mut text = String::new();
        for i in 0..250 {
            text.push_str(&format!("nota {};;\n", i));
        }
        text.push_str("Hora;SIN\n1;10\n");
        let err = detect(text.as_bytes(), "tarde.csv", DetectOptions::default()).unwrap_err();
        assert!(matches!(err, IngestError::HeaderNotFound { ref file } if file == "tarde.csv"));
        assert!(err.to_string().contains("tarde.csv"));

        let options = DetectOptions {
            scan_lines: 300,
            ..Default::default()
        };
        assert_eq!(detect(text.as_bytes(), "tarde.csv", options).unwrap().header_row, 250);
    }

    #[test]
    fn test_semicolon_thousands_separator_does_not_break_detection() {
        // `;` doubles as thousands separator and delimiter
        let text = "Hora;SIN;BCA\n1;31;250;2;100\n2;30;900;2;050\n";
        let detection = detect(text.as_bytes(), "ambiguo.csv", DetectOptions::default()).unwrap();
        assert_eq!(detection.delimiter, b';');
        assert_eq!(detection.header_row, 0);
        let table = read_table(text.as_bytes(), &detection).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].len(), 5);
    }

    #[test]
    fn test_bom_and_crlf_are_tolerated() {
        let text = "\u{feff}Hora,SIN\r\n1,10\r\n";
        let detection = detect(text.as_bytes(), "bom.csv", DetectOptions::default()).unwrap();
        assert_eq!(detection.headers, vec!["Hora", "SIN"]);
        let table = read_table(text.as_bytes(), &detection).unwrap();
        assert_eq!(table.cell(0, 1), Some("10"));
    }
}
