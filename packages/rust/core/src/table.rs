//! Export archive unpacking and table decoding.
//!
//! A delivered export is a zip archive holding one or more CSV tables; some
//! reports ship both a summary table and a detail table.

use std::io::{Cursor, Read};

use zip::ZipArchive;

use reportharvest_shared::{HarvestError, Result};

/// Extension of tabular entries inside an export archive.
const TABLE_EXTENSION: &str = ".csv";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A decoded table: header row plus data rows, every cell a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Header followed by data rows, ready to write from the origin cell.
    pub fn to_values(&self) -> Vec<Vec<String>> {
        std::iter::once(self.header.clone())
            .chain(self.rows.iter().cloned())
            .collect()
    }

    /// Rows including the header.
    pub fn total_rows(&self) -> usize {
        self.rows.len() + 1
    }
}

/// Pick the table entry to load.
///
/// With `use_summary`, the first entry whose name contains "summary"
/// (case-insensitive) wins; without it, the first entry that does not.
/// Falls back to the first entry when the preferred kind is absent.
pub fn select_entry(names: &[String], use_summary: bool) -> Option<&str> {
    names
        .iter()
        .find(|n| n.to_lowercase().contains("summary") == use_summary)
        .or_else(|| names.first())
        .map(String::as_str)
}

/// Names of table entries in archive order.
pub fn table_entries(archive: &[u8]) -> Result<Vec<String>> {
    let mut zip = open(archive)?;
    let mut names = Vec::new();

    for i in 0..zip.len() {
        let file = zip
            .by_index(i)
            .map_err(|e| HarvestError::extraction(format!("archive entry {i}: {e}")))?;
        if !file.is_dir() && file.name().to_lowercase().ends_with(TABLE_EXTENSION) {
            names.push(file.name().to_string());
        }
    }

    Ok(names)
}

/// Select and decode the table for a destination. Returns the entry name
/// and its table.
pub fn extract_table(archive: &[u8], use_summary: bool) -> Result<(String, Table)> {
    let names = table_entries(archive)?;
    let selected = select_entry(&names, use_summary)
        .ok_or_else(|| HarvestError::extraction("archive contains no CSV table"))?
        .to_string();

    let mut zip = open(archive)?;
    let mut bytes = Vec::new();
    zip.by_name(&selected)
        .map_err(|e| HarvestError::extraction(format!("archive entry {selected}: {e}")))?
        .read_to_end(&mut bytes)
        .map_err(|e| HarvestError::extraction(format!("archive entry {selected}: {e}")))?;

    let table = decode_csv(&bytes)?;
    Ok((selected, table))
}

/// Decode CSV bytes into a [`Table`]. Short rows are padded with empty
/// cells to the header width.
pub fn decode_csv(bytes: &[u8]) -> Result<Table> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut records = reader.records();
    let header: Vec<String> = match records.next() {
        Some(record) => record
            .map_err(|e| HarvestError::parse(format!("CSV header: {e}")))?
            .iter()
            .map(str::to_string)
            .collect(),
        None => return Err(HarvestError::extraction("CSV table is empty")),
    };

    let width = header.len();
    let mut rows = Vec::new();
    for record in records {
        let record = record.map_err(|e| HarvestError::parse(format!("CSV row: {e}")))?;
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        if row.len() < width {
            row.resize(width, String::new());
        }
        rows.push(row);
    }

    Ok(Table { header, rows })
}

fn open(archive: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>> {
    ZipArchive::new(Cursor::new(archive))
        .map_err(|e| HarvestError::extraction(format!("download is not a zip archive: {e}")))
}

#[cfg(test)]
pub(crate) fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn summary_preferred_when_flag_set() {
        let entries = names(&["report_summary.csv", "report_data.csv"]);
        assert_eq!(select_entry(&entries, true), Some("report_summary.csv"));
        assert_eq!(select_entry(&entries, false), Some("report_data.csv"));
    }

    #[test]
    fn single_entry_selected_regardless_of_flag() {
        let entries = names(&["report.csv"]);
        assert_eq!(select_entry(&entries, true), Some("report.csv"));
        assert_eq!(select_entry(&entries, false), Some("report.csv"));
    }

    #[test]
    fn summary_match_is_case_insensitive() {
        let entries = names(&["Detail.csv", "Deals SUMMARY.csv"]);
        assert_eq!(select_entry(&entries, true), Some("Deals SUMMARY.csv"));
    }

    #[test]
    fn fallback_is_first_in_archive_order() {
        let entries = names(&["b_summary.csv", "a_summary.csv"]);
        assert_eq!(select_entry(&entries, false), Some("b_summary.csv"));
        assert_eq!(select_entry(&[], true), None);
    }

    #[test]
    fn table_entries_skip_non_csv() {
        let zip = build_zip(&[
            ("readme.txt", "hello"),
            ("data.CSV", "a\n1\n"),
            ("x_summary.csv", "a\n1\n"),
        ]);
        assert_eq!(table_entries(&zip).unwrap(), names(&["data.CSV", "x_summary.csv"]));
    }

    #[test]
    fn extract_table_reads_selected_entry() {
        let zip = build_zip(&[
            ("won_sales_data.csv", "Deal,Amount\nx,1\n"),
            ("won_sales_summary.csv", "Owner,Total\nAda,10\nBo,20\nCy,30\n"),
        ]);

        let (name, table) = extract_table(&zip, true).unwrap();
        assert_eq!(name, "won_sales_summary.csv");
        assert_eq!(table.header, names(&["Owner", "Total"]));
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.total_rows(), 4);
    }

    #[test]
    fn archive_without_tables_is_extraction_failure() {
        let zip = build_zip(&[("notes.txt", "nothing")]);
        let err = extract_table(&zip, true).unwrap_err();
        assert!(matches!(err, HarvestError::Extraction(_)));
    }

    #[test]
    fn non_zip_is_extraction_failure() {
        let err = table_entries(b"<html>login</html>").unwrap_err();
        assert!(matches!(err, HarvestError::Extraction(_)));
    }

    #[test]
    fn decode_strips_bom_and_pads_short_rows() {
        let table = decode_csv(b"\xEF\xBB\xBFName,Stage,Amount\nAcme,Won\n\"Big, Co\",Lost,5\n").unwrap();
        assert_eq!(table.header, names(&["Name", "Stage", "Amount"]));
        assert_eq!(table.rows[0], names(&["Acme", "Won", ""]));
        assert_eq!(table.rows[1], names(&["Big, Co", "Lost", "5"]));
    }

    #[test]
    fn decode_empty_is_extraction_failure() {
        assert!(matches!(decode_csv(b""), Err(HarvestError::Extraction(_))));
    }

    #[test]
    fn values_start_with_header() {
        let table = decode_csv(b"h1,h2\n1,2\n").unwrap();
        assert_eq!(table.to_values(), vec![names(&["h1", "h2"]), names(&["1", "2"])]);
    }
}
