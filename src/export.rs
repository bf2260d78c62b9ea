use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::models::OutputRow;

/// Spreadsheet tools need this to read the file as UTF-8.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub fn write_json(rows: &[OutputRow], path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, rows)?;
    out.flush()?;
    info!("Saved {} rows to {:?}", rows.len(), path);
    Ok(())
}

pub fn write_csv(rows: &[OutputRow], path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    write_csv_to(rows, BufWriter::new(file))?;
    info!("Saved {} rows to {:?}", rows.len(), path);
    Ok(())
}

/// BOM, header row, then one physical line per row. Header is written even
/// with no rows so the importer always finds the columns.
pub fn write_csv_to<W: Write>(rows: &[OutputRow], mut out: W) -> Result<()> {
    out.write_all(UTF8_BOM)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(out);
    writer.write_record(OutputRow::HEADERS)?;
    for row in rows {
        writer.serialize(single_line(row))?;
    }
    writer.flush()?;
    Ok(())
}

/// Collapse every whitespace run (newlines and tabs included) to one space.
pub fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn single_line(row: &OutputRow) -> OutputRow {
    OutputRow {
        status: squash_whitespace(&row.status),
        release_status: squash_whitespace(&row.release_status),
        invoice_no: squash_whitespace(&row.invoice_no),
        invoice_release_date: squash_whitespace(&row.invoice_release_date),
        seller_tax_no: squash_whitespace(&row.seller_tax_no),
        seller_name: squash_whitespace(&row.seller_name),
        seller_address: squash_whitespace(&row.seller_address),
        lookup_link: squash_whitespace(&row.lookup_link),
        invoice_id: squash_whitespace(&row.invoice_id),
        item_order_no: row.item_order_no,
        item_name: squash_whitespace(&row.item_name),
        item_code: squash_whitespace(&row.item_code),
        item_unit: squash_whitespace(&row.item_unit),
        item_quantity: row.item_quantity,
        item_price: row.item_price,
        item_tax: squash_whitespace(&row.item_tax),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn row(invoice_id: &str, item_name: &str) -> OutputRow {
        OutputRow {
            status: "VALID".into(),
            release_status: "ORIGINAL".into(),
            invoice_no: "0000123".into(),
            invoice_release_date: "2026-01-30T07:00:00Z".into(),
            seller_tax_no: "0101234567".into(),
            seller_name: "Công ty TNHH Vật tư, Y tế".into(),
            seller_address: "12 Phố Huế\nHà Nội".into(),
            lookup_link: format!("https://portal.example.test/api/invoices/{}/pdf/blob", invoice_id),
            invoice_id: invoice_id.into(),
            item_order_no: Some(1),
            item_name: item_name.into(),
            item_code: "A33201".into(),
            item_unit: "Cái".into(),
            item_quantity: 2.0,
            item_price: 1_500_000.0,
            item_tax: "8".into(),
        }
    }

    #[test]
    fn squash() {
        assert_eq!(squash_whitespace("a\n\tb   c\r\n"), "a b c");
        assert_eq!(squash_whitespace("  "), "");
    }

    #[test]
    fn csv_has_bom_header_and_one_line_per_row() {
        let rows = vec![
            row("inv-1", "[A33201] Bóng nong\nmạch vành\t(loại 2)"),
            row("inv-2", "Kim luồn"),
        ];
        let mut buf = Vec::new();
        write_csv_to(&rows, &mut buf).unwrap();

        assert!(buf.starts_with(UTF8_BOM));
        let text = String::from_utf8(buf[UTF8_BOM.len()..].to_vec()).unwrap();
        assert!(!text.contains('\t'));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], OutputRow::HEADERS.join(","));
        assert!(lines[1].contains("Bóng nong mạch vành (loại 2)"));
        assert!(lines[1].contains("12 Phố Huế Hà Nội"));
        // comma inside a field gets quoted
        assert!(lines[1].contains("\"Công ty TNHH Vật tư, Y tế\""));
    }

    #[test]
    fn empty_csv_is_header_only() {
        let mut buf = Vec::new();
        write_csv_to(&[], &mut buf).unwrap();
        let text = String::from_utf8(buf[UTF8_BOM.len()..].to_vec()).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn json_keeps_order_and_unicode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let rows = vec![row("inv-1", "Gạc"), row("inv-2", "Bông")];
        write_json(&rows, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Công ty"));
        assert!(text.contains("\"itemCode\""));
        let back: Vec<OutputRow> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, rows);
    }
}
