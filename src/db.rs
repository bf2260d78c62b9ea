use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::Connection;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::MalformedRow;

/// Rows per commit during import.
const BATCH_SIZE: usize = 100;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS invoice_lines (
            id             INTEGER PRIMARY KEY,
            status         TEXT NOT NULL,
            release_status TEXT NOT NULL,
            invoice_no     TEXT NOT NULL,
            invoice_date   TEXT NOT NULL,
            seller_tax_no  TEXT NOT NULL,
            seller_name    TEXT NOT NULL,
            seller_address TEXT NOT NULL,
            lookup_link    TEXT NOT NULL,
            invoice_id     TEXT NOT NULL,
            item_order_no  INTEGER NOT NULL DEFAULT 0,
            item_name      TEXT NOT NULL,
            item_code      TEXT NOT NULL,
            item_unit      TEXT NOT NULL,
            item_quantity  REAL NOT NULL DEFAULT 0,
            item_price     REAL NOT NULL DEFAULT 0,
            item_tax       REAL NOT NULL DEFAULT 0,
            imported_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_lines_invoice ON invoice_lines(invoice_id);
        CREATE INDEX IF NOT EXISTS idx_lines_date ON invoice_lines(invoice_date);
        ",
    )?;
    Ok(())
}

// ── Import ──

/// A CSV record as text; typed conversion happens in [`InvoiceLine::try_from`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CsvRecord {
    status: String,
    release_status: String,
    invoice_no: String,
    invoice_release_date: String,
    seller_tax_no: String,
    seller_name: String,
    seller_address: String,
    lookup_link: String,
    invoice_id: String,
    item_order_no: String,
    item_name: String,
    item_code: String,
    item_unit: String,
    item_quantity: String,
    item_price: String,
    item_tax: String,
}

/// One row of `invoice_lines`.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceLine {
    pub status: String,
    pub release_status: String,
    pub invoice_no: String,
    pub invoice_date: NaiveDate,
    pub seller_tax_no: String,
    pub seller_name: String,
    pub seller_address: String,
    pub lookup_link: String,
    pub invoice_id: String,
    pub item_order_no: i64,
    pub item_name: String,
    pub item_code: String,
    pub item_unit: String,
    pub item_quantity: f64,
    pub item_price: f64,
    pub item_tax: f64,
}

impl TryFrom<CsvRecord> for InvoiceLine {
    type Error = MalformedRow;

    fn try_from(r: CsvRecord) -> Result<Self, Self::Error> {
        let invoice_date = parse_invoice_date(&r.invoice_release_date)
            .ok_or_else(|| MalformedRow::Date(r.invoice_release_date.clone()))?;
        Ok(Self {
            invoice_date,
            item_order_no: r.item_order_no.trim().parse().unwrap_or(0),
            item_quantity: parse_number(&r.item_quantity),
            item_price: parse_number(&r.item_price),
            item_tax: parse_number(&r.item_tax),
            status: r.status,
            release_status: r.release_status,
            invoice_no: r.invoice_no,
            seller_tax_no: r.seller_tax_no,
            seller_name: r.seller_name,
            seller_address: r.seller_address,
            lookup_link: r.lookup_link,
            invoice_id: r.invoice_id,
            item_name: r.item_name,
            item_code: r.item_code,
            item_unit: r.item_unit,
        })
    }
}

/// The UTC calendar day of an ISO-8601 timestamp ("2026-01-30T07:00:00Z"),
/// or a bare "2026-01-30".
pub fn parse_invoice_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc).date_naive())
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

/// Anything unparsable counts as zero.
fn parse_number(s: &str) -> f64 {
    s.trim()
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .unwrap_or(0.0)
}

#[derive(Debug, Default)]
pub struct ImportStats {
    pub imported: usize,
    pub failed: usize,
    pub total_rows: usize,
    pub unique_invoices: usize,
}

pub fn import_csv(conn: &Connection, path: &Path, clear_existing: bool) -> Result<ImportStats> {
    let file = fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    info!("Importing {:?} (clear existing: {})", path, clear_existing);
    import_from(conn, file, clear_existing)
}

/// Replace (or append to) `invoice_lines` from CSV text. Bad records are
/// skipped and counted. Commits every [`BATCH_SIZE`] rows, so an interrupted
/// import leaves a partial table.
pub fn import_from<R: Read>(conn: &Connection, input: R, clear_existing: bool) -> Result<ImportStats> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(input);

    if clear_existing {
        let removed = conn.execute("DELETE FROM invoice_lines", [])?;
        info!("Cleared {} existing rows", removed);
    }

    let mut stats = ImportStats::default();
    let mut tx = conn.unchecked_transaction()?;

    for (idx, record) in reader.deserialize::<CsvRecord>().enumerate() {
        let outcome = record
            .map_err(MalformedRow::from)
            .and_then(InvoiceLine::try_from)
            .and_then(|line| insert_line(&tx, &line).map_err(MalformedRow::from));

        match outcome {
            Ok(()) => {
                stats.imported += 1;
                if stats.imported % BATCH_SIZE == 0 {
                    tx.commit()?;
                    info!("Imported {} rows...", stats.imported);
                    tx = conn.unchecked_transaction()?;
                }
            }
            Err(e) => {
                stats.failed += 1;
                // +2: header line, 1-based
                warn!("Skipping CSV record {}: {}", idx + 2, e);
            }
        }
    }
    tx.commit()?;

    stats.total_rows = conn.query_row("SELECT COUNT(*) FROM invoice_lines", [], |r| r.get(0))?;
    stats.unique_invoices = conn.query_row(
        "SELECT COUNT(DISTINCT invoice_id) FROM invoice_lines",
        [],
        |r| r.get(0),
    )?;
    info!("Imported {} rows ({} failed)", stats.imported, stats.failed);
    Ok(stats)
}

fn insert_line(conn: &Connection, l: &InvoiceLine) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO invoice_lines
         (status, release_status, invoice_no, invoice_date, seller_tax_no, seller_name,
          seller_address, lookup_link, invoice_id, item_order_no, item_name, item_code,
          item_unit, item_quantity, item_price, item_tax)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
    )?;
    stmt.execute(rusqlite::params![
        l.status, l.release_status, l.invoice_no, l.invoice_date, l.seller_tax_no,
        l.seller_name, l.seller_address, l.lookup_link, l.invoice_id, l.item_order_no,
        l.item_name, l.item_code, l.item_unit, l.item_quantity, l.item_price, l.item_tax,
    ])?;
    Ok(())
}

// ── Listing ──

pub struct StoredLine {
    pub invoice_date: NaiveDate,
    pub invoice_no: String,
    pub invoice_id: String,
    pub seller_name: String,
    pub item_order_no: i64,
    pub item_code: String,
    pub item_name: String,
    pub item_unit: String,
    pub item_quantity: f64,
    pub item_price: f64,
}

#[derive(Debug, Default)]
pub struct LineQuery<'a> {
    /// Substring of invoice number, seller name, item name or item code.
    pub search: Option<&'a str>,
    /// All lines of one invoice, in item order.
    pub invoice_id: Option<&'a str>,
    pub limit: usize,
    pub offset: usize,
}

pub fn fetch_lines(conn: &Connection, q: &LineQuery) -> Result<Vec<StoredLine>> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(id) = q.invoice_id {
        conditions.push(format!("invoice_id = ?{}", params.len() + 1));
        params.push(Box::new(id.to_string()));
    }
    if let Some(term) = q.search {
        let n = params.len() + 1;
        conditions.push(format!(
            "(invoice_no LIKE ?{n} OR seller_name LIKE ?{n} OR item_name LIKE ?{n} OR item_code LIKE ?{n})"
        ));
        params.push(Box::new(format!("%{}%", term)));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    let order = if q.invoice_id.is_some() {
        "item_order_no, id"
    } else {
        "invoice_date DESC, id DESC"
    };

    let sql = format!(
        "SELECT invoice_date, invoice_no, invoice_id, seller_name, item_order_no,
                item_code, item_name, item_unit, item_quantity, item_price
         FROM invoice_lines{}
         ORDER BY {}
         LIMIT {} OFFSET {}",
        where_clause, order, q.limit, q.offset
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(StoredLine {
                invoice_date: row.get(0)?,
                invoice_no: row.get(1)?,
                invoice_id: row.get(2)?,
                seller_name: row.get(3)?,
                item_order_no: row.get(4)?,
                item_code: row.get(5)?,
                item_name: row.get(6)?,
                item_unit: row.get(7)?,
                item_quantity: row.get(8)?,
                item_price: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub rows: usize,
    pub invoices: usize,
    pub sellers: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub last_import: Option<String>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let stats = conn.query_row(
        "SELECT COUNT(*), COUNT(DISTINCT invoice_id), COUNT(DISTINCT seller_tax_no),
                MIN(invoice_date), MAX(invoice_date), MAX(imported_at)
         FROM invoice_lines",
        [],
        |r| {
            Ok(Stats {
                rows: r.get(0)?,
                invoices: r.get(1)?,
                sellers: r.get(2)?,
                first_date: r.get(3)?,
                last_date: r.get(4)?,
                last_import: r.get(5)?,
            })
        },
    )?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::tests::row;
    use crate::export::write_csv_to;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn csv_bytes(rows: &[crate::models::OutputRow]) -> Vec<u8> {
        let mut buf = Vec::new();
        write_csv_to(rows, &mut buf).unwrap();
        buf
    }

    #[test]
    fn date_parsing() {
        let d = NaiveDate::from_ymd_opt(2026, 1, 30).unwrap();
        assert_eq!(parse_invoice_date("2026-01-30T07:00:00Z"), Some(d));
        assert_eq!(parse_invoice_date("2026-01-30T07:00:00"), Some(d));
        assert_eq!(parse_invoice_date("2026-01-30"), Some(d));
        // +07:00 local midnight is the previous UTC day
        assert_eq!(
            parse_invoice_date("2026-01-31T00:00:00+07:00"),
            Some(d)
        );
        assert_eq!(parse_invoice_date("30/01/2026"), None);
        assert_eq!(parse_invoice_date(""), None);
    }

    #[test]
    fn number_fallback() {
        assert_eq!(parse_number("12.5"), 12.5);
        assert_eq!(parse_number(" 3 "), 3.0);
        assert_eq!(parse_number(""), 0.0);
        assert_eq!(parse_number("10%"), 0.0);
        assert_eq!(parse_number("NaN"), 0.0);
    }

    #[test]
    fn csv_round_trip_through_table() {
        let conn = memory_db();
        let rows = vec![
            row("inv-1", "[A33201] Bóng nong\nmạch vành\t loại 2"),
            row("inv-1", "Kim luồn"),
            row("inv-2", "Gạc"),
        ];
        let stats = import_from(&conn, csv_bytes(&rows).as_slice(), true).unwrap();
        assert_eq!(stats.imported, 3);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.total_rows, 3);
        assert_eq!(stats.unique_invoices, 2);

        let lines = fetch_lines(
            &conn,
            &LineQuery {
                invoice_id: Some("inv-1"),
                limit: 10,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].item_name, "[A33201] Bóng nong mạch vành loại 2");
        assert_eq!(lines[0].invoice_date, NaiveDate::from_ymd_opt(2026, 1, 30).unwrap());
        assert_eq!(lines[0].item_quantity, 2.0);
        assert_eq!(lines[0].item_price, 1_500_000.0);
    }

    #[test]
    fn bad_date_skipped_bad_number_zeroed() {
        let conn = memory_db();
        let header = crate::models::OutputRow::HEADERS.join(",");
        let csv = format!(
            "{header}\n\
             VALID,ORIGINAL,1,2026-01-30T07:00:00Z,0101,Cty A,HN,,inv-1,x,Gạc,,Cái,abc,10,8\n\
             VALID,ORIGINAL,2,not-a-date,0101,Cty A,HN,,inv-2,1,Bông,,Cái,1,10,8\n\
             VALID,ORIGINAL,3,2026-01-29T07:00:00Z,0102,Cty B,HN,,inv-3,2,Kim,K1,Cái,5,,\n"
        );
        let stats = import_from(&conn, csv.as_bytes(), true).unwrap();
        assert_eq!(stats.imported, 2);
        assert_eq!(stats.failed, 1);

        let lines = fetch_lines(&conn, &LineQuery { limit: 10, ..Default::default() }).unwrap();
        assert_eq!(lines.len(), 2);
        // newest first
        assert_eq!(lines[0].invoice_id, "inv-1");
        assert_eq!(lines[0].item_order_no, 0);
        assert_eq!(lines[0].item_quantity, 0.0);
        assert_eq!(lines[1].item_price, 0.0);
    }

    #[test]
    fn textual_tax_rate_stored_as_zero() {
        let conn = memory_db();
        let mut kct = row("inv-1", "Gạc");
        kct.item_tax = "KCT".into();
        let mut ten = row("inv-2", "Bông");
        ten.item_tax = "10".into();
        import_from(&conn, csv_bytes(&[kct, ten]).as_slice(), true).unwrap();

        let tax = |id: &str| -> f64 {
            conn.query_row(
                "SELECT item_tax FROM invoice_lines WHERE invoice_id = ?1",
                [id],
                |r| r.get(0),
            )
            .unwrap()
        };
        assert_eq!(tax("inv-1"), 0.0);
        assert_eq!(tax("inv-2"), 10.0);
    }

    #[test]
    fn clear_then_insert_replaces_table() {
        let conn = memory_db();
        let first = csv_bytes(&[row("inv-1", "Gạc"), row("inv-2", "Bông")]);
        import_from(&conn, first.as_slice(), true).unwrap();

        let second = csv_bytes(&[row("inv-9", "Kim")]);
        let stats = import_from(&conn, second.as_slice(), true).unwrap();
        assert_eq!(stats.total_rows, 1);

        let stats = import_from(&conn, second.as_slice(), false).unwrap();
        assert_eq!(stats.total_rows, 2);
        assert_eq!(stats.unique_invoices, 1);
    }

    #[test]
    fn commits_across_batches() {
        let conn = memory_db();
        let rows: Vec<_> = (0..250).map(|i| row(&format!("inv-{}", i), "Gạc")).collect();
        let stats = import_from(&conn, csv_bytes(&rows).as_slice(), true).unwrap();
        assert_eq!(stats.imported, 250);
        assert_eq!(stats.total_rows, 250);
    }

    #[test]
    fn search_and_stats() {
        let conn = memory_db();
        let mut other = row("inv-2", "Dao cắt");
        other.seller_tax_no = "0109999999".into();
        other.invoice_release_date = "2026-02-02T07:00:00Z".into();
        let rows = vec![row("inv-1", "Bóng nong"), other];
        import_from(&conn, csv_bytes(&rows).as_slice(), true).unwrap();

        let hits = fetch_lines(
            &conn,
            &LineQuery {
                search: Some("Dao"),
                limit: 10,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].invoice_id, "inv-2");

        let by_code = fetch_lines(
            &conn,
            &LineQuery {
                search: Some("A332"),
                limit: 10,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_code.len(), 2);

        let s = get_stats(&conn).unwrap();
        assert_eq!(s.rows, 2);
        assert_eq!(s.invoices, 2);
        assert_eq!(s.sellers, 2);
        assert_eq!(s.first_date, NaiveDate::from_ymd_opt(2026, 1, 30));
        assert_eq!(s.last_date, NaiveDate::from_ymd_opt(2026, 2, 2));
        assert!(s.last_import.is_some());
    }

    #[test]
    fn stats_on_empty_table() {
        let conn = memory_db();
        let s = get_stats(&conn).unwrap();
        assert_eq!(s.rows, 0);
        assert!(s.first_date.is_none());
    }
}
