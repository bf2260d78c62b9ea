mod client;
mod db;
mod error;
mod export;
mod fetch;
mod models;
mod normalize;
mod settings;

use std::path::PathBuf;
use std::time::Instant;

use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use client::UbotClient;
use error::ConfigError;
use fetch::FetchOptions;
use models::{InvoiceFilter, InvoiceStatus, OutputRow};
use settings::AppConfig;

const JSON_FILE: &str = "invoices_export.json";
const CSV_FILE: &str = "invoices_export.csv";

#[derive(Parser)]
#[command(
    name = "invoice_export",
    about = "Pull e-invoices from the UBot portal into CSV/JSON and SQLite"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PullArgs {
    /// Max rows to collect (default: everything in the window)
    #[arg(short = 'n', long)]
    limit: Option<usize>,
    /// Days back from today (default: UBOT_DAYS or 3)
    #[arg(short, long)]
    days: Option<u32>,
    /// Use the production portal instead of the dev one
    #[arg(long)]
    production: bool,
    /// Invoice status to pull (default: UBOT_STATUS or valid)
    #[arg(long, value_enum)]
    status: Option<InvoiceStatus>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Csv,
    Both,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull recent invoices and write invoices_export.json / .csv
    Fetch {
        #[command(flatten)]
        pull: PullArgs,
        /// Directory for the export files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = Format::Both)]
        format: Format,
    },
    /// Load an exported CSV into the invoice_lines table
    Import {
        /// CSV file (default: <output_dir>/invoices_export.csv)
        csv: Option<PathBuf>,
        /// Append instead of clearing the table first
        #[arg(long)]
        keep_existing: bool,
    },
    /// Fetch + write CSV + import, replacing the table contents
    Refresh {
        #[command(flatten)]
        pull: PullArgs,
    },
    /// Show table statistics
    Stats,
    /// List stored invoice lines, newest first
    List {
        /// Match invoice number, seller, item name or item code
        #[arg(short, long)]
        search: Option<String>,
        /// Show every line of one invoice id
        #[arg(short, long)]
        invoice: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut cfg = AppConfig::load()?;
    info!(settings = ?cfg, "Loaded settings");

    let result = match cli.command {
        Commands::Fetch {
            pull,
            output_dir,
            format,
        } => {
            apply_pull_args(&mut cfg, &pull);
            if let Some(dir) = output_dir {
                cfg.output_dir = dir;
            }
            let rows = pull_rows(&cfg, pull.limit).await?;
            print_preview(&rows);
            std::fs::create_dir_all(&cfg.output_dir)?;
            if matches!(format, Format::Json | Format::Both) {
                let path = cfg.output_dir.join(JSON_FILE);
                export::write_json(&rows, &path)?;
                println!("Saved {} rows to {}", rows.len(), path.display());
            }
            if matches!(format, Format::Csv | Format::Both) {
                let path = cfg.output_dir.join(CSV_FILE);
                export::write_csv(&rows, &path)?;
                println!("Saved {} rows to {}", rows.len(), path.display());
            }
            Ok(())
        }
        Commands::Import { csv, keep_existing } => {
            let path = csv.unwrap_or_else(|| cfg.output_dir.join(CSV_FILE));
            let conn = db::connect(&cfg.db_path)?;
            db::init_schema(&conn)?;
            let stats = db::import_csv(&conn, &path, !keep_existing)?;
            print_import(&stats);
            Ok(())
        }
        Commands::Refresh { pull } => {
            apply_pull_args(&mut cfg, &pull);
            let rows = pull_rows(&cfg, pull.limit).await?;
            std::fs::create_dir_all(&cfg.output_dir)?;
            let path = cfg.output_dir.join(CSV_FILE);
            export::write_csv(&rows, &path)?;
            println!("Saved {} rows to {}", rows.len(), path.display());

            let conn = db::connect(&cfg.db_path)?;
            db::init_schema(&conn)?;
            let stats = db::import_csv(&conn, &path, true)?;
            print_import(&stats);
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&cfg.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            let day = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "-".into());
            println!("Lines:       {}", s.rows);
            println!("Invoices:    {}", s.invoices);
            println!("Sellers:     {}", s.sellers);
            println!("Dates:       {} .. {}", day(s.first_date), day(s.last_date));
            println!("Last import: {}", s.last_import.as_deref().unwrap_or("-"));
            Ok(())
        }
        Commands::List {
            search,
            invoice,
            limit,
            offset,
        } => {
            let conn = db::connect(&cfg.db_path)?;
            db::init_schema(&conn)?;
            let lines = db::fetch_lines(
                &conn,
                &db::LineQuery {
                    search: search.as_deref(),
                    invoice_id: invoice.as_deref(),
                    limit,
                    offset,
                },
            )?;
            if lines.is_empty() {
                println!("No invoice lines found. Run 'refresh' or 'import' first.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<10} | {:<10} | {:<24} | {:<10} | {:<32} | {:>8} | {:>14}",
                "#", "Date", "Invoice", "Seller", "Code", "Item", "Qty", "Price"
            );
            println!("{}", "-".repeat(135));
            for l in &lines {
                println!(
                    "{:>3} | {:<10} | {:<10} | {:<24} | {:<10} | {:<32} | {:>8} | {:>14.0}",
                    l.item_order_no,
                    l.invoice_date,
                    truncate(&l.invoice_no, 10),
                    truncate(&l.seller_name, 24),
                    truncate(&l.item_code, 10),
                    truncate(&l.item_name, 32),
                    format!("{} {}", l.item_quantity, truncate(&l.item_unit, 4)),
                    l.item_price,
                );
            }

            println!("\n{} lines (offset {})", lines.len(), offset);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn apply_pull_args(cfg: &mut AppConfig, pull: &PullArgs) {
    if pull.production {
        cfg.production = true;
    }
    if let Some(days) = pull.days {
        cfg.days = days;
    }
    if let Some(status) = pull.status {
        cfg.status = Some(status);
    }
}

/// Log in once and page through the configured date window.
async fn pull_rows(cfg: &AppConfig, limit: Option<usize>) -> anyhow::Result<Vec<OutputRow>> {
    if limit == Some(0) {
        return Err(ConfigError::ZeroLimit.into());
    }
    cfg.validate()?;

    let mut client = UbotClient::new(cfg.portal()?);
    client.login().await?;

    let today = Local::now().date_naive();
    let filter = InvoiceFilter::last_days(today, cfg.days, cfg.invoice_types.clone(), cfg.status);
    match limit {
        Some(n) => println!("Fetching up to {} rows, released in the last {} days...", n, cfg.days),
        None => println!("Fetching all rows released in the last {} days...", cfg.days),
    }

    let opts = FetchOptions {
        portal_base: client.portal_base().to_string(),
        page_size: cfg.page_size,
        max_rows: limit,
    };
    match fetch::fetch_all(&client, &filter, &opts).await {
        Ok(rows) => {
            println!("Fetched {} rows.", rows.len());
            Ok(rows)
        }
        Err(aborted) => {
            println!(
                "Pull stopped on page {} with {} rows collected; nothing written.",
                aborted.page,
                aborted.rows.len()
            );
            Err(aborted.into())
        }
    }
}

fn print_preview(rows: &[OutputRow]) {
    if rows.is_empty() {
        println!("No invoice lines in this window.");
        return;
    }
    println!("\nFirst {} rows:", rows.len().min(3));
    for (i, r) in rows.iter().take(3).enumerate() {
        println!("[{}] {} - {}", i + 1, r.invoice_no, r.seller_name);
        println!("    Item:  {}", truncate(&r.item_name, 60));
        println!("    Code:  {}", if r.item_code.is_empty() { "-" } else { &r.item_code });
        println!("    Qty:   {} {}", r.item_quantity, r.item_unit);
        println!("    Price: {:.0}", r.item_price);
    }
    println!();
}

fn print_import(stats: &db::ImportStats) {
    println!(
        "Imported {} rows ({} failed). Table now holds {} rows from {} invoices.",
        stats.imported, stats.failed, stats.total_rows, stats.unique_invoices
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate("Bông gòn", 10), "Bông gòn");
        assert_eq!(truncate("Bóng nong mạch vành", 10), "Bóng no...");
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(std::time::Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(std::time::Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(std::time::Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn cli_parses() {
        let cli = Cli::try_parse_from(["invoice_export", "fetch", "-n", "120", "--days", "7", "--format", "csv"]).unwrap();
        match cli.command {
            Commands::Fetch { pull, format, .. } => {
                assert_eq!(pull.limit, Some(120));
                assert_eq!(pull.days, Some(7));
                assert!(matches!(format, Format::Csv));
            }
            _ => panic!("expected fetch"),
        }
        let cli = Cli::try_parse_from(["invoice_export", "import", "x.csv", "--keep-existing"]).unwrap();
        assert!(matches!(cli.command, Commands::Import { keep_existing: true, .. }));
    }
}
