use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::client::InvoiceSource;
use crate::error::FetchAborted;
use crate::models::{InvoiceFilter, OutputRow};
use crate::normalize::flatten_invoice;

/// How a pull walks the portal.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Used for the per-row lookup links.
    pub portal_base: String,
    pub page_size: u32,
    /// Stop once this many rows are collected.
    pub max_rows: Option<usize>,
}

/// Page through every invoice matching `filter` and flatten them.
///
/// Pages are requested one at a time from page 0 until the portal's `total`
/// is covered or `max_rows` rows are collected (the result is then cut to
/// exactly `max_rows`). The first failing request ends the pull; the rows
/// gathered up to that point travel back inside [`FetchAborted`].
pub async fn fetch_all<S: InvoiceSource>(
    source: &S,
    filter: &InvoiceFilter,
    opts: &FetchOptions,
) -> Result<Vec<OutputRow>, FetchAborted> {
    let size = opts.page_size.max(1);
    let mut rows: Vec<OutputRow> = Vec::new();
    let mut page: u32 = 0;

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} invoices ({msg})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    loop {
        let result = match source.fetch_page(filter, page, size).await {
            Ok(result) => result,
            Err(err) => {
                pb.abandon();
                warn!("Page {} failed after {} rows: {}", page, rows.len(), err);
                return Err(FetchAborted {
                    page,
                    rows,
                    source: err,
                });
            }
        };

        if let Some(sr) = result.status_response.as_ref() {
            if let Some(code) = sr.status_code.filter(|c| *c >= 400) {
                warn!(
                    "Portal reported status {} ({}) on page {}: {}",
                    code,
                    sr.error_code.as_deref().unwrap_or("-"),
                    page,
                    sr.message.as_deref().unwrap_or("")
                );
            }
        }
        debug!(
            "Page {} answered as page {} size {}",
            page, result.metadata.page, result.metadata.size
        );

        let total = result.metadata.total;
        let before = rows.len();
        for invoice in &result.data {
            rows.extend(flatten_invoice(invoice, &opts.portal_base));
        }

        pb.set_length(total);
        pb.inc(result.data.len() as u64);
        pb.set_message(format!("{} rows", rows.len()));
        info!(
            "Page {}: {} invoices -> {} rows ({} rows so far, {} invoices total)",
            page,
            result.data.len(),
            rows.len() - before,
            rows.len(),
            total
        );

        if let Some(max) = opts.max_rows {
            if rows.len() >= max {
                rows.truncate(max);
                break;
            }
        }
        if (u64::from(page) + 1) * u64::from(size) >= total {
            break;
        }
        page += 1;
    }

    pb.finish_and_clear();
    info!("Fetched {} rows in {} pages", rows.len(), page + 1);
    Ok(rows)
}
