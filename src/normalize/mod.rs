pub mod items;

use crate::models::{OutputRow, RawInvoice};
use items::{extract_item_code, is_valid_item};

/// Invoice → one row per valid line item, in source order.
/// Invoices with no valid items yield nothing.
pub fn flatten_invoice(invoice: &RawInvoice, portal_base: &str) -> Vec<OutputRow> {
    let invoice_id = invoice.invoice_id.clone().unwrap_or_default();
    let header = OutputRow {
        status: text(&invoice.status),
        release_status: text(&invoice.release_status),
        invoice_no: text(&invoice.invoice_no),
        invoice_release_date: text(&invoice.invoice_release_date),
        seller_tax_no: text(&invoice.seller_tax_no),
        seller_name: text(&invoice.seller_name),
        seller_address: text(&invoice.seller_address),
        lookup_link: lookup_link(portal_base, &invoice_id),
        invoice_id,
        item_order_no: None,
        item_name: String::new(),
        item_code: String::new(),
        item_unit: String::new(),
        item_quantity: 0.0,
        item_price: 0.0,
        item_tax: String::new(),
    };

    invoice
        .items
        .iter()
        .filter(|item| is_valid_item(item))
        .map(|item| {
            let item_name = text(&item.item_name);
            OutputRow {
                item_order_no: item.item_order_no,
                item_code: extract_item_code(&item_name),
                item_name,
                item_unit: text(&item.item_unit),
                item_quantity: item.quantity(),
                item_price: item.price(),
                item_tax: item.tax(),
                ..header.clone()
            }
        })
        .collect()
}

/// PDF link for an invoice on the portal; empty without an id.
pub fn lookup_link(portal_base: &str, invoice_id: &str) -> String {
    if invoice_id.is_empty() {
        return String::new();
    }
    format!(
        "{}/api/invoices/{}/pdf/blob",
        portal_base.trim_end_matches('/'),
        invoice_id
    )
}

fn text(field: &Option<String>) -> String {
    field.clone().unwrap_or_default()
}
