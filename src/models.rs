use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ── Portal payloads ──

/// One invoice as returned by `/third-party/invoices`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInvoice {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub release_status: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub invoice_no: Option<String>,
    #[serde(default)]
    pub invoice_release_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub seller_tax_no: Option<String>,
    #[serde(default)]
    pub seller_name: Option<String>,
    #[serde(default)]
    pub seller_address: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub invoice_id: Option<String>,
    #[serde(default, rename = "invoiceItems", alias = "items", deserialize_with = "null_as_empty")]
    pub items: Vec<RawItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    #[serde(default, deserialize_with = "lenient_integer")]
    pub item_order_no: Option<i64>,
    #[serde(default)]
    pub item_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub item_quantity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub item_price: Option<f64>,
    #[serde(default)]
    pub item_unit: Option<String>,
    /// Passed through as text ("10", "KCT", "10%"); only the importer reads it as a number.
    #[serde(default, deserialize_with = "lenient_text")]
    pub item_tax: Option<String>,
}

impl RawItem {
    pub fn quantity(&self) -> f64 {
        self.item_quantity.unwrap_or(0.0)
    }

    pub fn price(&self) -> f64 {
        self.item_price.unwrap_or(0.0)
    }

    /// Missing or blank tax reads as "0".
    pub fn tax(&self) -> String {
        match self.item_tax.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => "0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(default)]
    pub status_code: Option<i64>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageMetadata {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub total: u64,
}

/// One page of the invoice query.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePage {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Vec<RawInvoice>,
    #[serde(default)]
    pub metadata: PageMetadata,
    #[serde(default)]
    pub status_response: Option<StatusResponse>,
}

// ── Query ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum InvoiceStatus {
    #[serde(rename = "VALID")]
    Valid,
    #[serde(rename = "INVALID")]
    Invalid,
    #[serde(rename = "IS_WAITING", alias = "WAITING")]
    Waiting,
    #[serde(rename = "IS_RECHECKING", alias = "RECHECKING")]
    Rechecking,
}

/// Filter sent with every page request.
#[derive(Debug, Clone)]
pub struct InvoiceFilter {
    pub invoice_types: Vec<String>,
    pub status: Option<InvoiceStatus>,
    pub released_from: Option<NaiveDate>,
    pub released_to: Option<NaiveDate>,
}

impl InvoiceFilter {
    /// Invoices released in the `days` days up to and including `today`.
    pub fn last_days(
        today: NaiveDate,
        days: u32,
        invoice_types: Vec<String>,
        status: Option<InvoiceStatus>,
    ) -> Self {
        let from = today - chrono::Duration::days(i64::from(days));
        Self {
            invoice_types,
            status,
            released_from: Some(from),
            released_to: Some(today),
        }
    }

    pub fn to_body(&self) -> InvoiceQueryBody {
        InvoiceQueryBody {
            invoice_types: self.invoice_types.clone(),
            invoice_status: self.status,
            released_date_from: self.released_from.map(portal_date),
            released_date_to: self.released_to.map(portal_date),
            get_matching_data: false,
            get_attachments: true,
            get_taxes: false,
        }
    }
}

/// JSON body of the invoice query.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceQueryBody {
    pub invoice_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_status: Option<InvoiceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_date_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_date_to: Option<String>,
    pub get_matching_data: bool,
    pub get_attachments: bool,
    pub get_taxes: bool,
}

/// The portal expects dd/mm/yyyy.
pub fn portal_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

// ── Output ──

/// One (invoice, line item) pair. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRow {
    pub status: String,
    pub release_status: String,
    pub invoice_no: String,
    pub invoice_release_date: String,
    pub seller_tax_no: String,
    pub seller_name: String,
    pub seller_address: String,
    pub lookup_link: String,
    pub invoice_id: String,
    pub item_order_no: Option<i64>,
    pub item_name: String,
    pub item_code: String,
    pub item_unit: String,
    pub item_quantity: f64,
    pub item_price: f64,
    pub item_tax: String,
}

impl OutputRow {
    pub const HEADERS: [&'static str; 16] = [
        "status",
        "releaseStatus",
        "invoiceNo",
        "invoiceReleaseDate",
        "sellerTaxNo",
        "sellerName",
        "sellerAddress",
        "lookupLink",
        "invoiceId",
        "itemOrderNo",
        "itemName",
        "itemCode",
        "itemUnit",
        "itemQuantity",
        "itemPrice",
        "itemTax",
    ];
}

// ── Lenient decoding ──

fn null_as_empty<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(d)?.unwrap_or_default())
}

fn lenient_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_integer<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        // 3.0 is fine; 1.5 or anything past i64 is not an order number.
        Some(Value::Number(n)) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Identifiers (and tax rates) sometimes arrive as numbers.
fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
