use std::sync::LazyLock;

use regex::Regex;

use crate::models::RawItem;

static BRACKET_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[([^\]]+)\]").unwrap());
static PAREN_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\(([^)]+)\)").unwrap());

/// Leading groups containing this word are contract references ("Theo hợp đồng số ..."), not codes.
const CONTRACT_MARKER: &str = "theo";

/// Annotation rows come through as items with neither quantity nor price.
/// Anything else is merchandise, whatever the name says.
pub fn is_valid_item(item: &RawItem) -> bool {
    !(item.quantity() == 0.0 && item.price() == 0.0)
}

/// Product code from a leading `[CODE]` or `(CODE)` in the item name, or "".
pub fn extract_item_code(name: &str) -> String {
    [&BRACKET_CODE_RE, &PAREN_CODE_RE]
        .into_iter()
        .filter_map(|re| re.captures(name))
        .map(|caps| caps[1].trim().to_string())
        .find(|code| !code.to_lowercase().contains(CONTRACT_MARKER))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(qty: Option<f64>, price: Option<f64>) -> RawItem {
        RawItem {
            item_quantity: qty,
            item_price: price,
            ..Default::default()
        }
    }

    #[test]
    fn all_zero_is_invalid() {
        assert!(!is_valid_item(&item(Some(0.0), Some(0.0))));
        assert!(!is_valid_item(&item(None, None)));
        assert!(!is_valid_item(&item(None, Some(0.0))));
    }

    #[test]
    fn any_nonzero_is_valid() {
        assert!(is_valid_item(&item(Some(3.0), Some(0.0))));
        assert!(is_valid_item(&item(None, Some(12_000.0))));
        assert!(is_valid_item(&item(Some(1.0), Some(5.0))));
        assert!(is_valid_item(&item(Some(-1.0), None)));
    }

    #[test]
    fn contract_suffix_does_not_invalidate() {
        let mut it = item(Some(2.0), Some(100.0));
        it.item_name = Some("Găng tay y tế (Theo hợp đồng số 12/2025)".into());
        assert!(is_valid_item(&it));
    }

    #[test]
    fn bracket_code() {
        assert_eq!(extract_item_code("[A33201] Bóng nong mạch vành"), "A33201");
        assert_eq!(extract_item_code("[  B-17 ] Ống thông"), "B-17");
    }

    #[test]
    fn paren_code() {
        assert_eq!(extract_item_code("(C02141) Dao cắt"), "C02141");
    }

    #[test]
    fn contract_reference_is_not_a_code() {
        assert_eq!(extract_item_code("[Theo hợp đồng số 5] Vật tư"), "");
        assert_eq!(extract_item_code("(THEO HĐ 09) Kim luồn"), "");
    }

    #[test]
    fn no_leading_group() {
        assert_eq!(extract_item_code("Không có mã"), "");
        assert_eq!(extract_item_code("Kim luồn [K22]"), "");
        assert_eq!(extract_item_code(" [A1] leading space"), "");
        assert_eq!(extract_item_code("[] empty"), "");
        assert_eq!(extract_item_code(""), "");
    }

    #[test]
    fn only_first_group_counts() {
        assert_eq!(extract_item_code("[X1] (Y2) Bông"), "X1");
        assert_eq!(extract_item_code("[Theo HĐ] (Y2) Bông"), "");
    }
}
