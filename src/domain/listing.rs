//! Free-text listing format: `Type; Name; Description; Price`.

use super::amount::parse_amount;
use super::deal::Item;

/// Field separator in a listing line.
pub const SEPARATOR: char = ';';

/// Parse a seller's listing line into a validated item.
///
/// Returns `None` for anything malformed: wrong field count, empty
/// fields, non-numeric or non-positive price. Malformed listings are
/// dropped without an error message.
pub fn parse_listing(text: &str) -> Option<Item> {
    let fields: Vec<&str> = text.split(SEPARATOR).map(str::trim).collect();
    let [kind, name, description, price] = fields.as_slice() else {
        return None;
    };
    let price = parse_amount(price).ok()?;
    Item::new(kind, name, description, price).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_example_listing() {
        let item = parse_listing("NFT; MoonArt #12; Rare digital artefact; 35").unwrap();
        assert_eq!(item.kind, "NFT");
        assert_eq!(item.name, "MoonArt #12");
        assert_eq!(item.description, "Rare digital artefact");
        assert_eq!(item.price, dec!(35));
    }

    #[test]
    fn test_wrong_field_count() {
        assert!(parse_listing("NFT; MoonArt; 35").is_none());
        assert!(parse_listing("NFT; MoonArt; desc; 35; extra").is_none());
        assert!(parse_listing("hello there").is_none());
    }

    #[test]
    fn test_bad_price() {
        assert!(parse_listing("NFT; MoonArt; desc; cheap").is_none());
        assert!(parse_listing("NFT; MoonArt; desc; 0").is_none());
        assert!(parse_listing("NFT; MoonArt; desc; -3").is_none());
    }

    #[test]
    fn test_empty_field() {
        assert!(parse_listing("NFT; ; desc; 10").is_none());
    }
}
