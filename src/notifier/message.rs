use crate::core::ConfigSnapshot;
use crate::store::ItemRecord;

use super::telegram::LinkButton;

/// Caption for one item notification: title, price in source and display
/// currency, and whichever attributes the listing actually carried.
pub fn build_caption(item: &ItemRecord, snapshot: &ConfigSnapshot) -> String {
    let mut caption = String::new();

    caption.push_str(&format!("🆕 {}\n", item.title));
    caption.push_str(&format!("💰 {}\n", format_price(item, snapshot)));

    if let Some(brand) = non_empty(&item.brand) {
        caption.push_str(&format!("🏷 {}\n", brand));
    }
    if let Some(size) = non_empty(&item.size) {
        caption.push_str(&format!("📏 Size {}\n", size));
    }
    if let Some(condition) = non_empty(&item.condition) {
        caption.push_str(&format!("✨ {}\n", condition));
    }
    if let Some(seller) = non_empty(&item.seller) {
        caption.push_str(&format!("👤 {}\n", seller));
    }
    if let Some(location) = non_empty(&item.location) {
        caption.push_str(&format!("📍 {}\n", location));
    }

    caption.push_str(&format!(
        "🕐 Found {}",
        item.found_at.format("%Y-%m-%d %H:%M UTC")
    ));

    caption
}

fn format_price(item: &ItemRecord, snapshot: &ConfigSnapshot) -> String {
    let same_currency = item.currency.eq_ignore_ascii_case(&snapshot.display_currency);
    if same_currency {
        format!("{:.2} {}", item.price, item.currency)
    } else {
        format!(
            "{:.2} {} (~{:.2} {})",
            item.price,
            item.currency,
            item.price * snapshot.currency_rate,
            snapshot.display_currency
        )
    }
}

/// Deep link back to the listing.
pub fn link_actions(item: &ItemRecord) -> Vec<LinkButton> {
    vec![LinkButton {
        label: "Open listing".to_string(),
        url: item.url.clone(),
    }]
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item() -> ItemRecord {
        ItemRecord {
            id: 1,
            external_id: "mp-1".to_string(),
            query_id: 1,
            title: "Wool coat".to_string(),
            price: 42.5,
            currency: "EUR".to_string(),
            url: "https://www.marketplace.example/items/1".to_string(),
            image_url: None,
            image_data: None,
            brand: Some("Acme".to_string()),
            size: None,
            condition: None,
            seller: None,
            location: None,
            category: None,
            description: None,
            is_sent: false,
            found_at: Utc::now(),
            sent_at: None,
        }
    }

    #[test]
    fn test_caption_converts_currency() {
        let snapshot = ConfigSnapshot {
            currency_rate: 4.0,
            display_currency: "PLN".to_string(),
            ..ConfigSnapshot::default()
        };

        let caption = build_caption(&item(), &snapshot);
        assert!(caption.contains("42.50 EUR"));
        assert!(caption.contains("170.00 PLN"));
        assert!(caption.contains("Acme"));
        // Empty attributes stay out of the caption
        assert!(!caption.contains("Size"));
    }

    #[test]
    fn test_caption_skips_conversion_for_same_currency() {
        let snapshot = ConfigSnapshot {
            currency_rate: 4.0,
            display_currency: "EUR".to_string(),
            ..ConfigSnapshot::default()
        };

        let caption = build_caption(&item(), &snapshot);
        assert!(caption.contains("42.50 EUR"));
        assert!(!caption.contains("~"));
    }

    #[test]
    fn test_link_actions_deep_link() {
        let actions = link_actions(&item());
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].url, "https://www.marketplace.example/items/1");
    }
}
