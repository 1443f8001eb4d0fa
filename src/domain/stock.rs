//! Stock value objects exchanged between Order and Menu.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::order::MenuItemId;

/// A requested quantity of one menu item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockValidationItem {
    pub menu_item_id: MenuItemId,
    pub requested_quantity: u32,
}

/// An item the Menu service could not reserve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedItem {
    pub menu_item_id: MenuItemId,
    pub requested_quantity: u32,
    pub available_quantity: u32,
}

impl RejectedItem {
    /// Buyer-facing explanation, used in cancellation descriptions.
    pub fn describe(&self) -> String {
        format!(
            "menu item {}: requested {}, available {}",
            self.menu_item_id, self.requested_quantity, self.available_quantity
        )
    }
}

/// Sum requested quantities per menu item, ordered by menu item id.
pub fn aggregate_items(items: &[StockValidationItem]) -> Vec<StockValidationItem> {
    let mut totals: BTreeMap<MenuItemId, u32> = BTreeMap::new();
    for item in items {
        let total = totals.entry(item.menu_item_id).or_insert(0);
        *total = total.saturating_add(item.requested_quantity);
    }
    totals
        .into_iter()
        .map(|(menu_item_id, requested_quantity)| StockValidationItem {
            menu_item_id,
            requested_quantity,
        })
        .collect()
}
