// Shopping cart state
// The in-memory list is authoritative for the session; every mutation mirrors the full list to
// local storage so the next session can start from it.

use crate::price::{Money, Price, PriceError};
use crate::storage::LocalStorage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const CART_STORAGE_KEY: &str = "cart";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CartError {
    #[error("Quantity must be at least 1, got {0}")]
    InvalidQuantity(u32),

    #[error(transparent)]
    Price(#[from] PriceError),
}

// Accommodation and event ids come from different tables, so the kind is part of the identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ItemId {
    Accommodation(i64),
    Event(i64),
}

impl ItemId {
    pub fn raw(&self) -> i64 {
        match self {
            ItemId::Accommodation(id) | ItemId::Event(id) => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccommodationItem {
    pub id: i64,
    pub name: String,
    pub price_per_night: Money,
    pub city: String,
    pub location: String,
    pub beds: u32,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventItem {
    pub id: i64,
    pub title: String,
    pub price: Price,
    pub city: String,
    pub location: String,
    pub category: String,
    pub date: Option<String>,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemKind {
    Accommodation(AccommodationItem),
    Event(EventItem),
}

// A bookable unit in the cart. Quantity is nights for accommodations and attendees for events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    item: ItemKind,
    quantity: u32,
    total_price: Money,
    country: String,
}

impl LineItem {
    pub fn new(item: ItemKind, country: impl Into<String>) -> Self {
        let mut line = Self {
            item,
            quantity: 1,
            total_price: Money::ZERO,
            country: country.into(),
        };
        line.total_price = line.unit_price();
        line
    }

    pub fn with_quantity(mut self, quantity: u32) -> Result<Self, CartError> {
        self.set_quantity(quantity)?;
        Ok(self)
    }

    pub fn id(&self) -> ItemId {
        match &self.item {
            ItemKind::Accommodation(a) => ItemId::Accommodation(a.id),
            ItemKind::Event(e) => ItemId::Event(e.id),
        }
    }

    pub fn kind(&self) -> &ItemKind {
        &self.item
    }

    pub fn display_name(&self) -> &str {
        match &self.item {
            ItemKind::Accommodation(a) => &a.name,
            ItemKind::Event(e) => &e.title,
        }
    }

    pub fn images(&self) -> &[String] {
        match &self.item {
            ItemKind::Accommodation(a) => &a.images,
            ItemKind::Event(e) => &e.images,
        }
    }

    pub fn unit_price(&self) -> Money {
        match &self.item {
            ItemKind::Accommodation(a) => a.price_per_night,
            ItemKind::Event(e) => e.price.unit_amount(),
        }
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn total_price(&self) -> Money {
        self.total_price
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn is_accommodation(&self) -> bool {
        matches!(self.item, ItemKind::Accommodation(_))
    }

    pub fn is_event(&self) -> bool {
        matches!(self.item, ItemKind::Event(_))
    }

    // Leaves the line untouched when the quantity is invalid or the total does not fit
    fn set_quantity(&mut self, quantity: u32) -> Result<(), CartError> {
        if quantity < 1 {
            return Err(CartError::InvalidQuantity(quantity));
        }
        self.total_price = self.unit_price().checked_times(quantity)?;
        self.quantity = quantity;
        Ok(())
    }

    // Stored totals are never trusted; the quantity is checked and the total derived again
    fn revalidated(mut self) -> Result<Self, CartError> {
        self.set_quantity(self.quantity)?;
        Ok(self)
    }
}

#[derive(Debug)]
pub struct CartStore<S: LocalStorage> {
    items: Vec<LineItem>,
    storage: S,
}

impl<S: LocalStorage> CartStore<S> {
    // Seed the cart from the persisted mirror. Missing or unreadable mirrors give an empty cart.
    pub fn load(storage: S) -> Self {
        let items = match storage.get(CART_STORAGE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<serde_json::Value>>(&raw) {
                Ok(entries) => dedup_by_id(entries.into_iter().filter_map(parse_entry).collect()),
                Err(e) => {
                    warn!("Discarding corrupt cart mirror: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to read cart mirror: {}", e);
                Vec::new()
            }
        };

        debug!("Loaded cart with {} items", items.len());
        Self { items, storage }
    }

    pub fn add_to_cart(&mut self, item: LineItem) -> Result<(), CartError> {
        let id = item.id();
        match self.items.iter_mut().find(|existing| existing.id() == id) {
            Some(existing) => {
                let quantity = existing.quantity.saturating_add(item.quantity);
                existing.set_quantity(quantity)?;
                debug!("Merged {:?} in cart, quantity now {}", id, quantity);
            }
            None => {
                debug!("Added {:?} to cart with quantity {}", id, item.quantity);
                self.items.push(item);
            }
        }
        self.sync();
        Ok(())
    }

    pub fn remove_from_cart(&mut self, id: ItemId) {
        let before = self.items.len();
        self.items.retain(|item| item.id() != id);
        if self.items.len() != before {
            debug!("Removed {:?} from cart", id);
        }
        self.sync();
    }

    pub fn update_item_quantity(&mut self, id: ItemId, quantity: u32) -> Result<(), CartError> {
        if quantity < 1 {
            return Err(CartError::InvalidQuantity(quantity));
        }

        if let Some(item) = self.items.iter_mut().find(|item| item.id() == id) {
            item.set_quantity(quantity)?;
            debug!("Set quantity of {:?} to {}", id, quantity);
            self.sync();
        }
        Ok(())
    }

    // Take booked lines out of the cart. Quantity added to a line after it was booked stays.
    pub fn remove_booked(&mut self, booked: &[LineItem]) {
        for line in booked {
            let id = line.id();
            if let Some(pos) = self.items.iter().position(|item| item.id() == id) {
                let remaining = self.items[pos].quantity.saturating_sub(line.quantity);
                if remaining == 0 || self.items[pos].set_quantity(remaining).is_err() {
                    self.items.remove(pos);
                }
            }
        }
        debug!("Removed {} booked lines, {} left in cart", booked.len(), self.items.len());
        if self.items.is_empty() {
            self.remove_mirror();
        } else {
            self.sync();
        }
    }

    pub fn clear_cart(&mut self) {
        self.items.clear();
        self.remove_mirror();
        debug!("Cleared cart");
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn get(&self, id: ItemId) -> Option<&LineItem> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total(&self) -> Money {
        self.items.iter().map(LineItem::total_price).sum()
    }

    // Events first, then accommodations; insertion order is kept within each group
    pub fn display_order(&self) -> Vec<&LineItem> {
        let mut ordered: Vec<&LineItem> = self.items.iter().collect();
        ordered.sort_by_key(|item| item.is_accommodation());
        ordered
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn remove_mirror(&self) {
        if let Err(e) = self.storage.remove(CART_STORAGE_KEY) {
            warn!("Failed to remove cart mirror: {}", e);
        }
    }

    fn sync(&self) {
        let serialized = match serde_json::to_string(&self.items) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!("Failed to serialize cart: {}", e);
                return;
            }
        };
        if let Err(e) = self.storage.set(CART_STORAGE_KEY, &serialized) {
            warn!("Failed to write cart mirror: {}", e);
        }
    }
}

// One mirrored line; a line that fails to parse or validate is dropped on its own
fn parse_entry(entry: serde_json::Value) -> Option<LineItem> {
    let parsed = serde_json::from_value::<LineItem>(entry)
        .map_err(|e| e.to_string())
        .and_then(|item| item.revalidated().map_err(|e| e.to_string()));
    match parsed {
        Ok(item) => Some(item),
        Err(e) => {
            warn!("Dropping invalid cart line from mirror: {}", e);
            None
        }
    }
}

// A hand-edited mirror may repeat an id; fold repeats into the first entry
fn dedup_by_id(items: Vec<LineItem>) -> Vec<LineItem> {
    let mut unique: Vec<LineItem> = Vec::with_capacity(items.len());
    for item in items {
        match unique.iter_mut().find(|existing| existing.id() == item.id()) {
            Some(existing) => {
                let quantity = existing.quantity.saturating_add(item.quantity);
                if let Err(e) = existing.set_quantity(quantity) {
                    warn!("Dropping repeated cart line {:?}: {}", item.id(), e);
                }
            }
            None => unique.push(item),
        }
    }
    unique
}
