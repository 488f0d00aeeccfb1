// Catalog rows and fetch wrappers
// Accommodations and events as the backend stores them. Converting a row into a LineItem is the
// single place where raw prices are resolved into typed `Price` values.

use crate::backend::{Backend, BackendError, Filter};
use crate::cart::{AccommodationItem, EventItem, ItemKind, LineItem};
use crate::price::{Money, Price, PriceError};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{error, warn};

pub const ACCOMMODATIONS: &str = "accommodations";
pub const EVENTS: &str = "events";

// Selector value meaning "no restriction" in country and category pickers
pub const ALL: &str = "All";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Accommodation {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub location: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub beds: u32,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default, rename = "nRatings")]
    pub n_ratings: Option<u32>,
    #[serde(default)]
    pub rooms: Option<u32>,
    #[serde(default)]
    pub wifi: bool,
    #[serde(default)]
    pub host: Option<String>,
}

impl Accommodation {
    pub fn nightly_price(&self) -> Result<Money, PriceError> {
        Money::new(self.price)
    }

    pub fn to_line_item(&self, nights: u32) -> Result<LineItem, CatalogError> {
        let item = ItemKind::Accommodation(AccommodationItem {
            id: self.id,
            name: self.name.clone(),
            price_per_night: self.nightly_price()?,
            city: self.city.clone(),
            location: self.location.clone(),
            beds: self.beds,
            images: self.images.clone(),
        });
        Ok(LineItem::new(item, self.country.clone()).with_quantity(nights)?)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Event {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    // Either a number or the "free" marker, kept raw until it is parsed
    #[serde(deserialize_with = "price_text")]
    pub price: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub category: String,
}

impl Event {
    pub fn ticket_price(&self) -> Result<Price, PriceError> {
        Price::parse(&self.price)
    }

    pub fn to_line_item(&self, attendees: u32) -> Result<LineItem, CatalogError> {
        let item = ItemKind::Event(EventItem {
            id: self.id,
            title: self.title.clone(),
            price: self.ticket_price()?,
            city: self.city.clone(),
            location: self.location.clone(),
            category: self.category.clone(),
            date: self.date.clone(),
            images: self.images.clone(),
        });
        Ok(LineItem::new(item, self.country.clone()).with_quantity(attendees)?)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error(transparent)]
    Price(#[from] PriceError),

    #[error(transparent)]
    Cart(#[from] crate::cart::CartError),
}

fn price_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected price string or number, got {}",
            other
        ))),
    }
}

// Shared view over listings for country/category pickers
pub trait Listing {
    fn country(&self) -> &str;
    fn category(&self) -> Option<&str>;
}

impl Listing for Accommodation {
    fn country(&self) -> &str {
        &self.country
    }

    fn category(&self) -> Option<&str> {
        None
    }
}

impl Listing for Event {
    fn country(&self) -> &str {
        &self.country
    }

    fn category(&self) -> Option<&str> {
        Some(&self.category)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListingCriteria {
    pub country: Option<String>,
    pub category: Option<String>,
}

impl ListingCriteria {
    // Picker values as shown in the UI; "All" clears the restriction
    pub fn from_selection(country: &str, category: &str) -> Self {
        let pick = |v: &str| (!v.is_empty() && v != ALL).then(|| v.to_string());
        Self {
            country: pick(country),
            category: pick(category),
        }
    }

    pub fn matches<T: Listing>(&self, listing: &T) -> bool {
        let country_ok = self
            .country
            .as_ref()
            .map_or(true, |c| listing.country().eq_ignore_ascii_case(c));
        // Listings without a category are not restricted by one
        let category_ok = match (&self.category, listing.category()) {
            (Some(wanted), Some(actual)) => actual.eq_ignore_ascii_case(wanted),
            _ => true,
        };
        country_ok && category_ok
    }

    pub fn filter<'a, T: Listing>(&self, listings: &'a [T]) -> Vec<&'a T> {
        listings.iter().filter(|l| self.matches(*l)).collect()
    }
}

async fn fetch_all<T: DeserializeOwned>(backend: &dyn Backend, collection: &str) -> Vec<T> {
    let rows = match backend.select(collection, &[], &[]).await {
        Ok(rows) => rows,
        Err(e) => {
            error!("Error fetching {}: {}", collection, e);
            return Vec::new();
        }
    };

    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<T>(row) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping malformed row in {}: {}", collection, e);
                None
            }
        })
        .collect()
}

async fn fetch_one<T: DeserializeOwned>(
    backend: &dyn Backend,
    collection: &str,
    id: i64,
) -> Result<T, BackendError> {
    let row = backend
        .single(collection, &[Filter::eq("id", id)], &[])
        .await?;
    Ok(serde_json::from_value(row)?)
}

// Listing fetches degrade to an empty list; the failure is logged
pub async fn fetch_accommodations(backend: &dyn Backend) -> Vec<Accommodation> {
    fetch_all(backend, ACCOMMODATIONS).await
}

pub async fn fetch_events(backend: &dyn Backend) -> Vec<Event> {
    fetch_all(backend, EVENTS).await
}

pub async fn fetch_accommodation(
    backend: &dyn Backend,
    id: i64,
) -> Result<Accommodation, BackendError> {
    fetch_one(backend, ACCOMMODATIONS, id).await
}

pub async fn fetch_event(backend: &dyn Backend, id: i64) -> Result<Event, BackendError> {
    fetch_one(backend, EVENTS, id).await
}
