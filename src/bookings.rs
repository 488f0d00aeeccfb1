// Booking history for the signed-in user
// Bookings only store references; titles and dates of the booked events and accommodations are
// looked up per booking when the history is loaded.

use crate::backend::{Backend, BackendError, Filter};
use crate::catalog::{ACCOMMODATIONS, EVENTS};
use crate::checkout::BOOKINGS;
use crate::price::Money;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{error, warn};

// A booking row as stored by the backend
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoredBooking {
    pub id: i64,
    pub user_id: String,
    #[serde(default, deserialize_with = "optional_id")]
    pub event_id: Option<i64>,
    #[serde(default, deserialize_with = "optional_id")]
    pub accommodation_id: Option<i64>,
    pub booking_date: DateTime<Utc>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_price: Decimal,
}

fn default_quantity() -> u32 {
    1
}

// References may come back as numbers or numeric strings
fn optional_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid id {}", n))),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid id {:?}", s))),
        Some(other) => Err(serde::de::Error::custom(format!("invalid id {}", other))),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BookedItem {
    Event {
        id: i64,
        title: Option<String>,
        date: Option<String>,
    },
    Accommodation {
        id: i64,
        name: Option<String>,
        date: Option<String>,
    },
    // Neither reference set; grouped under `unlinked` so the row can still be shown and deleted
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserBooking {
    pub booking: StoredBooking,
    pub item: BookedItem,
}

impl UserBooking {
    pub fn total_price(&self) -> Money {
        Money::new(self.booking.total_price).unwrap_or(Money::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingGroup {
    pub booked_at: DateTime<Utc>,
    pub events: Vec<UserBooking>,
    pub accommodations: Vec<UserBooking>,
    pub unlinked: Vec<UserBooking>,
}

impl BookingGroup {
    pub fn total(&self) -> Money {
        self.events
            .iter()
            .chain(self.accommodations.iter())
            .chain(self.unlinked.iter())
            .map(UserBooking::total_price)
            .sum()
    }
}

async fn lookup_detail(
    backend: &dyn Backend,
    collection: &str,
    id: i64,
    label_column: &str,
) -> (Option<String>, Option<String>) {
    match backend
        .single(collection, &[Filter::eq("id", id)], &[label_column, "date"])
        .await
    {
        Ok(row) => {
            let text = |key: &str| row.get(key).and_then(Value::as_str).map(str::to_string);
            (text(label_column), text("date"))
        }
        Err(e) => {
            error!("Error fetching {} {} details: {}", collection, id, e);
            (None, None)
        }
    }
}

async fn with_details(backend: &dyn Backend, booking: StoredBooking) -> UserBooking {
    let item = if let Some(id) = booking.event_id {
        let (title, date) = lookup_detail(backend, EVENTS, id, "title").await;
        BookedItem::Event { id, title, date }
    } else if let Some(id) = booking.accommodation_id {
        let (name, date) = lookup_detail(backend, ACCOMMODATIONS, id, "name").await;
        BookedItem::Accommodation { id, name, date }
    } else {
        BookedItem::Unknown
    };
    UserBooking { booking, item }
}

// All bookings of one user with their event/accommodation details looked up concurrently
pub async fn fetch_user_bookings(
    backend: &dyn Backend,
    user_id: &str,
) -> Result<Vec<UserBooking>, BackendError> {
    let rows = backend
        .select(BOOKINGS, &[Filter::eq("user_id", user_id)], &[])
        .await?;

    let bookings: Vec<StoredBooking> = rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(booking) => Some(booking),
            Err(e) => {
                warn!("Skipping malformed booking row: {}", e);
                None
            }
        })
        .collect();

    Ok(join_all(bookings.into_iter().map(|b| with_details(backend, b))).await)
}

// Bookings made in the same checkout share a timestamp; most recent checkout first
pub fn group_by_booking_date(bookings: Vec<UserBooking>) -> Vec<BookingGroup> {
    let mut groups: BTreeMap<DateTime<Utc>, BookingGroup> = BTreeMap::new();

    for booking in bookings {
        let booked_at = booking.booking.booking_date;
        let group = groups.entry(booked_at).or_insert_with(|| BookingGroup {
            booked_at,
            events: Vec::new(),
            accommodations: Vec::new(),
            unlinked: Vec::new(),
        });
        match booking.item {
            BookedItem::Event { .. } => group.events.push(booking),
            BookedItem::Accommodation { .. } => group.accommodations.push(booking),
            BookedItem::Unknown => {
                warn!("Booking {} references nothing", booking.booking.id);
                group.unlinked.push(booking);
            }
        }
    }

    groups.into_values().rev().collect()
}

pub async fn delete_booking(backend: &dyn Backend, booking_id: i64) -> Result<(), BackendError> {
    let removed = backend
        .delete(BOOKINGS, &[Filter::eq("id", booking_id)])
        .await?;
    if removed == 0 {
        return Err(BackendError::NotFound(BOOKINGS.to_string()));
    }
    Ok(())
}
