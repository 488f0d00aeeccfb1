// Main library file for the travel storefront

// Session state: cart, trip dates and who is signed in
pub mod cart;
pub mod dates;
pub mod identity;
pub mod price;
pub mod storage;

// Hosted backend access
pub mod backend;
pub mod rest;

// Catalog browsing, checkout, booking history and the user profile
pub mod bookings;
pub mod catalog;
pub mod checkout;
pub mod profile;

pub mod config;
pub mod storefront;

// Re-export key types for convenience
pub use backend::{Backend, BackendError, Filter, InMemoryBackend};
pub use bookings::{BookedItem, BookingGroup, StoredBooking, UserBooking};
pub use cart::{
    AccommodationItem, CartError, CartStore, EventItem, ItemId, ItemKind, LineItem,
};
pub use catalog::{Accommodation, CatalogError, Event, Listing, ListingCriteria};
pub use checkout::{
    BookingRecord, CheckoutAssembler, CheckoutError, CheckoutReceipt, ContactDetails,
    FieldError, PaymentMethod, PreparedCheckout,
};
pub use config::{BackendConfig, ConfigError, StorefrontConfig};
pub use dates::{DateError, DateSelection, DateStore};
pub use identity::{Identity, IdentityProvider, SessionIdentity};
pub use price::{Money, Price, PriceError};
pub use profile::ProfileError;
pub use rest::RestBackend;
pub use storage::{FileStorage, LocalStorage, MemoryStorage, StorageError};
pub use storefront::Storefront;
