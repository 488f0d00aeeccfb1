// Storefront session
// Wires the cart, the date selection, the signed-in identity and the backend together for one
// browsing session. State containers are injected, never global, so tests can swap any of them.

use crate::backend::{Backend, BackendError};
use crate::bookings::{self, BookingGroup};
use crate::cart::{CartError, CartStore, ItemId, LineItem};
use crate::catalog::{self, Accommodation, CatalogError, Event};
use crate::checkout::{CheckoutAssembler, CheckoutError, CheckoutReceipt, ContactDetails};
use crate::config::StorefrontConfig;
use crate::dates::{DateError, DateSelection, DateStore};
use crate::identity::{Identity, IdentityProvider, SessionIdentity};
use crate::price::Money;
use crate::profile::{self, ProfileError};
use crate::rest::RestBackend;
use crate::storage::{FileStorage, LocalStorage, MemoryStorage};
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

type SharedStorage = Arc<dyn LocalStorage>;

// Held while a checkout submission is in flight; releases the flag on every exit path
struct SubmittingGuard<'a>(&'a AtomicBool);

impl<'a> SubmittingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SubmittingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Storefront {
    backend: Arc<dyn Backend>,
    identity: SessionIdentity,
    cart: Mutex<CartStore<SharedStorage>>,
    dates: Mutex<DateStore<SharedStorage>>,
    assembler: CheckoutAssembler,
    submitting: AtomicBool,
}

impl std::fmt::Debug for Storefront {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storefront")
            .field("identity", &self.identity)
            .field("cart_items", &self.cart.lock().len())
            .field("submitting", &self.is_submitting())
            .finish_non_exhaustive()
    }
}

impl Storefront {
    // Cart and dates are seeded from whatever the storage already mirrors
    pub fn new(backend: Arc<dyn Backend>, storage: SharedStorage) -> Self {
        Self {
            assembler: CheckoutAssembler::new(Arc::clone(&backend)),
            backend,
            identity: SessionIdentity::new(),
            cart: Mutex::new(CartStore::load(Arc::clone(&storage))),
            dates: Mutex::new(DateStore::load(storage)),
            submitting: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &StorefrontConfig) -> Result<Self, BackendError> {
        let backend: Arc<dyn Backend> = Arc::new(RestBackend::new(&config.backend)?);
        let storage: SharedStorage = match &config.storage_path {
            Some(path) => Arc::new(FileStorage::new(path)),
            None => Arc::new(MemoryStorage::new()),
        };
        Ok(Self::new(backend, storage).requiring_contact(config.require_contact))
    }

    pub fn requiring_contact(mut self, require_contact: bool) -> Self {
        self.assembler = self.assembler.requiring_contact(require_contact);
        self
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    // Identity

    // Requests made from here on carry the user's session token
    pub fn sign_in(&self, identity: Identity) {
        self.backend.set_access_token(identity.access_token.clone());
        self.identity.sign_in(identity);
    }

    // The cart belongs to the session, so it does not outlive the signed-in user
    pub fn sign_out(&self) -> Option<Identity> {
        let previous = self.identity.sign_out();
        self.backend.set_access_token(None);
        self.cart.lock().clear_cart();
        previous
    }

    pub fn current_user(&self) -> Option<Identity> {
        self.identity.current()
    }

    // Cart

    pub fn add_to_cart(&self, item: LineItem) -> Result<(), CartError> {
        self.cart.lock().add_to_cart(item)
    }

    pub fn add_accommodation(
        &self,
        accommodation: &Accommodation,
        nights: u32,
    ) -> Result<(), CatalogError> {
        let item = accommodation.to_line_item(nights)?;
        self.add_to_cart(item)?;
        Ok(())
    }

    pub fn add_event(&self, event: &Event, attendees: u32) -> Result<(), CatalogError> {
        let item = event.to_line_item(attendees)?;
        self.add_to_cart(item)?;
        Ok(())
    }

    pub fn remove_from_cart(&self, id: ItemId) {
        self.cart.lock().remove_from_cart(id);
    }

    pub fn update_item_quantity(&self, id: ItemId, quantity: u32) -> Result<(), CartError> {
        self.cart.lock().update_item_quantity(id, quantity)
    }

    pub fn clear_cart(&self) {
        self.cart.lock().clear_cart();
    }

    pub fn cart_items(&self) -> Vec<LineItem> {
        self.cart.lock().items().to_vec()
    }

    pub fn cart_display_order(&self) -> Vec<LineItem> {
        self.cart
            .lock()
            .display_order()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn cart_total(&self) -> Money {
        self.cart.lock().total()
    }

    // Dates

    pub fn set_start_date(&self, date: NaiveDate) -> Result<(), DateError> {
        self.dates.lock().set_start_date(date)
    }

    pub fn set_end_date(&self, date: NaiveDate) -> Result<(), DateError> {
        self.dates.lock().set_end_date(date)
    }

    pub fn set_dates(&self, selection: DateSelection) {
        self.dates.lock().set_range(selection);
    }

    pub fn clear_dates(&self) {
        self.dates.lock().clear_dates();
    }

    pub fn date_selection(&self) -> Option<DateSelection> {
        self.dates.lock().selection()
    }

    // Catalog and history

    pub async fn accommodations(&self) -> Vec<Accommodation> {
        catalog::fetch_accommodations(self.backend()).await
    }

    pub async fn events(&self) -> Vec<Event> {
        catalog::fetch_events(self.backend()).await
    }

    // Booking history of the signed-in user; nobody signed in means no history
    pub async fn my_bookings(&self) -> Result<Vec<BookingGroup>, BackendError> {
        let user = match self.current_user() {
            Some(user) => user,
            None => return Ok(Vec::new()),
        };
        let bookings = bookings::fetch_user_bookings(self.backend(), &user.id).await?;
        Ok(bookings::group_by_booking_date(bookings))
    }

    pub async fn cancel_booking(&self, booking_id: i64) -> Result<(), BackendError> {
        bookings::delete_booking(self.backend(), booking_id).await
    }

    // Profile

    pub async fn profile_name(&self) -> Result<Option<String>, ProfileError> {
        let user = self.current_user().ok_or(ProfileError::NotSignedIn)?;
        Ok(profile::fetch_profile_name(self.backend(), &user.id).await?)
    }

    pub async fn rename(&self, name: &str) -> Result<(), ProfileError> {
        let user = self.current_user().ok_or(ProfileError::NotSignedIn)?;
        profile::update_profile_name(self.backend(), &user.id, name).await
    }

    // Checkout

    pub fn is_submitting(&self) -> bool {
        self.submitting.load(Ordering::SeqCst)
    }

    pub async fn checkout(
        &self,
        contact: Option<&ContactDetails>,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        let _submitting = match SubmittingGuard::acquire(&self.submitting) {
            Some(guard) => guard,
            None => {
                warn!("Checkout ignored, a submission is already in flight");
                return Err(CheckoutError::AlreadySubmitting);
            }
        };

        // Locks are released before the request goes out; the cart may change meanwhile
        let (prepared, booked) = {
            let cart = self.cart.lock();
            let dates = self.dates.lock();
            let prepared = self.assembler.prepare(
                self.identity.current(),
                dates.selection(),
                contact,
                cart.items(),
                Utc::now(),
            );
            (prepared, cart.items().to_vec())
        };
        let prepared = prepared.map_err(|e| {
            warn!("Checkout rejected: {}", e);
            e
        })?;

        debug!(
            "Submitting {} bookings for user {}",
            prepared.records.len(),
            prepared.user.id
        );
        let booked_dates = prepared.dates;
        let receipt = self.assembler.submit(prepared).await?;

        // Only what was submitted leaves the cart
        self.cart.lock().remove_booked(&booked);
        let mut dates = self.dates.lock();
        if dates.selection() == Some(booked_dates) {
            dates.clear_dates();
        }
        Ok(receipt)
    }
}
