// Checkout: turn the cart into booking records and submit them as one batch
//
// Preconditions are checked in a fixed order (identity, dates, contact details, cart contents)
// and none of them touches the backend. A failed submission leaves the cart and the date
// selection exactly as they were, so the user can retry without re-entering anything.

use crate::backend::{Backend, BackendError};
use crate::cart::{CartStore, ItemId, LineItem};
use crate::dates::{DateSelection, DateStore};
use crate::identity::{Identity, IdentityProvider};
use crate::price::Money;
use crate::storage::LocalStorage;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use validator::{Validate, ValidationError};

pub const BOOKINGS: &str = "bookings";

// One persisted booking per line item. Exactly one of the two references is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub user_id: String,
    pub event_id: Option<i64>,
    pub accommodation_id: Option<i64>,
    pub booking_date: DateTime<Utc>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_price: Decimal,
}

impl BookingRecord {
    pub fn for_line_item(
        user: &Identity,
        item: &LineItem,
        dates: DateSelection,
        booked_at: DateTime<Utc>,
    ) -> Self {
        let (event_id, accommodation_id) = match item.id() {
            ItemId::Event(id) => (Some(id), None),
            ItemId::Accommodation(id) => (None, Some(id)),
        };

        Self {
            user_id: user.id.clone(),
            event_id,
            accommodation_id,
            booking_date: booked_at,
            start_date: dates.start_date,
            end_date: dates.end_date,
            quantity: item.quantity(),
            total_price: item.total_price().amount(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "PayPal")]
    PayPal,
    #[serde(rename = "Apple Pay")]
    ApplePay,
    #[serde(rename = "Swish")]
    Swish,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentMethod::PayPal => "PayPal",
            PaymentMethod::ApplePay => "Apple Pay",
            PaymentMethod::Swish => "Swish",
        })
    }
}

// Fields collected by the payment form. Nothing is charged; they only gate the submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct ContactDetails {
    #[validate(custom = "not_blank")]
    pub name: String,
    #[validate(custom = "not_blank", email)]
    pub email: String,
    #[validate(custom = "valid_phone")]
    pub phone: String,
    #[validate(required)]
    pub payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: &str) -> Self {
        Self {
            field,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

// Field, message when missing, message when malformed; also fixes the reporting order
const CONTACT_FIELDS: [(&str, &str, &str); 4] = [
    ("name", "Name is required", "Name is invalid"),
    ("email", "Email is required", "Email address is invalid"),
    ("phone", "Phone number is required", "Phone number is invalid"),
    ("payment_method", "Select a payment method", "Select a payment method"),
];

impl ContactDetails {
    // Every failing field is reported, not just the first
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let report = match Validate::validate(self) {
            Ok(()) => return Ok(()),
            Err(report) => report,
        };
        let failed = report.field_errors();

        let errors = CONTACT_FIELDS
            .iter()
            .filter_map(|&(field, missing, malformed)| {
                let errors = failed.get(field)?;
                let message = if errors.iter().any(|e| e.code == "required") {
                    missing
                } else {
                    malformed
                };
                Some(FieldError::new(field, message))
            })
            .collect();
        Err(errors)
    }
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("required"));
    }
    Ok(())
}

// Digits plus the usual separators, at least six digits
fn valid_phone(phone: &str) -> Result<(), ValidationError> {
    not_blank(phone)?;
    let digits = phone.chars().filter(char::is_ascii_digit).count();
    let allowed = phone
        .trim()
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'));
    if allowed && digits >= 6 {
        Ok(())
    } else {
        Err(ValidationError::new("phone"))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckoutError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Travel dates not selected")]
    DatesNotSelected,

    #[error("Invalid contact details: {}", format_field_errors(.0))]
    InvalidContact(Vec<FieldError>),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Checkout already in progress")]
    AlreadySubmitting,

    #[error("Booking submission failed: {0}")]
    SubmissionFailed(#[from] BackendError),
}

fn format_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CheckoutError {
    // Text shown to the user. Every checkout error is recoverable.
    pub fn user_message(&self) -> String {
        match self {
            CheckoutError::NotSignedIn => "Please log in to proceed with checkout.".to_string(),
            CheckoutError::DatesNotSelected => {
                "Please select your travel dates before checking out.".to_string()
            }
            CheckoutError::InvalidContact(errors) => errors
                .iter()
                .map(|e| e.message.clone())
                .collect::<Vec<_>>()
                .join("\n"),
            CheckoutError::EmptyCart => "Your cart is empty.".to_string(),
            CheckoutError::AlreadySubmitting => {
                "Your booking is already being submitted.".to_string()
            }
            CheckoutError::SubmissionFailed(_) => "Payment failed. Please try again.".to_string(),
        }
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            CheckoutError::InvalidContact(errors) => errors,
            _ => &[],
        }
    }
}

// Records ready to be submitted; produced only when every precondition holds
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCheckout {
    pub user: Identity,
    pub dates: DateSelection,
    pub records: Vec<BookingRecord>,
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutReceipt {
    pub records: Vec<BookingRecord>,
    pub total: Money,
}

impl CheckoutReceipt {
    pub fn user_message(&self) -> String {
        "Payment successful! Your bookings are confirmed.".to_string()
    }
}

pub struct CheckoutAssembler {
    backend: Arc<dyn Backend>,
    require_contact: bool,
}

impl fmt::Debug for CheckoutAssembler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckoutAssembler")
            .field("require_contact", &self.require_contact)
            .finish_non_exhaustive()
    }
}

impl CheckoutAssembler {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            require_contact: false,
        }
    }

    // Contact details become mandatory even when the caller does not pass any
    pub fn requiring_contact(mut self, require_contact: bool) -> Self {
        self.require_contact = require_contact;
        self
    }

    pub fn prepare(
        &self,
        identity: Option<Identity>,
        dates: Option<DateSelection>,
        contact: Option<&ContactDetails>,
        items: &[LineItem],
        booked_at: DateTime<Utc>,
    ) -> Result<PreparedCheckout, CheckoutError> {
        let user = identity.ok_or(CheckoutError::NotSignedIn)?;
        let dates = dates.ok_or(CheckoutError::DatesNotSelected)?;

        match contact {
            Some(contact) => contact.validate().map_err(CheckoutError::InvalidContact)?,
            None if self.require_contact => {
                ContactDetails::default()
                    .validate()
                    .map_err(CheckoutError::InvalidContact)?;
            }
            None => {}
        }

        if items.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let records = items
            .iter()
            .map(|item| BookingRecord::for_line_item(&user, item, dates, booked_at))
            .collect();

        Ok(PreparedCheckout {
            user,
            dates,
            records,
            total: items.iter().map(LineItem::total_price).sum(),
        })
    }

    // One insert call for the whole batch
    pub async fn submit(&self, prepared: PreparedCheckout) -> Result<CheckoutReceipt, CheckoutError> {
        let rows = prepared
            .records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(BackendError::from)?;

        match self.backend.insert(BOOKINGS, rows).await {
            Ok(_) => {
                info!(
                    "Submitted {} bookings for user {}",
                    prepared.records.len(),
                    prepared.user.id
                );
                Ok(CheckoutReceipt {
                    records: prepared.records,
                    total: prepared.total,
                })
            }
            Err(e) => {
                error!("Error adding bookings for user {}: {}", prepared.user.id, e);
                Err(CheckoutError::SubmissionFailed(e))
            }
        }
    }

    // Single-owner checkout: on success the cart and the dates are cleared
    pub async fn checkout<C: LocalStorage, D: LocalStorage>(
        &self,
        cart: &mut CartStore<C>,
        dates: &mut DateStore<D>,
        identity: &dyn IdentityProvider,
        contact: Option<&ContactDetails>,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        let prepared = self
            .prepare(
                identity.current(),
                dates.selection(),
                contact,
                cart.items(),
                Utc::now(),
            )
            .map_err(|e| {
                warn!("Checkout rejected: {}", e);
                e
            })?;

        let receipt = self.submit(prepared).await?;
        cart.clear_cart();
        dates.clear_dates();
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::cart::fixtures::{accommodation, event};
    use crate::identity::SessionIdentity;
    use crate::price::Price;
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use test_case::test_case;
    use tokio_test::{assert_err, assert_ok};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn valid_contact() -> ContactDetails {
        ContactDetails {
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: "+46 70 123 45 67".to_string(),
            payment_method: Some(PaymentMethod::Swish),
        }
    }

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        assembler: CheckoutAssembler,
        cart: CartStore<Arc<MemoryStorage>>,
        dates: DateStore<Arc<MemoryStorage>>,
        identity: SessionIdentity,
    }

    // Cart with one accommodation (100/night x 2) and one free event (x 3)
    fn fixture() -> Fixture {
        let backend = Arc::new(InMemoryBackend::new());
        let storage = Arc::new(MemoryStorage::new());
        let mut cart = CartStore::load(Arc::clone(&storage));
        cart.add_to_cart(accommodation(11, 100).with_quantity(2).unwrap()).unwrap();
        cart.add_to_cart(event(22, Price::Free).with_quantity(3).unwrap()).unwrap();

        let mut dates = DateStore::load(Arc::clone(&storage));
        dates.set_range(DateSelection::new(date("2025-06-01"), date("2025-06-03")).unwrap());

        Fixture {
            assembler: CheckoutAssembler::new(backend.clone()),
            backend,
            cart,
            dates,
            identity: SessionIdentity::signed_in(Identity::new("user-1", "ada@example.com")),
        }
    }

    #[tokio::test]
    async fn test_checkout_without_identity_never_submits() {
        let mut f = fixture();
        f.identity.sign_out();

        let result = f
            .assembler
            .checkout(&mut f.cart, &mut f.dates, &f.identity, None)
            .await;

        assert_eq!(result, Err(CheckoutError::NotSignedIn));
        assert_eq!(f.backend.insert_calls(), 0);
        assert_eq!(f.cart.len(), 2);
    }

    #[tokio::test]
    async fn test_checkout_without_dates_never_submits() {
        let mut f = fixture();
        f.dates.clear_dates();

        let result = f
            .assembler
            .checkout(&mut f.cart, &mut f.dates, &f.identity, None)
            .await;

        assert_eq!(result, Err(CheckoutError::DatesNotSelected));
        assert_eq!(f.backend.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_identity_checked_before_dates() {
        let mut f = fixture();
        f.identity.sign_out();
        f.dates.clear_dates();

        let result = f
            .assembler
            .checkout(&mut f.cart, &mut f.dates, &f.identity, None)
            .await;
        assert_eq!(result, Err(CheckoutError::NotSignedIn));
    }

    #[tokio::test]
    async fn test_successful_checkout_builds_one_record_per_item() {
        let mut f = fixture();

        let receipt = assert_ok!(
            f.assembler
                .checkout(&mut f.cart, &mut f.dates, &f.identity, None)
                .await
        );

        assert_eq!(receipt.records.len(), 2);
        let stay = &receipt.records[0];
        assert_eq!(stay.accommodation_id, Some(11));
        assert_eq!(stay.event_id, None);
        assert_eq!(stay.quantity, 2);
        assert_eq!(stay.total_price, Decimal::from(200));

        let festival = &receipt.records[1];
        assert_eq!(festival.event_id, Some(22));
        assert_eq!(festival.accommodation_id, None);
        assert_eq!(festival.quantity, 3);
        assert_eq!(festival.total_price, Decimal::ZERO);
        assert_eq!(receipt.total, Money::from_major(200));

        assert_eq!(f.backend.insert_calls(), 1);
        let rows = f.backend.rows(BOOKINGS);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["user_id"], json!("user-1"));
        assert_eq!(rows[0]["start_date"], json!("2025-06-01"));
        assert_eq!(rows[0]["end_date"], json!("2025-06-03"));
        assert_eq!(rows[0]["event_id"], json!(null));
        assert_eq!(rows[0]["total_price"], json!(200.0));

        assert!(f.cart.is_empty());
        assert_eq!(f.dates.selection(), None);
    }

    #[tokio::test]
    async fn test_failed_submission_preserves_state() {
        let mut f = fixture();
        f.backend.fail_next_requests(1);
        let cart_before = f.cart.items().to_vec();
        let dates_before = f.dates.selection();

        let result = f
            .assembler
            .checkout(&mut f.cart, &mut f.dates, &f.identity, None)
            .await;

        let err = assert_err!(result);
        assert!(matches!(err, CheckoutError::SubmissionFailed(_)));
        assert_eq!(err.user_message(), "Payment failed. Please try again.");
        assert_eq!(f.cart.items(), cart_before.as_slice());
        assert_eq!(f.dates.selection(), dates_before);
        assert!(f.backend.rows(BOOKINGS).is_empty());

        // Retrying the same checkout goes through
        assert_ok!(
            f.assembler
                .checkout(&mut f.cart, &mut f.dates, &f.identity, None)
                .await
        );
        assert_eq!(f.backend.rows(BOOKINGS).len(), 2);
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected() {
        let mut f = fixture();
        f.cart.clear_cart();

        let result = f
            .assembler
            .checkout(&mut f.cart, &mut f.dates, &f.identity, None)
            .await;
        assert_eq!(result, Err(CheckoutError::EmptyCart));
        assert_eq!(f.backend.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_required_contact_details() {
        let mut f = fixture();
        let assembler = CheckoutAssembler::new(f.backend.clone()).requiring_contact(true);

        let result = assembler
            .checkout(&mut f.cart, &mut f.dates, &f.identity, None)
            .await;
        let err = assert_err!(result);
        assert_eq!(err.field_errors().len(), 4);
        assert_eq!(f.backend.insert_calls(), 0);

        let contact = valid_contact();
        assert_ok!(
            assembler
                .checkout(&mut f.cart, &mut f.dates, &f.identity, Some(&contact))
                .await
        );
    }

    #[test]
    fn test_prepare_shares_timestamp_and_dates() {
        let f = fixture();
        let booked_at = Utc::now();
        let prepared = f
            .assembler
            .prepare(
                f.identity.current(),
                f.dates.selection(),
                None,
                f.cart.items(),
                booked_at,
            )
            .unwrap();

        assert!(prepared.records.iter().all(|r| r.booking_date == booked_at));
        assert!(prepared
            .records
            .iter()
            .all(|r| r.start_date == date("2025-06-01") && r.end_date == date("2025-06-03")));
    }

    #[test_case("ada@example.com", true; "plain address")]
    #[test_case("first.last+tag@mail.example.co.uk", true; "subdomains and tags")]
    #[test_case("ada.example.com", false; "missing at")]
    #[test_case("ada@@example.com", false; "double at")]
    #[test_case("@example.com", false; "missing local part")]
    #[test_case("ada lovelace@example.com", false; "whitespace")]
    #[test_case("ada@.com", false; "empty host")]
    #[test_case("a,b@example.com", false; "comma in local part")]
    #[test_case("a@-example.com", false; "host starts with hyphen")]
    fn test_email_field(email: &str, valid: bool) {
        let contact = ContactDetails {
            email: email.to_string(),
            ..valid_contact()
        };
        match contact.validate() {
            Ok(()) => assert!(valid, "expected {email:?} to be rejected"),
            Err(errors) => {
                assert!(!valid, "expected {email:?} to pass, got {errors:?}");
                assert_eq!(errors, vec![FieldError::new("email", "Email address is invalid")]);
            }
        }
    }

    #[test_case(ContactDetails { name: String::new(), ..valid_contact() }, vec!["name"]; "missing name")]
    #[test_case(ContactDetails { email: "nope".to_string(), ..valid_contact() }, vec!["email"]; "bad email")]
    #[test_case(ContactDetails { name: "   ".to_string(), ..valid_contact() }, vec!["name"]; "blank name")]
    #[test_case(ContactDetails { phone: "12".to_string(), ..valid_contact() }, vec!["phone"]; "short phone")]
    #[test_case(ContactDetails { phone: "070-ABC-DEFG".to_string(), ..valid_contact() }, vec!["phone"]; "letters in phone")]
    #[test_case(ContactDetails { payment_method: None, ..valid_contact() }, vec!["payment_method"]; "no payment method")]
    #[test_case(ContactDetails::default(), vec!["name", "email", "phone", "payment_method"]; "everything missing")]
    fn test_contact_validation(contact: ContactDetails, expected_fields: Vec<&str>) {
        let errors = contact.validate().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, expected_fields);
    }

    #[test]
    fn test_valid_contact_passes() {
        assert!(valid_contact().validate().is_ok());
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            CheckoutError::NotSignedIn.user_message(),
            "Please log in to proceed with checkout."
        );
        let err = CheckoutError::InvalidContact(vec![
            FieldError::new("name", "Name is required"),
            FieldError::new("phone", "Phone number is required"),
        ]);
        assert_eq!(err.user_message(), "Name is required\nPhone number is required");
        assert_eq!(
            err.to_string(),
            "Invalid contact details: name: Name is required; phone: Phone number is required"
        );
    }
}
