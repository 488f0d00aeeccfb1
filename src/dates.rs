// Ambient travel date selection, shared by every line item in a checkout

use crate::storage::LocalStorage;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const START_DATE_KEY: &str = "startDate";
pub const END_DATE_KEY: &str = "endDate";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DateError {
    #[error("End date {end} is before start date {start}")]
    EndBeforeStart { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSelection {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl DateSelection {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Result<Self, DateError> {
        if end_date < start_date {
            return Err(DateError::EndBeforeStart {
                start: start_date,
                end: end_date,
            });
        }
        Ok(Self {
            start_date,
            end_date,
        })
    }

    pub fn nights(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }
}

// Holds the start/end dates independently so the UI can set one before the other
#[derive(Debug)]
pub struct DateStore<S: LocalStorage> {
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    storage: S,
}

impl<S: LocalStorage> DateStore<S> {
    pub fn load(storage: S) -> Self {
        let mut start_date = read_date(&storage, START_DATE_KEY);
        let mut end_date = read_date(&storage, END_DATE_KEY);

        if let (Some(start), Some(end)) = (start_date, end_date) {
            if end < start {
                warn!("Discarding persisted date range {} - {}", start, end);
                start_date = None;
                end_date = None;
            }
        }

        Self {
            start_date,
            end_date,
            storage,
        }
    }

    pub fn set_start_date(&mut self, date: NaiveDate) -> Result<(), DateError> {
        if let Some(end) = self.end_date {
            if end < date {
                return Err(DateError::EndBeforeStart { start: date, end });
            }
        }
        self.start_date = Some(date);
        write_date(&self.storage, START_DATE_KEY, date);
        Ok(())
    }

    pub fn set_end_date(&mut self, date: NaiveDate) -> Result<(), DateError> {
        if let Some(start) = self.start_date {
            if date < start {
                return Err(DateError::EndBeforeStart { start, end: date });
            }
        }
        self.end_date = Some(date);
        write_date(&self.storage, END_DATE_KEY, date);
        Ok(())
    }

    pub fn set_range(&mut self, selection: DateSelection) {
        self.start_date = Some(selection.start_date);
        self.end_date = Some(selection.end_date);
        write_date(&self.storage, START_DATE_KEY, selection.start_date);
        write_date(&self.storage, END_DATE_KEY, selection.end_date);
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start_date
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.end_date
    }

    // None until both ends of the range are set
    pub fn selection(&self) -> Option<DateSelection> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => DateSelection::new(start, end).ok(),
            _ => None,
        }
    }

    pub fn clear_dates(&mut self) {
        self.start_date = None;
        self.end_date = None;
        for key in [START_DATE_KEY, END_DATE_KEY] {
            if let Err(e) = self.storage.remove(key) {
                warn!("Failed to remove {}: {}", key, e);
            }
        }
        debug!("Cleared date selection");
    }
}

fn read_date<S: LocalStorage>(storage: &S, key: &str) -> Option<NaiveDate> {
    match storage.get(key) {
        Ok(Some(raw)) => match NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT) {
            Ok(date) => Some(date),
            Err(e) => {
                warn!("Ignoring unreadable {} {:?}: {}", key, raw, e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!("Failed to read {}: {}", key, e);
            None
        }
    }
}

fn write_date<S: LocalStorage>(storage: &S, key: &str, date: NaiveDate) {
    let value = date.format(DATE_FORMAT).to_string();
    if let Err(e) = storage.set(key, &value) {
        warn!("Failed to write {}: {}", key, e);
    }
}
