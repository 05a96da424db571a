//! Contacts as the engine sees them
//!
//! The engine only reads contacts. Callers pass a snapshot into each
//! operation; nothing here caches one between calls.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i32,
    pub first_name: String,
    pub last_name: String,
    /// Cross-reference key into message addresses
    pub phone: String,
    pub email: String,
    pub address: String,
}

impl Contact {
    /// "First Last", or `None` when both parts are blank
    pub fn full_name(&self) -> Option<String> {
        let name = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let name = name.trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}

/// Read side of the contact directory
pub trait ContactDirectory: Send + Sync {
    fn list_all(&self) -> Result<Vec<Contact>>;
    fn get_by_address(&self, phone: &str) -> Result<Option<Contact>>;
}

/// Phone -> contact lookup built from a snapshot.
///
/// Two contacts sharing a phone is unsupported; the first one wins and the
/// collision is logged.
pub struct ContactIndex<'a> {
    by_phone: HashMap<&'a str, &'a Contact>,
}

impl<'a> ContactIndex<'a> {
    pub fn new(contacts: &'a [Contact]) -> Self {
        let mut by_phone: HashMap<&'a str, &'a Contact> =
            HashMap::with_capacity(contacts.len());
        for contact in contacts {
            let phone = contact.phone.as_str();
            if phone.is_empty() {
                continue;
            }
            if let Some(existing) = by_phone.get(phone) {
                warn!(
                    "Contacts {} and {} share phone {}; keeping {}",
                    existing.id, contact.id, phone, existing.id
                );
                continue;
            }
            by_phone.insert(phone, contact);
        }
        Self { by_phone }
    }

    pub fn resolve(&self, address: &str) -> Option<&'a Contact> {
        self.by_phone.get(address).copied()
    }

    pub fn is_known(&self, address: &str) -> bool {
        self.by_phone.contains_key(address)
    }
}

#[cfg(test)]
pub(crate) fn contact(id: i32, first: &str, last: &str, phone: &str) -> Contact {
    Contact {
        id,
        first_name: first.to_string(),
        last_name: last.to_string(),
        phone: phone.to_string(),
        email: String::new(),
        address: String::new(),
    }
}
