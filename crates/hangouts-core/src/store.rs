//! SQLite contact directory using Diesel
//!
//! Owns the `contacts` table. The engine reads it through `ContactDirectory`;
//! the HTTP layer also writes to it.

use anyhow::Result;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{LazyLock, Mutex};
use thiserror::Error;
use tracing::{debug, info};

use crate::contact::{Contact, ContactDirectory};
use crate::schema::contacts;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Contact row from the database
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = contacts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct ContactRow {
    id: i32,
    first_name: String,
    last_name: String,
    phone: String,
    email: String,
    address: String,
}

impl From<ContactRow> for Contact {
    fn from(row: ContactRow) -> Self {
        Contact {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            phone: row.phone,
            email: row.email,
            address: row.address,
        }
    }
}

/// Editable contact fields, for both insert and full update
#[derive(Insertable, AsChangeset, Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[diesel(table_name = contacts)]
#[serde(default)]
pub struct ContactDraft {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: String,
    pub address: String,
}

static PHONE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\+?\d+$").expect("valid regex"));
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));
static PLAIN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\- ]*$").expect("valid regex"));

/// Why a contact draft cannot be stored
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidContact {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("phone must be digits with an optional leading +")]
    Phone,
    #[error("email is not a valid address")]
    Email,
    #[error("{0} may only contain letters, digits, spaces and hyphens")]
    Characters(&'static str),
}

impl ContactDraft {
    pub fn new(
        first_name: &str,
        last_name: &str,
        phone: &str,
        email: &str,
        address: &str,
    ) -> Self {
        Self {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            phone: phone.to_string(),
            email: email.to_string(),
            address: address.to_string(),
        }
    }

    /// Trimmed copy of the draft, or the first rule it breaks.
    ///
    /// Every field is required. The phone is the key messages are matched
    /// on, so it must be bare digits with an optional `+`.
    pub fn validate(&self) -> Result<ContactDraft, InvalidContact> {
        let draft = ContactDraft::new(
            self.first_name.trim(),
            self.last_name.trim(),
            self.phone.trim(),
            self.email.trim(),
            self.address.trim(),
        );

        let fields = [
            ("first_name", &draft.first_name),
            ("last_name", &draft.last_name),
            ("phone", &draft.phone),
            ("email", &draft.email),
            ("address", &draft.address),
        ];
        if let Some((name, _)) = fields.into_iter().find(|(_, value)| value.is_empty()) {
            return Err(InvalidContact::Missing(name));
        }

        if !PHONE.is_match(&draft.phone) {
            return Err(InvalidContact::Phone);
        }
        if !EMAIL.is_match(&draft.email) {
            return Err(InvalidContact::Email);
        }
        for (name, value) in [
            ("first_name", &draft.first_name),
            ("last_name", &draft.last_name),
            ("address", &draft.address),
        ] {
            if !PLAIN_TEXT.is_match(value) {
                return Err(InvalidContact::Characters(name));
            }
        }

        Ok(draft)
    }
}

#[derive(QueryableByName)]
struct LastInsertId {
    #[diesel(sql_type = Integer)]
    id: i32,
}

pub struct ContactStore {
    conn: Mutex<SqliteConnection>,
}

impl ContactStore {
    /// Open (or create) the database and apply pending migrations
    pub fn open(database_url: &str) -> Result<Self> {
        let mut conn = SqliteConnection::establish(database_url)?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
        info!(
            "Contact store opened at {} ({} migrations applied)",
            database_url,
            applied.len()
        );

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Validates the draft and stores its trimmed form
    pub fn create(&self, draft: &ContactDraft) -> Result<Contact> {
        let draft = &draft.validate()?;
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let row = conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::insert_into(contacts::table)
                .values(draft)
                .execute(conn)?;
            let LastInsertId { id } =
                diesel::sql_query("SELECT last_insert_rowid() AS id").get_result(conn)?;
            contacts::table
                .find(id)
                .select(ContactRow::as_select())
                .first(conn)
        })?;

        debug!("Created contact {} ({})", row.id, row.phone);
        Ok(row.into())
    }

    pub fn get(&self, id: i32) -> Result<Option<Contact>> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let row = contacts::table
            .find(id)
            .select(ContactRow::as_select())
            .first(&mut *conn)
            .optional()?;

        Ok(row.map(Contact::from))
    }

    /// Replace every editable field. `None` if no such contact.
    pub fn update(&self, id: i32, draft: &ContactDraft) -> Result<Option<Contact>> {
        let draft = &draft.validate()?;
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let row = conn.transaction::<_, diesel::result::Error, _>(|conn| {
            let updated = diesel::update(contacts::table.find(id))
                .set(draft)
                .execute(conn)?;
            if updated == 0 {
                return Ok(None);
            }
            contacts::table
                .find(id)
                .select(ContactRow::as_select())
                .first(conn)
                .optional()
        })?;

        Ok(row.map(Contact::from))
    }

    /// Returns whether a contact was removed
    pub fn delete(&self, id: i32) -> Result<bool> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let deleted = diesel::delete(contacts::table.find(id)).execute(&mut *conn)?;
        if deleted > 0 {
            debug!("Deleted contact {}", id);
        }
        Ok(deleted > 0)
    }
}

impl ContactDirectory for ContactStore {
    fn list_all(&self) -> Result<Vec<Contact>> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let rows = contacts::table
            .order(contacts::id.asc())
            .select(ContactRow::as_select())
            .load(&mut *conn)?;

        Ok(rows.into_iter().map(Contact::from).collect())
    }

    /// Lowest id wins when several contacts share a phone
    fn get_by_address(&self, phone: &str) -> Result<Option<Contact>> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let row = contacts::table
            .filter(contacts::phone.eq(phone))
            .order(contacts::id.asc())
            .select(ContactRow::as_select())
            .first(&mut *conn)
            .optional()?;

        Ok(row.map(Contact::from))
    }
}

#[cfg(test)]
pub(crate) fn draft(first: &str, last: &str, phone: &str) -> ContactDraft {
    let email = format!("{}@example.com", first.to_lowercase());
    ContactDraft::new(first, last, phone, &email, "1 Main Street")
}
