use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sql_types::BigInt;
use diesel::PgConnection;
use uuid::Uuid;

use crate::shared::errors::CoreError;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<PgConnection>>;

pub fn create_conn(database_url: &str) -> Result<DbPool, diesel::r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder().max_size(10).build(manager)
}

pub fn get_conn(pool: &DbPool) -> Result<DbConn, CoreError> {
    pool.get().map_err(CoreError::from)
}

/// Stable advisory-lock key derived from a row id (first 8 bytes of
/// the uuid). Collisions only cost extra serialization, never safety.
pub fn lock_key(id: Uuid) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&id.as_bytes()[..8]);
    i64::from_be_bytes(bytes)
}

/// Transaction-scoped Postgres advisory lock. Released automatically
/// at commit or rollback.
pub fn advisory_xact_lock(conn: &mut PgConnection, key: i64) -> QueryResult<()> {
    diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
        .bind::<BigInt, _>(key)
        .execute(conn)
        .map(|_| ())
}

/// Primary emails are stored and compared case-folded.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Strip a phone number down to its digits.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Last 10 digits of a phone number, or None when fewer than 10 remain
/// after normalization. Country-code prefixes ("+1", "0044") fall away.
pub fn phone_suffix(phone: &str) -> Option<String> {
    let digits = normalize_phone(phone);
    if digits.len() < 10 {
        return None;
    }
    Some(digits[digits.len() - 10..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_case_folded() {
        assert_eq!(normalize_email("  John@Example.COM "), "john@example.com");
    }

    #[test]
    fn phone_suffix_ignores_country_code() {
        assert_eq!(
            phone_suffix("+1 (555) 123-4567"),
            Some("5551234567".to_string())
        );
        assert_eq!(phone_suffix("555-123-4567"), Some("5551234567".to_string()));
    }

    #[test]
    fn short_phone_has_no_suffix() {
        assert_eq!(phone_suffix("123-4567"), None);
        assert_eq!(phone_suffix(""), None);
    }

    #[test]
    fn lock_key_is_stable_per_id() {
        let id = Uuid::new_v4();
        assert_eq!(lock_key(id), lock_key(id));
        assert_ne!(lock_key(id), lock_key(Uuid::new_v4()));
    }
}
