use crate::models::now_timestamp;
use crate::Db;
use easm_core::{StateStore, StoreError};
use rusqlite::{params, ErrorCode, OptionalExtension};
use std::collections::BTreeSet;

impl Db {
    fn flag(&self, column: Flag, domain: &str) -> Result<bool, StoreError> {
        let sql = format!("SELECT {} FROM domains WHERE domain=?", column.name());
        let v: Option<bool> = self
            .conn
            .query_row(&sql, [domain], |r| r.get(0))
            .optional()
            .map_err(StoreError::backend)?;
        Ok(v.unwrap_or(false))
    }

    fn set_flag(&self, column: Flag, domain: &str, value: bool) -> Result<(), StoreError> {
        // last_seen never drops below first_seen even if the clock steps back
        let sql = format!(
            "UPDATE domains SET {}=?, last_seen=MAX(first_seen, ?) WHERE domain=?",
            column.name()
        );
        let n = self
            .conn
            .execute(&sql, params![value, now_timestamp(), domain])
            .map_err(StoreError::backend)?;
        if n == 0 {
            return Err(StoreError::NotFound(domain.to_string()));
        }
        Ok(())
    }

    fn scan(&self, column: Flag) -> Result<BTreeSet<String>, StoreError> {
        let sql = format!("SELECT domain FROM domains WHERE {}=1", column.name());
        let mut stmt = self.conn.prepare_cached(&sql).map_err(StoreError::backend)?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0)).map_err(StoreError::backend)?;
        rows.collect::<Result<BTreeSet<_>, _>>().map_err(StoreError::backend)
    }
}

#[derive(Clone, Copy)]
enum Flag {
    Active,
    Live,
}

impl Flag {
    fn name(self) -> &'static str {
        match self {
            Flag::Active => "active",
            Flag::Live => "live",
        }
    }
}

impl StateStore for Db {
    fn exists(&self, domain: &str) -> Result<bool, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(1) FROM domains WHERE domain=?", [domain], |r| r.get(0))
            .map_err(StoreError::backend)?;
        Ok(n > 0)
    }

    fn is_active(&self, domain: &str) -> Result<bool, StoreError> {
        self.flag(Flag::Active, domain)
    }

    fn is_live(&self, domain: &str) -> Result<bool, StoreError> {
        self.flag(Flag::Live, domain)
    }

    fn insert(&self, domain: &str) -> Result<(), StoreError> {
        let now = now_timestamp();
        let res = self.conn.execute(
            "INSERT INTO domains(domain, active, live, first_seen, last_seen) VALUES (?, 1, 0, ?, ?)",
            params![domain, now, now],
        );
        match res {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::DuplicateKey(domain.to_string()))
            }
            Err(e) => Err(StoreError::backend(e)),
        }
    }

    fn set_active(&self, domain: &str, value: bool) -> Result<(), StoreError> {
        self.set_flag(Flag::Active, domain, value)
    }

    fn set_live(&self, domain: &str, value: bool) -> Result<(), StoreError> {
        self.set_flag(Flag::Live, domain, value)
    }

    fn list_active(&self) -> Result<BTreeSet<String>, StoreError> {
        self.scan(Flag::Active)
    }

    fn list_live(&self) -> Result<BTreeSet<String>, StoreError> {
        self.scan(Flag::Live)
    }
}
