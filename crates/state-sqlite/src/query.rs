use crate::{Db, RunRecord, RunTotals};
use anyhow::Result;
use easm_core::DomainRecord;
use rusqlite::{OptionalExtension, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DomainFilter {
    #[default]
    All,
    Active,
    Live,
    /// Known but no longer resolving.
    Inactive,
}

impl DomainFilter {
    fn clause(self) -> &'static str {
        match self {
            DomainFilter::All => "",
            DomainFilter::Active => " WHERE active=1",
            DomainFilter::Live => " WHERE live=1",
            DomainFilter::Inactive => " WHERE active=0",
        }
    }
}

fn record(r: &Row) -> rusqlite::Result<DomainRecord> {
    Ok(DomainRecord {
        domain: r.get(0)?,
        active: r.get(1)?,
        live: r.get(2)?,
        first_seen: r.get(3)?,
        last_seen: r.get(4)?,
    })
}

impl Db {
    pub fn get(&self, domain: &str) -> Result<Option<DomainRecord>> {
        let rec = self
            .conn
            .query_row(
                "SELECT domain, active, live, first_seen, last_seen FROM domains WHERE domain=?",
                [domain],
                record,
            )
            .optional()?;
        Ok(rec)
    }

    pub fn list(&self, filter: DomainFilter) -> Result<Vec<DomainRecord>> {
        let sql = format!(
            "SELECT domain, active, live, first_seen, last_seen FROM domains{} ORDER BY domain",
            filter.clause()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn list_all(&self) -> Result<Vec<DomainRecord>> {
        self.list(DomainFilter::All)
    }

    /// Most recent runs first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, started_at, finished_at, mode, seeds_json, candidate_count, new_active, new_live,
                    deprecated_active, deprecated_live, error_count
             FROM runs ORDER BY started_at DESC, run_id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map([limit as i64], |r| {
            let seeds_json: String = r.get(4)?;
            Ok(RunRecord {
                run_id: r.get(0)?,
                started_at: r.get(1)?,
                finished_at: r.get(2)?,
                mode: r.get(3)?,
                seeds: serde_json::from_str(&seeds_json).unwrap_or_default(),
                totals: RunTotals {
                    candidate_count: r.get(5)?,
                    new_active: r.get(6)?,
                    new_live: r.get(7)?,
                    deprecated_active: r.get(8)?,
                    deprecated_live: r.get(9)?,
                    error_count: r.get(10)?,
                },
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use easm_core::StateStore;

    fn tables(db: &Db) -> Vec<String> {
        let mut stmt = db.conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name").unwrap();
        let rows = stmt.query_map([], |r| r.get(0)).unwrap();
        rows.collect::<rusqlite::Result<Vec<String>>>().unwrap()
    }

    #[test]
    fn schema_is_created() {
        let db = Db::open_in_memory().unwrap();
        let t = tables(&db);
        for name in ["domains", "run_errors", "runs"] {
            assert!(t.iter().any(|n| n == name), "missing table {name}");
        }
    }

    #[test]
    fn filters_partition_the_inventory() {
        let db = Db::open_in_memory().unwrap();
        for d in ["a.example.com", "b.example.com", "c.example.com"] {
            db.insert(d).unwrap();
        }
        db.set_live("a.example.com", true).unwrap();
        db.set_active("c.example.com", false).unwrap();

        let names = |f| db.list(f).unwrap().into_iter().map(|r| r.domain).collect::<Vec<_>>();
        assert_eq!(names(DomainFilter::All), vec!["a.example.com", "b.example.com", "c.example.com"]);
        assert_eq!(names(DomainFilter::Active), vec!["a.example.com", "b.example.com"]);
        assert_eq!(names(DomainFilter::Live), vec!["a.example.com"]);
        assert_eq!(names(DomainFilter::Inactive), vec!["c.example.com"]);
    }

    #[test]
    fn get_missing_is_none() {
        let db = Db::open_in_memory().unwrap();
        assert!(db.get("a.example.com").unwrap().is_none());
    }
}
