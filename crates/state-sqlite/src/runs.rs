use crate::models::now_timestamp;
use crate::{Db, RunMeta, RunTotals};
use anyhow::Result;
use easm_core::Failure;
use rusqlite::params;
use uuid::Uuid;

impl Db {
    pub fn begin_run(&self, meta: &RunMeta) -> Result<Uuid> {
        self.conn.execute(
            "INSERT INTO runs(run_id, started_at, mode, tool_version, seeds_json) VALUES (?,?,?,?,?)",
            params![meta.run_id.to_string(), meta.started_at, meta.mode, meta.tool_version, meta.seeds_json],
        )?;
        Ok(meta.run_id)
    }

    pub fn finish_run(&self, run_id: &Uuid, totals: &RunTotals) -> Result<()> {
        self.conn.execute(
            "UPDATE runs SET finished_at=?, candidate_count=?, new_active=?, new_live=?, deprecated_active=?,
                             deprecated_live=?, error_count=?
             WHERE run_id=?",
            params![
                now_timestamp(),
                totals.candidate_count,
                totals.new_active,
                totals.new_live,
                totals.deprecated_active,
                totals.deprecated_live,
                totals.error_count,
                run_id.to_string()
            ],
        )?;
        Ok(())
    }

    pub fn add_error(&self, run_id: &Uuid, failure: &Failure, at_ms: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO run_errors(run_id,scope,code,message,at_ms) VALUES (?,?,?,?,?)",
            params![run_id.to_string(), failure.scope, failure.code, failure.message, at_ms],
        )?;
        Ok(())
    }

    pub fn run_errors(&self, run_id: &Uuid) -> Result<Vec<Failure>> {
        let mut stmt = self
            .conn
            .prepare("SELECT scope, code, message FROM run_errors WHERE run_id=? ORDER BY error_id")?;
        let rows = stmt.query_map([run_id.to_string()], |r| {
            Ok(Failure { scope: r.get(0)?, code: r.get(1)?, message: r.get(2)? })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
