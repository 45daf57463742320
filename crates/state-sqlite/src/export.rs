use crate::{Db, DomainFilter};
use anyhow::Result;
use std::io::Write;

/// Write the inventory as CSV (header row included). Returns the row count.
pub fn export_domains_csv<W: Write>(db: &Db, filter: DomainFilter, out: W) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(["domain", "active", "live", "first_seen", "last_seen"])?;
    let records = db.list(filter)?;
    for r in &records {
        wtr.write_record([
            r.domain.as_str(),
            if r.active { "true" } else { "false" },
            if r.live { "true" } else { "false" },
            r.first_seen.as_str(),
            r.last_seen.as_str(),
        ])?;
    }
    wtr.flush()?;
    Ok(records.len())
}
