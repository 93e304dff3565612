use crate::application::engine::BalanceRow;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct ReportLine<'a> {
    user: &'a str,
    balance: i64,
    reserved: i64,
    available: i64,
}

/// Writes the balance report as CSV: `user,balance,reserved,available`, in
/// minor units.
pub struct BalanceWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BalanceWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_rows(&mut self, rows: &[BalanceRow]) -> Result<()> {
        if rows.is_empty() {
            self.writer
                .write_record(["user", "balance", "reserved", "available"])?;
        }
        for row in rows {
            self.writer.serialize(ReportLine {
                user: &row.user,
                balance: row.summary.balance.cents(),
                reserved: row.summary.reserved.cents(),
                available: row.summary.available.cents(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
