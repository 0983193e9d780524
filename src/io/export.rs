use anyhow::Result;
use std::io::Write;

use crate::domain::{HistoryPage, LedgerEntry, format_cents};

/// Write ledger entries as CSV, one row per entry. Returns the row count.
pub fn write_entries_csv<W: Write>(entries: &[LedgerEntry], writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record([
        "id",
        "transaction_time",
        "type",
        "wallet_id",
        "dest_wallet_id",
        "amount",
        "balance_before",
        "balance_after",
        "description",
    ])?;

    for entry in entries {
        csv_writer.write_record([
            entry.id.to_string(),
            entry.transaction_time.to_rfc3339(),
            entry.kind.to_string(),
            entry.wallet_id.to_string(),
            entry
                .dest_wallet_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            format_cents(entry.amount),
            format_cents(entry.balance_before),
            format_cents(entry.balance_after),
            entry.description.clone(),
        ])?;
    }

    csv_writer.flush()?;
    Ok(entries.len())
}

/// Write a history page as pretty-printed JSON.
pub fn write_history_json<W: Write>(page: &HistoryPage, mut writer: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, page)?;
    writeln!(writer)?;
    Ok(())
}
