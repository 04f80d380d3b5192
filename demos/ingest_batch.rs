//! Batch ingestion example
//!
//! Ingests a JSON array of raw upstream rows (`[{"table": ..., "fields": {...}}]`)
//! given as the first argument, or a small built-in batch when none is given.
//! Set `RUST_LOG=books_ingest=debug` to see per-row logging.

use books_ingest::utils::MemoryStorage;
use books_ingest::{BatchId, IngestConfig, IngestContext, Ingestor, RawRecord, RecordKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn sample_batch() -> Vec<RawRecord> {
    vec![
        RawRecord::new(RecordKind::LedgerGroup)
            .field("group_id", "Accounts Receivable")
            .field("opening_debit", "1,000.00")
            .field("opening_credit", "")
            .field("opening_date", "As On 01-04-24")
            .field("closing_debit", "1,250.00")
            .field("closing_credit", "")
            .field("closing_date", "As On 30-04-24"),
        RawRecord::new(RecordKind::LedgerDetail)
            .field("group_id", "Accounts Receivable")
            .field("transaction_number", "INV-0042")
            .field("account_id", "460000000038029")
            .field("account", "Accounts Receivable")
            .field("date", "2024-04-12")
            .field("debit", "400.00")
            .field("credit", ""),
        RawRecord::new(RecordKind::LedgerDetail)
            .field("group_id", "Accounts Receivable")
            .field("transaction_number", "PMT-0007")
            .field("account_id", "460000000038029")
            .field("account", "Accounts Receivable")
            .field("date", "2024-04-20")
            .field("debit", "")
            .field("credit", "150.00"),
        RawRecord::new(RecordKind::ArAging)
            .field("entity_id", "460000000051001")
            .field("transaction_number", "INV-0042")
            .field("customer_id", "cust-9")
            .field("customer_name", "Northwind Traders")
            .field("date", "2024-04-12")
            .field("amount", "400.00")
            .field("balance_due", "250.00"),
        RawRecord::new(RecordKind::VendorCredit)
            .field("vendor_credit_id", "460000000060011")
            .field("vendor_credit_number", "DN-00003")
            .field("vendor_id", "vend-2")
            .field("vendor_name", "Contoso Supplies")
            .field("vendor_credit_date", "2024-04-03")
            .field("amount", "200.00")
            .field("balance_amount", "50.00")
            .field("status", "open"),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = IngestConfig::load()?;
    let ingestor = Ingestor::with_config(MemoryStorage::new(), config);

    let rows = match std::env::args().nth(1) {
        Some(path) => serde_json::from_str::<Vec<RawRecord>>(&std::fs::read_to_string(path)?)?,
        None => sample_batch(),
    };

    let ctx = IngestContext::new(BatchId::from_timestamp(chrono::Utc::now().naive_utc()));
    let report = ingestor.ingest_raw(&ctx, &rows).await?;

    println!("Batch {} committed", report.batch_id);
    println!(
        "  inserted: {}, updated: {}, unchanged: {}",
        report.writes.inserted, report.writes.updated, report.writes.unchanged
    );
    for reconciliation in &report.reconciliations {
        println!(
            "  group '{}': {:?}",
            reconciliation.group_id(),
            reconciliation.group_status()
        );
    }
    for discrepancy in report.discrepancies() {
        println!(
            "  ! '{}' is off by {}",
            discrepancy.group_id, discrepancy.delta
        );
    }

    // Replaying the same batch is a no-op apart from timestamps
    let replay = ingestor.ingest_raw(&ctx, &rows).await?;
    println!(
        "Replay: inserted {}, unchanged {}",
        replay.writes.inserted, replay.writes.unchanged
    );

    Ok(())
}
