// Fee attribution: per-event fee extraction and the per-entity pending ledger
pub mod extractor;
pub mod ledger;

pub use extractor::{ExtractorConfig, FeeExtractor};
pub use ledger::{LedgerSnapshot, PendingLedger};
