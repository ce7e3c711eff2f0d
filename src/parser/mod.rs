pub mod extract;
pub mod normalize;

use crate::db::ProductRecord;
use crate::document::Document;
use crate::stats::{ExtractionStats, Strategy};
use normalize::Diagnostic;

#[derive(Debug, Clone)]
pub struct ParsedProduct {
    pub record: ProductRecord,
    pub strategy: Option<Strategy>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Two-step pipeline: extract fields → normalize the assembled record.
pub fn process_product(doc: &Document, category: &str, stats: &ExtractionStats) -> ParsedProduct {
    let extracted = extract::extract_all(doc, category, stats);
    let (record, diagnostics) = normalize::normalize(extracted.record);
    ParsedProduct {
        record,
        strategy: extracted.strategy,
        diagnostics,
    }
}
