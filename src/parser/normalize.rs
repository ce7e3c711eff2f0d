use tracing::{error, warn};

use crate::db::ProductRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Field is empty after cleaning.
    Missing { field: &'static str },
    /// Field still carries a line break after cleaning.
    Uncleaned { field: &'static str },
}

/// Collapse whitespace runs (newlines included) to single spaces and trim.
pub fn clean(val: &str) -> String {
    val.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean every text field of `record` and report the ones that came out empty.
///
/// Diagnostics are logged and returned; they never stop a record from being
/// stored. The ingredient list is already item-trimmed and is only checked
/// for emptiness.
pub fn normalize(mut record: ProductRecord) -> (ProductRecord, Vec<Diagnostic>) {
    let url = clean(&record.page_url);
    let mut diagnostics = Vec::new();

    let fields: [(&'static str, &mut String); 6] = [
        ("product_name", &mut record.product_name),
        ("brand", &mut record.brand),
        ("product_category", &mut record.product_category),
        ("product_detail", &mut record.product_detail),
        ("page_url", &mut record.page_url),
        ("article_number", &mut record.article_number),
    ];
    for (field, value) in fields {
        *value = clean(value);
        if value.is_empty() {
            warn!("No value for {} on {}", field, url);
            diagnostics.push(Diagnostic::Missing { field });
        } else if value.contains('\n') {
            error!("Need to clear {} on {}", field, url);
            diagnostics.push(Diagnostic::Uncleaned { field });
        }
    }

    if record.ingredients.is_empty() {
        warn!("No value for ingredients on {}", url);
        diagnostics.push(Diagnostic::Missing { field: "ingredients" });
    }

    (record, diagnostics)
}
