use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Ingredient extraction heuristics, numbered in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    IngredientsHeading = 1,
    SpanFollowingParagraph = 2,
    SiblingParagraphSpan = 3,
    BoldLabelText = 4,
    StrongLabelParagraph = 5,
    LabelParagraph = 6,
    AquaParfum = 7,
    Aqua = 8,
}

impl Strategy {
    pub const ALL: [Strategy; 8] = [
        Strategy::IngredientsHeading,
        Strategy::SpanFollowingParagraph,
        Strategy::SiblingParagraphSpan,
        Strategy::BoldLabelText,
        Strategy::StrongLabelParagraph,
        Strategy::LabelParagraph,
        Strategy::AquaParfum,
        Strategy::Aqua,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Strategy::IngredientsHeading => "ingredients_heading",
            Strategy::SpanFollowingParagraph => "span_following_paragraph",
            Strategy::SiblingParagraphSpan => "sibling_paragraph_span",
            Strategy::BoldLabelText => "bold_label_text",
            Strategy::StrongLabelParagraph => "strong_label_paragraph",
            Strategy::LabelParagraph => "label_paragraph",
            Strategy::AquaParfum => "aqua_parfum",
            Strategy::Aqua => "aqua",
        }
    }
}

/// Key used for pages where no strategy produced anything.
pub const NONE_KEY: &str = "none";

/// Counts of which strategy produced the ingredient list, shared by every
/// product visit of a run.
#[derive(Debug, Default)]
pub struct ExtractionStats {
    hits: [AtomicU64; 8],
    misses: AtomicU64,
}

impl ExtractionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: Option<Strategy>) {
        match outcome {
            Some(s) => self.hits[usize::from(s.id() - 1)].fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn count(&self, outcome: Option<Strategy>) -> u64 {
        match outcome {
            Some(s) => self.hits[usize::from(s.id() - 1)].load(Ordering::Relaxed),
            None => self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut rows: Vec<StatsRow> = Strategy::ALL
            .iter()
            .map(|&s| StatsRow {
                key: s.id().to_string(),
                label: s.label(),
                count: self.count(Some(s)),
            })
            .collect();
        rows.push(StatsRow {
            key: NONE_KEY.to_string(),
            label: NONE_KEY,
            count: self.count(None),
        });
        StatsSnapshot { rows }
    }
}

#[derive(Debug, Clone)]
pub struct StatsRow {
    pub key: String,
    pub label: &'static str,
    pub count: u64,
}

/// Point-in-time copy of the counters, in strategy order with the miss row last.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub rows: Vec<StatsRow>,
}

impl StatsSnapshot {
    pub fn total(&self) -> u64 {
        self.rows.iter().map(|r| r.count).sum()
    }

    pub fn render_markdown(&self) -> String {
        let total = self.total();
        let mut out = String::new();
        out.push_str("## Ingredient extraction\n");
        out.push_str(&format!("- Product pages: {}\n\n", total));
        out.push_str("| # | strategy | pages | share |\n");
        out.push_str("|---|---|---|---|\n");
        for row in &self.rows {
            out.push_str(&format!(
                "| {} | {} | {} | {:.1}% |\n",
                row.key,
                row.label,
                row.count,
                percent(row.count, total)
            ));
        }
        out
    }
}

pub fn new_run_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%dT%H%M%SZ"))
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}
