use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Selector};
use tracing::{debug, error};

use crate::document::{
    child_element, nearest_ancestor, next_sibling_element, next_sibling_text, text_of,
    text_of_except, Document,
};
use crate::stats::{ExtractionStats, Strategy};

static KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Zutaten|Inhaltsstoffe|Inhaltstoffe|INGREDIENTS").unwrap());
static LABEL_KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Zutaten|Inhaltsstoffe|Inhaltstoffe").unwrap());
static EXACT_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:Zutaten|Inhaltsstoffe|Inhaltstoffe)$").unwrap());
static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Inhaltsstoffe\s*:?").unwrap());

static SPAN: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span").unwrap());
static PARAGRAPH: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());
static STRONG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("strong").unwrap());
static BOLD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("b, strong").unwrap());
static EMPHASIS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("b, strong, u").unwrap());

const HEADINGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

type Probe = fn(&Document) -> Option<String>;

/// Tried when the page labels its list in English.
const HEADING_PROBES: &[(Strategy, Probe)] = &[(Strategy::IngredientsHeading, ingredients_heading)];

/// Tried when the page labels its list with one of the German keywords.
const LABEL_PROBES: &[(Strategy, Probe)] = &[
    (Strategy::SpanFollowingParagraph, span_following_paragraph),
    (Strategy::SiblingParagraphSpan, sibling_paragraph_span),
    (Strategy::BoldLabelText, bold_label_text),
    (Strategy::StrongLabelParagraph, strong_label_paragraph),
    (Strategy::LabelParagraph, label_paragraph),
];

/// INCI fingerprints, tried on every page that is still empty.
const FINGERPRINT_PROBES: &[(Strategy, Probe)] = &[
    (Strategy::AquaParfum, aqua_parfum),
    (Strategy::Aqua, aqua),
];

#[derive(Debug, Clone)]
pub struct IngredientMatch {
    pub strategy: Option<Strategy>,
    pub ingredients: Vec<String>,
}

/// Run the cascade, record which strategy fired and shape the result.
pub fn extract(doc: &Document, stats: &ExtractionStats) -> IngredientMatch {
    let found = run_cascade(doc);
    stats.record(found.as_ref().map(|(s, _)| *s));

    match found {
        Some((strategy, raw)) => {
            debug!(url = doc.url(), strategy = strategy.id(), "Ingredients via {}", strategy.label());
            IngredientMatch {
                strategy: Some(strategy),
                ingredients: shape(&raw),
            }
        }
        None => {
            error!("No ingredients found for {}", doc.url());
            IngredientMatch {
                strategy: None,
                ingredients: Vec::new(),
            }
        }
    }
}

/// First probe, in cascade order, whose text shapes into at least one item.
pub fn run_cascade(doc: &Document) -> Option<(Strategy, String)> {
    let keyword = doc.find_text(|t| KEYWORD_RE.is_match(t)).map(str::trim);
    let keyword_probes: &[(Strategy, Probe)] = match keyword {
        Some(k) if k.to_uppercase().contains("INGREDIENTS") => HEADING_PROBES,
        Some(k) if LABEL_KEYWORD_RE.is_match(k) => LABEL_PROBES,
        _ => &[],
    };

    keyword_probes
        .iter()
        .chain(FINGERPRINT_PROBES)
        .find_map(|&(strategy, probe)| {
            probe(doc)
                .filter(|raw| !shape(raw).is_empty())
                .map(|raw| (strategy, raw))
        })
}

/// Split on commas, trim, drop empty pieces.
pub fn shape(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// ── Probes ──

/// #1: bold/underlined "INGREDIENTS" heading; the list is the next block.
fn ingredients_heading(doc: &Document) -> Option<String> {
    doc.select(&EMPHASIS)
        .filter(|el| is_ingredients_label(&text_of(*el)))
        .find_map(|label| {
            let heading = nearest_ancestor(label, HEADINGS)
                .or_else(|| label.parent().and_then(ElementRef::wrap))?;
            let block = heading.parent().and_then(ElementRef::wrap)?;
            let next = next_sibling_element(block, None)?;
            non_empty(text_of(next))
        })
}

/// #2: the first paragraph after a span mentioning "Inhaltsstoffe".
fn span_following_paragraph(doc: &Document) -> Option<String> {
    doc.select(&SPAN)
        .filter(|s| text_of(*s).contains("Inhaltsstoffe"))
        .find_map(|span| {
            let paragraph = doc.following(span).find(|e| e.value().name() == "p")?;
            non_empty(text_of(paragraph))
        })
}

/// #3: a span that is exactly the label; the list sits in the span of the
/// next sibling paragraph.
fn sibling_paragraph_span(doc: &Document) -> Option<String> {
    doc.select(&SPAN)
        .filter(|s| EXACT_LABEL_RE.is_match(text_of(*s).trim()))
        .find_map(|span| {
            let paragraph = nearest_ancestor(span, &["p"])?;
            let next = next_sibling_element(paragraph, Some("p"))?;
            non_empty(text_of(child_element(next, "span")?))
        })
}

/// #4: the text right after a bold "Inhaltstoffe:" label.
fn bold_label_text(doc: &Document) -> Option<String> {
    doc.select(&BOLD)
        .filter(|b| text_of(*b).contains("Inhaltstoffe:"))
        .find_map(|b| non_empty(next_sibling_text(b)?.trim().to_string()))
}

/// #5: the paragraph around a strong "Inhaltsstoffe" label, label removed.
fn strong_label_paragraph(doc: &Document) -> Option<String> {
    doc.select(&STRONG)
        .filter(|s| text_of(*s).contains("Inhaltsstoffe"))
        .find_map(|strong| {
            let paragraph = nearest_ancestor(strong, &["p"])?;
            let text = text_of_except(paragraph, |e| e.id() == strong.id());
            non_empty(strip_label(&text))
        })
}

/// #6: any paragraph mentioning "Inhaltsstoffe", label removed.
fn label_paragraph(doc: &Document) -> Option<String> {
    doc.select(&PARAGRAPH)
        .map(text_of)
        .filter(|t| t.contains("Inhaltsstoffe"))
        .find_map(|t| non_empty(strip_label(&t)))
}

/// #7: a text node carrying both "Aqua" and "Parfum".
fn aqua_parfum(doc: &Document) -> Option<String> {
    doc.find_text(|t| t.contains("Aqua") && t.contains("Parfum"))
        .and_then(|t| non_empty(t.trim().to_string()))
}

/// #8: a text node carrying "Aqua".
fn aqua(doc: &Document) -> Option<String> {
    doc.find_text(|t| t.contains("Aqua"))
        .and_then(|t| non_empty(t.trim().to_string()))
}

fn is_ingredients_label(text: &str) -> bool {
    text.trim().trim_end_matches(':').trim().to_uppercase() == "INGREDIENTS"
}

fn strip_label(text: &str) -> String {
    LABEL_RE
        .replace_all(text, "")
        .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
        .trim_end()
        .to_string()
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> Document {
        Document::parse(
            "https://cosmetic.de/test-produkt",
            &format!("<html><body>{}</body></html>", body),
        )
    }

    fn strategy_of(body: &str) -> Option<Strategy> {
        run_cascade(&page(body)).map(|(s, _)| s)
    }

    #[test]
    fn shape_drops_empty_pieces() {
        assert_eq!(shape("A, , B,,C"), vec!["A", "B", "C"]);
        assert_eq!(shape("  Aqua ,Glycerin  "), vec!["Aqua", "Glycerin"]);
        assert!(shape(" , ,").is_empty());
        assert!(shape("").is_empty());
    }

    #[test]
    fn ingredients_heading_block() {
        let doc = page(
            r#"<div class="head"><h3><strong><u>Ingredients</u></strong></h3></div>
               <div class="body"><p>Aqua, Cetearyl Alcohol, Parfum</p></div>"#,
        );
        let (strategy, raw) = run_cascade(&doc).unwrap();
        assert_eq!(strategy, Strategy::IngredientsHeading);
        assert_eq!(shape(&raw), vec!["Aqua", "Cetearyl Alcohol", "Parfum"]);
    }

    #[test]
    fn heading_beats_fingerprint() {
        let body = std::fs::read_to_string("tests/fixtures/product_ingredients_heading.html").unwrap();
        let doc = Document::parse("https://cosmetic.de/night-cream", &body);
        let stats = ExtractionStats::new();
        let found = extract(&doc, &stats);
        assert_eq!(found.strategy, Some(Strategy::IngredientsHeading));
        assert_eq!(stats.count(Some(Strategy::IngredientsHeading)), 1);
        assert_eq!(stats.count(Some(Strategy::AquaParfum)), 0);
        assert_eq!(found.ingredients[0], "Aqua");
    }

    #[test]
    fn span_then_paragraph() {
        let s = strategy_of(
            r#"<div><span>Inhaltsstoffe</span></div><p>Aqua, Glycerin</p>"#,
        );
        assert_eq!(s, Some(Strategy::SpanFollowingParagraph));
    }

    #[test]
    fn span_with_empty_paragraph_tries_next_span() {
        let doc = page(
            r#"<div><span>Inhaltsstoffe</span></div><p> </p>
               <div><span>Inhaltsstoffe:</span></div><p>Aqua, Glycerin</p>"#,
        );
        let (strategy, raw) = run_cascade(&doc).unwrap();
        assert_eq!(strategy, Strategy::SpanFollowingParagraph);
        assert_eq!(raw, "Aqua, Glycerin");
    }

    #[test]
    fn sibling_paragraph_span() {
        let doc = page(r#"<p><span>Zutaten</span></p><p><span>Aqua, Glycerin</span></p>"#);
        let (strategy, raw) = run_cascade(&doc).unwrap();
        assert_eq!(strategy, Strategy::SiblingParagraphSpan);
        assert_eq!(raw, "Aqua, Glycerin");
    }

    #[test]
    fn bold_label_followed_by_text() {
        let doc = page(r#"<p><b>Inhaltstoffe:</b> Aqua, Glycerin<br>Made in Germany</p>"#);
        let (strategy, raw) = run_cascade(&doc).unwrap();
        assert_eq!(strategy, Strategy::BoldLabelText);
        assert_eq!(raw, "Aqua, Glycerin");
    }

    #[test]
    fn strong_label_excluded() {
        let doc = page(r#"<p><strong>Inhaltsstoffe</strong><br>Aqua, Glycerin, Urea</p>"#);
        let (strategy, raw) = run_cascade(&doc).unwrap();
        assert_eq!(strategy, Strategy::StrongLabelParagraph);
        assert_eq!(shape(&raw), vec!["Aqua", "Glycerin", "Urea"]);
    }

    #[test]
    fn label_paragraph_strips_label() {
        let doc = page(r#"<div><p>Inhaltsstoffe: Aqua, Glycerin, Parfum</p></div>"#);
        let (strategy, raw) = run_cascade(&doc).unwrap();
        assert_eq!(strategy, Strategy::LabelParagraph);
        assert_eq!(shape(&raw), vec!["Aqua", "Glycerin", "Parfum"]);
    }

    #[test]
    fn fingerprints_without_keyword() {
        assert_eq!(
            strategy_of("<div>Pflegt die Haut.</div><div>Aqua, Parfum, Glycerin</div>"),
            Some(Strategy::AquaParfum)
        );
        assert_eq!(
            strategy_of("<div>Aqua, Glycerin, Urea</div>"),
            Some(Strategy::Aqua)
        );
    }

    #[test]
    fn keyword_without_list_falls_through() {
        // label present but every label probe comes back empty
        let s = strategy_of(r##"<a href="#tab">Inhaltsstoffe</a><div>Aqua, Glycerin</div>"##);
        assert_eq!(s, Some(Strategy::Aqua));
    }

    #[test]
    fn scripts_are_ignored() {
        let stats = ExtractionStats::new();
        let doc = page(r#"<script>var inci = "Aqua, Parfum";</script><p>Pflegt die Haut.</p>"#);
        let found = extract(&doc, &stats);
        assert_eq!(found.strategy, None);
        assert!(found.ingredients.is_empty());
        assert_eq!(stats.count(None), 1);
    }
}
