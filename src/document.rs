use scraper::html::Select;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};

/// Tags whose text content never counts as page text.
const SKIPPED_TEXT_PARENTS: &[&str] = &["script", "style", "noscript"];

/// Read-only view over one fetched page.
///
/// Wraps a parsed `scraper::Html` together with the URL it was served from.
/// `Html` is not `Send`, so a `Document` is built, queried and dropped inside
/// one synchronous call and never held across an `.await`.
pub struct Document {
    url: String,
    html: Html,
}

impl Document {
    pub fn parse(url: &str, body: &str) -> Self {
        Document {
            url: url.to_string(),
            html: Html::parse_document(body),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// All elements matching `sel`, in document order.
    pub fn select<'a, 'b>(&'a self, sel: &'b Selector) -> Select<'a, 'b> {
        self.html.select(sel)
    }

    /// Every value of `attr` on elements matching `sel`.
    pub fn select_attrs(&self, sel: &Selector, attr: &str) -> Vec<String> {
        self.html
            .select(sel)
            .filter_map(|el| el.value().attr(attr))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    }

    /// First non-empty value of `attr` on elements matching `sel`.
    pub fn select_attr(&self, sel: &Selector, attr: &str) -> Option<String> {
        self.select_attrs(sel, attr).into_iter().next()
    }

    /// Text of the first element matching `sel`.
    pub fn select_text(&self, sel: &Selector) -> Option<String> {
        self.html.select(sel).next().map(text_of)
    }

    /// Visible text nodes in document order, paired with their parent element.
    pub fn text_nodes(&self) -> impl Iterator<Item = (ElementRef<'_>, &str)> {
        self.html.tree.root().descendants().filter_map(|node| {
            let Node::Text(text) = node.value() else {
                return None;
            };
            let parent = node.parent().and_then(ElementRef::wrap)?;
            if SKIPPED_TEXT_PARENTS.contains(&parent.value().name()) {
                return None;
            }
            Some((parent, &**text))
        })
    }

    /// First visible text node satisfying `pred`.
    pub fn find_text<F>(&self, pred: F) -> Option<&str>
    where
        F: Fn(&str) -> bool,
    {
        self.text_nodes().map(|(_, t)| t).find(|t| pred(t))
    }

    /// Elements after `anchor` in document order, excluding its descendants
    /// (the XPath `following::` axis).
    pub fn following<'a>(&'a self, anchor: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        let anchor_id = anchor.id();
        self.html
            .tree
            .root()
            .descendants()
            .skip_while(move |n| n.id() != anchor_id)
            .skip(1)
            .filter(move |n| !n.ancestors().any(|a| a.id() == anchor_id))
            .filter_map(ElementRef::wrap)
    }
}

/// All descendant text, trimmed pieces joined by single spaces.
pub fn text_of(el: ElementRef<'_>) -> String {
    join_text(el.text())
}

/// Descendant text of `el`, leaving out anything inside elements for which
/// `skip` returns true.
pub fn text_of_except<F>(el: ElementRef<'_>, skip: F) -> String
where
    F: Fn(ElementRef<'_>) -> bool,
{
    let pieces = el.descendants().filter_map(|node| {
        let Node::Text(text) = node.value() else {
            return None;
        };
        let excluded = node
            .ancestors()
            .take_while(|a| a.id() != el.id())
            .filter_map(ElementRef::wrap)
            .any(&skip);
        if excluded {
            None
        } else {
            Some(&**text)
        }
    });
    join_text(pieces)
}

fn join_text<'a, I>(pieces: I) -> String
where
    I: Iterator<Item = &'a str>,
{
    pieces
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Nearest ancestor whose tag name is one of `names` (XPath `ancestor::x[1]`).
pub fn nearest_ancestor<'a>(el: ElementRef<'a>, names: &[&str]) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| names.contains(&a.value().name()))
}

/// Next element sibling, optionally restricted to one tag name
/// (XPath `following-sibling::x[1]`).
pub fn next_sibling_element<'a>(el: ElementRef<'a>, name: Option<&str>) -> Option<ElementRef<'a>> {
    el.next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|s| name.map_or(true, |n| s.value().name() == n))
}

/// First text node among the following siblings (XPath `following-sibling::text()[1]`).
pub fn next_sibling_text<'a>(el: ElementRef<'a>) -> Option<&'a str> {
    el.next_siblings().find_map(|node| match node.value() {
        Node::Text(text) => Some(&**text),
        _ => None,
    })
}

/// First child element with the given tag name.
pub fn child_element<'a>(el: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    el.children()
        .filter_map(ElementRef::wrap)
        .find(|c| c.value().name() == name)
}
