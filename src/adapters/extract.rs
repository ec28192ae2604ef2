//! Ordered selector strategies for scraping result pages. Markup drifts, so
//! every field is described by a list of strategies and the first one that
//! yields a non-empty value wins.

use scraper::{ElementRef, Html, Selector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Text content of the first descendant matching the selector.
    Text(&'static str),
    /// Attribute of the first descendant matching the selector.
    Attr(&'static str, &'static str),
    /// Attribute of the element itself.
    OwnAttr(&'static str),
}

impl Strategy {
    fn apply(&self, element: ElementRef<'_>) -> Option<String> {
        let value = match *self {
            Strategy::Text(css) => {
                let selector = Selector::parse(css).ok()?;
                let node = element.select(&selector).next()?;
                node.text().collect::<Vec<_>>().join(" ")
            }
            Strategy::Attr(css, attr) => {
                let selector = Selector::parse(css).ok()?;
                let node = element.select(&selector).next()?;
                node.value().attr(attr)?.to_string()
            }
            Strategy::OwnAttr(attr) => element.value().attr(attr)?.to_string(),
        };
        let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
        (!value.is_empty()).then_some(value)
    }
}

pub fn first_match(element: ElementRef<'_>, strategies: &[Strategy]) -> Option<String> {
    strategies.iter().find_map(|s| s.apply(element))
}

/// Every attribute value found by the strategies, in document order.
pub fn all_attrs(element: ElementRef<'_>, css: &str, attr: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(css) else {
        return Vec::new();
    };
    element
        .select(&selector)
        .filter_map(|n| n.value().attr(attr))
        .map(str::to_string)
        .collect()
}

/// Result rows under the first row selector that matches anything.
pub fn result_rows<'a>(document: &'a Html, row_selectors: &[&str]) -> Vec<ElementRef<'a>> {
    for css in row_selectors {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        let rows: Vec<_> = document.select(&selector).collect();
        if !rows.is_empty() {
            return rows;
        }
    }
    Vec::new()
}
