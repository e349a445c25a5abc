use harvest_core::error::HarvestError;
use scraper::{ElementRef, Selector};

pub(crate) fn selector(css: &str) -> Result<Selector, HarvestError> {
    Selector::parse(css).map_err(|e| HarvestError::Parse(format!("selector '{css}': {e}")))
}

/// Whitespace-normalized text of the first match, `None` if missing or blank.
pub(crate) fn text_of(root: ElementRef<'_>, selector: &Selector) -> Option<String> {
    root.select(selector).next().and_then(normalized_text)
}

pub(crate) fn normalized_text(element: ElementRef<'_>) -> Option<String> {
    let text = element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

pub(crate) fn attr_of(root: ElementRef<'_>, selector: &Selector, name: &str) -> Option<String> {
    root.select(selector)
        .next()
        .and_then(|el| el.value().attr(name))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
