//! Locale normalisation and fallback order.

/// Locale tag that selects the base text with no overlay.
pub const DEFAULT_LOCALE: &str = "default";

/// Normalise a client locale tag: lowercase, `-` becomes `_`.
///
/// `"pt-BR"` -> `"pt_br"`.
pub fn normalize_locale(locale: &str) -> String {
    locale.trim().to_lowercase().replace('-', "_")
}

/// The normalised locale to use for a request, `None` when no overlay
/// applies (missing, blank or `"default"`).
pub fn requested_locale(locale: Option<&str>) -> Option<String> {
    locale
        .map(normalize_locale)
        .filter(|l| !l.is_empty() && l != DEFAULT_LOCALE)
}

/// Overlay directories to try, most specific first.
///
/// `"pt_br"` -> `["pt_br", "pt"]`, `"pt"` -> `["pt"]`.
pub fn locale_candidates(locale: &str) -> Vec<String> {
    let mut candidates = vec![locale.to_string()];
    if let Some((primary, _)) = locale.split_once('_') {
        if !primary.is_empty() {
            candidates.push(primary.to_string());
        }
    }
    candidates
}
