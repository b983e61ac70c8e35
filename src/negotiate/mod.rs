//! Content-type and language negotiation
//!
//! Both negotiators pick from a fixed list of offers using the request's
//! `Accept` / `Accept-Language` header and fall back to the first offer, so a
//! configured negotiator always yields a value.

pub const JSON: &str = "application/json";
pub const XML: &str = "application/xml";
pub const XML2: &str = "text/xml";
pub const HTML: &str = "text/html";
pub const TEXT: &str = "text/plain";

/// One `Accept`-style entry with its quality
#[derive(Debug, Clone, PartialEq)]
struct Preference<'a> {
    value: &'a str,
    quality: f32,
}

/// Parse a comma-separated header into entries sorted by descending quality.
/// Entries with equal quality keep their header order; `q=0` entries are dropped.
fn preferences(header: &str) -> Vec<Preference<'_>> {
    let mut entries: Vec<Preference<'_>> = header
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let value = parts.next()?.trim();
            if value.is_empty() {
                return None;
            }
            let quality = parts
                .filter_map(|param| param.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            Some(Preference { value, quality })
        })
        .filter(|pref| pref.quality > 0.0)
        .collect();

    entries.sort_by(|a, b| b.quality.total_cmp(&a.quality));
    entries
}

/// Picks the response media type from a list of offers
#[derive(Debug, Clone)]
pub struct TypeNegotiator {
    offers: Vec<&'static str>,
}

impl TypeNegotiator {
    /// An empty offer list falls back to [`JSON`].
    pub fn new(offers: impl IntoIterator<Item = &'static str>) -> Self {
        let mut offers: Vec<&'static str> = offers.into_iter().collect();
        if offers.is_empty() {
            offers.push(JSON);
        }
        Self { offers }
    }

    pub fn offers(&self) -> &[&'static str] {
        &self.offers
    }

    pub fn negotiate(&self, accept: Option<&str>) -> &'static str {
        let default = self.offers[0];
        let Some(accept) = accept else {
            return default;
        };

        preferences(accept)
            .iter()
            .find_map(|pref| {
                self.offers
                    .iter()
                    .copied()
                    .find(|offer| media_matches(pref.value, offer))
            })
            .unwrap_or(default)
    }
}

fn media_matches(range: &str, offer: &str) -> bool {
    let range = range.trim();
    if range == "*/*" || range.eq_ignore_ascii_case(offer) {
        return true;
    }
    match (range.split_once('/'), offer.split_once('/')) {
        (Some((range_type, "*")), Some((offer_type, _))) => range_type.eq_ignore_ascii_case(offer_type),
        _ => false,
    }
}

/// Picks the response language from a list of offers
#[derive(Debug, Clone)]
pub struct LanguageNegotiator {
    offers: Vec<String>,
}

impl LanguageNegotiator {
    /// An empty offer list falls back to `en-US`.
    pub fn new<I, S>(offers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut offers: Vec<String> = offers.into_iter().map(Into::into).collect();
        if offers.is_empty() {
            offers.push("en-US".to_string());
        }
        Self { offers }
    }

    pub fn offers(&self) -> &[String] {
        &self.offers
    }

    /// An exact tag match wins over a primary-subtag match (`zh` for `zh-CN`).
    pub fn negotiate(&self, accept_language: Option<&str>) -> &str {
        let default = self.offers[0].as_str();
        let Some(header) = accept_language else {
            return default;
        };

        for pref in preferences(header) {
            if pref.value == "*" {
                return default;
            }
            if let Some(offer) = self.offers.iter().find(|offer| offer.eq_ignore_ascii_case(pref.value)) {
                return offer;
            }
            let primary = primary_tag(pref.value);
            if let Some(offer) = self
                .offers
                .iter()
                .find(|offer| primary_tag(offer).eq_ignore_ascii_case(primary))
            {
                return offer;
            }
        }
        default
    }
}

fn primary_tag(tag: &str) -> &str {
    tag.split(['-', '_']).next().unwrap_or(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_quality_order() {
        let negotiator = TypeNegotiator::new([JSON, XML, XML2, HTML]);
        assert_eq!(negotiator.negotiate(None), JSON);
        assert_eq!(negotiator.negotiate(Some("text/html;q=0.9, application/xml")), XML);
        assert_eq!(negotiator.negotiate(Some("text/*")), XML2);
        assert_eq!(negotiator.negotiate(Some("image/png")), JSON);
        assert_eq!(negotiator.negotiate(Some("application/xml;q=0, */*;q=0.1")), JSON);
    }

    #[test]
    fn test_language() {
        let negotiator = LanguageNegotiator::new(["zh-CN", "en-US"]);
        assert_eq!(negotiator.negotiate(None), "zh-CN");
        assert_eq!(negotiator.negotiate(Some("en-US,en;q=0.8")), "en-US");
        assert_eq!(negotiator.negotiate(Some("en-GB")), "en-US");
        assert_eq!(negotiator.negotiate(Some("fr;q=0.9, zh;q=0.5")), "zh-CN");
        assert_eq!(negotiator.negotiate(Some("de")), "zh-CN");
    }
}
