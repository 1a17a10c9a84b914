//! Cache Key Builders
//!
//! One place that knows how each cached entity family is keyed, so readers
//! and the write-side invalidation agree. Pattern builders escape their
//! arguments; an identifier can never widen the family it names.

use std::fmt::Display;

use crate::pattern::escape;

/// Application details by code
#[must_use]
pub fn app(code: &str) -> String {
    format!("app:{code}")
}

/// The full application catalogue
#[must_use]
pub fn app_list() -> String {
    "apps:all".to_string()
}

/// One operator's authorization for one application
#[must_use]
pub fn authorization(operator_id: impl Display, app_code: &str) -> String {
    format!("auth:{operator_id}:{app_code}")
}

/// Every authorization entry of one operator
#[must_use]
pub fn operator_authorizations_pattern(operator_id: impl Display) -> String {
    format!("auth:{}:*", escape(&operator_id.to_string()))
}

/// Every authorization entry for one application, across operators
#[must_use]
pub fn app_authorizations_pattern(app_code: &str) -> String {
    format!("auth:*:{}", escape(app_code))
}

#[must_use]
pub fn operator(operator_id: impl Display) -> String {
    format!("operator:{operator_id}")
}

#[must_use]
pub fn site(site_id: impl Display) -> String {
    format!("site:{site_id}")
}

/// Site-scoped derived entries (`site:{id}:...`), not the site itself
#[must_use]
pub fn site_family_pattern(site_id: impl Display) -> String {
    format!("site:{}:*", escape(&site_id.to_string()))
}

/// Entries written by the cache warmer
#[must_use]
pub fn warm(name: &str) -> String {
    format!("warm:{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::KeyPattern;

    #[test]
    fn test_authorization_family() {
        let pattern = KeyPattern::parse(&operator_authorizations_pattern("op1"))
            .unwrap_or_else(|e| panic!("pattern should parse: {e}"));
        assert!(pattern.matches(&authorization("op1", "appA")));
        assert!(!pattern.matches(&authorization("op2", "appA")));
    }

    #[test]
    fn test_app_family_spans_operators() {
        let pattern = KeyPattern::parse(&app_authorizations_pattern("beat-saber"))
            .unwrap_or_else(|e| panic!("pattern should parse: {e}"));
        assert!(pattern.matches(&authorization(7, "beat-saber")));
        assert!(pattern.matches(&authorization(8, "beat-saber")));
        assert!(!pattern.matches(&app("beat-saber")));
    }

    #[test]
    fn test_site_family_excludes_site() {
        let pattern = KeyPattern::parse(&site_family_pattern(3))
            .unwrap_or_else(|e| panic!("pattern should parse: {e}"));
        assert!(pattern.matches("site:3:operators"));
        assert!(!pattern.matches(&site(3)));
    }
}
