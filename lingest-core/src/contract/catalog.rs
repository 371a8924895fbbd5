use std::collections::HashMap;

/// Closed catalog of video topics. Matching is case-insensitive; the
/// canonical casing is the one the catalog was built with.
#[derive(Debug, Clone, Default)]
pub struct TopicCatalog {
    canonical: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl TopicCatalog {
    pub fn new(topics: &[String]) -> Self {
        let mut canonical = Vec::with_capacity(topics.len());
        let mut lookup = HashMap::with_capacity(topics.len());
        for topic in topics {
            let trimmed = topic.trim();
            if trimmed.is_empty() {
                continue;
            }
            let key = trimmed.to_lowercase();
            if lookup.contains_key(&key) {
                continue;
            }
            lookup.insert(key, canonical.len());
            canonical.push(trimmed.to_string());
        }
        Self { canonical, lookup }
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn entries(&self) -> &[String] {
        &self.canonical
    }

    /// Maps an arbitrary-cased topic onto its catalog entry.
    pub fn canonicalize(&self, raw: &str) -> Option<&str> {
        self.lookup
            .get(&raw.trim().to_lowercase())
            .map(|&index| self.canonical[index].as_str())
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.canonicalize(topic)
            .map(|canonical| canonical == topic.trim())
            .unwrap_or(false)
    }

    /// First three entries, used when no reported topic survives matching.
    pub fn fallback(&self) -> Vec<String> {
        self.canonical.iter().take(3).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_restores_catalog_casing() {
        let catalog = TopicCatalog::new(&["Daily Life".to_string(), "Technology".to_string()]);
        assert_eq!(catalog.canonicalize("daily life"), Some("Daily Life"));
        assert_eq!(catalog.canonicalize(" TECHNOLOGY "), Some("Technology"));
        assert_eq!(catalog.canonicalize("cooking"), None);
    }

    #[test]
    fn contains_is_case_sensitive_on_canonical_form() {
        let catalog = TopicCatalog::new(&["Technology".to_string()]);
        assert!(catalog.contains("Technology"));
        assert!(!catalog.contains("technology"));
    }

    #[test]
    fn fallback_takes_first_three() {
        let catalog = TopicCatalog::new(&[
            "A".to_string(),
            "B".to_string(),
            "C".to_string(),
            "D".to_string(),
        ]);
        assert_eq!(catalog.fallback(), vec!["A", "B", "C"]);
    }
}
