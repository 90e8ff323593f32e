//! Topic matching rules.

/// A subscription target: one exact topic or one wildcard prefix.
///
/// Wildcard topics end with `.*`. The wildcard `view.cmd.*` matches
/// `view.cmd` itself and any topic under it (`view.cmd.packaging`), but not
/// siblings like `view.command.x`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    Exact(String),
    Prefix(String),
}

impl TopicFilter {
    pub fn parse(topic: &str) -> Self {
        match topic.strip_suffix(".*") {
            Some(prefix) => TopicFilter::Prefix(prefix.to_string()),
            None => TopicFilter::Exact(topic.to_string()),
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicFilter::Exact(exact) => exact == topic,
            TopicFilter::Prefix(prefix) => match topic.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.is_empty() || rest.starts_with('.'),
                None => false,
            },
        }
    }

    /// The topic string this filter was parsed from.
    pub fn as_topic(&self) -> String {
        match self {
            TopicFilter::Exact(exact) => exact.clone(),
            TopicFilter::Prefix(prefix) => format!("{prefix}.*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_matches_only_itself() {
        let f = TopicFilter::parse("VALUE_CHANGED");
        assert!(f.matches("VALUE_CHANGED"));
        assert!(!f.matches("VALUE_CHANGED.x"));
        assert!(!f.matches("VALUE"));
    }

    #[test]
    fn wildcard_matches_prefix_and_bare_prefix() {
        let f = TopicFilter::parse("view.cmd.*");
        assert!(f.matches("view.cmd.container_management"));
        assert!(f.matches("view.cmd"));
        assert!(!f.matches("view.command.x"));
        assert!(!f.matches("view.cmdx"));
    }

    #[test]
    fn state_wildcard() {
        let f = TopicFilter::parse("state.*");
        assert!(f.matches("state.error_count"));
        assert!(f.matches("state"));
        assert!(!f.matches("states"));
    }

    #[test]
    fn roundtrips_topic_string() {
        assert_eq!(TopicFilter::parse("a.b.*").as_topic(), "a.b.*");
        assert_eq!(TopicFilter::parse("a.b").as_topic(), "a.b");
    }
}
