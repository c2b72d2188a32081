pub(crate) fn tag_name(tag: &[String]) -> Option<&str> {
    tag.first().map(String::as_str)
}

pub(crate) fn tag_field(tag: &[String], index: usize) -> Option<&str> {
    tag.get(index).map(String::as_str)
}

pub(crate) fn is_tag(tag: &[String], name: &str) -> bool {
    matches!(tag_name(tag), Some(tag_name) if tag_name == name)
}

pub(crate) fn has_tag_value(tags: &[Vec<String>], name: &str, value: &str) -> bool {
    tags.iter()
        .any(|tag| is_tag(tag, name) && tag_field(tag, 1) == Some(value))
}

pub(crate) fn collect_tag_values(tags: &[Vec<String>], name: &str) -> Vec<String> {
    tags.iter()
        .filter(|tag| is_tag(tag, name))
        .filter_map(|tag| tag_field(tag, 1).map(str::to_owned))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> Vec<Vec<String>> {
        vec![
            vec!["t".to_string(), "emf-health".to_string()],
            vec!["t".to_string(), "sleep-optimization".to_string()],
            vec!["e".to_string()],
            vec!["p".to_string(), "abcd".to_string(), "wss://relay".to_string()],
        ]
    }

    #[test]
    fn collects_values_by_name() {
        assert_eq!(
            collect_tag_values(&tags(), "t"),
            vec!["emf-health".to_string(), "sleep-optimization".to_string()]
        );
        assert!(collect_tag_values(&tags(), "e").is_empty());
    }

    #[test]
    fn value_lookup_ignores_short_tags() {
        assert!(has_tag_value(&tags(), "p", "abcd"));
        assert!(!has_tag_value(&tags(), "p", "wss://relay"));
        assert!(!has_tag_value(&tags(), "e", ""));
        assert_eq!(tag_field(&tags()[3], 2), Some("wss://relay"));
    }
}
