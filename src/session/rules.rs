use url::Url;

use crate::session::RobotsRules;

/// Allowance rules built from allow/disallow path prefixes, the shape a
/// robots.txt parser hands over after filtering for one user agent.
///
/// The longest matching prefix decides; ties favor allow. No matching
/// disallow prefix means the path is allowed.
#[derive(Debug, Clone, Default)]
pub struct PathRules {
    allow: Vec<String>,
    disallow: Vec<String>,
}

impl PathRules {
    pub fn new(allow: Vec<String>, disallow: Vec<String>) -> Self {
        Self { allow, disallow }
    }

    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn deny_all() -> Self {
        Self::new(Vec::new(), vec!["/".to_string()])
    }

    fn longest_match(rules: &[String], path: &str) -> Option<usize> {
        rules
            .iter()
            .filter(|prefix| path.starts_with(prefix.as_str()))
            .map(String::len)
            .max()
    }
}

impl RobotsRules for PathRules {
    fn is_allowed(&self, _agent: &str, url: &Url) -> bool {
        let path = url.path();
        match (
            Self::longest_match(&self.allow, path),
            Self::longest_match(&self.disallow, path),
        ) {
            (_, None) => true,
            (Some(allowed), Some(disallowed)) => allowed >= disallowed,
            (None, Some(_)) => false,
        }
    }
}
