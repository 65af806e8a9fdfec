use crate::error::ConfigError;
use std::collections::HashSet;

/// Content types compressed by default.
pub const DEFAULT_CONTENT_TYPES: &[&str] = &[
    "text/html",
    "text/css",
    "text/plain",
    "text/javascript",
    "application/javascript",
    "application/x-javascript",
    "application/json",
    "application/atom+xml",
    "application/rss+xml",
    "image/svg+xml",
];

/// Decides from a response's content type whether it may be compressed.
///
/// Entries are either exact `type/subtype` strings or `type/*` wildcards that
/// match every subtype of `type`. Matching ignores case and parameters such
/// as `; charset=utf-8`.
///
/// Responses that declare no content type are judged by the *assumed*
/// content type, if one is configured. Without one (the default) they are
/// never compressed.
#[derive(Debug, Clone)]
pub struct ContentTypeGate {
    exact: HashSet<String>,
    wildcards: HashSet<String>,
    assumed: Option<String>,
}

impl ContentTypeGate {
    /// Builds a gate from exact content types and `type/*` patterns.
    ///
    /// Any wildcard other than a trailing `/*` after a literal type, such as
    /// `audio/*wav` or `application*/*`, is rejected.
    pub fn new<I, T>(content_types: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut exact = HashSet::new();
        let mut wildcards = HashSet::new();

        for content_type in content_types {
            let raw = content_type.as_ref();
            let pattern = raw.trim().to_ascii_lowercase();

            if pattern.contains('*') {
                match pattern.strip_suffix("/*") {
                    Some(top) if is_segment(top) => {
                        wildcards.insert(top.to_owned());
                    }
                    _ => return Err(ConfigError::InvalidWildcard(raw.to_owned())),
                }
            } else {
                if !is_type_subtype(&pattern) {
                    return Err(ConfigError::InvalidContentType(raw.to_owned()));
                }
                exact.insert(pattern);
            }
        }

        Ok(Self {
            exact,
            wildcards,
            assumed: None,
        })
    }

    /// Sets the content type assumed for responses that declare none.
    ///
    /// Parameters are allowed, but the type itself must be a concrete
    /// `type/subtype`.
    pub fn assume_content_type(
        mut self,
        content_type: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let content_type = content_type.into();
        let essence = content_type.split(';').next().unwrap_or("").trim();
        if !is_type_subtype(essence) {
            return Err(ConfigError::InvalidContentType(content_type));
        }
        self.assumed = Some(content_type);
        Ok(self)
    }

    /// The content type assumed for responses that declare none.
    pub fn assumed_content_type(&self) -> Option<&str> {
        self.assumed.as_deref()
    }

    /// Returns whether a response with this content type may be compressed.
    pub fn allows(&self, content_type: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        if self.exact.contains(&essence) {
            return true;
        }

        essence
            .split_once('/')
            .is_some_and(|(top, _)| self.wildcards.contains(top))
    }

    /// Like [`allows`](Self::allows), falling back to the assumed content
    /// type when the response declares none.
    pub fn check(&self, content_type: Option<&str>) -> bool {
        match content_type.or(self.assumed.as_deref()) {
            Some(content_type) => self.allows(content_type),
            None => false,
        }
    }
}

impl Default for ContentTypeGate {
    fn default() -> Self {
        Self {
            exact: DEFAULT_CONTENT_TYPES
                .iter()
                .map(|content_type| (*content_type).to_owned())
                .collect(),
            wildcards: HashSet::new(),
            assumed: None,
        }
    }
}

fn is_type_subtype(s: &str) -> bool {
    s.split_once('/')
        .is_some_and(|(top, sub)| is_segment(top) && is_segment(sub))
}

fn is_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains(['/', '*', ' ', ';'])
}
