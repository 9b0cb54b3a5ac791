use regex::bytes::{Regex, RegexBuilder};

/// How the pattern string is interpreted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterOptions {
    /// Match the pattern as a plain substring instead of a regex
    pub literal: bool,

    /// Case sensitivity
    pub case_insensitive: bool,
}

/// Compiled line filter
#[derive(Clone)]
pub struct CompiledFilter {
    /// Regex pattern (if any)
    regex: Option<Regex>,

    /// Original pattern string
    pattern: String,

    options: FilterOptions,
}

impl CompiledFilter {
    /// Create a new regex filter from a pattern string
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Self::with_options(pattern, FilterOptions::default())
    }

    /// Create a filter that matches `pattern` as a plain substring
    pub fn literal(pattern: &str) -> Result<Self, regex::Error> {
        Self::with_options(
            pattern,
            FilterOptions {
                literal: true,
                ..Default::default()
            },
        )
    }

    pub fn with_options(pattern: &str, options: FilterOptions) -> Result<Self, regex::Error> {
        let regex = if pattern.is_empty() {
            None
        } else {
            let source = if options.literal {
                regex::escape(pattern)
            } else {
                pattern.to_string()
            };
            Some(
                RegexBuilder::new(&source)
                    .case_insensitive(options.case_insensitive)
                    .build()?,
            )
        };

        Ok(Self {
            regex,
            pattern: pattern.to_string(),
            options,
        })
    }

    /// Check if a raw line contains a match
    pub fn matches(&self, line: &[u8]) -> bool {
        match &self.regex {
            Some(re) => re.is_match(line),
            None => true,
        }
    }

    /// Get the original pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Check if filter is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.regex.is_none()
    }

    pub fn options(&self) -> FilterOptions {
        self.options
    }
}

impl std::fmt::Debug for CompiledFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFilter")
            .field("pattern", &self.pattern)
            .field("literal", &self.options.literal)
            .field("case_insensitive", &self.options.case_insensitive)
            .finish()
    }
}
