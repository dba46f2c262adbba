//! This module provides [BannedFiles], a list of shell-like patterns naming files and directories which must never
//! be imported.

use {
    crate::ConfigError,
    regex::Regex,
    std::{
        fmt::{self, Display},
        str::FromStr,
    },
};

/// Patterns banned unless the user provides their own list
pub const DEFAULT_BANNED: &[&str] = &[
    "@eaDir/",
    "@__thumb/",
    "SYNOFILE_THUMB_*.*",
    "Lightroom Catalog/",
    "thumbnails/",
    ".DS_Store/",
    "/._*",
    ".photostructure/",
];

/// Convert a shell-like pattern to a case insensitive regex.
///
/// `*` matches any run of characters but `/`, `?` matches one character but `/`, `[...]` matches one of the
/// bracketed characters, and `\` escapes the next character.  A leading `/` anchors the pattern at the start of a
/// path component.  The regex is not anchored otherwise, so "@eaDir/" matches any path going through a directory
/// named "@eaDir".
pub fn glob_regex(pattern: &str) -> Result<Regex, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        flag: "banned file pattern",
        value: pattern.to_owned(),
    };

    let mut expression = String::from("(?i)");
    let mut chars = pattern.chars();
    let mut first = true;

    while let Some(c) = chars.next() {
        match c {
            '/' if first => expression.push_str("(^|/)"),
            '*' => expression.push_str("[^/]*"),
            '?' => expression.push_str("[^/]"),
            '.' | '^' | '$' | '(' | ')' | '|' | '+' | '{' | '}' => {
                expression.push('\\');
                expression.push(c);
            }
            '\\' => {
                let escaped = chars.next().ok_or_else(invalid)?;
                expression.push_str(&regex::escape(&escaped.to_string()));
            }
            '[' => {
                expression.push('[');

                let mut closed = false;

                for c in chars.by_ref() {
                    match c {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '[' | '\\' | '&' | '~' => {
                            expression.push('\\');
                            expression.push(c);
                        }
                        _ => expression.push(c),
                    }
                }

                if !closed {
                    return Err(invalid());
                }

                expression.push(']');
            }
            _ => expression.push(c),
        }

        first = false;
    }

    Regex::new(&expression).map_err(|_| invalid())
}

/// A list of banned patterns
#[derive(Debug, Clone, Default)]
pub struct BannedFiles {
    patterns: Vec<String>,
    regexes: Vec<Regex>,
}

impl BannedFiles {
    /// Return the default list.
    pub fn defaults() -> Self {
        let mut banned = Self::default();

        for pattern in DEFAULT_BANNED {
            // The default patterns are known to be valid.
            if let Ok(regex) = glob_regex(pattern) {
                banned.patterns.push((*pattern).to_owned());
                banned.regexes.push(regex);
            }
        }

        banned
    }

    /// Add a pattern to the list.  Empty patterns are ignored.
    pub fn push(&mut self, pattern: &str) -> Result<(), ConfigError> {
        if !pattern.is_empty() {
            self.regexes.push(glob_regex(pattern)?);
            self.patterns.push(pattern.to_owned());
        }

        Ok(())
    }

    /// Return true if the file at `path` is banned.
    pub fn is_banned(&self, path: &str) -> bool {
        self.regexes.iter().any(|regex| regex.is_match(path))
    }

    /// Return true if the directory at `path` is banned, in which case nothing below it is imported.
    pub fn is_banned_dir(&self, path: &str) -> bool {
        self.is_banned(&format!("{}/", path.trim_end_matches('/')))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl FromStr for BannedFiles {
    type Err = ConfigError;

    /// Parse a comma separated list of patterns.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut banned = Self::default();

        for pattern in s.split(',') {
            banned.push(pattern.trim())?;
        }

        Ok(banned)
    }
}

impl Display for BannedFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.patterns
                .iter()
                .map(|pattern| format!("'{pattern}'"))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}
