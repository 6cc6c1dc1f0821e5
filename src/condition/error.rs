//! Errors produced while parsing and evaluating condition strings.

/// A condition string failed to parse.
///
/// The message matches the shape used by LOOT's original condition grammar:
/// `Failed to parse condition "X": expected "Y" at "Z".`
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseError {
    condition: Box<str>,
    expected: &'static str,
    context: Box<str>,
}

impl ParseError {
    pub(super) fn new(condition: &str, expected: &'static str, context: &str) -> Self {
        Self {
            condition: condition.into(),
            expected,
            context: context.trim().into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Failed to parse condition \"{}\": expected \"{}\" at \"{}\".",
            self.condition, self.expected, self.context
        )
    }
}

impl std::error::Error for ParseError {}

/// Represents an error that occurred while parsing or evaluating a condition.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    Parse(ParseError),
    InvalidArgument(Box<str>),
    Io(std::io::Error),
    Regex(Box<regress::Error>),
    VersionRegex(Box<fancy_regex::Error>),
    PluginData(esplugin::Error),
    /// The condition evaluation cache's lock was poisoned by a panic in
    /// another thread.
    CachePoisoned,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(_) => write!(f, "failed to parse a condition string"),
            Self::InvalidArgument(s) => write!(f, "invalid argument in condition: {s}"),
            Self::Io(_) => write!(f, "an I/O error occurred while evaluating a condition"),
            Self::Regex(_) => write!(f, "an invalid regex was used in a condition"),
            Self::VersionRegex(_) => write!(f, "failed to extract a version number"),
            Self::PluginData(_) => write!(f, "an error occurred while reading plugin data"),
            Self::CachePoisoned => write!(f, "the condition cache's lock is poisoned"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Regex(e) => Some(e),
            Self::VersionRegex(e) => Some(e),
            Self::PluginData(e) => Some(e),
            Self::InvalidArgument(_) | Self::CachePoisoned => None,
        }
    }
}

impl From<ParseError> for Error {
    fn from(value: ParseError) -> Self {
        Self::Parse(value)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<Box<regress::Error>> for Error {
    fn from(value: Box<regress::Error>) -> Self {
        Self::Regex(value)
    }
}

impl From<Box<fancy_regex::Error>> for Error {
    fn from(value: Box<fancy_regex::Error>) -> Self {
        Self::VersionRegex(value)
    }
}

impl From<esplugin::Error> for Error {
    fn from(value: esplugin::Error) -> Self {
        Self::PluginData(value)
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::CachePoisoned
    }
}
