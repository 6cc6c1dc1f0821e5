//! A hand-written recursive-descent parser for condition strings.
//!
//! ```text
//! expr     := compound ("or" compound)*
//! compound := term ("and" term)*
//! term     := function | "not" term | "(" expr ")"
//! function := "file(" qstr ")"
//!          |  "many(" qstr ")"
//!          |  "checksum(" qpath "," HEX ")"
//!          |  "version(" qpath "," qstr "," comparator ")"
//!          |  "active(" qstr ")"
//!          |  "many_active(" qstr ")"
//! ```
//!
//! `and` binds tighter than `or`, and `not` binds tightest of all.

use super::error::ParseError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub(super) enum Comparator {
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub(super) enum Function {
    File(String),
    Many(String),
    Checksum(String, u32),
    Version(String, String, Comparator),
    Active(String),
    ManyActive(String),
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub(super) enum Term {
    Function(Function),
    Not(Box<Term>),
    Group(Box<[Compound]>),
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub(super) struct Compound(pub(super) Box<[Term]>);

/// A parsed condition expression.
///
/// Parsing happens once, at metadata-load time. The resulting AST can then be
/// evaluated as many times as needed without re-parsing.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Expression {
    pub(super) compounds: Box<[Compound]>,
    source: Box<str>,
}

impl Expression {
    /// Parses a condition string into an [Expression].
    ///
    /// # Errors
    ///
    /// Returns an error if `condition` is not a syntactically valid
    /// condition string. Parsing never fails because a referenced file,
    /// plugin or regex doesn't currently exist: that's an evaluation-time
    /// concern.
    pub fn parse(condition: &str) -> Result<Self, ParseError> {
        let mut parser = Parser::new(condition);
        let compounds = parser.parse_expression()?;
        parser.expect_end()?;

        Ok(Self {
            compounds: compounds.into_boxed_slice(),
            source: condition.into(),
        })
    }

    /// Returns the original condition string that was parsed.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl std::str::FromStr for Expression {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

const INVALID_PATH_CHARS: [char; 7] = [':', '*', '?', '"', '<', '>', '|'];

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.remaining().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn error(&self, expected: &'static str) -> ParseError {
        ParseError::new(self.input, expected, self.remaining())
    }

    fn expect_end(&mut self) -> Result<(), ParseError> {
        self.skip_whitespace();
        if self.remaining().is_empty() {
            Ok(())
        } else {
            Err(self.error("end of condition"))
        }
    }

    fn consume_literal(&mut self, literal: &str) -> bool {
        self.skip_whitespace();
        if self.remaining().starts_with(literal) {
            self.pos += literal.len();
            true
        } else {
            false
        }
    }

    fn expect_literal(&mut self, literal: &'static str) -> Result<(), ParseError> {
        if self.consume_literal(literal) {
            Ok(())
        } else {
            Err(self.error(literal))
        }
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        let remaining = self.remaining();
        if let Some(rest) = remaining.strip_prefix(keyword) {
            let is_boundary = rest
                .chars()
                .next()
                .is_none_or(|c| !c.is_alphanumeric() && c != '_');
            if is_boundary {
                self.pos += keyword.len();
                return true;
            }
        }
        false
    }

    fn parse_expression(&mut self) -> Result<Vec<Compound>, ParseError> {
        let mut compounds = vec![self.parse_compound()?];

        loop {
            let checkpoint = self.pos;
            if self.consume_keyword("or") {
                compounds.push(self.parse_compound()?);
            } else {
                self.pos = checkpoint;
                break;
            }
        }

        Ok(compounds)
    }

    fn parse_compound(&mut self) -> Result<Compound, ParseError> {
        let mut terms = vec![self.parse_term()?];

        loop {
            let checkpoint = self.pos;
            if self.consume_keyword("and") {
                terms.push(self.parse_term()?);
            } else {
                self.pos = checkpoint;
                break;
            }
        }

        Ok(Compound(terms.into_boxed_slice()))
    }

    fn parse_term(&mut self) -> Result<Term, ParseError> {
        if self.consume_keyword("not") {
            return Ok(Term::Not(Box::new(self.parse_term()?)));
        }

        if self.consume_literal("(") {
            let compounds = self.parse_expression()?;
            self.expect_literal(")")?;
            return Ok(Term::Group(compounds.into_boxed_slice()));
        }

        self.parse_function().map(Term::Function)
    }

    fn parse_function(&mut self) -> Result<Function, ParseError> {
        self.skip_whitespace();

        if self.consume_literal("many_active(") {
            let regex = self.parse_quoted_string()?;
            self.expect_literal(")")?;
            return Ok(Function::ManyActive(regex));
        }
        if self.consume_literal("file(") {
            let path = self.parse_quoted_string()?;
            self.expect_literal(")")?;
            return Ok(Function::File(path));
        }
        if self.consume_literal("many(") {
            let regex = self.parse_quoted_string()?;
            self.expect_literal(")")?;
            return Ok(Function::Many(regex));
        }
        if self.consume_literal("checksum(") {
            let path = self.parse_quoted_path()?;
            self.expect_literal(",")?;
            self.skip_whitespace();
            let crc = self.parse_hex()?;
            self.expect_literal(")")?;
            return Ok(Function::Checksum(path, crc));
        }
        if self.consume_literal("version(") {
            let path = self.parse_quoted_path()?;
            self.expect_literal(",")?;
            let version = self.parse_quoted_string()?;
            self.expect_literal(",")?;
            self.skip_whitespace();
            let comparator = self.parse_comparator()?;
            self.expect_literal(")")?;
            return Ok(Function::Version(path, version, comparator));
        }
        if self.consume_literal("active(") {
            let plugin = self.parse_quoted_string()?;
            self.expect_literal(")")?;
            return Ok(Function::Active(plugin));
        }

        Err(self.error("a condition function"))
    }

    fn parse_quoted_string(&mut self) -> Result<String, ParseError> {
        self.expect_literal("\"")?;

        let start = self.pos;
        let end = self.remaining().find('"').ok_or_else(|| self.error("\"\""))?;
        let value = self.input[start..start + end].to_owned();
        self.pos = start + end;

        self.expect_literal("\"")?;

        Ok(value)
    }

    fn parse_quoted_path(&mut self) -> Result<String, ParseError> {
        let value = self.parse_quoted_string()?;

        if value.chars().any(|c| INVALID_PATH_CHARS.contains(&c)) {
            return Err(self.error("a file path"));
        }

        Ok(value)
    }

    fn parse_hex(&mut self) -> Result<u32, ParseError> {
        let remaining = self.remaining();
        let len = remaining
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(remaining.len());

        if len == 0 {
            return Err(self.error("a hexadecimal checksum"));
        }

        let digits = &remaining[..len];
        let value = u32::from_str_radix(digits, 16).map_err(|_| self.error("a hexadecimal checksum"))?;
        self.pos += len;

        Ok(value)
    }

    fn parse_comparator(&mut self) -> Result<Comparator, ParseError> {
        // Longer operators must be tried first so that e.g. "==" isn't
        // parsed as "=" followed by a leftover "=".
        if self.consume_literal("==") {
            Ok(Comparator::Equal)
        } else if self.consume_literal("!=") {
            Ok(Comparator::NotEqual)
        } else if self.consume_literal("<=") {
            Ok(Comparator::LessOrEqual)
        } else if self.consume_literal(">=") {
            Ok(Comparator::GreaterOrEqual)
        } else if self.consume_literal("<") {
            Ok(Comparator::LessThan)
        } else if self.consume_literal(">") {
            Ok(Comparator::GreaterThan)
        } else {
            Err(self.error("a comparator"))
        }
    }
}
