// error.rs - Pattern-error taxonomy surfaced from the engine.
//
// The engine reports compile failures as a stable small-integer code plus
// the offending pattern fragment; this module gives each code a typed
// variant and the canonical message format.

use std::fmt;

// Engine error codes. Stable across backends; 0 is success.
pub(crate) const ERR_INTERNAL: i32 = 1;
pub(crate) const ERR_BAD_ESCAPE: i32 = 2;
pub(crate) const ERR_BAD_CHAR_CLASS: i32 = 3;
pub(crate) const ERR_BAD_CHAR_RANGE: i32 = 4;
pub(crate) const ERR_MISSING_BRACKET: i32 = 5;
pub(crate) const ERR_MISSING_PAREN: i32 = 6;
pub(crate) const ERR_UNEXPECTED_PAREN: i32 = 7;
pub(crate) const ERR_TRAILING_BACKSLASH: i32 = 8;
pub(crate) const ERR_REPEAT_ARGUMENT: i32 = 9;
pub(crate) const ERR_BAD_REPEAT_ARGUMENT: i32 = 10;
pub(crate) const ERR_REPEAT_OP: i32 = 11;
pub(crate) const ERR_BAD_PERL_OP: i32 = 12;
pub(crate) const ERR_BAD_UTF8: i32 = 13;
pub(crate) const ERR_BAD_NAMED_CAPTURE: i32 = 14;
pub(crate) const ERR_PATTERN_TOO_LARGE: i32 = 15;

/// Error type for pattern compilation.
///
/// Fully recoverable: the caller may retry with a corrected pattern.
/// Matching and replacement never fail after a successful compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Unexpected engine error.
    Unexpected(String),
    /// Invalid escape sequence.
    InvalidEscape(String),
    /// Bad character class.
    BadCharClass(String),
    /// Invalid character class range.
    BadCharClassRange(String),
    /// Missing closing `]`.
    MissingBracket(String),
    /// Missing closing `)`.
    MissingParen(String),
    /// Unexpected `)`.
    UnexpectedParen(String),
    /// Trailing backslash at end of expression.
    TrailingBackslash(String),
    /// Missing argument to repetition operator.
    MissingRepeatArgument(String),
    /// Bad repetition argument.
    BadRepeatArgument(String),
    /// Invalid nested repetition operator.
    NestedRepeatOperator(String),
    /// Bad perl operator.
    BadPerlOperator(String),
    /// Invalid UTF-8 in the pattern.
    InvalidUtf8(String),
    /// Bad named capture group.
    BadNamedCapture(String),
    /// Expression too large for the engine's program-size limit.
    ExpressionTooLarge,
    /// Error reported by the set compiler, already formatted.
    Other(String),
}

impl CompileError {
    pub(crate) fn from_code(code: i32, arg: String) -> CompileError {
        match code {
            ERR_BAD_ESCAPE => CompileError::InvalidEscape(arg),
            ERR_BAD_CHAR_CLASS => CompileError::BadCharClass(arg),
            ERR_BAD_CHAR_RANGE => CompileError::BadCharClassRange(arg),
            ERR_MISSING_BRACKET => CompileError::MissingBracket(arg),
            ERR_MISSING_PAREN => CompileError::MissingParen(arg),
            ERR_UNEXPECTED_PAREN => CompileError::UnexpectedParen(arg),
            ERR_TRAILING_BACKSLASH => CompileError::TrailingBackslash(arg),
            ERR_REPEAT_ARGUMENT => CompileError::MissingRepeatArgument(arg),
            ERR_BAD_REPEAT_ARGUMENT => CompileError::BadRepeatArgument(arg),
            ERR_REPEAT_OP => CompileError::NestedRepeatOperator(arg),
            ERR_BAD_PERL_OP => CompileError::BadPerlOperator(arg),
            ERR_BAD_UTF8 => CompileError::InvalidUtf8(arg),
            ERR_BAD_NAMED_CAPTURE => CompileError::BadNamedCapture(arg),
            ERR_PATTERN_TOO_LARGE => CompileError::ExpressionTooLarge,
            _ => CompileError::Unexpected(arg),
        }
    }

    /// The engine's error code for this variant.
    pub fn code(&self) -> i32 {
        match self {
            CompileError::Unexpected(_) => ERR_INTERNAL,
            CompileError::InvalidEscape(_) => ERR_BAD_ESCAPE,
            CompileError::BadCharClass(_) => ERR_BAD_CHAR_CLASS,
            CompileError::BadCharClassRange(_) => ERR_BAD_CHAR_RANGE,
            CompileError::MissingBracket(_) => ERR_MISSING_BRACKET,
            CompileError::MissingParen(_) => ERR_MISSING_PAREN,
            CompileError::UnexpectedParen(_) => ERR_UNEXPECTED_PAREN,
            CompileError::TrailingBackslash(_) => ERR_TRAILING_BACKSLASH,
            CompileError::MissingRepeatArgument(_) => ERR_REPEAT_ARGUMENT,
            CompileError::BadRepeatArgument(_) => ERR_BAD_REPEAT_ARGUMENT,
            CompileError::NestedRepeatOperator(_) => ERR_REPEAT_OP,
            CompileError::BadPerlOperator(_) => ERR_BAD_PERL_OP,
            CompileError::InvalidUtf8(_) => ERR_BAD_UTF8,
            CompileError::BadNamedCapture(_) => ERR_BAD_NAMED_CAPTURE,
            CompileError::ExpressionTooLarge => ERR_PATTERN_TOO_LARGE,
            CompileError::Other(_) => ERR_INTERNAL,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            CompileError::Unexpected(_) => "unexpected error",
            CompileError::InvalidEscape(_) => "invalid escape sequence",
            CompileError::BadCharClass(_) => "bad character class",
            CompileError::BadCharClassRange(_) => "invalid character class range",
            CompileError::MissingBracket(_) => "missing closing ]",
            CompileError::MissingParen(_) => "missing closing )",
            CompileError::UnexpectedParen(_) => "unexpected )",
            CompileError::TrailingBackslash(_) => "trailing backslash at end of expression",
            CompileError::MissingRepeatArgument(_) => "missing argument to repetition operator",
            CompileError::BadRepeatArgument(_) => "bad repetition argument",
            CompileError::NestedRepeatOperator(_) => "invalid nested repetition operator",
            CompileError::BadPerlOperator(_) => "bad perl operator",
            CompileError::InvalidUtf8(_) => "invalid UTF-8 in regexp",
            CompileError::BadNamedCapture(_) => "bad named capture group",
            CompileError::ExpressionTooLarge => "expression too large",
            CompileError::Other(_) => "",
        }
    }

    fn fragment(&self) -> Option<&str> {
        match self {
            CompileError::Unexpected(s)
            | CompileError::InvalidEscape(s)
            | CompileError::BadCharClass(s)
            | CompileError::BadCharClassRange(s)
            | CompileError::MissingBracket(s)
            | CompileError::MissingParen(s)
            | CompileError::UnexpectedParen(s)
            | CompileError::TrailingBackslash(s)
            | CompileError::MissingRepeatArgument(s)
            | CompileError::BadRepeatArgument(s)
            | CompileError::NestedRepeatOperator(s)
            | CompileError::BadPerlOperator(s)
            | CompileError::InvalidUtf8(s)
            | CompileError::BadNamedCapture(s) => Some(s),
            CompileError::ExpressionTooLarge | CompileError::Other(_) => None,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::ExpressionTooLarge => {
                write!(f, "error parsing regexp: expression too large")
            }
            CompileError::Other(msg) => write!(f, "error parsing regexp: {}", msg),
            _ => {
                let frag = self.fragment().unwrap_or_default();
                write!(
                    f,
                    "error parsing regexp: {}: {}",
                    self.description(),
                    quote_fragment(frag)
                )
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Backquote the fragment when it can appear verbatim, fall back to an
/// escaped quote otherwise.
pub(crate) fn quote_fragment(s: &str) -> String {
    if !s.contains('`') && s.chars().all(|c| !c.is_control()) {
        format!("`{}`", s)
    } else {
        format!("{:?}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_code_maps_the_taxonomy() {
        let err = CompileError::from_code(ERR_MISSING_PAREN, "(ab".to_string());
        assert!(matches!(err, CompileError::MissingParen(_)));
        assert_eq!(err.code(), ERR_MISSING_PAREN);
        assert_eq!(
            err.to_string(),
            "error parsing regexp: missing closing ): `(ab`"
        );
    }

    #[test]
    fn unknown_code_falls_back_to_unexpected() {
        let err = CompileError::from_code(99, "x".to_string());
        assert!(matches!(err, CompileError::Unexpected(_)));
        assert_eq!(err.code(), ERR_INTERNAL);
    }

    #[test]
    fn expression_too_large_has_no_fragment() {
        let err = CompileError::from_code(ERR_PATTERN_TOO_LARGE, String::new());
        assert_eq!(err.to_string(), "error parsing regexp: expression too large");
    }

    #[test]
    fn fragments_with_backquotes_are_escaped() {
        assert_eq!(quote_fragment("a`b"), "\"a`b\"");
        assert_eq!(quote_fragment("plain"), "`plain`");
    }

    #[test]
    fn error_trait_object() {
        let err: Box<dyn std::error::Error> =
            Box::new(CompileError::TrailingBackslash("\\".to_string()));
        assert!(err.to_string().contains("trailing backslash"));
    }
}
