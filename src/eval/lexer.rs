use regex::Regex;
use std::sync::OnceLock;

static ESCAPE_REGEX: OnceLock<Regex> = OnceLock::new();
static EXPR_REGEX: OnceLock<Regex> = OnceLock::new();
static TEXT_REGEX: OnceLock<Regex> = OnceLock::new();

fn escape_regex() -> &'static Regex {
    ESCAPE_REGEX.get_or_init(|| Regex::new(r"^\$\$+(\{|\()").unwrap())
}

fn expr_regex() -> &'static Regex {
    EXPR_REGEX.get_or_init(|| Regex::new(r"^\$\{[^\}]*\}").unwrap())
}

fn text_regex() -> &'static Regex {
    // Anchored; a lone '$' that starts nothing special is plain text.
    TEXT_REGEX.get_or_init(|| Regex::new(r"^([^$]+|\$)").unwrap())
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum TokenType {
    /// `$${` or `$$(`: value is the delimiter that follows the escaped `$`
    DollarDollarBrace,
    /// `${expr}`: value is `expr`
    Expr,
    /// `$(cmd args)`: value is `cmd args`, nested parentheses allowed
    Extension,
    Text,
}

/// Splits attribute and text content into literal text, `${...}` expressions
/// and `$(...)` extensions.
pub(crate) struct Lexer<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer { input, position: 0 }
    }

    fn advance(
        &mut self,
        token_type: TokenType,
        consumed: usize,
        value: &str,
    ) -> Option<(TokenType, String)> {
        self.position += consumed;
        Some((token_type, value.to_string()))
    }
}

impl Iterator for Lexer<'_> {
    type Item = (TokenType, String);

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.input.len() {
            return None;
        }
        let remaining = &self.input[self.position..];

        // The extension regex cannot express nesting like $(find $(arg pkg)),
        // so extensions are delimited by paren matching instead.
        if remaining.starts_with("$(") {
            if let Some(close) = super::interpreter::find_matching_paren(remaining, 1) {
                return self.advance(TokenType::Extension, close + 1, &remaining[2..close]);
            }
        }

        if let Some(caps) = escape_regex().captures(remaining) {
            let consumed = caps[0].len();
            let delimiter = caps[1].to_string();
            return self.advance(TokenType::DollarDollarBrace, consumed, &delimiter);
        }

        if let Some(m) = expr_regex().find(remaining) {
            let matched = m.as_str();
            return self.advance(TokenType::Expr, m.end(), &matched[2..matched.len() - 1]);
        }

        match text_regex().find(remaining) {
            Some(m) => self.advance(TokenType::Text, m.end(), m.as_str()),
            None => {
                // Unreachable with the text pattern above; stop rather than loop.
                log::error!("Lexer stalled at byte {} of {:?}", self.position, self.input);
                self.position = self.input.len();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(input: &str) -> Vec<(TokenType, String)> {
        Lexer::new(input).collect()
    }

    #[test]
    fn test_lexer_text_and_expression() {
        assert_eq!(
            lex_all("hello ${world}!"),
            vec![
                (TokenType::Text, "hello ".to_string()),
                (TokenType::Expr, "world".to_string()),
                (TokenType::Text, "!".to_string()),
            ]
        );
    }

    #[test]
    fn test_lexer_find_extension() {
        assert_eq!(
            lex_all("$(find my_pkg)/meshes/base.stl"),
            vec![
                (TokenType::Extension, "find my_pkg".to_string()),
                (TokenType::Text, "/meshes/base.stl".to_string()),
            ]
        );
    }

    #[test]
    fn test_lexer_nested_extension() {
        assert_eq!(
            lex_all("$(find $(arg pkg))"),
            vec![(TokenType::Extension, "find $(arg pkg)".to_string())]
        );
    }

    #[test]
    fn test_lexer_escapes() {
        assert_eq!(
            lex_all("$${expr}"),
            vec![
                (TokenType::DollarDollarBrace, "{".to_string()),
                (TokenType::Text, "expr}".to_string()),
            ]
        );
        assert_eq!(
            lex_all("$$(arg x)"),
            vec![
                (TokenType::DollarDollarBrace, "(".to_string()),
                (TokenType::Text, "arg x)".to_string()),
            ]
        );
    }

    #[test]
    fn test_lexer_lone_dollar_is_text() {
        let tokens = lex_all("cost: $5");
        let text: String = tokens.iter().map(|(_, v)| v.as_str()).collect();
        assert!(tokens.iter().all(|(t, _)| *t == TokenType::Text));
        assert_eq!(text, "cost: $5");
    }

    #[test]
    fn test_lexer_unclosed_extension_is_text() {
        let tokens = lex_all("$(find pkg");
        assert!(tokens.iter().all(|(t, _)| *t == TokenType::Text));
    }
}
