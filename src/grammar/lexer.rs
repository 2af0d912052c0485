use crate::grammar::GrammarError;

/// Grammar notation accepted by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Plain BNF: only `<...>`, `::=`, `|`, `;` and `"..."` are special.
    Bnf,
    /// BNF plus grouping, optional and repetition operators, and `'...'` literals.
    Ebnf,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    NonTerminal(String),
    Define,
    Or,
    End,
    Newline,
    /// Unquoted run of terminal text.
    Text(String),
    /// Quoted terminal, quotes stripped and escapes resolved.
    Literal(String),
    GroupOpen,
    GroupClose,
    OptionOpen,
    OptionClose,
    RepeatOpen,
    RepeatClose,
    Optional,
    ZeroOrMore,
    OneOrMore,
    Bounded { min: usize, max: Option<usize> },
}

impl TokenKind {
    pub(crate) fn describe(&self) -> String {
        match self {
            TokenKind::NonTerminal(name) => format!("non-terminal '{}'", name),
            TokenKind::Define => "'::='".to_string(),
            TokenKind::Or => "'|'".to_string(),
            TokenKind::End => "';'".to_string(),
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Text(text) => format!("terminal '{}'", text),
            TokenKind::Literal(text) => format!("literal \"{}\"", text),
            TokenKind::GroupOpen => "'('".to_string(),
            TokenKind::GroupClose => "')'".to_string(),
            TokenKind::OptionOpen => "'['".to_string(),
            TokenKind::OptionClose => "']'".to_string(),
            TokenKind::RepeatOpen => "'{'".to_string(),
            TokenKind::RepeatClose => "'}'".to_string(),
            TokenKind::Optional => "'?'".to_string(),
            TokenKind::ZeroOrMore => "'*'".to_string(),
            TokenKind::OneOrMore => "'+'".to_string(),
            TokenKind::Bounded { min, max: Some(max) } => format!("'{{{},{}}}'", min, max),
            TokenKind::Bounded { min, max: None } => format!("'{{{},}}'", min),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    at_line_start: bool,
    dialect: Dialect,
    tokens: Vec<Token>,
}

/// Splits grammar source into tokens. Line numbers start at 1.
pub(crate) fn tokenise(source: &str, dialect: Dialect) -> Result<Vec<Token>, GrammarError> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        at_line_start: true,
        dialect,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, kind: TokenKind) {
        self.tokens.push(Token {
            kind,
            line: self.line,
        });
    }

    fn starts_with(&self, pattern: &str) -> bool {
        pattern
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek(i) == Some(c))
    }

    fn is_quote(&self, c: char) -> bool {
        c == '"' || (c == '\'' && self.dialect == Dialect::Ebnf)
    }

    fn is_operator(&self, c: char) -> bool {
        self.dialect == Dialect::Ebnf && matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '?' | '*' | '+')
    }

    fn run(&mut self) -> Result<(), GrammarError> {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                self.push(TokenKind::Newline);
                self.line += 1;
                self.pos += 1;
                self.at_line_start = true;
                continue;
            }
            if c.is_whitespace() {
                self.pos += 1;
                continue;
            }
            if self.at_line_start && c == '#' {
                while self.peek(0).is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
                continue;
            }
            self.at_line_start = false;

            if c == '<' {
                self.non_terminal()?;
            } else if self.starts_with("::=") {
                self.push(TokenKind::Define);
                self.pos += 3;
            } else if c == '|' {
                self.push(TokenKind::Or);
                self.pos += 1;
            } else if c == ';' {
                self.push(TokenKind::End);
                self.pos += 1;
            } else if self.is_quote(c) {
                self.literal(c)?;
            } else if self.is_operator(c) {
                self.operator(c)?;
            } else {
                self.text();
            }
        }
        Ok(())
    }

    fn non_terminal(&mut self) -> Result<(), GrammarError> {
        let start = self.pos;
        self.pos += 1;
        loop {
            match self.peek(0) {
                Some('>') => break,
                Some(c) if c != '<' && !c.is_whitespace() => self.pos += 1,
                _ => {
                    let partial: String = self.chars[start..self.pos].iter().collect();
                    return Err(GrammarError::UnterminatedNonTerminal {
                        name: partial,
                        line: self.line,
                    });
                }
            }
        }
        self.pos += 1;
        let name: String = self.chars[start..self.pos].iter().collect();
        if name.len() == 2 {
            return Err(GrammarError::ParseError {
                line: self.line,
                reason: "empty non-terminal '<>'".to_string(),
            });
        }
        self.push(TokenKind::NonTerminal(name));
        Ok(())
    }

    fn literal(&mut self, quote: char) -> Result<(), GrammarError> {
        let line = self.line;
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek(0) {
                Some(c) if c == quote => break,
                Some('\\') => {
                    let escaped = match self.peek(1) {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some(c) if c != '\n' => c,
                        _ => return Err(GrammarError::UnterminatedLiteral { line }),
                    };
                    text.push(escaped);
                    self.pos += 2;
                }
                Some(c) if c != '\n' => {
                    text.push(c);
                    self.pos += 1;
                }
                _ => return Err(GrammarError::UnterminatedLiteral { line }),
            }
        }
        self.pos += 1;
        self.push(TokenKind::Literal(text));
        Ok(())
    }

    fn operator(&mut self, c: char) -> Result<(), GrammarError> {
        let kind = match c {
            '(' => TokenKind::GroupOpen,
            ')' => TokenKind::GroupClose,
            '[' => TokenKind::OptionOpen,
            ']' => TokenKind::OptionClose,
            '}' => TokenKind::RepeatClose,
            '?' => TokenKind::Optional,
            '*' => TokenKind::ZeroOrMore,
            '+' => TokenKind::OneOrMore,
            '{' if self.peek(1).is_some_and(|c| c.is_ascii_digit()) => return self.bounded(),
            _ => TokenKind::RepeatOpen,
        };
        self.push(kind);
        self.pos += 1;
        Ok(())
    }

    /// Reads `{m}`, `{m,}` or `{m,n}`.
    fn bounded(&mut self) -> Result<(), GrammarError> {
        let malformed = |line: usize| GrammarError::ParseError {
            line,
            reason: "malformed bounded repetition, expected {m}, {m,} or {m,n}".to_string(),
        };
        self.pos += 1;
        let min = self.number().ok_or_else(|| malformed(self.line))?;
        let max = match self.peek(0) {
            Some('}') => Some(min),
            Some(',') => {
                self.pos += 1;
                if self.peek(0) == Some('}') {
                    None
                } else {
                    Some(self.number().ok_or_else(|| malformed(self.line))?)
                }
            }
            _ => return Err(malformed(self.line)),
        };
        if self.peek(0) != Some('}') {
            return Err(malformed(self.line));
        }
        self.pos += 1;
        if let Some(max) = max {
            if max < min {
                return Err(GrammarError::ParseError {
                    line: self.line,
                    reason: format!("repetition bound {{{},{}}} has max below min", min, max),
                });
            }
        }
        self.push(TokenKind::Bounded { min, max });
        Ok(())
    }

    fn number(&mut self) -> Option<usize> {
        let start = self.pos;
        while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        digits.parse().ok()
    }

    fn text(&mut self) {
        let start = self.pos;
        while let Some(c) = self.peek(0) {
            if c.is_whitespace()
                || matches!(c, '<' | '|' | ';')
                || self.is_quote(c)
                || self.is_operator(c)
                || self.starts_with("::=")
            {
                break;
            }
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        self.push(TokenKind::Text(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str, dialect: Dialect) -> Vec<TokenKind> {
        tokenise(source, dialect)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_terminals_adjacent_to_non_terminals() {
        assert_eq!(
            kinds("<S> ::= <A>b | c ;", Dialect::Bnf),
            vec![
                TokenKind::NonTerminal("<S>".to_string()),
                TokenKind::Define,
                TokenKind::NonTerminal("<A>".to_string()),
                TokenKind::Text("b".to_string()),
                TokenKind::Or,
                TokenKind::Text("c".to_string()),
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn test_bnf_keeps_operator_characters_as_text() {
        assert_eq!(
            kinds("(x+y)*2", Dialect::Bnf),
            vec![TokenKind::Text("(x+y)*2".to_string())]
        );
    }

    #[test]
    fn test_ebnf_operators() {
        assert_eq!(
            kinds("( a )? [b] c* d+ {e} f{2,3} g{1,}", Dialect::Ebnf),
            vec![
                TokenKind::GroupOpen,
                TokenKind::Text("a".to_string()),
                TokenKind::GroupClose,
                TokenKind::Optional,
                TokenKind::OptionOpen,
                TokenKind::Text("b".to_string()),
                TokenKind::OptionClose,
                TokenKind::Text("c".to_string()),
                TokenKind::ZeroOrMore,
                TokenKind::Text("d".to_string()),
                TokenKind::OneOrMore,
                TokenKind::RepeatOpen,
                TokenKind::Text("e".to_string()),
                TokenKind::RepeatClose,
                TokenKind::Text("f".to_string()),
                TokenKind::Bounded {
                    min: 2,
                    max: Some(3)
                },
                TokenKind::Text("g".to_string()),
                TokenKind::Bounded { min: 1, max: None },
            ]
        );
    }

    #[test]
    fn test_literals_and_escapes() {
        assert_eq!(
            kinds(r#""a b" "say \"hi\"" "tab\t""#, Dialect::Bnf),
            vec![
                TokenKind::Literal("a b".to_string()),
                TokenKind::Literal("say \"hi\"".to_string()),
                TokenKind::Literal("tab\t".to_string()),
            ]
        );
        // single quotes only delimit literals in EBNF
        assert_eq!(
            kinds("'a'", Dialect::Bnf),
            vec![TokenKind::Text("'a'".to_string())]
        );
        assert_eq!(
            kinds("'a'", Dialect::Ebnf),
            vec![TokenKind::Literal("a".to_string())]
        );
    }

    #[test]
    fn test_comment_lines_and_line_numbers() {
        let tokens = tokenise("# header\n<a> ::= x\n  # note\n| y", Dialect::Bnf).unwrap();
        let lines: Vec<(TokenKind, usize)> = tokens.into_iter().map(|t| (t.kind, t.line)).collect();
        assert_eq!(lines[0], (TokenKind::Newline, 1));
        assert_eq!(lines[1], (TokenKind::NonTerminal("<a>".to_string()), 2));
        assert_eq!(lines.last().unwrap(), &(TokenKind::Text("y".to_string()), 4));
        assert!(!lines
            .iter()
            .any(|(kind, _)| matches!(kind, TokenKind::Text(t) if t.contains('#'))));
    }

    #[test]
    fn test_unterminated_non_terminal() {
        let result = tokenise("<a> ::= <b c", Dialect::Bnf);
        assert!(matches!(
            result,
            Err(GrammarError::UnterminatedNonTerminal { ref name, line: 1 }) if name == "<b"
        ));
        assert!(matches!(
            tokenise("<a> ::= <b", Dialect::Bnf),
            Err(GrammarError::UnterminatedNonTerminal { .. })
        ));
    }

    #[test]
    fn test_unterminated_literal() {
        assert!(matches!(
            tokenise("<a> ::= \"open\n", Dialect::Bnf),
            Err(GrammarError::UnterminatedLiteral { line: 1 })
        ));
    }

    #[test]
    fn test_malformed_bounds() {
        assert!(matches!(
            tokenise("a{3,1}", Dialect::Ebnf),
            Err(GrammarError::ParseError { .. })
        ));
        assert!(matches!(
            tokenise("a{2,x}", Dialect::Ebnf),
            Err(GrammarError::ParseError { .. })
        ));
    }
}
