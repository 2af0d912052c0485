use crate::grammar::lexer::{Token, TokenKind};
use crate::grammar::symbol_table::{
    Production, Symbol, SymbolKind, SymbolTable, BOUNDARY_SYMBOL, CODON_VALUE_SYMBOL,
};
use crate::grammar::GrammarError;
use log::debug;

/// Largest span `max - min` accepted for a bounded repetition `{min,max}`.
const MAX_BOUNDED_SPAN: usize = 256;

/// Longest production a repetition may expand into, counted in symbols.
const MAX_REPEAT_SYMBOLS: usize = 4096;

/// Lexical state of the rule splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    /// Waiting for the left-hand side of the next rule.
    RuleDefinition,
    /// Left-hand side read, waiting for `::=`.
    SignDefinition,
    /// Collecting the right-hand side until `;` or the start of the next rule.
    ProductionRule,
}

/// A rule as it appears in the source, before its body has been parsed.
#[derive(Debug, Clone)]
pub(crate) struct RuleSource {
    pub lhs: String,
    pub line: usize,
    pub body: Vec<Token>,
}

/// True when the tokens from `from` on open a new rule, i.e. `<name> ::=`.
fn starts_new_rule(tokens: &[Token], from: usize) -> bool {
    let mut rest = tokens[from..]
        .iter()
        .filter(|t| t.kind != TokenKind::Newline);
    matches!(
        (rest.next().map(|t| &t.kind), rest.next().map(|t| &t.kind)),
        (Some(TokenKind::NonTerminal(_)), Some(TokenKind::Define))
    )
}

/// Groups the token stream into rules.
///
/// A rule body ends at `;`, at a line break followed by `<name> ::=`, or at end of input.
/// Any other line break is a continuation, so alternatives may span several lines.
pub(crate) fn split_rules(tokens: &[Token]) -> Result<Vec<RuleSource>, GrammarError> {
    let mut rules = Vec::new();
    let mut state = ParserState::RuleDefinition;
    let mut current: Option<RuleSource> = None;

    for (i, token) in tokens.iter().enumerate() {
        match state {
            ParserState::RuleDefinition => match &token.kind {
                TokenKind::Newline | TokenKind::End => {}
                TokenKind::NonTerminal(name) => {
                    current = Some(RuleSource {
                        lhs: name.clone(),
                        line: token.line,
                        body: Vec::new(),
                    });
                    state = ParserState::SignDefinition;
                }
                other => {
                    return Err(GrammarError::ParseError {
                        line: token.line,
                        reason: format!("expected a rule name, found {}", other.describe()),
                    })
                }
            },
            ParserState::SignDefinition => match &token.kind {
                TokenKind::Newline => {}
                TokenKind::Define => state = ParserState::ProductionRule,
                other => {
                    return Err(GrammarError::ParseError {
                        line: token.line,
                        reason: format!("expected '::=', found {}", other.describe()),
                    })
                }
            },
            ParserState::ProductionRule => match &token.kind {
                TokenKind::End => {
                    rules.extend(current.take());
                    state = ParserState::RuleDefinition;
                }
                TokenKind::Newline => {
                    if starts_new_rule(tokens, i + 1) {
                        rules.extend(current.take());
                        state = ParserState::RuleDefinition;
                    }
                }
                TokenKind::Define => {
                    return Err(GrammarError::ParseError {
                        line: token.line,
                        reason: "unexpected '::=' inside a rule body".to_string(),
                    })
                }
                _ => {
                    if let Some(rule) = current.as_mut() {
                        rule.body.push(token.clone());
                    }
                }
            },
        }
    }

    match state {
        ParserState::ProductionRule => rules.extend(current.take()),
        ParserState::SignDefinition => {
            let line = tokens.last().map(|t| t.line).unwrap_or(1);
            return Err(GrammarError::ParseError {
                line,
                reason: "grammar ends before '::='".to_string(),
            });
        }
        ParserState::RuleDefinition => {}
    }
    Ok(rules)
}

/// Right-hand side syntax tree. BNF bodies only ever contain `Symbol`s.
#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Symbol(Symbol),
    Group(Vec<Vec<Expr>>),
    Repeat {
        inner: Box<Expr>,
        min: usize,
        max: Option<usize>,
    },
}

fn symbol_for(kind: &TokenKind) -> Option<Symbol> {
    match kind {
        TokenKind::NonTerminal(name) if name == CODON_VALUE_SYMBOL => Some(Symbol::CodonValue),
        TokenKind::NonTerminal(name) if name == BOUNDARY_SYMBOL => Some(Symbol::Marker),
        TokenKind::NonTerminal(name) => Some(Symbol::non_terminal(name.clone())),
        TokenKind::Text(text) | TokenKind::Literal(text) => Some(Symbol::terminal(text.clone())),
        _ => None,
    }
}

/// Recursive-descent parser over the tokens of one rule body.
struct BodyParser<'t> {
    tokens: &'t [Token],
    pos: usize,
    line: usize,
}

impl<'t> BodyParser<'t> {
    fn new(tokens: &'t [Token], line: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            line,
        }
    }

    fn peek(&self) -> Option<&'t TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn error(&self, reason: String) -> GrammarError {
        let line = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(self.line, |t| t.line);
        GrammarError::ParseError { line, reason }
    }

    fn parse(mut self) -> Result<Vec<Vec<Expr>>, GrammarError> {
        let alternatives = self.alternatives()?;
        match self.peek() {
            None => Ok(alternatives),
            Some(kind) => Err(self.error(format!("unexpected {}", kind.describe()))),
        }
    }

    fn alternatives(&mut self) -> Result<Vec<Vec<Expr>>, GrammarError> {
        let mut alternatives = vec![self.sequence()?];
        while self.peek() == Some(&TokenKind::Or) {
            self.pos += 1;
            alternatives.push(self.sequence()?);
        }
        Ok(alternatives)
    }

    fn sequence(&mut self) -> Result<Vec<Expr>, GrammarError> {
        let mut items = Vec::new();
        while let Some(kind) = self.peek() {
            match kind {
                TokenKind::Or
                | TokenKind::GroupClose
                | TokenKind::OptionClose
                | TokenKind::RepeatClose => break,
                _ => items.push(self.item()?),
            }
        }
        Ok(items)
    }

    /// A primary followed by any number of postfix quantifiers, applied left to right.
    fn item(&mut self) -> Result<Expr, GrammarError> {
        let mut expr = self.primary()?;
        while let Some(kind) = self.peek() {
            let (min, max) = match kind {
                TokenKind::Optional => (0, Some(1)),
                TokenKind::ZeroOrMore => (0, None),
                TokenKind::OneOrMore => (1, None),
                TokenKind::Bounded { min, max } => (*min, *max),
                _ => break,
            };
            self.pos += 1;
            expr = Expr::Repeat {
                inner: Box::new(expr),
                min,
                max,
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, GrammarError> {
        let Some(kind) = self.peek() else {
            return Err(self.error("unexpected end of rule body".to_string()));
        };
        if let Some(symbol) = symbol_for(kind) {
            self.pos += 1;
            return Ok(Expr::Symbol(symbol));
        }
        let (closer, min, max) = match kind {
            TokenKind::GroupOpen => (TokenKind::GroupClose, 1, Some(1)),
            TokenKind::OptionOpen => (TokenKind::OptionClose, 0, Some(1)),
            TokenKind::RepeatOpen => (TokenKind::RepeatClose, 0, None),
            other => {
                return Err(self.error(format!("unexpected {}", other.describe())));
            }
        };
        self.pos += 1;
        let alternatives = self.alternatives()?;
        if self.peek() != Some(&closer) {
            return Err(self.error(format!("expected {} to close group", closer.describe())));
        }
        self.pos += 1;
        let group = Expr::Group(alternatives);
        if (min, max) == (1, Some(1)) {
            Ok(group)
        } else {
            Ok(Expr::Repeat {
                inner: Box::new(group),
                min,
                max,
            })
        }
    }
}

/// Writes parsed rules into a symbol table, desugaring EBNF constructs on the way.
///
/// Desugaring rules:
/// - a group with a single alternative is spliced into the enclosing sequence;
/// - a group with several alternatives becomes one helper rule;
/// - every quantifier becomes one helper rule over the sequence it applies to, whose
///   alternatives are ordered by increasing repeat count.
///
/// Helper names contain a space, which the lexer never accepts inside `<...>`, so they
/// cannot collide with user rules.
pub(crate) struct GrammarBuilder<'t> {
    table: &'t mut SymbolTable,
    helpers: usize,
    line: usize,
}

impl<'t> GrammarBuilder<'t> {
    pub(crate) fn new(table: &'t mut SymbolTable) -> Self {
        Self {
            table,
            helpers: 0,
            line: 0,
        }
    }

    pub(crate) fn add_rule(&mut self, source: RuleSource) -> Result<(), GrammarError> {
        if self
            .table
            .lookup(&source.lhs)
            .is_some_and(|rule| rule.kind.is_reserved())
        {
            return Err(GrammarError::ReservedSymbol(source.lhs));
        }
        if source.body.is_empty() {
            return Err(GrammarError::EmptyRule {
                rule: source.lhs,
                line: source.line,
            });
        }

        if self
            .table
            .lookup(&source.lhs)
            .is_some_and(|rule| !rule.productions.is_empty())
        {
            debug!("Rule '{}' defined again, appending alternatives", source.lhs);
        }
        self.table.insert(&source.lhs, SymbolKind::NonTerminal);
        self.line = source.line;

        let alternatives = BodyParser::new(&source.body, source.line).parse()?;
        for alternative in alternatives {
            let production = self.lower_production(&source.lhs, alternative)?;
            self.table.add_production(&source.lhs, production);
        }
        Ok(())
    }

    fn lower_production(
        &mut self,
        owner: &str,
        sequence: Vec<Expr>,
    ) -> Result<Production, GrammarError> {
        let mut production = self.lower_sequence(owner, sequence)?;
        if production.is_empty() {
            production.push(Symbol::empty());
        }
        Ok(production)
    }

    fn lower_sequence(
        &mut self,
        owner: &str,
        sequence: Vec<Expr>,
    ) -> Result<Vec<Symbol>, GrammarError> {
        let mut symbols = Vec::new();
        for expr in sequence {
            symbols.extend(self.lower(owner, expr)?);
        }
        Ok(symbols)
    }

    fn lower(&mut self, owner: &str, expr: Expr) -> Result<Vec<Symbol>, GrammarError> {
        match expr {
            Expr::Symbol(symbol) => {
                self.register(&symbol);
                Ok(vec![symbol])
            }
            Expr::Group(mut alternatives) if alternatives.len() == 1 => {
                let sequence = alternatives.pop().unwrap_or_default();
                self.lower_sequence(owner, sequence)
            }
            Expr::Group(alternatives) => {
                let helper = self.fresh_helper(owner, "group");
                for alternative in alternatives {
                    let production = self.lower_production(owner, alternative)?;
                    self.table.add_production(&helper, production);
                }
                Ok(vec![Symbol::non_terminal(helper)])
            }
            Expr::Repeat { inner, min, max } => {
                let body = self.lower(owner, *inner)?;
                let helper = self.repetition(owner, body, min, max)?;
                Ok(vec![Symbol::non_terminal(helper)])
            }
        }
    }

    fn repetition(
        &mut self,
        owner: &str,
        body: Vec<Symbol>,
        min: usize,
        max: Option<usize>,
    ) -> Result<String, GrammarError> {
        let within_limit = match body.len().checked_mul(max.unwrap_or(min)) {
            Some(len) => len <= MAX_REPEAT_SYMBOLS,
            None => false,
        };
        if !within_limit {
            return Err(GrammarError::ParseError {
                line: self.line,
                reason: format!(
                    "repetition of {} in '{}' expands past {} symbols",
                    max.unwrap_or(min),
                    owner,
                    MAX_REPEAT_SYMBOLS
                ),
            });
        }

        let helper = self.fresh_helper(owner, "repeat");
        let recurse = Symbol::non_terminal(helper.clone());
        let repeated = |count: usize| -> Production {
            let production: Production = body.iter().cycle().take(body.len() * count).cloned().collect();
            if production.is_empty() {
                vec![Symbol::empty()]
            } else {
                production
            }
        };

        match max {
            Some(max) => {
                if max - min > MAX_BOUNDED_SPAN {
                    return Err(GrammarError::ParseError {
                        line: self.line,
                        reason: format!(
                            "repetition {{{},{}}} in '{}' spans more than {} counts",
                            min, max, owner, MAX_BOUNDED_SPAN
                        ),
                    });
                }
                for count in min..=max {
                    self.table.add_production(&helper, repeated(count));
                }
            }
            None if min <= 1 => {
                // X* ::= ε | X X*      X+ ::= X | X X+
                let mut step = body.clone();
                step.push(recurse);
                self.table.add_production(&helper, repeated(min));
                self.table.add_production(&helper, step);
            }
            None => {
                let tail = self.repetition(owner, body.clone(), 0, None)?;
                let mut production = repeated(min);
                production.push(Symbol::non_terminal(tail));
                self.table.add_production(&helper, production);
            }
        }

        if let Some(rule) = self.table.lookup_mut(&helper) {
            rule.min_repeat = min;
            rule.max_repeat = max;
        }
        Ok(helper)
    }

    fn fresh_helper(&mut self, owner: &str, tag: &str) -> String {
        let base = owner.trim_start_matches('<').trim_end_matches('>');
        loop {
            self.helpers += 1;
            let name = format!("<{} {}{}>", base, tag, self.helpers);
            if self.table.index_of(&name).is_none() {
                self.table.insert(&name, SymbolKind::NonTerminal);
                return name;
            }
        }
    }

    /// Records a referenced symbol. Non-terminals not yet defined stay `Undefined`
    /// until a rule for them is added.
    fn register(&mut self, symbol: &Symbol) {
        match symbol {
            Symbol::NonTerminal(name) => {
                self.table.insert(name, SymbolKind::Undefined);
            }
            Symbol::Terminal(text) if !text.is_empty() => {
                self.table.insert(text, SymbolKind::Terminal);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::lexer::{tokenise, Dialect};

    fn build(source: &str, dialect: Dialect) -> Result<SymbolTable, GrammarError> {
        let tokens = tokenise(source, dialect)?;
        let mut table = SymbolTable::new();
        let mut builder = GrammarBuilder::new(&mut table);
        for rule in split_rules(&tokens)? {
            builder.add_rule(rule)?;
        }
        Ok(table)
    }

    fn t(text: &str) -> Symbol {
        Symbol::terminal(text)
    }

    fn nt(name: &str) -> Symbol {
        Symbol::non_terminal(name)
    }

    #[test]
    fn test_semicolon_terminated_rules_on_one_line() {
        let tokens = tokenise("<S> ::= <A>b | c ;  <A> ::= a | a<A> ;", Dialect::Bnf).unwrap();
        let rules = split_rules(&tokens).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].lhs, "<S>");
        assert_eq!(rules[1].lhs, "<A>");
    }

    #[test]
    fn test_newline_terminated_rules_with_continuation_lines() {
        let source = "<expr> ::= <expr> <op> <expr>\n    | <var>\n<op> ::= + | -\n<var> ::= x\n";
        let table = build(source, Dialect::Bnf).unwrap();
        let expr = table.lookup("<expr>").unwrap();
        assert_eq!(expr.productions, vec![vec![nt("<expr>"), nt("<op>"), nt("<expr>")], vec![nt("<var>")]]);
        assert_eq!(table.lookup("<op>").unwrap().productions, vec![vec![t("+")], vec![t("-")]]);
    }

    #[test]
    fn test_forward_reference_resolves() {
        let table = build("<S> ::= <A>b | c ;  <A> ::= a | a<A> ;", Dialect::Bnf).unwrap();
        assert_eq!(table.undefined().count(), 0);
        assert_eq!(table.lookup("<A>").unwrap().kind, SymbolKind::NonTerminal);
        assert_eq!(table.lookup("b").unwrap().kind, SymbolKind::Terminal);
    }

    #[test]
    fn test_unresolved_reference_stays_undefined() {
        let table = build("<S> ::= <nowhere>", Dialect::Bnf).unwrap();
        let undefined: Vec<&str> = table.undefined().map(|r| r.name.as_str()).collect();
        assert_eq!(undefined, vec!["<nowhere>"]);
    }

    #[test]
    fn test_empty_alternative_becomes_empty_terminal() {
        let table = build("<opt> ::= | x", Dialect::Bnf).unwrap();
        assert_eq!(
            table.lookup("<opt>").unwrap().productions,
            vec![vec![Symbol::empty()], vec![t("x")]]
        );
    }

    #[test]
    fn test_zero_alternative_rule_fails() {
        assert!(matches!(
            build("<a> ::= ;", Dialect::Bnf),
            Err(GrammarError::EmptyRule { ref rule, line: 1 }) if rule == "<a>"
        ));
        assert!(matches!(
            build("<a> ::=", Dialect::Bnf),
            Err(GrammarError::EmptyRule { .. })
        ));
    }

    #[test]
    fn test_missing_definition_sign_fails() {
        assert!(matches!(
            build("<a> x | y", Dialect::Bnf),
            Err(GrammarError::ParseError { .. })
        ));
        assert!(matches!(
            build("x ::= y", Dialect::Bnf),
            Err(GrammarError::ParseError { .. })
        ));
        assert!(matches!(
            build("<a> ::= x ::= y", Dialect::Bnf),
            Err(GrammarError::ParseError { .. })
        ));
    }

    #[test]
    fn test_reserved_symbols_cannot_be_redefined() {
        assert!(matches!(
            build("<GECodonValue> ::= 1", Dialect::Bnf),
            Err(GrammarError::ReservedSymbol(ref name)) if name == CODON_VALUE_SYMBOL
        ));
    }

    #[test]
    fn test_special_symbols_are_resolved() {
        let table = build("<n> ::= <GECodonValue> <GEXOMarker> .", Dialect::Bnf).unwrap();
        assert_eq!(
            table.lookup("<n>").unwrap().productions,
            vec![vec![Symbol::CodonValue, Symbol::Marker, t(".")]]
        );
    }

    #[test]
    fn test_repeated_definition_appends_alternatives() {
        let table = build("<a> ::= x\n<a> ::= y\n", Dialect::Bnf).unwrap();
        assert_eq!(
            table.lookup("<a>").unwrap().productions,
            vec![vec![t("x")], vec![t("y")]]
        );
    }

    #[test]
    fn test_ebnf_optional_desugars_to_helper() {
        let table = build("<a> ::= x [y] ;", Dialect::Ebnf).unwrap();
        let a = table.lookup("<a>").unwrap();
        assert_eq!(a.productions, vec![vec![t("x"), nt("<a repeat1>")]]);

        let helper = table.lookup("<a repeat1>").unwrap();
        assert_eq!(helper.productions, vec![vec![Symbol::empty()], vec![t("y")]]);
        assert_eq!((helper.min_repeat, helper.max_repeat), (0, Some(1)));

        // postfix ? is the same construct
        let table = build("<a> ::= x y? ;", Dialect::Ebnf).unwrap();
        assert_eq!(
            table.lookup("<a repeat1>").unwrap().productions,
            vec![vec![Symbol::empty()], vec![t("y")]]
        );
    }

    #[test]
    fn test_ebnf_star_and_plus() {
        let table = build("<a> ::= x* ;\n<b> ::= y+ ;", Dialect::Ebnf).unwrap();
        let star = table.lookup("<a repeat1>").unwrap();
        assert_eq!(
            star.productions,
            vec![vec![Symbol::empty()], vec![t("x"), nt("<a repeat1>")]]
        );
        assert_eq!((star.min_repeat, star.max_repeat), (0, None));

        let plus = table.lookup("<b repeat2>").unwrap();
        assert_eq!(
            plus.productions,
            vec![vec![t("y")], vec![t("y"), nt("<b repeat2>")]]
        );
        assert_eq!((plus.min_repeat, plus.max_repeat), (1, None));
    }

    #[test]
    fn test_ebnf_bounded_repetition() {
        let table = build("<a> ::= (x y){1,3} ;", Dialect::Ebnf).unwrap();
        let helper = table.lookup("<a repeat1>").unwrap();
        assert_eq!(
            helper.productions,
            vec![
                vec![t("x"), t("y")],
                vec![t("x"), t("y"), t("x"), t("y")],
                vec![t("x"), t("y"), t("x"), t("y"), t("x"), t("y")],
            ]
        );
        assert_eq!((helper.min_repeat, helper.max_repeat), (1, Some(3)));
    }

    #[test]
    fn test_oversized_repetition_counts_fail() {
        for source in [
            "<a> ::= (x y){9223372036854775808} ;",
            "<a> ::= x{100000000} ;",
            "<a> ::= x{100000000,} ;",
            "<a> ::= (x y){2047,2300} ;",
        ] {
            assert!(
                matches!(
                    build(source, Dialect::Ebnf),
                    Err(GrammarError::ParseError { line: 1, .. })
                ),
                "{} should be rejected",
                source
            );
        }
        assert!(build("<a> ::= (x y){2048} ;", Dialect::Ebnf).is_ok());
    }

    #[test]
    fn test_ebnf_open_bounded_repetition_chains_a_star_helper() {
        let table = build("<a> ::= x{2,} ;", Dialect::Ebnf).unwrap();
        let helper = table.lookup("<a repeat1>").unwrap();
        assert_eq!(helper.productions, vec![vec![t("x"), t("x"), nt("<a repeat2>")]]);
        assert_eq!((helper.min_repeat, helper.max_repeat), (2, None));
        assert_eq!(table.lookup("<a repeat2>").unwrap().min_repeat, 0);
    }

    #[test]
    fn test_ebnf_groups() {
        let table = build("<a> ::= (x | y) z | (w) ;", Dialect::Ebnf).unwrap();
        let a = table.lookup("<a>").unwrap();
        assert_eq!(
            a.productions,
            vec![vec![nt("<a group1>"), t("z")], vec![t("w")]]
        );
        assert_eq!(
            table.lookup("<a group1>").unwrap().productions,
            vec![vec![t("x")], vec![t("y")]]
        );
    }

    #[test]
    fn test_ebnf_nested_optional_inside_repeat() {
        let table = build("<a> ::= { x [y] } ;", Dialect::Ebnf).unwrap();
        // the inner optional is lowered first, then the repetition wraps the sequence
        assert_eq!(
            table.lookup("<a repeat1>").unwrap().productions,
            vec![vec![Symbol::empty()], vec![t("y")]]
        );
        assert_eq!(
            table.lookup("<a repeat2>").unwrap().productions,
            vec![
                vec![Symbol::empty()],
                vec![t("x"), nt("<a repeat1>"), nt("<a repeat2>")]
            ]
        );
    }

    #[test]
    fn test_ebnf_unbalanced_groups_fail() {
        assert!(matches!(
            build("<a> ::= (x | y ;", Dialect::Ebnf),
            Err(GrammarError::ParseError { .. })
        ));
        assert!(matches!(
            build("<a> ::= x ) ;", Dialect::Ebnf),
            Err(GrammarError::ParseError { .. })
        ));
        assert!(matches!(
            build("<a> ::= * x ;", Dialect::Ebnf),
            Err(GrammarError::ParseError { .. })
        ));
    }

    #[test]
    fn test_multiline_ebnf_group() {
        let table = build("<a> ::= ( x\n | y\n )\n<b> ::= z\n", Dialect::Ebnf).unwrap();
        assert_eq!(table.lookup("<a>").unwrap().productions, vec![vec![nt("<a group1>")]]);
        assert_eq!(table.lookup("<b>").unwrap().productions, vec![vec![t("z")]]);
    }
}
