pub mod analysis;
mod lexer;
mod parser;
pub mod symbol_table;

pub use lexer::Dialect;
pub use symbol_table::{Production, Rule, Symbol, SymbolKind, SymbolTable};

use log::{info, warn};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GrammarError {
    #[error("Failed to read grammar file: {0}")]
    FileReadError(#[from] std::io::Error),
    #[error("Failed to parse grammar on line {line}: {reason}")]
    ParseError { line: usize, reason: String },
    #[error("Unterminated non-terminal '{name}' on line {line}")]
    UnterminatedNonTerminal { name: String, line: usize },
    #[error("Unterminated quoted literal on line {line}")]
    UnterminatedLiteral { line: usize },
    #[error("Rule '{rule}' on line {line} has no alternatives")]
    EmptyRule { rule: String, line: usize },
    #[error("Undefined non-terminal referenced in grammar: '{0}'")]
    UndefinedNonTerminal(String),
    #[error("Reserved symbol '{0}' cannot be redefined")]
    ReservedSymbol(String),
    #[error("Start symbol '{0}' is not a rule of the grammar")]
    InvalidStartSymbol(String),
    #[error("Grammar defines no rules")]
    NoRules,
}

/// A loaded grammar: the compiled symbol table plus the symbol derivations start from.
///
/// Mapping, unmapping and initialisation borrow the grammar immutably; loading and
/// clearing need `&mut`, so a grammar can never change under a running mapping.
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    table: SymbolTable,
    start_symbol: Option<String>,
}

impl Grammar {
    /// An empty grammar with no rules and no start symbol.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and analyses a grammar file when creating a `Grammar` instance.
    ///
    /// Files with an `.ebnf` extension are read as EBNF, everything else as BNF.
    ///
    /// # Arguments
    /// * `path` - Reference to a `Path` struct representing the path to the user-specified grammar.
    ///
    /// # Returns
    /// * `Result<Self, GrammarError>` - A Result enum returning `Grammar` in the happy case, and
    /// `GrammarError` otherwise
    pub fn from_file(path: &Path) -> Result<Self, GrammarError> {
        let mut grammar = Self::new();
        grammar.read_file(path)?;
        Ok(grammar)
    }

    pub fn from_bnf(source: &str) -> Result<Self, GrammarError> {
        let mut grammar = Self::new();
        grammar.read_bnf_str(source)?;
        Ok(grammar)
    }

    pub fn from_ebnf(source: &str) -> Result<Self, GrammarError> {
        let mut grammar = Self::new();
        grammar.read_ebnf_str(source)?;
        Ok(grammar)
    }

    /// Loads a grammar into this instance, replacing whatever was loaded before.
    ///
    /// Files are read as EBNF when their extension is `.ebnf`; text is read as BNF. Use
    /// [`Grammar::read_grammar_as`] to load EBNF text.
    ///
    /// # Arguments
    /// * `source` - Either a path or the grammar text itself
    /// * `treat_as_file` - `true` when `source` is a path
    ///
    /// # Returns
    /// * `Result<(), GrammarError>` - On failure the previously loaded rules are left untouched
    pub fn read_grammar(&mut self, source: &str, treat_as_file: bool) -> Result<(), GrammarError> {
        if treat_as_file {
            self.read_file(Path::new(source))
        } else {
            self.read_bnf_str(source)
        }
    }

    /// Like [`Grammar::read_grammar`], but in the given dialect whatever the file is called.
    pub fn read_grammar_as(
        &mut self,
        source: &str,
        treat_as_file: bool,
        dialect: Dialect,
    ) -> Result<(), GrammarError> {
        let content;
        let text = if treat_as_file {
            content = fs::read_to_string(source)?;
            content.as_str()
        } else {
            source
        };
        self.load(text, dialect)
    }

    pub fn read_bnf_file(&mut self, path: &Path) -> Result<(), GrammarError> {
        let content = fs::read_to_string(path)?;
        self.load(&content, Dialect::Bnf)
    }

    pub fn read_bnf_str(&mut self, source: &str) -> Result<(), GrammarError> {
        self.load(source, Dialect::Bnf)
    }

    pub fn read_ebnf_file(&mut self, path: &Path) -> Result<(), GrammarError> {
        let content = fs::read_to_string(path)?;
        self.load(&content, Dialect::Ebnf)
    }

    pub fn read_ebnf_str(&mut self, source: &str) -> Result<(), GrammarError> {
        self.load(source, Dialect::Ebnf)
    }

    fn read_file(&mut self, path: &Path) -> Result<(), GrammarError> {
        let is_ebnf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("ebnf"));
        if is_ebnf {
            self.read_ebnf_file(path)
        } else {
            self.read_bnf_file(path)
        }
    }

    /// Builds a fresh table aside and swaps it in only once it is complete and analysed.
    fn load(&mut self, source: &str, dialect: Dialect) -> Result<(), GrammarError> {
        let tokens = lexer::tokenise(source, dialect)?;
        let rules = parser::split_rules(&tokens)?;
        let first_lhs = rules.first().map(|r| r.lhs.clone()).ok_or(GrammarError::NoRules)?;

        let mut table = SymbolTable::new();
        let mut builder = parser::GrammarBuilder::new(&mut table);
        for rule in rules {
            builder.add_rule(rule)?;
        }

        if let Some(rule) = table.undefined().next() {
            return Err(GrammarError::UndefinedNonTerminal(rule.name.clone()));
        }

        let start = self.start_symbol.clone().unwrap_or(first_lhs);
        if !table
            .lookup(&start)
            .is_some_and(|r| r.kind == SymbolKind::NonTerminal)
        {
            return Err(GrammarError::InvalidStartSymbol(start));
        }

        analysis::update_recursion_and_depth(&mut table);
        self.table = table;
        self.start_symbol = Some(start);

        info!(
            "Loaded {:?} grammar: {} rules, {} symbols, start symbol {}",
            dialect,
            self.rule_count(),
            self.table.len(),
            self.start_symbol.as_deref().unwrap_or_default()
        );
        for name in self.unreachable_rules() {
            warn!("Rule '{}' is unreachable from the start symbol", name);
        }
        Ok(())
    }

    pub fn start_symbol(&self) -> Option<&str> {
        self.start_symbol.as_deref()
    }

    /// Sets the symbol derivations start from. Angle brackets are added when missing.
    ///
    /// Once rules are loaded the name must refer to one of them. Before loading, the name
    /// is kept and takes precedence over the first rule of the next grammar.
    pub fn set_start_symbol(&mut self, name: &str) -> Result<(), GrammarError> {
        let name = if name.starts_with('<') && name.ends_with('>') {
            name.to_string()
        } else {
            format!("<{}>", name)
        };
        if self.rule_count() > 0 && self.rule(&name).is_none() {
            return Err(GrammarError::InvalidStartSymbol(name));
        }
        self.start_symbol = Some(name);
        Ok(())
    }

    /// The rule called `name`, if it is a defined non-terminal.
    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.table
            .lookup(name)
            .filter(|rule| rule.kind == SymbolKind::NonTerminal)
    }

    pub fn start_rule(&self) -> Option<&Rule> {
        self.start_symbol.as_deref().and_then(|name| self.rule(name))
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.table
    }

    /// Appends an alternative to an existing rule and re-runs the analysis.
    ///
    /// Every non-terminal in `production` must already be defined.
    pub fn add_production(&mut self, name: &str, production: Production) -> Result<(), GrammarError> {
        if self.rule(name).is_none() {
            return Err(GrammarError::UndefinedNonTerminal(name.to_string()));
        }
        for symbol in &production {
            match symbol {
                Symbol::NonTerminal(referenced) if self.rule(referenced).is_none() => {
                    return Err(GrammarError::UndefinedNonTerminal(referenced.clone()));
                }
                Symbol::Terminal(text) if !text.is_empty() => {
                    self.table.insert(text, SymbolKind::Terminal);
                }
                _ => {}
            }
        }
        let production = if production.is_empty() {
            vec![Symbol::empty()]
        } else {
            production
        };
        self.table.add_production(name, production);
        self.update_recursion_and_depth();
        Ok(())
    }

    /// Drops every rule and the start symbol.
    pub fn clear(&mut self) {
        self.table.clear();
        self.start_symbol = None;
    }

    pub fn update_recursion_and_depth(&mut self) {
        analysis::update_recursion_and_depth(&mut self.table);
    }

    /// Number of defined non-terminals, EBNF helper rules included.
    pub fn rule_count(&self) -> usize {
        self.table.non_terminals().count()
    }

    /// Rules that no derivation from the start symbol can ever reach.
    pub fn unreachable_rules(&self) -> Vec<String> {
        let Some(start) = self.start_symbol.as_deref() else {
            return Vec::new();
        };
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::new();

        // Does BFS to check if each rule is reachable from the start symbol
        queue.push_back(start);
        reachable.insert(start);
        while let Some(current) = queue.pop_front() {
            if let Some(rule) = self.rule(current) {
                for symbol in rule.productions.iter().flatten() {
                    if let Symbol::NonTerminal(name) = symbol {
                        if reachable.insert(name.as_str()) {
                            queue.push_back(name.as_str());
                        }
                    }
                }
            }
        }
        self.table
            .non_terminals()
            .filter(|rule| !reachable.contains(rule.name.as_str()))
            .map(|rule| rule.name.clone())
            .collect()
    }
}

fn write_symbol(f: &mut fmt::Formatter<'_>, symbol: &Symbol) -> fmt::Result {
    match symbol {
        Symbol::Terminal(text) => {
            let escaped = text
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('\n', "\\n")
                .replace('\t', "\\t");
            write!(f, "\"{}\"", escaped)
        }
        other => write!(f, "{}", other),
    }
}

/// Writes the grammar back out as BNF, one rule per line, terminals quoted.
impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rule in self.table.non_terminals() {
            write!(f, "{} ::=", rule.name)?;
            for (i, production) in rule.productions.iter().enumerate() {
                if i > 0 {
                    write!(f, " |")?;
                }
                for symbol in production {
                    write!(f, " ")?;
                    write_symbol(f, symbol)?;
                }
            }
            writeln!(f, " ;")?;
        }
        Ok(())
    }
}
