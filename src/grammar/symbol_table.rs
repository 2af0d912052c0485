use std::fmt;

/// Bucket count of a freshly created table.
const INITIAL_BUCKETS: usize = 64;
/// Average chain length at which the bucket array doubles.
const MAX_LOAD_FACTOR: usize = 2;

pub const DEFINITION_MARKER: &str = "::=";
pub const ALTERNATION_MARKER: &str = "|";
pub const QUOTE_MARKER: &str = "\"";
/// Special production: expands to the decimal value of the codon it consumes.
pub const CODON_VALUE_SYMBOL: &str = "<GECodonValue>";
/// Boundary marker: emits nothing, but its codon position is reported by the mapper.
pub const BOUNDARY_SYMBOL: &str = "<GEXOMarker>";

/// What a symbol-table entry stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    NonTerminal,
    Terminal,
    /// The `::=` sign separating a rule name from its body.
    Definition,
    /// The `|` separating alternatives.
    Alternation,
    /// `<GECodonValue>`
    Special,
    /// The quote that opens a literal terminal.
    Quoted,
    /// `<GEXOMarker>`
    Boundary,
    /// Referenced as a non-terminal but not (yet) defined.
    Undefined,
}

impl SymbolKind {
    /// Reserved kinds are seeded into every table and cannot be redefined by a grammar.
    pub fn is_reserved(self) -> bool {
        matches!(
            self,
            SymbolKind::Definition
                | SymbolKind::Alternation
                | SymbolKind::Special
                | SymbolKind::Quoted
                | SymbolKind::Boundary
        )
    }
}

/// A reference to a symbol inside a production.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// Name of a rule, angle brackets included (`<expr>`).
    NonTerminal(String),
    /// Literal text copied to the phenotype. The empty string stands for an empty alternative.
    Terminal(String),
    CodonValue,
    Marker,
}

impl Symbol {
    pub fn non_terminal(name: impl Into<String>) -> Self {
        Symbol::NonTerminal(name.into())
    }

    pub fn terminal(text: impl Into<String>) -> Self {
        Symbol::Terminal(text.into())
    }

    /// The empty terminal, used wherever a production would otherwise have no symbols.
    pub fn empty() -> Self {
        Symbol::Terminal(String::new())
    }

    pub fn is_non_terminal(&self) -> bool {
        matches!(self, Symbol::NonTerminal(_))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::NonTerminal(name) => write!(f, "{}", name),
            Symbol::Terminal(text) if text.is_empty() => write!(f, "\"\""),
            Symbol::Terminal(text) => write!(f, "{}", text),
            Symbol::CodonValue => write!(f, "{}", CODON_VALUE_SYMBOL),
            Symbol::Marker => write!(f, "{}", BOUNDARY_SYMBOL),
        }
    }
}

pub type Production = Vec<Symbol>;

/// One entry of the symbol table.
///
/// The `recursive_productions` and `production_depths` vectors run parallel to
/// `productions`. Depths are `None` until the grammar has been analysed, and stay `None`
/// for alternatives that can never derive an all-terminal string.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub kind: SymbolKind,
    pub productions: Vec<Production>,
    pub recursive_productions: Vec<bool>,
    pub production_depths: Vec<Option<u32>>,
    pub recursive: bool,
    pub min_depth: Option<u32>,
    pub min_repeat: usize,
    /// `None` means unbounded repetition.
    pub max_repeat: Option<usize>,
}

impl Rule {
    pub fn new(name: &str, kind: SymbolKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            productions: Vec::new(),
            recursive_productions: Vec::new(),
            production_depths: Vec::new(),
            recursive: false,
            min_depth: None,
            min_repeat: 1,
            max_repeat: Some(1),
        }
    }

    pub fn alternatives(&self) -> usize {
        self.productions.len()
    }

    pub fn is_defined(&self) -> bool {
        self.kind != SymbolKind::Undefined
    }
}

/// Hash-indexed rule storage.
///
/// Rules live in an arena in insertion order. Buckets hold arena indices, and collisions
/// chain inside a bucket. Rules refer to each other by name only, so the possibly cyclic
/// rule graph never turns into an ownership cycle.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    rules: Vec<Rule>,
    buckets: Vec<Vec<usize>>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// Creates a table holding only the reserved marker entries.
    pub fn new() -> Self {
        let mut table = Self {
            rules: Vec::new(),
            buckets: vec![Vec::new(); INITIAL_BUCKETS],
        };
        table.seed_reserved();
        table
    }

    fn seed_reserved(&mut self) {
        self.insert(DEFINITION_MARKER, SymbolKind::Definition);
        self.insert(ALTERNATION_MARKER, SymbolKind::Alternation);
        self.insert(QUOTE_MARKER, SymbolKind::Quoted);
        self.insert(CODON_VALUE_SYMBOL, SymbolKind::Special);
        self.insert(BOUNDARY_SYMBOL, SymbolKind::Boundary);
    }

    /// FNV-1a over the bytes of a rule name.
    pub fn hash_name(name: &str) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0100_0000_01b3;
        name.bytes()
            .fold(OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
    }

    fn bucket_of(&self, name: &str) -> usize {
        (Self::hash_name(name) % self.buckets.len() as u64) as usize
    }

    /// Arena index of the entry called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.buckets[self.bucket_of(name)]
            .iter()
            .copied()
            .find(|&idx| self.rules[idx].name == name)
    }

    /// Inserts a new entry or returns the index of the existing one.
    ///
    /// An `Undefined` entry is promoted when it is inserted again with a concrete kind,
    /// which is how forward references get resolved. A terminal whose text collides with a
    /// rule name becomes that non-terminal. Any other existing entry keeps its kind.
    pub fn insert(&mut self, name: &str, kind: SymbolKind) -> usize {
        if let Some(idx) = self.index_of(name) {
            let rule = &mut self.rules[idx];
            let promote = match rule.kind {
                SymbolKind::Undefined => kind != SymbolKind::Undefined,
                SymbolKind::Terminal => kind == SymbolKind::NonTerminal,
                _ => false,
            };
            if promote {
                rule.kind = kind;
            }
            return idx;
        }

        if self.rules.len() >= self.buckets.len() * MAX_LOAD_FACTOR {
            self.grow();
        }

        let idx = self.rules.len();
        self.rules.push(Rule::new(name, kind));
        let bucket = self.bucket_of(name);
        self.buckets[bucket].push(idx);
        idx
    }

    fn grow(&mut self) {
        let mut buckets = vec![Vec::new(); self.buckets.len() * 2];
        for (idx, rule) in self.rules.iter().enumerate() {
            let bucket = (Self::hash_name(&rule.name) % buckets.len() as u64) as usize;
            buckets[bucket].push(idx);
        }
        self.buckets = buckets;
    }

    pub fn lookup(&self, name: &str) -> Option<&Rule> {
        self.index_of(name).map(|idx| &self.rules[idx])
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Rule> {
        self.index_of(name).map(move |idx| &mut self.rules[idx])
    }

    pub fn get(&self, index: usize) -> Option<&Rule> {
        self.rules.get(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Rule> {
        self.rules.get_mut(index)
    }

    /// Appends an alternative to the rule called `name`.
    ///
    /// Returns `false` when no such rule exists. The alternative starts out non-recursive
    /// with unknown depth until the grammar is analysed again.
    pub fn add_production(&mut self, name: &str, production: Production) -> bool {
        match self.lookup_mut(name) {
            Some(rule) => {
                rule.productions.push(production);
                rule.recursive_productions.push(false);
                rule.production_depths.push(None);
                true
            }
            None => false,
        }
    }

    /// Drops every rule and bucket, leaving only the reserved entries.
    pub fn clear(&mut self) {
        self.rules.clear();
        self.buckets = vec![Vec::new(); INITIAL_BUCKETS];
        self.seed_reserved();
    }

    /// Number of entries, reserved markers included.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn non_terminals(&self) -> impl Iterator<Item = &Rule> {
        self.rules
            .iter()
            .filter(|rule| rule.kind == SymbolKind::NonTerminal)
    }

    pub fn undefined(&self) -> impl Iterator<Item = &Rule> {
        self.rules
            .iter()
            .filter(|rule| rule.kind == SymbolKind::Undefined)
    }
}
