use crate::config::GeMapConfig;
use crate::evolution::Genotype;
use crate::grammar::{Grammar, Symbol};
use log::debug;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use thiserror::Error;

/// Wrap ceiling used when no other limit is configured.
pub const DEFAULT_MAX_WRAPS: usize = 1_000_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    #[error("Grammar has no start symbol")]
    MissingStartSymbol,
    #[error("Non-terminal '{0}' has no rule in the grammar")]
    UndefinedSymbol(String),
    #[error("Genotype ran out of codons after {limit} wraps")]
    WrapLimitExceeded { limit: usize },
    #[error("Derivation exceeded the maximum depth of {limit}")]
    MaxDepthExceeded { limit: usize },
    #[error("Non-terminal '{0}' can never derive a terminal string")]
    UnboundedRecursion(String),
    #[error("Cannot map an empty genotype")]
    EmptyGenotype,
}

/// The result of mapping one genotype.
///
/// `productions` and `depths` run parallel to each other, one entry per expanded
/// non-terminal, and are only filled by [`GrammarMapper::map_with_trace`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mapping {
    pub phenotype: String,
    /// How many times reading restarted from the first codon.
    pub wraps: usize,
    /// Codons read in total, wrapped reads included.
    pub codons_used: usize,
    /// Non-empty terminals in emission order.
    pub tokens: Vec<String>,
    pub productions: Vec<usize>,
    pub depths: Vec<usize>,
    /// For every `<GEXOMarker>` reached, the number of codons read before it.
    pub markers: Vec<usize>,
    /// Deepest nesting level of any expanded non-terminal; the start symbol is level 1.
    pub depth: usize,
}

/// Struct that keeps track of the codon read cursor of a mapping in progress
struct MappingContext<'g> {
    /// Reference to the codons to map
    genotype: &'g [u32],
    /// Index of the next codon to read
    codon_idx: usize,
    wraps: usize,
    max_wraps: usize,
    codons_used: usize,
}

impl<'g> MappingContext<'g> {
    fn new(genotype: &'g [u32], max_wraps: usize) -> Self {
        Self {
            genotype,
            codon_idx: 0,
            wraps: 0,
            max_wraps,
            codons_used: 0,
        }
    }

    /// This function returns the next codon to map, wrapping to the start of the genotype
    /// when the end is reached.
    ///
    /// # Returns
    /// `Result<u32, MappingError>` - the codon, or `WrapLimitExceeded` once another wrap
    /// would go past `max_wraps`
    fn next_codon(&mut self) -> Result<u32, MappingError> {
        if self.genotype.is_empty() {
            return Err(MappingError::EmptyGenotype);
        }
        if self.codon_idx == self.genotype.len() {
            if self.wraps >= self.max_wraps {
                return Err(MappingError::WrapLimitExceeded {
                    limit: self.max_wraps,
                });
            }
            self.wraps += 1;
            self.codon_idx = 0;
        }
        let codon = self.genotype[self.codon_idx];
        self.codon_idx += 1;
        self.codons_used += 1;
        Ok(codon)
    }
}

/// This struct maps a genotype into its phenotype by walking the grammar.
///
/// Each non-terminal reads one codon and expands alternative `codon % alternatives`,
/// leftmost pending symbol first.
#[derive(Debug, Clone)]
pub struct GrammarMapper<'a> {
    /// The `Grammar` to be used for the mapping
    grammar: &'a Grammar,
    max_wraps: usize,
    /// Optional cap on the nesting level of expanded non-terminals
    max_depth: Option<usize>,
    /// Placed between consecutive terminals of the phenotype
    separator: String,
}

impl<'a> GrammarMapper<'a> {
    /// Creates a new `GrammarMapper` with the default wrap ceiling, no depth cap and no
    /// separator.
    pub fn new(grammar: &'a Grammar) -> Self {
        Self {
            grammar,
            max_wraps: DEFAULT_MAX_WRAPS,
            max_depth: None,
            separator: String::new(),
        }
    }

    pub fn from_config(grammar: &'a Grammar, config: &GeMapConfig) -> Self {
        Self::new(grammar)
            .with_max_wraps(config.effective_max_wraps(DEFAULT_MAX_WRAPS))
            .with_separator(&config.separator)
    }

    pub fn with_max_wraps(mut self, max_wraps: usize) -> Self {
        self.max_wraps = max_wraps;
        self
    }

    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_separator(mut self, separator: &str) -> Self {
        self.separator = separator.to_string();
        self
    }

    pub fn grammar(&self) -> &'a Grammar {
        self.grammar
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Maps a genotype to its phenotype without recording the derivation trace.
    pub fn map(&self, genotype: &[u32]) -> Result<Mapping, MappingError> {
        self.run(genotype, false)
    }

    /// Maps a genotype and records the chosen production and nesting depth of every
    /// expanded non-terminal.
    pub fn map_with_trace(&self, genotype: &[u32]) -> Result<Mapping, MappingError> {
        self.run(genotype, true)
    }

    /// Maps a batch of genotypes in parallel, preserving their order.
    pub fn map_all(&self, genotypes: &[Genotype]) -> Vec<Result<Mapping, MappingError>> {
        genotypes
            .par_iter()
            .map(|genotype| self.map_with_trace(genotype))
            .collect()
    }

    fn run(&self, genotype: &[u32], trace: bool) -> Result<Mapping, MappingError> {
        let start = self
            .grammar
            .start_symbol()
            .ok_or(MappingError::MissingStartSymbol)?;
        let root = Symbol::non_terminal(start);

        let mut context = MappingContext::new(genotype, self.max_wraps);
        let mut mapping = Mapping::default();
        // Pending symbols with their nesting level; the top of the stack is the leftmost.
        let mut stack: Vec<(&Symbol, usize)> = vec![(&root, 1)];

        while let Some((symbol, depth)) = stack.pop() {
            match symbol {
                Symbol::Terminal(text) => {
                    if !text.is_empty() {
                        mapping.tokens.push(text.clone());
                    }
                }
                Symbol::Marker => mapping.markers.push(context.codons_used),
                Symbol::CodonValue => {
                    let codon = context.next_codon()?;
                    mapping.tokens.push(codon.to_string());
                }
                Symbol::NonTerminal(name) => {
                    let rule = self
                        .grammar
                        .rule(name)
                        .ok_or_else(|| MappingError::UndefinedSymbol(name.clone()))?;
                    if rule.min_depth.is_none() || rule.productions.is_empty() {
                        return Err(MappingError::UnboundedRecursion(name.clone()));
                    }
                    if let Some(limit) = self.max_depth {
                        if depth > limit {
                            return Err(MappingError::MaxDepthExceeded { limit });
                        }
                    }

                    let codon = context.next_codon()?;
                    let choice = codon as usize % rule.productions.len();
                    mapping.depth = mapping.depth.max(depth);
                    if trace {
                        mapping.productions.push(choice);
                        mapping.depths.push(depth);
                    }
                    for child in rule.productions[choice].iter().rev() {
                        stack.push((child, depth + 1));
                    }
                }
            }
        }

        mapping.wraps = context.wraps;
        mapping.codons_used = context.codons_used;
        mapping.phenotype = mapping.tokens.join(&self.separator);
        debug!(
            "Mapped {} codons ({} wraps) to '{}'",
            mapping.codons_used, mapping.wraps, mapping.phenotype
        );
        Ok(mapping)
    }
}
