use crate::config::GeMapConfig;
use crate::evolution::mapper::GrammarMapper;
use crate::evolution::Genotype;
use crate::grammar::{Grammar, Symbol};
use log::debug;
use thiserror::Error;

/// Floor of the automatic depth bound.
pub const DEFAULT_UNMAP_DEPTH: usize = 64;
pub const DEFAULT_STEP_BUDGET: usize = 1_000_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnmappingError {
    #[error("Grammar has no start symbol")]
    MissingStartSymbol,
    #[error("Non-terminal '{0}' has no rule in the grammar")]
    UndefinedSymbol(String),
    #[error("No derivation of the grammar produces '{0}'")]
    NoMatch(String),
    #[error("Gave up after exploring {limit} search states")]
    SearchLimitExceeded { limit: usize },
    #[error("No derivation within the maximum depth of {limit} produces '{phenotype}'")]
    DepthLimitExceeded { phenotype: String, limit: usize },
}

/// One partial derivation: how much of the phenotype it accounts for, what is still
/// pending, and the codons chosen so far.
#[derive(Debug, Clone)]
struct SearchState<'g> {
    pos: usize,
    /// Whether a non-empty token has been matched yet, so the next one needs a separator.
    emitted: bool,
    /// Pending symbols with their nesting level; the top of the stack is the leftmost.
    pending: Vec<(&'g Symbol, usize)>,
    codons: Genotype,
}

/// Recovers a genotype that maps back to a given phenotype.
///
/// The search is a depth-first parse of the phenotype against the grammar. Alternatives
/// are tried in declared order and each choice contributes its index as the codon, so the
/// result is one valid encoding, not necessarily the shortest.
///
/// Without an explicit depth bound the search allows `(len + 1) * rules` levels for a
/// phenotype of `len` bytes. A shortest derivation never nests the same rule twice over
/// the same span of the input, so every derivable phenotype has one within that bound.
#[derive(Debug, Clone)]
pub struct Unmapper<'a> {
    grammar: &'a Grammar,
    separator: String,
    max_depth: Option<usize>,
    step_budget: usize,
}

impl<'a> Unmapper<'a> {
    pub fn new(grammar: &'a Grammar) -> Self {
        Self {
            grammar,
            separator: String::new(),
            max_depth: None,
            step_budget: DEFAULT_STEP_BUDGET,
        }
    }

    pub fn from_config(grammar: &'a Grammar, config: &GeMapConfig) -> Self {
        Self::new(grammar).with_separator(&config.separator)
    }

    /// An unmapper for phenotypes produced by `mapper`.
    pub fn for_mapper(mapper: &GrammarMapper<'a>) -> Self {
        Self::new(mapper.grammar()).with_separator(mapper.separator())
    }

    /// Must match the separator the phenotype was mapped with.
    pub fn with_separator(mut self, separator: &str) -> Self {
        self.separator = separator.to_string();
        self
    }

    /// Caps the nesting level of expanded non-terminals. A phenotype that only has
    /// deeper derivations fails with `DepthLimitExceeded`.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    fn depth_bound(&self, phenotype: &str) -> usize {
        self.max_depth.unwrap_or_else(|| {
            (phenotype.len() + 1)
                .saturating_mul(self.grammar.rule_count())
                .max(DEFAULT_UNMAP_DEPTH)
        })
    }

    pub fn with_step_budget(mut self, step_budget: usize) -> Self {
        self.step_budget = step_budget;
        self
    }

    pub fn unmap(&self, phenotype: &str) -> Result<Genotype, UnmappingError> {
        let start = self
            .grammar
            .start_symbol()
            .ok_or(UnmappingError::MissingStartSymbol)?;
        let root = Symbol::non_terminal(start);
        let max_depth = self.depth_bound(phenotype);

        let mut stack = vec![SearchState {
            pos: 0,
            emitted: false,
            pending: vec![(&root, 1)],
            codons: Vec::new(),
        }];
        let mut steps = 0;
        let mut pruned = false;

        while let Some(mut state) = stack.pop() {
            steps += 1;
            if steps > self.step_budget {
                return Err(UnmappingError::SearchLimitExceeded {
                    limit: self.step_budget,
                });
            }

            // Consume symbols until the state dies, completes, or branches.
            loop {
                let Some((symbol, depth)) = state.pending.pop() else {
                    if state.pos == phenotype.len() {
                        debug!(
                            "Unmapped '{}' to {} codons in {} steps",
                            phenotype,
                            state.codons.len(),
                            steps
                        );
                        return Ok(state.codons);
                    }
                    break;
                };
                match symbol {
                    Symbol::Marker => {}
                    Symbol::Terminal(text) if text.is_empty() => {}
                    Symbol::Terminal(text) => match self.match_token(phenotype, &state, text) {
                        Some(end) => {
                            state.pos = end;
                            state.emitted = true;
                        }
                        None => break,
                    },
                    Symbol::CodonValue => {
                        self.branch_codon_value(phenotype, &state, &mut stack);
                        break;
                    }
                    Symbol::NonTerminal(name) => {
                        pruned |= self.branch_rule(name, depth, max_depth, &state, &mut stack)?;
                        break;
                    }
                }
            }
        }

        if pruned {
            return Err(UnmappingError::DepthLimitExceeded {
                phenotype: phenotype.to_string(),
                limit: max_depth,
            });
        }
        Err(UnmappingError::NoMatch(phenotype.to_string()))
    }

    /// Position just after the separator that must precede the next token.
    fn token_start(&self, phenotype: &str, state: &SearchState) -> Option<usize> {
        if state.emitted && !self.separator.is_empty() {
            phenotype[state.pos..]
                .starts_with(&self.separator)
                .then(|| state.pos + self.separator.len())
        } else {
            Some(state.pos)
        }
    }

    fn match_token(&self, phenotype: &str, state: &SearchState, text: &str) -> Option<usize> {
        let start = self.token_start(phenotype, state)?;
        phenotype[start..]
            .starts_with(text)
            .then(|| start + text.len())
    }

    /// Every digit run at the cursor that a codon could have printed, longest tried first.
    fn branch_codon_value<'g>(
        &self,
        phenotype: &str,
        state: &SearchState<'g>,
        stack: &mut Vec<SearchState<'g>>,
    ) {
        let Some(start) = self.token_start(phenotype, state) else {
            return;
        };
        let rest = &phenotype[start..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        for len in 1..=digits {
            if len > 1 && rest.starts_with('0') {
                break;
            }
            let Ok(value) = rest[..len].parse::<u32>() else {
                break;
            };
            let mut next = state.clone();
            next.pos = start + len;
            next.emitted = true;
            next.codons.push(value);
            stack.push(next);
        }
    }

    /// Pushes one successor per alternative that fits under the depth bound, so that the
    /// first declared alternative is explored first. Returns whether any alternative was
    /// left out for being too deep.
    fn branch_rule<'g>(
        &self,
        name: &str,
        depth: usize,
        max_depth: usize,
        state: &SearchState<'g>,
        stack: &mut Vec<SearchState<'g>>,
    ) -> Result<bool, UnmappingError>
    where
        'a: 'g,
    {
        let rule = self
            .grammar
            .rule(name)
            .ok_or_else(|| UnmappingError::UndefinedSymbol(name.to_string()))?;

        let mut pruned = false;
        for (choice, production) in rule.productions.iter().enumerate().rev() {
            let Some(min_depth) = rule.production_depths.get(choice).copied().flatten() else {
                continue;
            };
            if depth + min_depth as usize - 1 > max_depth {
                pruned = true;
                continue;
            }
            let mut next = state.clone();
            next.codons.push(choice as u32);
            for child in production.iter().rev() {
                next.pending.push((child, depth + 1));
            }
            stack.push(next);
        }
        Ok(pruned)
    }
}
