use crate::config::GeMapConfig;
use crate::evolution::mapper::{Mapping, MappingError};
use crate::evolution::{Genotype, InitError, Initialised};
use crate::grammar::{Grammar, Symbol};
use log::debug;
use rand::seq::IndexedRandom;
use rand::Rng;

/// Spreads "full" decisions evenly over a derivation.
///
/// After `k` decisions exactly `floor(target * k + phase)` of them have been full, so the
/// running fraction never drifts more than one decision away from `target`. The random
/// phase keeps short trees from always starting the same way.
#[derive(Debug, Clone)]
struct TailRatio {
    target: f64,
    phase: f64,
    decisions: usize,
    full: usize,
}

impl TailRatio {
    fn new(target: f64, phase: f64) -> Self {
        Self {
            target,
            phase,
            decisions: 0,
            full: 0,
        }
    }

    fn next_is_full(&mut self) -> bool {
        self.decisions += 1;
        let quota = (self.target * self.decisions as f64 + self.phase).floor() as usize;
        let full = quota > self.full;
        if full {
            self.full += 1;
        }
        full
    }

    fn grow(&self) -> usize {
        self.decisions - self.full
    }
}

/// Codon that selects `choice` out of `alternatives` under `codon % alternatives`, drawn
/// uniformly among all such `u32` values.
fn encode_choice<R: Rng + ?Sized>(choice: usize, alternatives: usize, rng: &mut R) -> u32 {
    let choice = choice as u32;
    let alternatives = alternatives as u32;
    let max_k = (u32::MAX - choice) / alternatives;
    choice + alternatives * rng.random_range(0..=max_k)
}

/// Grows derivation trees top-down within a depth window and encodes them as genotypes.
#[derive(Debug, Clone)]
pub struct SensibleInitialiser<'a> {
    grammar: &'a Grammar,
    min_depth: usize,
    max_depth: usize,
    tail_ratio: f64,
    max_trials: usize,
    /// Trees whose genotype would grow past this many codons are abandoned and regrown.
    max_length: Option<usize>,
    separator: String,
}

impl<'a> SensibleInitialiser<'a> {
    /// # Arguments
    /// * `grammar` - Analysed grammar to grow trees from
    /// * `min_depth` - Trees shallower than this are rejected and regrown
    /// * `max_depth` - No non-terminal is expanded below this level; the start symbol is level 1
    /// * `tail_ratio` - Target fraction of full decisions, within [0, 1]
    /// * `max_trials` - Trees grown before giving up
    pub fn new(
        grammar: &'a Grammar,
        min_depth: usize,
        max_depth: usize,
        tail_ratio: f64,
        max_trials: usize,
    ) -> Result<Self, InitError> {
        if !(0.0..=1.0).contains(&tail_ratio) {
            return Err(InitError::InvalidTailRatio(tail_ratio));
        }
        Ok(Self {
            grammar,
            min_depth,
            max_depth,
            tail_ratio,
            max_trials,
            max_length: None,
            separator: String::new(),
        })
    }

    pub fn from_config(grammar: &'a Grammar, config: &GeMapConfig) -> Result<Self, InitError> {
        Ok(Self::new(
            grammar,
            config.si_min_depth,
            config.si_max_depth,
            config.si_tail_ratio,
            config.max_trials,
        )?
        .with_max_length((config.si_max_genome_size > 0).then_some(config.si_max_genome_size))
        .with_separator(&config.separator))
    }

    pub fn with_separator(mut self, separator: &str) -> Self {
        self.separator = separator.to_string();
        self
    }

    pub fn with_max_length(mut self, max_length: Option<usize>) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn initialise<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Initialised, InitError> {
        self.initialise_with_ratio(self.tail_ratio, rng)
    }

    /// Grows one individual aiming for `tail_ratio` instead of the configured ratio.
    pub fn initialise_with_ratio<R: Rng + ?Sized>(
        &self,
        tail_ratio: f64,
        rng: &mut R,
    ) -> Result<Initialised, InitError> {
        if !(0.0..=1.0).contains(&tail_ratio) {
            return Err(InitError::InvalidTailRatio(tail_ratio));
        }
        let start = self
            .grammar
            .start_rule()
            .ok_or(MappingError::MissingStartSymbol)?;
        let required = start.min_depth.ok_or(InitError::UnboundedStartSymbol)? as usize;
        if required > self.max_depth {
            return Err(InitError::DepthBoundTooSmall {
                required,
                max_depth: self.max_depth,
            });
        }

        for trial in 1..=self.max_trials {
            let Some((genotype, mapping, ratio)) = self.grow_tree(&start.name, tail_ratio, rng)?
            else {
                debug!(
                    "Sensible tree {} of {} rejected: genotype longer than {} codons",
                    trial,
                    self.max_trials,
                    self.max_length.unwrap_or_default()
                );
                continue;
            };
            if mapping.depth < self.min_depth {
                debug!(
                    "Sensible tree {} of {} rejected: depth {} below minimum {}",
                    trial, self.max_trials, mapping.depth, self.min_depth
                );
                continue;
            }
            return Ok(Initialised {
                genotype,
                mapping,
                full_decisions: ratio.full,
                grow_decisions: ratio.grow(),
                trials: trial,
            });
        }
        Err(InitError::NoValidGenotype {
            trials: self.max_trials,
        })
    }

    /// Grows one tree, building its genotype and mapping trace in the same pass.
    ///
    /// Returns `None` as soon as the genotype outgrows `max_length`.
    fn grow_tree<R: Rng + ?Sized>(
        &self,
        start: &str,
        tail_ratio: f64,
        rng: &mut R,
    ) -> Result<Option<(Genotype, Mapping, TailRatio)>, InitError> {
        let root = Symbol::non_terminal(start);
        let mut ratio = TailRatio::new(tail_ratio, rng.random::<f64>());
        let mut genotype = Genotype::new();
        let mut mapping = Mapping::default();
        let mut stack: Vec<(&Symbol, usize)> = vec![(&root, 1)];

        while let Some((symbol, depth)) = stack.pop() {
            if self.max_length.is_some_and(|cap| genotype.len() > cap) {
                return Ok(None);
            }
            match symbol {
                Symbol::Terminal(text) => {
                    if !text.is_empty() {
                        mapping.tokens.push(text.clone());
                    }
                }
                Symbol::Marker => mapping.markers.push(genotype.len()),
                Symbol::CodonValue => {
                    let codon: u32 = rng.random();
                    genotype.push(codon);
                    mapping.tokens.push(codon.to_string());
                }
                Symbol::NonTerminal(name) => {
                    let rule = self
                        .grammar
                        .rule(name)
                        .ok_or_else(|| MappingError::UndefinedSymbol(name.clone()))?;

                    // Levels left for this subtree, this one included.
                    let budget = (self.max_depth + 1).saturating_sub(depth);
                    let legal: Vec<(usize, usize)> = rule
                        .production_depths
                        .iter()
                        .enumerate()
                        .filter_map(|(i, d)| d.map(|d| (i, d as usize)))
                        .filter(|&(_, d)| d <= budget)
                        .collect();
                    let shallowest = legal
                        .iter()
                        .map(|&(_, d)| d)
                        .min()
                        .ok_or(MappingError::MaxDepthExceeded {
                            limit: self.max_depth,
                        })?;

                    let candidates: Vec<usize> = if ratio.next_is_full() {
                        legal
                            .iter()
                            .filter(|&&(_, d)| d == shallowest)
                            .map(|&(i, _)| i)
                            .collect()
                    } else {
                        legal.iter().map(|&(i, _)| i).collect()
                    };
                    let choice = *candidates.choose(rng).ok_or(MappingError::MaxDepthExceeded {
                        limit: self.max_depth,
                    })?;

                    genotype.push(encode_choice(choice, rule.productions.len(), rng));
                    mapping.productions.push(choice);
                    mapping.depths.push(depth);
                    mapping.depth = mapping.depth.max(depth);
                    for child in rule.productions[choice].iter().rev() {
                        stack.push((child, depth + 1));
                    }
                }
            }
        }

        if self.max_length.is_some_and(|cap| genotype.len() > cap) {
            return Ok(None);
        }
        mapping.codons_used = genotype.len();
        mapping.phenotype = mapping.tokens.join(&self.separator);
        Ok(Some((genotype, mapping, ratio)))
    }
}
