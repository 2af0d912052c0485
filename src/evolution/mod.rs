pub mod mapper;
pub mod random_init;
pub mod sensible_init;
pub mod unmapper;

use crate::config::{GeMapConfig, InitialiserKind};
use crate::evolution::mapper::{Mapping, MappingError};
use crate::evolution::random_init::RandomInitialiser;
use crate::evolution::sensible_init::SensibleInitialiser;
use crate::grammar::Grammar;
use log::info;
use rand::Rng;
use thiserror::Error;

/// A genotype is a vector of codons, each selecting one alternative of a rule.
pub type Genotype = Vec<u32>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InitError {
    #[error("No valid genotype found after {trials} trials")]
    NoValidGenotype { trials: usize },
    #[error("Start symbol needs depth {required} but the maximum depth is {max_depth}")]
    DepthBoundTooSmall { required: usize, max_depth: usize },
    #[error("Start symbol can never derive a terminal string")]
    UnboundedStartSymbol,
    #[error("Invalid genome size range [{min}, {max}]")]
    InvalidGenomeSize { min: usize, max: usize },
    #[error("Tail ratio {0} is outside [0, 1]")]
    InvalidTailRatio(f64),
    #[error(transparent)]
    Mapping(#[from] MappingError),
}

/// One freshly initialised individual together with how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Initialised {
    pub genotype: Genotype,
    /// The mapping of `genotype`, derivation trace included.
    pub mapping: Mapping,
    pub full_decisions: usize,
    pub grow_decisions: usize,
    /// Attempts made, the successful one included.
    pub trials: usize,
}

/// The configured initialisation strategy.
#[derive(Debug, Clone)]
pub enum Initialiser<'a> {
    Random(RandomInitialiser<'a>),
    Sensible(SensibleInitialiser<'a>),
}

impl<'a> Initialiser<'a> {
    pub fn from_config(grammar: &'a Grammar, config: &GeMapConfig) -> Result<Self, InitError> {
        Ok(match config.initialiser {
            InitialiserKind::Random => {
                Initialiser::Random(RandomInitialiser::from_config(grammar, config)?)
            }
            InitialiserKind::Sensible => {
                Initialiser::Sensible(SensibleInitialiser::from_config(grammar, config)?)
            }
        })
    }

    pub fn kind(&self) -> InitialiserKind {
        match self {
            Initialiser::Random(_) => InitialiserKind::Random,
            Initialiser::Sensible(_) => InitialiserKind::Sensible,
        }
    }

    pub fn initialise<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Initialised, InitError> {
        match self {
            Initialiser::Random(init) => init.initialise(rng),
            Initialiser::Sensible(init) => init.initialise(rng),
        }
    }

    /// Seeds a population of `count` individuals.
    ///
    /// # Arguments
    /// * `count` - Number of individuals to create
    /// * `rng` - Source of randomness; pass a seeded one for reproducible runs
    ///
    /// # Returns
    /// * `Result<Vec<Initialised>, InitError>` - Fails on the first individual that cannot
    /// be initialised
    pub fn initialise_population<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<Initialised>, InitError> {
        let population = (0..count)
            .map(|_| self.initialise(rng))
            .collect::<Result<Vec<_>, _>>()?;

        let trials: usize = population.iter().map(|i| i.trials).sum();
        let full: usize = population.iter().map(|i| i.full_decisions).sum();
        let grow: usize = population.iter().map(|i| i.grow_decisions).sum();
        info!(
            "Initialised {} individuals with {} in {} trials ({} full / {} grow decisions)",
            population.len(),
            self.kind().details(),
            trials,
            full,
            grow
        );
        Ok(population)
    }
}
