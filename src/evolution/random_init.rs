use crate::config::GeMapConfig;
use crate::evolution::mapper::{GrammarMapper, DEFAULT_MAX_WRAPS};
use crate::evolution::{Genotype, InitError, Initialised};
use crate::grammar::Grammar;
use log::debug;
use rand::Rng;

/// Draws uniformly random genotypes until one maps.
#[derive(Debug, Clone)]
pub struct RandomInitialiser<'a> {
    mapper: GrammarMapper<'a>,
    min_size: usize,
    max_size: usize,
    max_trials: usize,
}

impl<'a> RandomInitialiser<'a> {
    /// # Arguments
    /// * `mapper` - Used to check that a drawn genotype maps
    /// * `min_size`, `max_size` - Inclusive range of genotype lengths
    /// * `max_trials` - Draws before giving up
    pub fn new(
        mapper: GrammarMapper<'a>,
        min_size: usize,
        max_size: usize,
        max_trials: usize,
    ) -> Result<Self, InitError> {
        if min_size == 0 || min_size > max_size {
            return Err(InitError::InvalidGenomeSize {
                min: min_size,
                max: max_size,
            });
        }
        Ok(Self {
            mapper,
            min_size,
            max_size,
            max_trials,
        })
    }

    pub fn from_config(grammar: &'a Grammar, config: &GeMapConfig) -> Result<Self, InitError> {
        let mapper = GrammarMapper::new(grammar)
            .with_max_wraps(config.effective_max_wraps(DEFAULT_MAX_WRAPS))
            .with_separator(&config.separator);
        Self::new(
            mapper,
            config.min_rnd_genome_size,
            config.max_rnd_genome_size,
            config.max_trials,
        )
    }

    pub fn initialise<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Initialised, InitError> {
        for trial in 1..=self.max_trials {
            let length = rng.random_range(self.min_size..=self.max_size);
            let genotype: Genotype = (0..length).map(|_| rng.random()).collect();
            match self.mapper.map_with_trace(&genotype) {
                Ok(mapping) => {
                    return Ok(Initialised {
                        genotype,
                        mapping,
                        full_decisions: 0,
                        grow_decisions: 0,
                        trials: trial,
                    })
                }
                Err(e) => debug!("Random genotype {} of {} rejected: {}", trial, self.max_trials, e),
            }
        }
        Err(InitError::NoValidGenotype {
            trials: self.max_trials,
        })
    }
}
