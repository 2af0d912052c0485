use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    FileReadError(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialise configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Unknown initialiser '{0}', expected RND or SI")]
    UnknownInitialiser(String),
}

/// Which strategy seeds the initial genotypes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialiserKind {
    /// Uniform random codons of random length.
    #[serde(rename = "RND")]
    Random,
    /// Depth-bounded derivation trees grown with a full/grow mix.
    #[serde(rename = "SI")]
    #[default]
    Sensible,
}

impl InitialiserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitialiserKind::Random => "RND",
            InitialiserKind::Sensible => "SI",
        }
    }

    /// One-line human description, used when logging the run parameters.
    pub fn details(&self) -> &'static str {
        match self {
            InitialiserKind::Random => "random initialisation (RND)",
            InitialiserKind::Sensible => "sensible initialisation (SI)",
        }
    }
}

impl fmt::Display for InitialiserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InitialiserKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RND" | "RANDOM" => Ok(InitialiserKind::Random),
            "SI" | "SENSIBLE" => Ok(InitialiserKind::Sensible),
            _ => Err(ConfigError::UnknownInitialiser(s.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GeMapConfig {
    pub grammar_file: String,
    /// 0 means "use the mapper's own ceiling".
    pub max_wraps: usize,
    pub initialiser: InitialiserKind,
    pub min_rnd_genome_size: usize,
    pub max_rnd_genome_size: usize,
    pub si_min_depth: usize,
    pub si_max_depth: usize,
    /// Fraction of sensible-initialisation decisions that are "full" rather than "grow".
    pub si_tail_ratio: f64,
    /// Longest genotype sensible initialisation may produce; 0 means no limit.
    pub si_max_genome_size: usize,
    pub max_trials: usize,
    pub separator: String,
    pub population_size: usize,
}

impl Default for GeMapConfig {
    fn default() -> Self {
        Self {
            grammar_file: "grammar.bnf".to_string(),
            max_wraps: 0,
            initialiser: InitialiserKind::Sensible,
            min_rnd_genome_size: 100,
            max_rnd_genome_size: 100,
            si_min_depth: 0,
            si_max_depth: 15,
            si_tail_ratio: 0.5,
            si_max_genome_size: 0,
            max_trials: 10_000,
            separator: String::new(),
            population_size: 10,
        }
    }
}

impl GeMapConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: GeMapConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Checks that the options are mutually consistent.
    ///
    /// # Returns
    /// * `Result<(), ConfigError>` - `ConfigError::Invalid` naming the first offending option
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_rnd_genome_size == 0 {
            return Err(ConfigError::Invalid(
                "min_rnd_genome_size must be at least 1".to_string(),
            ));
        }
        if self.min_rnd_genome_size > self.max_rnd_genome_size {
            return Err(ConfigError::Invalid(format!(
                "min_rnd_genome_size ({}) is larger than max_rnd_genome_size ({})",
                self.min_rnd_genome_size, self.max_rnd_genome_size
            )));
        }
        if self.si_min_depth > self.si_max_depth {
            return Err(ConfigError::Invalid(format!(
                "si_min_depth ({}) is larger than si_max_depth ({})",
                self.si_min_depth, self.si_max_depth
            )));
        }
        if !(0.0..=1.0).contains(&self.si_tail_ratio) {
            return Err(ConfigError::Invalid(format!(
                "si_tail_ratio must be within [0, 1], got {}",
                self.si_tail_ratio
            )));
        }
        if self.max_trials == 0 {
            return Err(ConfigError::Invalid("max_trials must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn set_initialiser_str(&mut self, name: &str) -> Result<(), ConfigError> {
        self.initialiser = name.parse()?;
        Ok(())
    }

    pub fn initialiser_str(&self) -> &'static str {
        self.initialiser.as_str()
    }

    /// The configured wrap limit, or `ceiling` when none is configured.
    pub fn effective_max_wraps(&self, ceiling: usize) -> usize {
        if self.max_wraps == 0 {
            ceiling
        } else {
            self.max_wraps.min(ceiling)
        }
    }

    /// The full parameter set as TOML, suitable for logging next to results.
    pub fn output_params(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = GeMapConfig::default();
        assert_eq!(config.grammar_file, "grammar.bnf");
        assert_eq!(config.initialiser, InitialiserKind::Sensible);
        assert_eq!(config.si_max_depth, 15);
        assert_eq!(config.max_trials, 10_000);
        assert_eq!(config.si_max_genome_size, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "initialiser = \"RND\"\nmin_rnd_genome_size = 20\nmax_rnd_genome_size = 40\nseparator = \" \"\n"
        )
        .unwrap();
        let config = GeMapConfig::load(file.path()).unwrap();
        assert_eq!(config.initialiser, InitialiserKind::Random);
        assert_eq!((config.min_rnd_genome_size, config.max_rnd_genome_size), (20, 40));
        assert_eq!(config.separator, " ");
        assert_eq!(config.si_tail_ratio, 0.5);
    }

    #[test]
    fn test_load_rejects_unknown_initialiser() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "initialiser = \"GP\"\n").unwrap();
        assert!(matches!(
            GeMapConfig::load(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validate_catches_bad_values() {
        let bad = [
            GeMapConfig {
                min_rnd_genome_size: 50,
                max_rnd_genome_size: 10,
                ..Default::default()
            },
            GeMapConfig {
                min_rnd_genome_size: 0,
                ..Default::default()
            },
            GeMapConfig {
                si_min_depth: 20,
                ..Default::default()
            },
            GeMapConfig {
                si_tail_ratio: 1.5,
                ..Default::default()
            },
            GeMapConfig {
                max_trials: 0,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))), "{:?}", config);
        }
    }

    #[test]
    fn test_initialiser_strings() {
        let mut config = GeMapConfig::default();
        config.set_initialiser_str("rnd").unwrap();
        assert_eq!(config.initialiser_str(), "RND");
        config.set_initialiser_str("Sensible").unwrap();
        assert_eq!(config.initialiser, InitialiserKind::Sensible);
        assert!(matches!(
            config.set_initialiser_str("ramped"),
            Err(ConfigError::UnknownInitialiser(_))
        ));
        assert_eq!(InitialiserKind::Random.to_string(), "RND");
    }

    #[test]
    fn test_effective_max_wraps() {
        let mut config = GeMapConfig::default();
        assert_eq!(config.effective_max_wraps(1_000_000), 1_000_000);
        config.max_wraps = 3;
        assert_eq!(config.effective_max_wraps(1_000_000), 3);
    }

    #[test]
    fn test_output_params_round_trips() {
        let config = GeMapConfig {
            initialiser: InitialiserKind::Random,
            separator: " ".to_string(),
            ..Default::default()
        };
        let params = config.output_params().unwrap();
        assert!(params.contains("initialiser = \"RND\""));
        let parsed: GeMapConfig = toml::from_str(&params).unwrap();
        assert_eq!(parsed, config);
    }
}
