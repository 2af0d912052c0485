use gemap::config::GeMapConfig;
use gemap::evolution::mapper::GrammarMapper;
use gemap::evolution::unmapper::Unmapper;
use gemap::evolution::Initialiser;
use gemap::grammar::Grammar;
use std::env;
use std::path::Path;
use std::process;

/// Reads the configuration named on the command line, or `gemap.toml`.
///
/// A missing default file is not an error: the built-in defaults are used instead.
fn load_config() -> Result<GeMapConfig, String> {
    match env::args().nth(1) {
        Some(path) => GeMapConfig::load(Path::new(&path))
            .map_err(|e| format!("Failed to load configuration '{}': {}", path, e)),
        None => {
            let default_path = Path::new("gemap.toml");
            if default_path.exists() {
                GeMapConfig::load(default_path)
                    .map_err(|e| format!("Failed to load configuration 'gemap.toml': {}", e))
            } else {
                log::warn!("No gemap.toml found, using default configuration.");
                Ok(GeMapConfig::default())
            }
        }
    }
}

fn main() {
    env_logger::init();
    log::info!("Booting gemap...");

    // 1. Load and Validate Configuration
    let config = match load_config() {
        Ok(c) => c,
        Err(e) => {
            log::error!("{}", e);
            process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        log::error!("Invalid configuration: {}", e);
        process::exit(1);
    }
    match config.output_params() {
        Ok(params) => log::info!("Configuration loaded and validated:\n{}", params),
        Err(e) => log::warn!("Could not render configuration: {}", e),
    }

    // 2. Load Grammar
    let grammar = match Grammar::from_file(Path::new(&config.grammar_file)) {
        Ok(g) => g,
        Err(e) => {
            log::error!("Failed to load grammar: {}", e);
            process::exit(1);
        }
    };
    log::info!("Grammar '{}' loaded successfully.", config.grammar_file);

    // 3. Seed the population
    let initialiser = match Initialiser::from_config(&grammar, &config) {
        Ok(i) => i,
        Err(e) => {
            log::error!("Invalid initialiser settings: {}", e);
            process::exit(1);
        }
    };
    let population =
        match initialiser.initialise_population(config.population_size, &mut rand::rng()) {
            Ok(p) => p,
            Err(e) => {
                log::error!("Initialisation failed: {}", e);
                process::exit(1);
            }
        };

    // 4. Map every genotype again, recover a genotype from each phenotype and report
    let mapper = GrammarMapper::from_config(&grammar, &config);
    let unmapper = Unmapper::for_mapper(&mapper);
    let genotypes: Vec<_> = population.iter().map(|i| i.genotype.clone()).collect();
    for (i, result) in mapper.map_all(&genotypes).into_iter().enumerate() {
        println!("\n[Individual {}] {} codons", i + 1, genotypes[i].len());
        match result {
            Ok(mapping) => {
                println!(
                    "  depth {}, {} wraps: {}",
                    mapping.depth, mapping.wraps, mapping.phenotype
                );
                match unmapper.unmap(&mapping.phenotype) {
                    Ok(recovered) => println!("  - Unmapped to {} codons", recovered.len()),
                    Err(e) => println!("  - Failed to unmap phenotype: {}", e),
                }
            }
            Err(e) => println!("  - Failed to map genotype: {}", e),
        }
    }
}
