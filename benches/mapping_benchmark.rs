use criterion::{criterion_group, criterion_main, Criterion};
use gemap::evolution::mapper::GrammarMapper;
use gemap::evolution::sensible_init::SensibleInitialiser;
use gemap::evolution::unmapper::Unmapper;
use gemap::evolution::Genotype;
use gemap::grammar::Grammar;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::hint::black_box;

const GRAMMAR: &str = "
<expr>  ::= <term> | <term> <op> <expr> | ( <expr> )
<term>  ::= <var> | <const>
<op>    ::= + | - | * | /
<var>   ::= x | y
<const> ::= <digit> . <digit>
<digit> ::= 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9
";

// Helper to build a fixed population of valid genotypes
fn setup_population(grammar: &Grammar) -> Vec<Genotype> {
    let init = SensibleInitialiser::new(grammar, 3, 10, 0.5, 100).unwrap();
    let mut rng = StdRng::seed_from_u64(2024);
    (0..256)
        .map(|_| init.initialise(&mut rng).unwrap().genotype)
        .collect()
}

fn benchmark_mapping(c: &mut Criterion) {
    let grammar = Grammar::from_bnf(GRAMMAR).unwrap();
    let population = setup_population(&grammar);
    let mapper = GrammarMapper::new(&grammar);

    let mut group = c.benchmark_group("GrammarMapper Performance");

    group.bench_function("map_serial", |b| {
        b.iter(|| {
            for genotype in &population {
                let _ = black_box(mapper.map(black_box(genotype)));
            }
        })
    });

    group.bench_function("map_all_parallel", |b| {
        b.iter(|| black_box(mapper.map_all(black_box(&population))))
    });

    group.finish();
}

fn benchmark_initialisation(c: &mut Criterion) {
    let grammar = Grammar::from_bnf(GRAMMAR).unwrap();
    let init = SensibleInitialiser::new(&grammar, 3, 10, 0.5, 100).unwrap();
    let mut rng = StdRng::seed_from_u64(7);

    c.bench_function("sensible_initialise", |b| {
        b.iter(|| black_box(init.initialise(&mut rng)))
    });
}

fn benchmark_unmapping(c: &mut Criterion) {
    let grammar = Grammar::from_bnf(GRAMMAR).unwrap();
    let mapper = GrammarMapper::new(&grammar);
    let unmapper = Unmapper::for_mapper(&mapper);
    let phenotypes: Vec<String> = setup_population(&grammar)
        .iter()
        .take(32)
        .filter_map(|g| mapper.map(g).ok())
        .map(|m| m.phenotype)
        .collect();

    c.bench_function("unmap", |b| {
        b.iter(|| {
            for phenotype in &phenotypes {
                let _ = black_box(unmapper.unmap(black_box(phenotype)));
            }
        })
    });
}

criterion_group!(
    benches,
    benchmark_mapping,
    benchmark_initialisation,
    benchmark_unmapping
);
criterion_main!(benches);
