//! Grammar-driven genotype-to-phenotype mapping for Grammatical Evolution.
//!
//! A [`grammar::Grammar`] is loaded from BNF or EBNF and analysed once. Genotypes are
//! then mapped to phenotypes with [`evolution::mapper::GrammarMapper`], recovered from
//! phenotypes with [`evolution::unmapper::Unmapper`], and seeded with an
//! [`evolution::Initialiser`].

pub mod config;
pub mod evolution;
pub mod grammar;
