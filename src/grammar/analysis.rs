use crate::grammar::symbol_table::{Symbol, SymbolKind, SymbolTable};
use log::{debug, warn};
use std::collections::{HashSet, VecDeque};

/// Annotates every non-terminal with its recursion flags and minimum depths.
///
/// Depth of an alternative is one plus the deepest of its symbols, where terminals, codon
/// values and markers count 0. A rule's depth is the shallowest of its alternatives.
/// Depths are relaxed until nothing changes; alternatives that can never bottom out keep
/// `None`.
///
/// # Arguments
/// * `table` - The symbol table to annotate in place
pub fn update_recursion_and_depth(table: &mut SymbolTable) {
    let rule_indices: Vec<usize> = (0..table.len())
        .filter(|&idx| table.get(idx).is_some_and(|r| r.kind == SymbolKind::NonTerminal))
        .collect();

    for &idx in &rule_indices {
        if let Some(rule) = table.get_mut(idx) {
            let n = rule.productions.len();
            rule.production_depths = vec![None; n];
            rule.recursive_productions = vec![false; n];
            rule.min_depth = None;
            rule.recursive = false;
        }
    }

    let passes = relax_depths(table, &rule_indices);
    debug!("Depth analysis converged after {} passes", passes);

    mark_recursion(table, &rule_indices);

    for rule in table.non_terminals().filter(|r| r.min_depth.is_none()) {
        warn!(
            "Rule '{}' can never derive a terminal string and will not be expanded",
            rule.name
        );
    }
}

/// Depth contributed by one symbol given the depths known so far.
fn symbol_depth(table: &SymbolTable, symbol: &Symbol) -> Option<u32> {
    match symbol {
        Symbol::NonTerminal(name) => match table.lookup(name) {
            Some(rule) if rule.kind == SymbolKind::NonTerminal => rule.min_depth,
            // undefined references are reported when they are expanded
            _ => Some(0),
        },
        _ => Some(0),
    }
}

fn relax_depths(table: &mut SymbolTable, rule_indices: &[usize]) -> usize {
    let mut passes = 0;
    loop {
        passes += 1;
        let mut changed = false;
        for &idx in rule_indices {
            let Some(rule) = table.get(idx) else { continue };
            let depths: Vec<Option<u32>> = rule
                .productions
                .iter()
                .map(|production| {
                    production
                        .iter()
                        .try_fold(0u32, |deepest, symbol| {
                            symbol_depth(table, symbol).map(|d| deepest.max(d))
                        })
                        .map(|deepest| deepest + 1)
                })
                .collect();
            if depths == rule.production_depths {
                continue;
            }
            let min_depth = depths.iter().flatten().copied().min();
            if let Some(rule) = table.get_mut(idx) {
                rule.production_depths = depths;
                rule.min_depth = min_depth;
                changed = true;
            }
        }
        if !changed {
            return passes;
        }
    }
}

/// Rule indices referenced by each alternative of the rule at `idx`.
fn referenced_rules(table: &SymbolTable, idx: usize) -> Vec<Vec<usize>> {
    table.get(idx).map_or_else(Vec::new, |rule| {
        rule.productions
            .iter()
            .map(|production| {
                production
                    .iter()
                    .filter_map(|symbol| match symbol {
                        Symbol::NonTerminal(name) => table.index_of(name),
                        _ => None,
                    })
                    .collect()
            })
            .collect()
    })
}

/// True when `target` can be reached from any of `from` by following rule references.
fn reaches(table: &SymbolTable, from: &[usize], target: usize) -> bool {
    let mut seen: HashSet<usize> = from.iter().copied().collect();
    let mut queue: VecDeque<usize> = from.iter().copied().collect();
    while let Some(current) = queue.pop_front() {
        if current == target {
            return true;
        }
        for next in referenced_rules(table, current).into_iter().flatten() {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    false
}

fn mark_recursion(table: &mut SymbolTable, rule_indices: &[usize]) {
    for &idx in rule_indices {
        let flags: Vec<bool> = referenced_rules(table, idx)
            .iter()
            .map(|refs| reaches(table, refs, idx))
            .collect();
        if let Some(rule) = table.get_mut(idx) {
            rule.recursive = flags.iter().any(|&f| f);
            rule.recursive_productions = flags;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::symbol_table::Production;

    fn table_with(rules: &[(&str, Vec<Production>)]) -> SymbolTable {
        let mut table = SymbolTable::new();
        for (name, productions) in rules {
            table.insert(name, SymbolKind::NonTerminal);
            for production in productions {
                table.add_production(name, production.clone());
            }
        }
        table
    }

    fn t(text: &str) -> Symbol {
        Symbol::terminal(text)
    }

    fn nt(name: &str) -> Symbol {
        Symbol::non_terminal(name)
    }

    #[test]
    fn test_depths_of_simple_recursive_grammar() {
        // <S> ::= <A>b | c ;  <A> ::= a | a<A> ;
        let mut table = table_with(&[
            ("<S>", vec![vec![nt("<A>"), t("b")], vec![t("c")]]),
            ("<A>", vec![vec![t("a")], vec![t("a"), nt("<A>")]]),
        ]);
        update_recursion_and_depth(&mut table);

        let s = table.lookup("<S>").unwrap();
        assert_eq!(s.production_depths, vec![Some(2), Some(1)]);
        assert_eq!(s.min_depth, Some(1));
        assert!(!s.recursive);
        assert_eq!(s.recursive_productions, vec![false, false]);

        let a = table.lookup("<A>").unwrap();
        assert_eq!(a.production_depths, vec![Some(1), Some(2)]);
        assert_eq!(a.min_depth, Some(1));
        assert!(a.recursive);
        assert_eq!(a.recursive_productions, vec![false, true]);
    }

    #[test]
    fn test_indirect_recursion_is_detected() {
        let mut table = table_with(&[
            ("<x>", vec![vec![nt("<y>")], vec![t("0")]]),
            ("<y>", vec![vec![t("("), nt("<x>"), t(")")]]),
        ]);
        update_recursion_and_depth(&mut table);
        assert_eq!(table.lookup("<x>").unwrap().recursive_productions, vec![true, false]);
        assert!(table.lookup("<y>").unwrap().recursive);
        assert_eq!(table.lookup("<y>").unwrap().min_depth, Some(2));
        assert_eq!(table.lookup("<x>").unwrap().production_depths, vec![Some(3), Some(1)]);
    }

    #[test]
    fn test_depth_propagates_through_chains() {
        let mut table = table_with(&[
            ("<a>", vec![vec![nt("<b>"), nt("<c>")]]),
            ("<b>", vec![vec![nt("<c>")]]),
            ("<c>", vec![vec![nt("<d>")]]),
            ("<d>", vec![vec![Symbol::CodonValue]]),
        ]);
        update_recursion_and_depth(&mut table);
        assert_eq!(table.lookup("<d>").unwrap().min_depth, Some(1));
        assert_eq!(table.lookup("<c>").unwrap().min_depth, Some(2));
        assert_eq!(table.lookup("<b>").unwrap().min_depth, Some(3));
        assert_eq!(table.lookup("<a>").unwrap().min_depth, Some(4));
    }

    #[test]
    fn test_non_terminating_rules_keep_unknown_depth() {
        let mut table = table_with(&[
            ("<s>", vec![vec![nt("<loop>")], vec![t("x")]]),
            ("<loop>", vec![vec![t("("), nt("<loop>"), t(")")]]),
        ]);
        update_recursion_and_depth(&mut table);
        let looping = table.lookup("<loop>").unwrap();
        assert_eq!(looping.min_depth, None);
        assert_eq!(looping.production_depths, vec![None]);
        assert!(looping.recursive);

        let s = table.lookup("<s>").unwrap();
        assert_eq!(s.production_depths, vec![None, Some(1)]);
        assert_eq!(s.min_depth, Some(1));
    }

    #[test]
    fn test_reanalysis_after_mutation() {
        let mut table = table_with(&[("<loop>", vec![vec![nt("<loop>"), t("+")]])]);
        update_recursion_and_depth(&mut table);
        assert_eq!(table.lookup("<loop>").unwrap().min_depth, None);

        table.add_production("<loop>", vec![t("1")]);
        update_recursion_and_depth(&mut table);
        let rule = table.lookup("<loop>").unwrap();
        assert_eq!(rule.production_depths, vec![Some(2), Some(1)]);
        assert_eq!(rule.recursive_productions, vec![true, false]);
    }
}
