//! LK-006: Layered execution order over module links.
//!
//! Every link, typed or not, is a dependency edge from the consuming module to
//! the provider. Kahn's algorithm runs one frontier at a time: each frontier
//! becomes a step of mutually independent modules. Whatever is left once the
//! frontier empties sits on, or downstream of, a cycle.

use super::error::ResolutionError;
use super::types::Module;
use std::collections::{BTreeMap, BTreeSet};

/// Build the ordered execution steps for `modules`.
pub fn build_execution_order(modules: &[Module]) -> Result<Vec<BTreeSet<String>>, ResolutionError> {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    // Initialize
    for module in modules {
        in_degree.insert(module.alias(), 0);
        adjacency.insert(module.alias(), Vec::new());
    }

    // Build edges from links, provider → consumer
    for module in modules {
        let consumer = module.alias();
        let providers: BTreeSet<&str> = module.links.iter().map(|l| l.name.as_str()).collect();
        for provider in providers {
            let Some(dependents) = adjacency.get_mut(provider) else {
                return Err(ResolutionError::UnknownLinkTarget {
                    alias: consumer.to_string(),
                    target: provider.to_string(),
                });
            };
            dependents.push(consumer);
            if let Some(degree) = in_degree.get_mut(consumer) {
                *degree += 1;
            }
        }
    }

    let mut frontier: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut steps = Vec::new();
    let mut ordered = 0;
    while !frontier.is_empty() {
        let mut next_ready: Vec<&str> = Vec::new();
        for current in &frontier {
            for neighbor in adjacency.get(current).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(*neighbor);
                    }
                }
            }
        }

        ordered += frontier.len();
        tracing::debug!(step = steps.len(), modules = ?frontier, "execution step");
        steps.push(frontier.iter().map(|s| s.to_string()).collect());
        next_ready.sort_unstable();
        frontier = next_ready;
    }

    if ordered != in_degree.len() {
        let emitted: BTreeSet<&str> = steps.iter().flatten().map(String::as_str).collect();
        let aliases = in_degree
            .keys()
            .filter(|alias| !emitted.contains(*alias))
            .map(|alias| alias.to_string())
            .collect();
        return Err(ResolutionError::LinkCycle { aliases });
    }

    Ok(steps)
}
