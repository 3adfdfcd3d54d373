//! Next-tier graph checks
//!
//! Tiers link to a default successor through `next_tier_id`. The links must
//! never form a cycle. Traversal is bounded so a corrupted store cannot spin.

use std::collections::{HashMap, HashSet};

use lifeline_core::{EscalationTier, Error, Result, TierId};

/// Longest next-tier chain accepted
pub const MAX_CHAIN_DEPTH: usize = 64;

/// Follow next links from `start`, failing on a cycle, a dangling link or an
/// over-long chain.
pub fn check_chain(tiers: &HashMap<TierId, EscalationTier>, start: TierId) -> Result<()> {
    let mut seen = HashSet::new();
    let mut cursor = Some(start);
    let mut depth = 0;

    while let Some(id) = cursor {
        if !seen.insert(id) {
            return Err(Error::invalid_field(
                "next_tier_id",
                format!("escalation tiers form a cycle through {id}"),
            ));
        }
        depth += 1;
        if depth > MAX_CHAIN_DEPTH {
            return Err(Error::invalid_field(
                "next_tier_id",
                format!("escalation chain from {start} exceeds {MAX_CHAIN_DEPTH} tiers"),
            ));
        }
        let tier = tiers
            .get(&id)
            .ok_or_else(|| Error::not_found(TierId::RESOURCE, id))?;
        cursor = tier.next_tier_id;
    }
    Ok(())
}

/// Check every chain in the graph
pub fn check_graph(tiers: &HashMap<TierId, EscalationTier>) -> Result<()> {
    tiers.keys().try_for_each(|id| check_chain(tiers, *id))
}

/// Index tiers by id
pub fn index(tiers: Vec<EscalationTier>) -> HashMap<TierId, EscalationTier> {
    tiers.into_iter().map(|t| (t.id, t)).collect()
}

/// Check a path's tier list: non-empty, no repeats, every tier known and
/// every chain starting from a listed tier acyclic.
pub fn check_path(tiers: &HashMap<TierId, EscalationTier>, tier_ids: &[TierId]) -> Result<()> {
    if tier_ids.is_empty() {
        return Err(Error::invalid_field("tier_ids", "path must list at least one tier"));
    }
    let mut seen = HashSet::with_capacity(tier_ids.len());
    for id in tier_ids {
        if !seen.insert(*id) {
            return Err(Error::invalid_field(
                "tier_ids",
                format!("tier {id} appears twice in the path"),
            ));
        }
        if !tiers.contains_key(id) {
            return Err(Error::not_found(TierId::RESOURCE, id));
        }
        check_chain(tiers, *id)?;
    }
    Ok(())
}
