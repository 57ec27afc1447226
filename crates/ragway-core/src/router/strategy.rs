//! Provider selection strategies.
//!
//! Strategies see only the already-filtered eligible list, in registration
//! order, and return an index into it.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Policy used to pick among eligible providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    /// First eligible provider in registration order.
    Failover,
    /// Process-wide cursor over the eligible list.
    RoundRobin,
    /// Random pick, proportional to weight.
    Weighted,
    /// Lowest latency SLA, then highest weight.
    #[default]
    Smart,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Failover => "failover",
            Strategy::RoundRobin => "roundRobin",
            Strategy::Weighted => "weighted",
            Strategy::Smart => "smart",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "failover" => Ok(Strategy::Failover),
            "roundrobin" => Ok(Strategy::RoundRobin),
            "weighted" => Ok(Strategy::Weighted),
            "smart" => Ok(Strategy::Smart),
            other => Err(format!(
                "unknown strategy '{}' (expected failover, roundRobin, weighted or smart)",
                other
            )),
        }
    }
}

/// What a strategy needs to know about one eligible provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub weight: u32,
    pub latency_sla_ms: u64,
}

/// Pick an index into `candidates`, or `None` when it is empty.
pub(crate) fn select(strategy: Strategy, candidates: &[Candidate], cursor: &AtomicUsize) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }

    match strategy {
        Strategy::Failover => Some(0),
        Strategy::RoundRobin => Some(cursor.fetch_add(1, Ordering::Relaxed) % candidates.len()),
        Strategy::Weighted => {
            // Zero weights count as one so every candidate stays reachable.
            let total: u64 = candidates.iter().map(|c| u64::from(c.weight.max(1))).sum();
            let mut roll = rand::thread_rng().gen_range(0..total);
            for (i, c) in candidates.iter().enumerate() {
                let w = u64::from(c.weight.max(1));
                if roll < w {
                    return Some(i);
                }
                roll -= w;
            }
            Some(candidates.len() - 1)
        }
        Strategy::Smart => smart_order(candidates).first().copied(),
    }
}

/// Indices ordered by ascending latency SLA, then descending weight.
/// Full ties keep registration order.
pub(crate) fn smart_order(candidates: &[Candidate]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        let (ca, cb) = (candidates[a], candidates[b]);
        ca.latency_sla_ms
            .cmp(&cb.latency_sla_ms)
            .then(cb.weight.cmp(&ca.weight))
    });
    order
}
