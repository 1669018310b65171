// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Subscription planning.
//!
//! Given a repository address, a root event id and a cross-mirror grouping
//! key, build the minimal deduplicated set of network filters covering the
//! root itself, references to it, events tagged with the repository, and
//! mirror-grouped events.

use std::collections::BTreeMap;

use nostr::{Alphabet, EventId, Filter, Kind, SingleLetterTag};
use serde_json::{Map, Value};

use crate::address::RepoAddress;

/// Planner input.
#[derive(Debug, Clone, Default)]
pub struct PlanArgs {
    /// Repository address
    pub address: Option<RepoAddress>,
    /// Root event id (a patch or issue thread root)
    pub root_event_id: Option<EventId>,
    /// Opaque token correlating mirrors of the same logical repository
    pub grouping_key: Option<String>,
}

/// One planned network filter with a human-readable note.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedFilter {
    /// The filter to subscribe with
    pub filter: Filter,
    /// Why this filter is part of the plan
    pub note: String,
}

/// Builds minimal deduplicated filter sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionPlanner {
    stacking: bool,
}

impl SubscriptionPlanner {
    /// Planner with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable additional filters for patch-stack discovery.
    pub fn with_stacking(stacking: bool) -> Self {
        Self { stacking }
    }

    /// Build the filter plan for `args`.
    ///
    /// Output is deduplicated (no two filters share a normalized JSON form),
    /// merged by key set where legal, and stable-sorted by shape priority:
    /// `ids`, `#e`, `#a`, `#r`.
    pub fn plan(&self, args: &PlanArgs) -> Vec<PlannedFilter> {
        let mut planned: Vec<PlannedFilter> = Vec::with_capacity(4);

        if let Some(root) = &args.root_event_id {
            planned.push(PlannedFilter {
                filter: Filter::new().id(*root),
                note: "root id".to_string(),
            });
            planned.push(PlannedFilter {
                filter: Filter::new().custom_tag(
                    SingleLetterTag::lowercase(Alphabet::E),
                    root.to_hex(),
                ),
                note: "references to root id".to_string(),
            });
        }

        if let Some(address) = &args.address {
            planned.push(PlannedFilter {
                filter: Filter::new().custom_tag(
                    SingleLetterTag::lowercase(Alphabet::A),
                    address.to_tag_value(),
                ),
                note: "repo address".to_string(),
            });
        }

        if let Some(grouping_key) = &args.grouping_key {
            planned.push(PlannedFilter {
                filter: Filter::new().custom_tag(
                    SingleLetterTag::lowercase(Alphabet::R),
                    grouping_key.clone(),
                ),
                note: "euc".to_string(),
            });
        }

        if self.stacking {
            let stack_kinds = [
                Kind::GitPatch,
                Kind::GitStatusOpen,
                Kind::GitStatusApplied,
                Kind::GitStatusClosed,
                Kind::GitStatusDraft,
            ];
            if let Some(root) = &args.root_event_id {
                planned.push(PlannedFilter {
                    filter: Filter::new()
                        .kinds(stack_kinds)
                        .custom_tag(SingleLetterTag::lowercase(Alphabet::E), root.to_hex()),
                    note: "stacked patches for root id".to_string(),
                });
            }
            if let Some(address) = &args.address {
                planned.push(PlannedFilter {
                    filter: Filter::new()
                        .kinds(stack_kinds)
                        .custom_tag(SingleLetterTag::lowercase(Alphabet::A), address.to_tag_value()),
                    note: "stacked patches for repo address".to_string(),
                });
            }
        }

        dedup_and_merge(planned)
    }
}

/// Drop exact duplicates, merge same-key-set filters, and stable-sort by
/// shape priority.
fn dedup_and_merge(planned: Vec<PlannedFilter>) -> Vec<PlannedFilter> {
    let mut out: Vec<(Map<String, Value>, String)> = Vec::with_capacity(planned.len());
    let mut seen: Vec<String> = Vec::with_capacity(planned.len());

    'outer: for item in planned {
        let Some(map) = to_map(&item.filter) else {
            continue;
        };

        // Exact duplicate by normalized JSON
        let normalized = canonical(&Value::Object(map.clone()));
        if seen.contains(&normalized) {
            continue;
        }

        // Merge into an existing filter with the same key set, unioning array
        // values and requiring scalar equality. Time-bounded or limited
        // filters are never merged.
        if mergeable(&map) {
            for (existing, note) in out.iter_mut() {
                if !mergeable(existing) || !same_keys(existing, &map) {
                    continue;
                }
                if let Some(merged) = merge_maps(existing, &map) {
                    seen.push(canonical(&Value::Object(merged.clone())));
                    *existing = merged;
                    if !note.contains(&item.note) {
                        note.push_str(", ");
                        note.push_str(&item.note);
                    }
                    continue 'outer;
                }
            }
        }

        seen.push(normalized);
        out.push((map, item.note));
    }

    let mut out: Vec<PlannedFilter> = out
        .into_iter()
        .filter_map(|(map, note)| {
            let filter: Filter = serde_json::from_value(Value::Object(map)).ok()?;
            Some(PlannedFilter { filter, note })
        })
        .collect();

    out.sort_by_key(|p| shape_priority(&p.filter));
    out
}

fn to_map(filter: &Filter) -> Option<Map<String, Value>> {
    match serde_json::to_value(filter) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn mergeable(map: &Map<String, Value>) -> bool {
    !map.contains_key("since") && !map.contains_key("until") && !map.contains_key("limit")
}

fn same_keys(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len() && a.keys().all(|k| b.contains_key(k))
}

fn merge_maps(a: &Map<String, Value>, b: &Map<String, Value>) -> Option<Map<String, Value>> {
    let mut merged = Map::new();
    for (key, left) in a.iter() {
        let right = b.get(key)?;
        match (left, right) {
            (Value::Array(l), Value::Array(r)) => {
                let mut union: Vec<Value> = l.clone();
                for value in r {
                    if !union.contains(value) {
                        union.push(value.clone());
                    }
                }
                union.sort_by_key(|v| canonical(v));
                merged.insert(key.clone(), Value::Array(union));
            }
            (l, r) if l == r => {
                merged.insert(key.clone(), l.clone());
            }
            _ => return None,
        }
    }
    Some(merged)
}

/// Normalized JSON with sorted keys and sorted array values.
fn canonical(value: &Value) -> String {
    fn normalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), normalize(v)))
                    .collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => {
                let mut values: Vec<Value> = arr.iter().map(normalize).collect();
                values.sort_by_key(|v| v.to_string());
                Value::Array(values)
            }
            other => other.clone(),
        }
    }
    normalize(value).to_string()
}

fn shape_priority(filter: &Filter) -> u8 {
    let Some(map) = to_map(filter) else { return u8::MAX };
    if map.contains_key("ids") {
        0
    } else if map.contains_key("#e") {
        1
    } else if map.contains_key("#a") {
        2
    } else if map.contains_key("#r") {
        3
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use nostr::PublicKey;

    use super::*;

    fn address() -> RepoAddress {
        let pk = PublicKey::from_hex(
            "aac07d95089ce6adf08b9156d43c1a4ab594c6130b7dcb12ec199008c5819a2f",
        )
        .unwrap();
        RepoAddress::new(pk, "repo")
    }

    fn root() -> EventId {
        EventId::from_hex("5d2899290e0e69bcd809749b9c8a7a27af2a81bbc5c70c8d0c322b3a4148a2d7")
            .unwrap()
    }

    #[test]
    fn full_args_plan_has_four_filters_in_shape_order() {
        let planner = SubscriptionPlanner::new();
        let planned = planner.plan(&PlanArgs {
            address: Some(address()),
            root_event_id: Some(root()),
            grouping_key: Some("euc://r/x".to_string()),
        });

        assert_eq!(planned.len(), 4);
        assert_eq!(shape_priority(&planned[0].filter), 0);
        assert_eq!(shape_priority(&planned[1].filter), 1);
        assert_eq!(shape_priority(&planned[2].filter), 2);
        assert_eq!(shape_priority(&planned[3].filter), 3);
        assert!(planned[0].note.contains("root id"));
        assert!(planned[2].note.contains("repo address"));
        assert!(planned[3].note.contains("euc"));
    }

    #[test]
    fn no_two_filters_share_normalized_json() {
        let planner = SubscriptionPlanner::with_stacking(true);
        let planned = planner.plan(&PlanArgs {
            address: Some(address()),
            root_event_id: Some(root()),
            grouping_key: Some("euc://r/x".to_string()),
        });
        let mut normalized: Vec<String> = planned
            .iter()
            .filter_map(|p| to_map(&p.filter).map(|m| canonical(&Value::Object(m))))
            .collect();
        let before = normalized.len();
        normalized.sort();
        normalized.dedup();
        assert_eq!(normalized.len(), before);
    }

    #[test]
    fn empty_args_plan_is_empty() {
        let planner = SubscriptionPlanner::new();
        assert!(planner.plan(&PlanArgs::default()).is_empty());
    }

    #[test]
    fn same_shape_filters_merge_by_union() {
        let a = to_map(
            &Filter::new().custom_tag(SingleLetterTag::lowercase(Alphabet::E), "aa".to_string()),
        )
        .unwrap();
        let b = to_map(
            &Filter::new().custom_tag(SingleLetterTag::lowercase(Alphabet::E), "bb".to_string()),
        )
        .unwrap();
        let merged = merge_maps(&a, &b).unwrap();
        let values = merged.get("#e").unwrap().as_array().unwrap();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn bounded_filters_do_not_merge() {
        let bounded = to_map(&Filter::new().id(root()).limit(1)).unwrap();
        assert!(!mergeable(&bounded));
    }
}
