//! Ordering merge for zone lists.
//!
//! Reconciles the list the client currently shows with a freshly received full list,
//! honouring a persisted user ordering (a JSON array of ids) when one is available.
//! Everything here is pure: no I/O, inputs are never mutated.

use crate::models::zone::Zone;
use std::collections::{HashMap, HashSet};

/// Anything with a stable string identity that can be ordered by a saved id list.
pub trait Identified {
    fn identity(&self) -> &str;
}

impl Identified for Zone {
    fn identity(&self) -> &str {
        self.id.as_str()
    }
}

impl Identified for String {
    fn identity(&self) -> &str {
        self.as_str()
    }
}

/// Merge a fresh zone snapshot into the currently displayed list.
///
/// Priority:
/// 1. `saved_order` when it parses as a JSON array of strings,
/// 2. the order of `previous` when it is non-empty,
/// 3. the order of `updated` as received.
///
/// Zones missing from the chosen hint are appended in `updated` order. The result holds
/// exactly the zones of `updated`, each once.
pub fn merge_zones(previous: &[Zone], updated: &[Zone], saved_order: Option<&str>) -> Vec<Zone> {
    merge_ordered(previous, updated, saved_order)
}

pub fn merge_ordered<T: Identified + Clone>(previous: &[T], updated: &[T], saved_order: Option<&str>) -> Vec<T> {
    let fresh = collapse_duplicates(updated);

    if let Some(ids) = parse_saved_order(saved_order) {
        return order_by(ids.iter().map(String::as_str), fresh);
    }
    if !previous.is_empty() {
        return order_by(previous.iter().map(Identified::identity), fresh);
    }
    fresh
}

/// Parse a persisted ordering. Anything but a JSON array of strings is ignored.
pub fn parse_saved_order(raw: Option<&str>) -> Option<Vec<String>> {
    serde_json::from_str::<Vec<String>>(raw?).ok()
}

/// Serialize the order of `items` in the persisted preference format.
pub fn order_ids_json<T: Identified>(items: &[T]) -> String {
    let ids = items.iter().map(Identified::identity).collect::<Vec<_>>();
    // a Vec<&str> always serializes
    serde_json::to_string(&ids).unwrap_or_else(|_| "[]".to_string())
}

/// Apply a user-chosen id sequence to `current` without changing its membership.
/// Ids not in `current` are ignored; items not named in `ids` keep their relative
/// order at the end.
pub fn reorder_by_ids<T: Identified + Clone>(current: &[T], ids: &[&str]) -> Vec<T> {
    order_by(ids.iter().copied(), current.to_vec())
}

fn order_by<'a, T: Identified>(hint: impl Iterator<Item = &'a str>, fresh: Vec<T>) -> Vec<T> {
    let index: HashMap<String, usize> = fresh
        .iter()
        .enumerate()
        .map(|(i, item)| (item.identity().to_string(), i))
        .collect();
    let mut slots = fresh.into_iter().map(Some).collect::<Vec<_>>();
    let mut out = Vec::with_capacity(slots.len());

    for id in hint {
        if let Some(&i) = index.get(id)
            && let Some(item) = slots[i].take()
        {
            out.push(item);
        }
    }
    out.extend(slots.into_iter().flatten());
    out
}

/// Duplicate ids in one payload: the last occurrence's payload wins, kept at the
/// position of the first occurrence.
fn collapse_duplicates<T: Identified + Clone>(updated: &[T]) -> Vec<T> {
    let mut seen = HashSet::with_capacity(updated.len());
    if updated.iter().all(|item| seen.insert(item.identity())) {
        return updated.to_vec();
    }

    let mut position: HashMap<&str, usize> = HashMap::with_capacity(updated.len());
    let mut out: Vec<T> = Vec::with_capacity(updated.len());
    for item in updated {
        match position.get(item.identity()) {
            Some(&i) => out[i] = item.clone(),
            None => {
                position.insert(item.identity(), out.len());
                out.push(item.clone());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(id: &str, name: &str) -> Zone {
        Zone::new(id).with_attribute("name", name)
    }

    fn ids(zones: &[Zone]) -> Vec<&str> {
        zones.iter().map(|z| z.id.as_str()).collect()
    }

    #[test]
    fn saved_order_wins_over_previous_order() {
        let previous = vec![zone("a", "A"), zone("b", "B")];
        let updated = vec![zone("b", "B'"), zone("a", "A'"), zone("c", "C'")];

        let merged = merge_zones(&previous, &updated, Some(r#"["b","a"]"#));
        assert_eq!(merged, vec![zone("b", "B'"), zone("a", "A'"), zone("c", "C'")]);
    }

    #[test]
    fn previous_order_used_without_saved_order() {
        let previous = vec![zone("a", "A"), zone("b", "B"), zone("c", "C")];
        let updated = vec![zone("d", "D''"), zone("c", "C''"), zone("a", "A''"), zone("e", "E''")];

        let merged = merge_zones(&previous, &updated, None);
        assert_eq!(ids(&merged), vec!["a", "c", "d", "e"]);
        assert_eq!(merged[0], zone("a", "A''"));
    }

    #[test]
    fn empty_previous_keeps_server_order() {
        let updated = vec![zone("z", "Z"), zone("m", "M"), zone("a", "A")];
        assert_eq!(merge_zones(&[], &updated, None), updated);
    }

    #[test]
    fn malformed_saved_order_falls_back_to_previous() {
        let previous = vec![zone("b", "B"), zone("a", "A")];
        let updated = vec![zone("a", "A2"), zone("b", "B2")];

        let expected = merge_zones(&previous, &updated, None);
        assert_eq!(merge_zones(&previous, &updated, Some("not json")), expected);
        assert_eq!(merge_zones(&previous, &updated, Some("[1, 2]")), expected);
        assert_eq!(merge_zones(&previous, &updated, Some(r#"{"order":["a"]}"#)), expected);
        assert_eq!(ids(&expected), vec!["b", "a"]);
    }

    #[test]
    fn merge_is_deterministic() {
        let previous = vec![zone("a", "A"), zone("b", "B")];
        let updated = vec![zone("c", "C"), zone("b", "B2"), zone("a", "A2")];
        let saved = Some(r#"["b","x","a"]"#);

        assert_eq!(
            merge_zones(&previous, &updated, saved),
            merge_zones(&previous, &updated, saved)
        );
    }

    #[test]
    fn stale_saved_ids_are_dropped_and_new_zones_appended() {
        let updated = vec![zone("new1", "N1"), zone("a", "A"), zone("new2", "N2")];

        let merged = merge_zones(&[], &updated, Some(r#"["gone","a","also_gone"]"#));
        assert_eq!(ids(&merged), vec!["a", "new1", "new2"]);
    }

    #[test]
    fn empty_update_yields_empty_list() {
        let previous = vec![zone("a", "A")];
        assert!(merge_zones(&previous, &[], Some(r#"["a"]"#)).is_empty());
        assert!(merge_zones(&previous, &[], None).is_empty());
    }

    #[test]
    fn duplicate_ids_collapse_last_payload_wins() {
        let updated = vec![zone("a", "first"), zone("b", "B"), zone("a", "second")];

        let merged = merge_zones(&[], &updated, None);
        assert_eq!(merged, vec![zone("a", "second"), zone("b", "B")]);

        let merged = merge_zones(&[], &updated, Some(r#"["b","a","a"]"#));
        assert_eq!(merged, vec![zone("b", "B"), zone("a", "second")]);
    }

    #[test]
    fn push_snapshot_scenario() {
        let previous = vec![Zone::new("a"), Zone::new("b")];
        let incoming = vec![zone("a", "A2"), zone("b", "B2"), zone("c", "C")];

        let merged = merge_zones(&previous, &incoming, Some(r#"["b","a"]"#));
        assert_eq!(merged, vec![zone("b", "B2"), zone("a", "A2"), zone("c", "C")]);
    }

    #[test]
    fn order_json_round_trips_through_parser() {
        let zones = vec![zone("b", "B"), zone("a", "A")];
        let json = order_ids_json(&zones);
        assert_eq!(json, r#"["b","a"]"#);
        assert_eq!(parse_saved_order(Some(&json)), Some(vec!["b".to_string(), "a".to_string()]));
    }

    #[test]
    fn reorder_keeps_membership() {
        let current = vec![zone("a", "A"), zone("b", "B"), zone("c", "C")];
        let reordered = reorder_by_ids(&current, &["c", "unknown", "a"]);
        assert_eq!(ids(&reordered), vec!["c", "a", "b"]);
    }

    #[test]
    fn merges_plain_string_sections() {
        let defaults = vec!["schedule".to_string(), "presets".to_string(), "sensors".to_string()];
        let merged = merge_ordered(&[], &defaults, Some(r#"["sensors","schedule"]"#));
        assert_eq!(merged, vec!["sensors", "schedule", "presets"]);
    }
}
