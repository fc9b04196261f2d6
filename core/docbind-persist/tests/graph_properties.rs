//! Graph walker tests.
//!
//! The walker must report every entity reachable within the depth exactly
//! once, never the starting entity, and terminate on cyclic graphs.

use docbind_model::{Attribute, BasicType, ManagedType, Metamodel, TypeDescriptor};
use docbind_persist::graph::{entities_at, sub_entities};
use docbind_persist::{Depth, Embedded, Entity, EntityRef, Value};
use docbind_types::ObjectId;
use proptest::prelude::*;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

fn make_metamodel() -> Metamodel {
    Metamodel::new([
        ManagedType::embeddable("Slot")
            .with(Attribute::basic("label", BasicType::String))
            .with(Attribute::reference("target", "Node")),
        ManagedType::entity("Node")
            .with(Attribute::basic("name", BasicType::String))
            .with(Attribute::reference("next", "Node"))
            .with(Attribute::list("children", TypeDescriptor::Entity("Node".into())))
            .with(Attribute::map(
                "weights",
                TypeDescriptor::Entity("Node".into()),
                TypeDescriptor::Entity("Node".into()),
            ))
            .with(Attribute::list("slots", TypeDescriptor::Embeddable("Slot".into()))),
    ])
    .unwrap()
}

fn node_type() -> Arc<ManagedType> {
    make_metamodel().entity("Node").unwrap().clone()
}

fn make_nodes(count: usize) -> Vec<EntityRef> {
    let ty = node_type();
    (0..count)
        .map(|i| Entity::with_id(ty.clone(), ObjectId::new("Node", &i.to_string())))
        .collect()
}

fn keys(entities: &[EntityRef]) -> Vec<String> {
    entities
        .iter()
        .map(|e| e.id().unwrap().decoded_key())
        .collect()
}

// =============================================================================
// FIXED GRAPHS
// =============================================================================

/// a → b → c → a
fn make_cycle() -> Vec<EntityRef> {
    let nodes = make_nodes(3);
    nodes[0].set("next", &nodes[1]).unwrap();
    nodes[1].set("next", &nodes[2]).unwrap();
    nodes[2].set("next", &nodes[0]).unwrap();
    nodes
}

#[test]
fn depth_zero_finds_nothing() {
    let nodes = make_cycle();
    assert!(sub_entities(&nodes[0], Depth::Levels(0)).is_empty());
}

#[test]
fn depth_limits_the_walk() {
    let nodes = make_cycle();
    assert_eq!(keys(&sub_entities(&nodes[0], Depth::Levels(1))), ["1"]);
    assert_eq!(keys(&sub_entities(&nodes[0], Depth::Levels(2))), ["1", "2"]);
}

#[test]
fn unbounded_walk_stops_at_the_cycle() {
    let nodes = make_cycle();
    assert_eq!(keys(&sub_entities(&nodes[0], Depth::Unbounded)), ["1", "2"]);
    assert_eq!(keys(&sub_entities(&nodes[1], Depth::Unbounded)), ["2", "0"]);
}

#[test]
fn self_reference_is_never_reported() {
    let nodes = make_nodes(1);
    nodes[0].set("next", &nodes[0]).unwrap();
    assert!(sub_entities(&nodes[0], Depth::Unbounded).is_empty());
}

#[test]
fn walk_is_depth_first_in_attribute_order() {
    // 0.next = 1, 1.next = 3, 0.children = [2]
    let nodes = make_nodes(4);
    nodes[0].set("next", &nodes[1]).unwrap();
    nodes[1].set("next", &nodes[3]).unwrap();
    nodes[0]
        .set("children", Value::List(vec![(&nodes[2]).into()]))
        .unwrap();

    assert_eq!(keys(&sub_entities(&nodes[0], Depth::Unbounded)), ["1", "3", "2"]);
}

#[test]
fn map_keys_and_values_are_followed() {
    let nodes = make_nodes(3);
    nodes[0]
        .set(
            "weights",
            Value::Map(vec![((&nodes[1]).into(), (&nodes[2]).into())]),
        )
        .unwrap();
    assert_eq!(keys(&sub_entities(&nodes[0], Depth::Levels(1))), ["1", "2"]);
}

#[test]
fn references_inside_embedded_collections_are_followed() {
    let nodes = make_nodes(3);
    nodes[0]
        .set(
            "slots",
            Value::List(vec![
                Embedded::new("Slot").with("target", &nodes[2]).into(),
                Embedded::new("Slot").with("label", "empty").into(),
                Embedded::new("Slot").with("target", &nodes[1]).into(),
            ]),
        )
        .unwrap();

    let path = vec!["slots".to_string(), "target".to_string()];
    assert_eq!(keys(&entities_at(&nodes[0], &path)), ["2", "1"]);
    assert_eq!(keys(&sub_entities(&nodes[0], Depth::Levels(1))), ["2", "1"]);
}

#[test]
fn unidentified_entities_are_visited_once() {
    let ty = node_type();
    let root = Entity::new(ty.clone());
    let shared = Entity::new(ty);
    root.set("next", &shared).unwrap();
    root.set("children", Value::List(vec![(&shared).into(), (&shared).into()]))
        .unwrap();

    let found = sub_entities(&root, Depth::Unbounded);
    assert_eq!(found.len(), 1);
    assert!(found[0].same(&shared));
}

#[test]
fn unavailable_references_end_the_walk() {
    let nodes = make_nodes(1);
    let far = Entity::unavailable(node_type(), ObjectId::new("Node", "far"));
    nodes[0].set("next", &far).unwrap();
    assert_eq!(keys(&sub_entities(&nodes[0], Depth::Unbounded)), ["far"]);
}

#[test]
fn depth_conversions() {
    assert_eq!(Depth::from(true), Depth::Unbounded);
    assert_eq!(Depth::from(false), Depth::Levels(0));
    assert_eq!(Depth::from(3), Depth::Levels(3));
    assert_eq!(Depth::Levels(1).decrement(), Depth::Levels(0));
    assert_eq!(Depth::Levels(0).decrement(), Depth::Levels(0));
    assert_eq!(Depth::Unbounded.decrement(), Depth::Unbounded);
    assert!(Depth::default().is_zero());
}

// =============================================================================
// RANDOM GRAPHS
// =============================================================================

fn graph_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1usize..8).prop_flat_map(|n| prop::collection::vec(prop::collection::vec(0..n, 0..4), n))
}

fn build(edges: &[Vec<usize>]) -> Vec<EntityRef> {
    let nodes = make_nodes(edges.len());
    for (from, targets) in edges.iter().enumerate() {
        let children = targets.iter().map(|&to| Value::from(&nodes[to])).collect();
        nodes[from].set("children", Value::List(children)).unwrap();
    }
    nodes
}

fn reachable(edges: &[Vec<usize>], start: usize) -> HashSet<usize> {
    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(node) = queue.pop_front() {
        for &next in &edges[node] {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen.remove(&start);
    seen
}

fn indices(entities: &[EntityRef]) -> Vec<usize> {
    keys(entities)
        .into_iter()
        .map(|k| k.parse().unwrap())
        .collect()
}

proptest! {
    #[test]
    fn unbounded_walk_finds_exactly_the_reachable_set(edges in graph_strategy()) {
        let nodes = build(&edges);
        let found = indices(&sub_entities(&nodes[0], Depth::Unbounded));
        let unique: HashSet<usize> = found.iter().copied().collect();

        prop_assert_eq!(unique.len(), found.len());
        prop_assert_eq!(unique, reachable(&edges, 0));
    }

    #[test]
    fn one_level_finds_direct_neighbours(edges in graph_strategy()) {
        let nodes = build(&edges);
        let found: HashSet<usize> =
            indices(&sub_entities(&nodes[0], Depth::Levels(1))).into_iter().collect();
        let expected: HashSet<usize> = edges[0].iter().copied().filter(|&n| n != 0).collect();
        prop_assert_eq!(found, expected);
    }
}
