//! Replica-level behavior: last-writer-wins across replicas, idempotent
//! application and durable restarts.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tally_hlc::{ManualClock, NodeId, Timestamp};
use tally_store::{
    CellAddress, FilePersistence, MemoryPersistence, Message, MessageStore, Replica,
    ReplicaConfig, ReplicaConfigBuilder, Value,
};

const NOW: i64 = 1_700_000_000_000;

fn open(node: &str, wall: Arc<ManualClock>) -> Replica {
    let config = ReplicaConfigBuilder::new()
        .node_id(NodeId::new(node).unwrap())
        .build();
    Replica::open(MemoryPersistence::new(), wall, config).unwrap()
}

#[test]
fn later_write_wins_and_history_is_kept() {
    let wall = Arc::new(ManualClock::new(NOW));
    let a = open("A", wall.clone());
    let b = open("B", wall.clone());
    let cell = CellAddress::new("budget1", "cat7", "amount");

    let t1 = a.edit(cell.clone(), 500i64).unwrap();
    wall.advance(1_000);
    let t2 = b.edit(cell.clone(), 300i64).unwrap();
    assert!(t2.timestamp > t1.timestamp);

    // exchange in both directions, in either order
    a.receive(vec![t2.clone()]).unwrap();
    b.receive(vec![t1.clone()]).unwrap();

    for replica in [&a, &b] {
        assert_eq!(replica.value(&cell), Some(Value::Number(300.0)));
        let history = replica.history(&cell);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], t1);
    }
    assert_eq!(a.merkle().hash(), b.merkle().hash());
}

#[test]
fn file_backed_replica_survives_restart() {
    let dir = std::env::temp_dir().join(format!("tally-replica-{}", ulid::Ulid::new()));
    let wall = Arc::new(ManualClock::new(NOW));
    let cell = CellAddress::new("budget1", "cat7", "amount");

    let config = ReplicaConfigBuilder::new()
        .node_id(NodeId::new("F1").unwrap())
        .verify_merkle_on_open(true)
        .build();
    let replica = Replica::open(FilePersistence::open(&dir).unwrap(), wall.clone(), config.clone()).unwrap();
    replica.edit(cell.clone(), 42i64).unwrap();
    replica.edit(cell.clone(), "forty-two").unwrap();
    let ts = replica.timestamp();
    let hash = replica.merkle().hash();
    drop(replica);

    let replica = Replica::open(FilePersistence::open(&dir).unwrap(), wall, config).unwrap();
    assert_eq!(replica.timestamp(), ts);
    assert_eq!(replica.merkle().hash(), hash);
    assert_eq!(replica.value(&cell), Some(Value::from("forty-two")));
    assert_eq!(replica.history(&cell).len(), 2);

    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn random_node_id_is_stable_across_restarts() {
    let persistence = Arc::new(MemoryPersistence::new());
    let wall = Arc::new(ManualClock::new(NOW));
    let first = Replica::open(Arc::clone(&persistence), wall.clone(), ReplicaConfig::default()).unwrap();
    let node = first.node();
    drop(first);

    let second = Replica::open(persistence, wall, ReplicaConfig::default()).unwrap();
    assert_eq!(second.node(), node);
}

fn message_strategy() -> impl Strategy<Value = Message> {
    (
        prop::sample::select(vec!["r1", "r2"]),
        prop::sample::select(vec!["amount", "note"]),
        -1_000i64..1_000,
        0u64..5_000,
        0u16..3,
        prop::sample::select(vec!["N1", "N2", "N3"]),
    )
        .prop_map(|(row, column, value, offset, counter, node)| {
            Message::new(
                CellAddress::new("budget1", row, column),
                value,
                Timestamp::new(NOW as u64 + offset, counter, NodeId::new(node).unwrap()),
            )
        })
}

proptest! {
    #[test]
    fn applying_twice_changes_nothing(messages in prop::collection::vec(message_strategy(), 1..30)) {
        let mut store = MessageStore::new();
        for m in &messages {
            store.apply(m.clone());
        }
        let len = store.len();
        let cells: Vec<_> = store.cells().map(|(a, v)| (a.clone(), v.clone())).collect();
        let hash = store.rebuild_trie().hash();

        for m in &messages {
            prop_assert!(!store.apply(m.clone()).is_new());
        }
        let again: Vec<_> = store.cells().map(|(a, v)| (a.clone(), v.clone())).collect();
        prop_assert_eq!(store.len(), len);
        prop_assert_eq!(again, cells);
        prop_assert_eq!(store.rebuild_trie().hash(), hash);
    }

    #[test]
    fn visible_value_is_independent_of_arrival_order(
        messages in prop::collection::vec(message_strategy(), 1..30)
    ) {
        // one message per (timestamp, address)
        let messages: Vec<Message> = messages
            .into_iter()
            .map(|m| ((m.timestamp.clone(), m.address()), m))
            .collect::<BTreeMap<_, _>>()
            .into_values()
            .collect();

        let mut forward = MessageStore::new();
        let mut backward = MessageStore::new();
        for m in &messages {
            forward.apply(m.clone());
        }
        for m in messages.iter().rev() {
            backward.apply(m.clone());
        }
        let f: Vec<_> = forward.cells().collect();
        let b: Vec<_> = backward.cells().collect();
        prop_assert_eq!(f, b);
    }
}
