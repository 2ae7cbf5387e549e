//! Integration tests for in-memory range queries.
//!
//! Property tests check that a query window reconstructs the step function
//! of the full signal over `[start, end]`.

use proptest::prelude::*;
use wavestore::{
    Database, DatabaseConfig, Logic, Signal, SignalBuilder, SignalId, SignalType, WaveError,
};

/// Builds the reference 8-bit signal used by the boundary scenarios.
fn reference_db() -> Database {
    let mut b = SignalBuilder::new(SignalId(1), SignalType::quaternary(8).unwrap());
    b.append(0, &[0xff], &[0xff]).unwrap(); // all X
    b.append(10, &[0x8f], &[0x00]).unwrap();
    b.append(30, &[0x6d], &[0x00]).unwrap();
    b.append(50, &[0x99], &[0x00]).unwrap();
    b.append(70, &[0x8f], &[0x00]).unwrap();
    let mut db = Database::new();
    db.insert(b.build().unwrap()).unwrap();
    db
}

/// Strategy for a signal with strictly increasing timestamps and random values.
fn signal_strategy() -> impl Strategy<Value = Signal> {
    (1u32..=20, 1usize..200).prop_flat_map(|(width, count)| {
        let bytes = SignalType::quaternary(width).unwrap().bytes();
        (
            prop::collection::vec(1u64..50, count),
            prop::collection::vec(any::<u8>(), count * bytes),
            prop::collection::vec(any::<u8>(), count * bytes),
            0u64..100,
        )
            .prop_map(move |(deltas, x0s, x1s, base)| {
                let mut timestamps = Vec::with_capacity(deltas.len());
                let mut current = base;
                for delta in deltas {
                    timestamps.push(current);
                    current += delta;
                }
                let ty = SignalType::quaternary(width).unwrap();
                Signal::from_columns(SignalId(9), ty, timestamps, x0s, x1s).unwrap()
            })
    })
}

#[test]
fn test_reference_scenarios() {
    let db = reference_db();
    let id = SignalId(1);

    let result = db.query(id, 0, 70).unwrap().unwrap();
    assert_eq!(result.samples().timestamps(), &[0, 10, 30, 50, 70]);

    let result = db.query(id, 40, 40).unwrap().unwrap();
    assert_eq!(result.samples().timestamps(), &[30]);
    assert_eq!(result.samples().value(0).unwrap().to_string(), "01101101");

    let result = db.query(id, 80, 90).unwrap().unwrap();
    assert_eq!(result.samples().timestamps(), &[70]);
    assert_eq!(result.samples().value(0).unwrap().to_u64(), Some(0x8f));

    let result = db.query(id, 20, 49).unwrap().unwrap();
    assert_eq!(result.samples().timestamps(), &[10, 30]);
    assert_eq!(result.samples().x0s(), &[0x8f, 0x6d]);
}

#[test]
fn test_unknown_state_survives_query() {
    let db = reference_db();
    let result = db.query(SignalId(1), 5, 5).unwrap().unwrap();
    let value = result.samples().value(0).unwrap();
    assert!(value.iter().all(|bit| bit == Logic::X));
    assert!(!value.is_two_state());
    assert_eq!(value.to_u64(), None);
}

#[test]
fn test_query_errors() {
    let db = reference_db();
    assert!(db.query(SignalId(2), 0, 10).unwrap().is_none());
    assert!(matches!(
        db.query(SignalId(1), 11, 10),
        Err(WaveError::InvalidArgument(_))
    ));
}

#[test]
fn test_insert_get_roundtrip() {
    let mut db = Database::with_config(DatabaseConfig::default().with_verify_ordering(true));
    let mut b = SignalBuilder::new(SignalId(77), SignalType::quaternary(3).unwrap());
    b.append_logic(5, &[Logic::One, Logic::Z, Logic::Zero]).unwrap();
    b.append_logic(9, &[Logic::X, Logic::X, Logic::One]).unwrap();
    let signal = b.build().unwrap();

    let r = db.insert(signal.clone()).unwrap();
    assert_eq!(db.get(SignalId(77)), Some(&signal));
    assert_eq!(db.get_by_ref(r), Some(&signal));
    assert!(db.contains(SignalId(77)));

    let stored = db.get(SignalId(77)).unwrap().samples().unwrap();
    assert_eq!(stored.value(0).unwrap().to_string(), "0z1");
    assert_eq!(stored.value(1).unwrap().to_string(), "1xx");

    assert!(matches!(db.insert(signal), Err(WaveError::Conflict(_))));
}

proptest! {
    /// A stored signal comes back unchanged, by id and by ref.
    #[test]
    fn test_insert_get_roundtrip_any_signal(signal in signal_strategy()) {
        let mut db = Database::new();
        let signal_ref = db.insert(signal.clone()).unwrap();
        prop_assert_eq!(db.get(SignalId(9)), Some(&signal));
        prop_assert_eq!(db.get_by_ref(signal_ref), Some(&signal));
        prop_assert_eq!(db.len(), 1);
    }

    /// Every instant in the window has the same value in the window as in the
    /// full signal.
    #[test]
    fn test_window_reconstructs_step_function(
        signal in signal_strategy(),
        a in 0u64..6000,
        b in 0u64..6000,
    ) {
        let (start, end) = (a.min(b), a.max(b));
        let mut db = Database::new();
        db.insert(signal.clone()).unwrap();

        let full = signal.samples().unwrap();
        let window = db.query(SignalId(9), start, end).unwrap().unwrap().samples();

        let mut instants = vec![start, end, start + (end - start) / 2];
        instants.extend(full.timestamps().iter().copied().filter(|&t| t >= start && t <= end));
        for t in instants {
            prop_assert_eq!(window.value_at(t), full.value_at(t), "value differs at {}", t);
        }
    }

    /// The window is the minimal run: only its first sample may precede `start`.
    #[test]
    fn test_window_is_minimal(
        signal in signal_strategy(),
        a in 0u64..6000,
        b in 0u64..6000,
    ) {
        let (start, end) = (a.min(b), a.max(b));
        let mut db = Database::new();
        db.insert(signal).unwrap();
        let window = db.query(SignalId(9), start, end).unwrap().unwrap().samples();

        let ts = window.timestamps();
        prop_assert!(ts.iter().all(|&t| t <= end));
        prop_assert!(ts.iter().skip(1).all(|&t| t > start));
    }

    /// Widening a window never drops samples.
    #[test]
    fn test_query_monotonicity(
        signal in signal_strategy(),
        bounds in prop::array::uniform4(0u64..6000),
    ) {
        let mut sorted = bounds;
        sorted.sort_unstable();
        let [outer_start, inner_start, inner_end, outer_end] = sorted;

        let mut db = Database::new();
        db.insert(signal).unwrap();
        let inner = db.query(SignalId(9), inner_start, inner_end).unwrap().unwrap();
        let outer = db.query(SignalId(9), outer_start, outer_end).unwrap().unwrap();

        for t in inner.samples().timestamps() {
            prop_assert!(outer.samples().timestamps().contains(t));
        }
        prop_assert!(inner.len() <= outer.len());
    }
}
