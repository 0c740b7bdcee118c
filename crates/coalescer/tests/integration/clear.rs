use std::time::Duration;

use coalescer::{CoalesceError, Options, Registry, same_handle};
use coalescer_test::{Lookup, Record};

use crate::{DELAY, find, find_in};

#[tokio::test(start_paused = true)]
async fn test_clear_while_pending() {
    coalescer_test::setup();

    let lookup = Lookup::new(DELAY);
    let find = find(&lookup, false);

    let p1 = find.call(1).unwrap();
    assert!(same_handle(&p1, &find.call(1).unwrap()));

    assert_eq!(find.clear(), 1);
    assert!(find.is_empty());

    let p2 = find.call(1).unwrap();
    assert!(!same_handle(&p1, &p2));
    assert_eq!(lookup.hits(1), 2);

    // both invocations settle independently
    assert_eq!(p1.await, Ok(Record { id: 1 }));
    assert_eq!(p2.await, Ok(Record { id: 1 }));
    assert!(find.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cleared_invocation_is_not_memoized() {
    coalescer_test::setup();

    let lookup = Lookup::new(DELAY);
    let find = find(&lookup, true);

    let p1 = find.call(1).unwrap();
    find.clear();

    assert_eq!(p1.await, Ok(Record { id: 1 }));
    assert!(find.is_empty());

    assert_eq!(find.call(1).unwrap().await, Ok(Record { id: 1 }));
    assert_eq!(lookup.hits(1), 2);
    assert_eq!(find.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cleared_invocation_keeps_newer_entry() {
    coalescer_test::setup();

    let lookup = Lookup::new(DELAY);
    let find = find(&lookup, false);

    let p1 = find.call(1).unwrap();
    find.clear();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let p2 = find.call(1).unwrap();

    // the first invocation settles while the second one is still pending
    assert_eq!(p1.await, Ok(Record { id: 1 }));
    assert_eq!(find.len(), 1);
    assert!(same_handle(&p2, &find.call(1).unwrap()));

    assert_eq!(p2.await, Ok(Record { id: 1 }));
    assert!(find.is_empty());
    assert_eq!(lookup.hits(1), 2);
}

#[tokio::test(start_paused = true)]
async fn test_clear_memoized() {
    coalescer_test::setup();

    let lookup = Lookup::new(DELAY);
    let find = find(&lookup, true);

    find.call(1).unwrap().await.unwrap();
    find.call(2).unwrap().await.unwrap();
    assert_eq!(find.len(), 2);

    assert_eq!(find.clear(), 2);

    find.call(1).unwrap().await.unwrap();
    find.call(2).unwrap().await.unwrap();
    assert_eq!((lookup.hits(1), lookup.hits(2)), (2, 2));
}

#[tokio::test(start_paused = true)]
async fn test_scoped_clear() {
    coalescer_test::setup();

    let registry = Registry::new();
    let lookup_a = Lookup::new(DELAY);
    let lookup_b = Lookup::new(DELAY);
    let find_a = find_in(&lookup_a, false, registry.clone());
    let find_b = find_in(&lookup_b, false, registry.clone());

    let a = find_a.call(1).unwrap();
    let b = find_b.call(1).unwrap();

    assert_eq!(registry.clear_operation(&find_a), Ok(1));
    assert!(find_a.is_empty());

    // the other operation with an equal key is unaffected
    assert_eq!(find_b.len(), 1);
    assert!(same_handle(&b, &find_b.call(1).unwrap()));
    assert!(!same_handle(&a, &find_a.call(1).unwrap()));

    assert_eq!(lookup_a.hits(1), 2);
    assert_eq!(lookup_b.hits(1), 1);
}

#[tokio::test(start_paused = true)]
async fn test_registry_clear() {
    coalescer_test::setup();

    let registry = Registry::new();
    let lookup = Lookup::new(DELAY);
    let memoized = find_in(&lookup, true, registry.clone());
    let pending = find_in(&lookup, false, registry.clone());

    memoized.call(1).unwrap().await.unwrap();
    let p1 = pending.call(2).unwrap();
    assert_eq!(registry.len(), 2);

    assert_eq!(registry.clear(), 2);
    assert!(memoized.is_empty());
    assert!(pending.is_empty());

    // pending handles are detached, not failed
    assert_eq!(p1.await, Ok(Record { id: 2 }));
}

#[tokio::test(start_paused = true)]
async fn test_clear_through_foreign_registry() {
    coalescer_test::setup();

    let lookup = Lookup::new(DELAY);
    let find = find(&lookup, false);
    let _pending = find.call(1).unwrap();

    let foreign = Registry::new();
    assert_eq!(
        foreign.clear_operation(&find),
        Err(CoalesceError::NotRegistered("find".into()))
    );
    assert_eq!(find.len(), 1);
}

#[test]
fn test_registry_prunes_dropped_operations() {
    let registry = Registry::new();
    let lookup = Lookup::new(DELAY);

    let find = find_in(&lookup, false, registry.clone());
    let cloned = find.clone();
    assert_eq!(registry.len(), 1);

    drop(find);
    assert_eq!(registry.len(), 1);

    drop(cloned);
    assert!(registry.is_empty());
}

/// The only test that touches the global registry, as it clears everything in it.
#[tokio::test(start_paused = true)]
async fn test_global_clear() {
    coalescer_test::setup();

    let lookup = Lookup::new(DELAY);
    let find = coalescer::wrap(lookup.operation(), Options::memoized());

    find.call(1).unwrap().await.unwrap();
    assert_eq!(find.len(), 1);

    assert!(coalescer::clear() >= 1);
    assert!(find.is_empty());

    find.call(1).unwrap().await.unwrap();
    assert_eq!(coalescer::clear_operation(&find), Ok(1));
    assert_eq!(lookup.hits(1), 2);
}
