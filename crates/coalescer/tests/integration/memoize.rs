use std::time::Duration;

use coalescer::same_handle;
use coalescer_test::{Lookup, LookupError, Record};

use crate::{DELAY, find};

#[tokio::test(start_paused = true)]
async fn test_memoized_value_is_reused() {
    coalescer_test::setup();

    let lookup = Lookup::new(DELAY);
    let find = find(&lookup, true);
    assert!(find.memoizes());

    let p1 = find.call(1).unwrap();
    assert!(same_handle(&p1, &find.call(1).unwrap()));
    assert_eq!(p1.clone().await, Ok(Record { id: 1 }));

    // minutes later, the value is still served without invoking the operation
    tokio::time::sleep(Duration::from_secs(300)).await;

    let p2 = find.call(1).unwrap();
    let p3 = find.call(1).unwrap();
    assert!(!same_handle(&p2, &p3));
    assert_eq!(p2.await, Ok(Record { id: 1 }));
    assert_eq!(p3.await, Ok(Record { id: 1 }));

    assert_eq!(lookup.hits(1), 1);
    assert_eq!(find.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_memoizes_per_key() {
    coalescer_test::setup();

    let lookup = Lookup::new(DELAY);
    let find = find(&lookup, true);

    assert_eq!(find.call(1).unwrap().await, Ok(Record { id: 1 }));
    assert_eq!(find.call(2).unwrap().await, Ok(Record { id: 2 }));
    assert_eq!(find.call(1).unwrap().await, Ok(Record { id: 1 }));

    assert_eq!((lookup.hits(1), lookup.hits(2)), (1, 1));
    assert_eq!(find.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_not_memoized() {
    coalescer_test::setup();

    let lookup = Lookup::failing(DELAY);
    let find = find(&lookup, true);

    let first = find.call(1).unwrap().await;
    assert_eq!(
        first,
        Err(LookupError {
            id: 1,
            invocation: 1
        })
    );
    assert!(find.is_empty());

    let second = find.call(1).unwrap().await;
    assert_eq!(
        second,
        Err(LookupError {
            id: 1,
            invocation: 2
        })
    );
    assert_eq!(lookup.hits(1), 2);
}
