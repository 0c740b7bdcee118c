use coalescer::{CoalesceError, Registry, same_handle};
use coalescer_test::{Lookup, LookupError, Record};

use crate::DELAY;

#[tokio::test(start_paused = true)]
async fn test_custom_serializer() {
    coalescer_test::setup();

    let lookup = Lookup::new(DELAY);
    let find = coalescer::builder({
        let lookup = lookup.clone();
        move |(id, _reason): (u32, &'static str)| lookup.find(id)
    })
    .serializer(|args: &(u32, &'static str)| args.0)
    .registry(Registry::new())
    .build();

    // trailing arguments do not distinguish entries
    let p1 = find.call((1, "a")).unwrap();
    let p2 = find.call((1, "b")).unwrap();
    assert!(same_handle(&p1, &p2));

    let p3 = find.call((2, "a")).unwrap();
    assert!(!same_handle(&p1, &p3));

    assert_eq!(p1.await, Ok(Record { id: 1 }));
    assert_eq!(p3.await, Ok(Record { id: 2 }));
    assert_eq!((lookup.hits(1), lookup.hits(2)), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_serializer_without_serialize() {
    coalescer_test::setup();

    /// Arguments that can not be serialized, only a derived key identifies them.
    #[derive(Clone)]
    struct Request {
        id: u32,
        _callback: fn(&Record) -> bool,
    }

    let lookup = Lookup::new(DELAY);
    let find = coalescer::builder({
        let lookup = lookup.clone();
        move |request: Request| lookup.find(request.id)
    })
    .serializer(|request: &Request| format!("request-{}", request.id))
    .memoize(true)
    .registry(Registry::new())
    .build();

    let request = Request {
        id: 3,
        _callback: |record| record.id == 3,
    };
    assert_eq!(find.call(request.clone()).unwrap().await, Ok(Record { id: 3 }));
    assert_eq!(find.call(request).unwrap().await, Ok(Record { id: 3 }));
    assert_eq!(lookup.hits(3), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_finite_floats_are_not_coalesced() {
    coalescer_test::setup();

    let scale = coalescer::builder(|factor: f64| async move {
        Ok::<_, LookupError>(factor * 2.0)
    })
    .memoize(true)
    .registry(Registry::new())
    .build();

    for factor in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
        let err = scale.call(factor).unwrap_err();
        assert!(matches!(err, CoalesceError::Serialization(_)));
    }
    assert!(scale.is_empty());

    assert_eq!(scale.call(1.5).unwrap().await, Ok(3.0));
    assert_eq!(scale.call(-1.5).unwrap().await, Ok(-3.0));
    assert_eq!(scale.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_nested_options_are_distinct() {
    coalescer_test::setup();

    let lookup = Lookup::new(DELAY);
    let find = coalescer::builder({
        let lookup = lookup.clone();
        move |id: Option<Option<u32>>| lookup.find(id.flatten().unwrap_or_default())
    })
    .memoize(true)
    .registry(Registry::new())
    .build();

    let none = find.call(None).unwrap();
    let some_none = find.call(Some(None)).unwrap();
    assert!(!same_handle(&none, &some_none));

    assert_eq!(none.await, Ok(Record { id: 0 }));
    assert_eq!(some_none.await, Ok(Record { id: 0 }));
    assert_eq!(find.len(), 2);
    assert_eq!(lookup.hits(0), 2);
}
