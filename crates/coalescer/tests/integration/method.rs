use std::sync::Arc;

use coalescer::{Coalesced, Method, Operation, Registry, same_handle};
use coalescer_test::{Lookup, LookupError, Record};
use futures::future::BoxFuture;

use crate::DELAY;

struct Repository {
    lookup: Lookup,
    prefix: u32,
}

impl Repository {
    async fn find(self: Arc<Self>, id: u32) -> Result<Record, LookupError> {
        self.lookup.find(self.prefix + id).await
    }
}

type FindFn = fn(Arc<Repository>, u32) -> BoxFuture<'static, Result<Record, LookupError>>;

/// Wraps the methods of a [`Repository`] once, when it is created.
struct Service {
    find: Coalesced<u32, Method<Repository, FindFn>>,
}

impl Service {
    fn new(repository: Arc<Repository>, registry: Arc<Registry>) -> Self {
        let find: FindFn = |repository, id| Box::pin(repository.find(id));
        Self {
            find: coalescer::builder(Method::new(repository, find))
                .name("repository.find")
                .registry(registry)
                .build(),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_method_on_receiver() {
    coalescer_test::setup();

    let lookup = Lookup::new(DELAY);
    let repository = Arc::new(Repository {
        lookup: lookup.clone(),
        prefix: 100,
    });

    let find = coalescer::builder(Method::new(Arc::clone(&repository), Repository::find))
        .registry(Registry::new())
        .build();

    let p1 = find.call(1).unwrap();
    assert!(same_handle(&p1, &find.call(1).unwrap()));
    assert_eq!(p1.await, Ok(Record { id: 101 }));
    assert_eq!(lookup.hits(101), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wrapped_at_construction() {
    coalescer_test::setup();

    let lookup = Lookup::new(DELAY);
    let registry = Registry::new();
    let repository = Arc::new(Repository {
        lookup: lookup.clone(),
        prefix: 0,
    });
    let service = Service::new(repository, registry.clone());
    assert_eq!(service.find.name(), "repository.find");

    let p1 = service.find.call(5).unwrap();
    let p2 = service.find.call(5).unwrap();
    assert!(same_handle(&p1, &p2));

    assert_eq!(registry.clear_operation(&service.find), Ok(1));
    assert_eq!(p2.await, Ok(Record { id: 5 }));
    assert_eq!(lookup.hits(5), 1);
}

fn assert_operation<Args, Op: Operation<Args>>(_op: &Op) {}

#[test]
fn test_method_is_operation() {
    let repository = Arc::new(Repository {
        lookup: Lookup::new(DELAY),
        prefix: 0,
    });
    let method = Method::new(repository, Repository::find);
    assert_operation::<u32, _>(&method);
    assert_eq!(method.receiver().prefix, 0);
}
