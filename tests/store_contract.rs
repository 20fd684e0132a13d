//! Behaviour every store backend must share
//!
//! Each test runs against SQLite (memory and file), the in-memory store,
//! redb and the API proxy.

use building_history::Record;
use pretty_assertions::assert_eq;
use rstest::rstest;

mod common;
use common::{payloads, t, Backend, Harness};

const OFFSETS: [i64; 5] = [0, 10, 20, 30, 40];

async fn read_all(slice: &dyn building_history::Slice, desc: bool) -> Vec<Record> {
    let mut buf = vec![Record::default(); 16];
    let n = if desc {
        slice.read_desc(&mut buf).await.unwrap()
    } else {
        slice.read(&mut buf).await.unwrap()
    };
    buf.truncate(n);
    buf
}

#[rstest]
#[tokio::test]
async fn test_append_assigns_ordered_ids(
    #[values(Backend::Sqlite, Backend::SqliteFile, Backend::Memory, Backend::Redb, Backend::Api)]
    backend: Backend,
) {
    let h = Harness::new(backend).await;
    let created = h.append_at(&[0, 10, 10, 20]).await;

    for pair in created.windows(2) {
        assert!(pair[0].id < pair[1].id, "{backend:?}: {} !< {}", pair[0].id, pair[1].id);
    }
    assert_eq!(created[1].create_time, Some(t(10)));
    assert_eq!(created[3].payload, b"20");
}

#[rstest]
#[tokio::test]
async fn test_read_both_directions(
    #[values(Backend::Sqlite, Backend::SqliteFile, Backend::Memory, Backend::Redb, Backend::Api)]
    backend: Backend,
) {
    let h = Harness::new(backend).await;
    h.append_at(&OFFSETS).await;

    let asc = read_all(h.store.as_ref(), false).await;
    assert_eq!(payloads(&asc), vec!["0", "10", "20", "30", "40"]);

    let desc = read_all(h.store.as_ref(), true).await;
    assert_eq!(payloads(&desc), vec!["40", "30", "20", "10", "0"]);

    // Reads stop when the buffer is full
    let mut small = vec![Record::default(); 2];
    assert_eq!(h.store.read(&mut small).await.unwrap(), 2);
    assert_eq!(payloads(&small), vec!["0", "10"]);
    assert_eq!(h.store.read_desc(&mut small).await.unwrap(), 2);
    assert_eq!(payloads(&small), vec!["40", "30"]);
}

#[rstest]
#[tokio::test]
async fn test_len_and_empty(
    #[values(Backend::Sqlite, Backend::Memory, Backend::Redb, Backend::Api)] backend: Backend,
) {
    let h = Harness::new(backend).await;
    assert!(h.store.is_empty().await.unwrap());
    assert_eq!(read_all(h.store.as_ref(), false).await, Vec::<Record>::new());

    h.append_at(&OFFSETS).await;
    assert_eq!(h.store.len().await.unwrap(), 5);
    assert!(!h.store.is_empty().await.unwrap());
}

#[rstest]
#[tokio::test]
async fn test_slice_by_time(
    #[values(Backend::Sqlite, Backend::SqliteFile, Backend::Memory, Backend::Redb, Backend::Api)]
    backend: Backend,
) {
    let h = Harness::new(backend).await;
    h.append_at(&OFFSETS).await;

    let slice = h.store.slice(Record::at(t(10)), Record::at(t(30)));
    assert_eq!(slice.len().await.unwrap(), 2);
    assert_eq!(payloads(&read_all(slice.as_ref(), false).await), vec!["10", "20"]);
    assert_eq!(payloads(&read_all(slice.as_ref(), true).await), vec!["20", "10"]);

    let open_end = h.store.slice(Record::at(t(25)), Record::default());
    assert_eq!(payloads(&read_all(open_end.as_ref(), false).await), vec!["30", "40"]);
}

#[rstest]
#[tokio::test]
async fn test_slice_by_id(
    #[values(Backend::Sqlite, Backend::Memory, Backend::Redb, Backend::Api)] backend: Backend,
) {
    let h = Harness::new(backend).await;
    let created = h.append_at(&OFFSETS).await;

    let slice = h.store.slice(
        Record::with_id(created[1].id.clone()),
        Record::with_id(created[4].id.clone()),
    );
    assert_eq!(payloads(&read_all(slice.as_ref(), false).await), vec!["10", "20", "30"]);
    assert_eq!(slice.len().await.unwrap(), 3);
}

#[rstest]
#[tokio::test]
async fn test_nested_slices_intersect(
    #[values(Backend::Sqlite, Backend::Memory, Backend::Redb, Backend::Api)] backend: Backend,
) {
    let h = Harness::new(backend).await;
    h.append_at(&OFFSETS).await;

    let outer = h.store.slice(Record::at(t(10)), Record::default());
    let inner = outer.slice(Record::at(t(0)), Record::at(t(40)));
    assert_eq!(payloads(&read_all(inner.as_ref(), false).await), vec!["10", "20", "30"]);

    // Narrowing never widens
    let narrower = inner.slice(Record::at(t(20)), Record::at(t(50)));
    assert_eq!(payloads(&read_all(narrower.as_ref(), false).await), vec!["20", "30"]);
}

#[rstest]
#[tokio::test]
async fn test_inverted_range_is_empty(
    #[values(Backend::Sqlite, Backend::Memory, Backend::Redb, Backend::Api)] backend: Backend,
) {
    let h = Harness::new(backend).await;
    h.append_at(&OFFSETS).await;

    let slice = h.store.slice(Record::at(t(30)), Record::at(t(10)));
    assert_eq!(slice.len().await.unwrap(), 0);
    assert!(read_all(slice.as_ref(), true).await.is_empty());
}
