use std::time::Duration;

use pretty_assertions::assert_eq;

use super::{ClientSession, ClusterTime, ServerSession, ServerSessionPool};
use crate::{
    bson::{doc, spec::BinarySubtype, Binary, Bson, Document, Timestamp},
    error::ErrorKind,
    options::SessionOptions,
    test::util::MockTransport,
    Client,
};

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(30 * 60));

fn client() -> Client {
    Client::with_transport(MockTransport::new(), None)
}

fn cluster_time(time: u32, increment: u32) -> ClusterTime {
    ClusterTime::from_document(&doc! {
        "clusterTime": Timestamp { time, increment },
        "signature": {
            "hash": Binary { subtype: BinarySubtype::Generic, bytes: vec![0; 20] },
            "keyId": 1_i64,
        },
    })
    .unwrap()
}

#[test]
fn pool_checks_out_most_recently_returned_session() {
    let pool = ServerSessionPool::new();
    let first = ServerSession::new();
    let second = ServerSession::new();
    let (first_id, second_id) = (first.id.clone(), second.id.clone());

    pool.check_in(first, TIMEOUT);
    pool.check_in(second, TIMEOUT);
    assert_eq!(pool.len(), 2);

    assert_eq!(pool.check_out(TIMEOUT).id, second_id);
    assert_eq!(pool.check_out(TIMEOUT).id, first_id);

    let fresh = pool.check_out(TIMEOUT);
    assert_ne!(fresh.id, first_id);
    assert_ne!(fresh.id, second_id);
}

#[test]
fn pool_discards_dirty_sessions() {
    let pool = ServerSessionPool::new();
    let mut session = ServerSession::new();
    session.dirty = true;

    pool.check_in(session, TIMEOUT);
    assert_eq!(pool.len(), 0);
}

#[test]
fn pool_discards_sessions_about_to_expire() {
    let pool = ServerSessionPool::new();
    let short_timeout = Some(Duration::from_secs(30));

    pool.check_in(ServerSession::new(), short_timeout);
    assert_eq!(pool.len(), 0);

    let kept = ServerSession::new();
    let kept_id = kept.id.clone();
    pool.check_in(kept, TIMEOUT);
    assert_eq!(pool.len(), 1);

    // A tighter timeout on checkout retires the pooled session instead of reusing it.
    assert_ne!(pool.check_out(short_timeout).id, kept_id);
    assert_eq!(pool.len(), 0);
}

#[test]
fn sessions_never_expire_without_a_timeout() {
    let session = ServerSession::new();
    assert!(!session.is_about_to_expire(None));
    assert!(session.is_about_to_expire(Some(Duration::ZERO)));
}

#[test]
fn server_session_ids_are_uuids() {
    let session = ServerSession::new();
    match session.id.get("id") {
        Some(Bson::Binary(binary)) => {
            assert_eq!(binary.subtype, BinarySubtype::Uuid);
            assert_eq!(binary.bytes.len(), 16);
        }
        other => panic!("expected binary session id, got {:?}", other),
    }
}

#[test]
fn drain_ids_empties_pool() {
    let pool = ServerSessionPool::new();
    let ids: Vec<Document> = (0..3)
        .map(|_| {
            let session = ServerSession::new();
            let id = session.id.clone();
            pool.check_in(session, TIMEOUT);
            id
        })
        .collect();

    let mut drained = pool.drain_ids();
    drained.reverse();
    assert_eq!(drained, ids);
    assert_eq!(pool.len(), 0);
}

#[test]
fn cluster_time_only_advances() {
    let client = client();
    let session = client.start_session(None).unwrap();
    assert!(session.cluster_time().is_none());

    session.advance_cluster_time(&cluster_time(10, 2));
    session.advance_cluster_time(&cluster_time(10, 1));
    session.advance_cluster_time(&cluster_time(9, 5));
    assert_eq!(
        session.cluster_time().unwrap().timestamp(),
        Timestamp {
            time: 10,
            increment: 2
        }
    );

    session.advance_cluster_time(&cluster_time(11, 0));
    assert_eq!(session.cluster_time().unwrap().timestamp().time, 11);
}

#[test]
fn malformed_cluster_time_document_is_rejected() {
    let client = client();
    let session = client.start_session(None).unwrap();

    let unsigned = doc! {
        "clusterTime": Timestamp { time: 5, increment: 1 },
        "signature": { "hash": "not binary", "keyId": 1_i64 },
    };
    let error = session.advance_cluster_time_document(&unsigned).unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));

    let error = session
        .advance_cluster_time_document(&doc! { "clusterTime": 5 })
        .unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));
    assert!(session.cluster_time().is_none());
}

#[test]
fn operation_time_only_advances() {
    let client = client();
    let session = client.start_session(None).unwrap();

    session.advance_operation_time(Timestamp {
        time: 5,
        increment: 3,
    });
    session.advance_operation_time(Timestamp {
        time: 5,
        increment: 1,
    });
    assert_eq!(
        session.operation_time(),
        Some(Timestamp {
            time: 5,
            increment: 3
        })
    );
}

#[test]
fn causal_consistency_defaults() {
    let client = client();
    let explicit = client.start_session(None).unwrap();
    assert!(explicit.causal_consistency());

    let disabled = client
        .start_session(SessionOptions::builder().causal_consistency(false).build())
        .unwrap();
    assert!(!disabled.causal_consistency());

    let implicit = ClientSession::new(ServerSession::new(), client.clone(), None, true);
    assert!(!implicit.causal_consistency());
}

#[test]
fn end_session_returns_server_session_once() {
    let client = client();
    let session = client.start_session(None).unwrap();
    let handle = session.clone();
    let id = session.id().clone();

    session.end_session();
    session.end_session();
    assert!(handle.has_ended());
    assert_eq!(client.pooled_session_count(), 1);
    assert!(client.is_session_pooled(&id));

    drop(session);
    drop(handle);
    assert_eq!(client.pooled_session_count(), 1);
}

#[test]
fn dropping_last_handle_returns_server_session() {
    let client = client();
    let session = client.start_session(None).unwrap();
    let handle = session.clone();
    let id = session.id().clone();

    drop(session);
    assert_eq!(client.pooled_session_count(), 0);
    drop(handle);
    assert!(client.is_session_pooled(&id));

    let reused = client.start_session(None).unwrap();
    assert_eq!(reused.id(), &id);
}

#[test]
fn dirty_session_is_not_pooled() {
    let client = client();
    let session = client.start_session(None).unwrap();
    session.mark_dirty();
    assert!(session.is_dirty());

    session.end_session();
    assert_eq!(client.pooled_session_count(), 0);
}

#[test]
fn check_usable_rejects_ended_and_foreign_sessions() {
    let client = client();
    let other = Client::with_transport(MockTransport::new(), None);
    let session = client.start_session(None).unwrap();

    session.check_usable(&client).unwrap();

    let error = session.check_usable(&other).unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));

    session.end_session();
    let error = session.check_usable(&client).unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::SessionEnded));
}
