use pretty_assertions::assert_eq;

use crate::{
    bson::{doc, Bson, Document, Timestamp},
    change_stream::{
        event::{ChangeStreamEvent, ChangeStreamNotification, OperationType, ResumeToken},
        ChangeStream,
    },
    error::{ErrorKind, RESUMABLE_CHANGE_STREAM_ERROR},
    options::ChangeStreamOptions,
    test::util::{
        command_error,
        cursor_reply,
        cursor_reply_with_token,
        event_client,
        get_more_reply,
        get_more_reply_with_token,
        network_error,
        EventBuffer,
        MockTransport,
    },
    transport::StreamDescription,
    Client,
};

const NS: &str = "db.coll";

fn change(n: i32) -> Document {
    doc! {
        "_id": { "_data": format!("event{}", n) },
        "operationType": "insert",
        "documentKey": { "_id": n },
        "fullDocument": { "_id": n },
    }
}

fn batch_token(n: i32) -> Document {
    doc! { "_data": format!("batch{}", n) }
}

fn event_token(n: i32) -> ResumeToken {
    ResumeToken(Bson::Document(doc! { "_data": format!("event{}", n) }))
}

fn token(doc: Document) -> ResumeToken {
    ResumeToken(Bson::Document(doc))
}

fn watch(
    client: &Client,
    options: Option<ChangeStreamOptions>,
) -> (
    ChangeStream<ChangeStreamEvent<Document>>,
    EventBuffer<ChangeStreamNotification>,
) {
    let notifications = EventBuffer::new();
    let mut options = options.unwrap_or_default();
    options.notification_handler = Some(notifications.handler());
    let stream = client
        .database("db")
        .collection::<Document>("coll")
        .watch(None, options);
    (stream, notifications)
}

fn token_changes(notifications: &EventBuffer<ChangeStreamNotification>) -> Vec<ResumeToken> {
    notifications.filter_map(|n| match n {
        ChangeStreamNotification::ResumeTokenChanged(token) => Some(token.clone()),
        _ => None,
    })
}

fn change_stream_stage(command: &Document) -> Document {
    command.get_array("pipeline").unwrap()[0]
        .as_document()
        .unwrap()
        .get_document("$changeStream")
        .unwrap()
        .clone()
}

#[tokio::test]
async fn nothing_is_sent_until_first_iteration() {
    let mock = MockTransport::new();
    mock.reply("aggregate", cursor_reply(NS, 42, vec![change(1)]));
    let (client, buffer) = event_client(&mock);

    let (mut stream, _) = watch(&client, None);
    assert!(buffer.started_command_names().is_empty());
    assert_eq!(stream.resume_token(), None);

    let event = stream.next().await.unwrap().unwrap();
    assert_eq!(event.operation_type, OperationType::Insert);
    assert_eq!(event.full_document, Some(doc! { "_id": 1 }));

    let aggregate = &mock.sent_named("aggregate")[0];
    assert_eq!(aggregate.body.get_str("aggregate").unwrap(), "coll");
    assert_eq!(change_stream_stage(&aggregate.body), doc! {});
}

#[tokio::test]
async fn empty_initial_batch_reports_both_batch_tokens() {
    let mock = MockTransport::new();
    mock.reply(
        "aggregate",
        cursor_reply_with_token(NS, 42, vec![], batch_token(1)),
    )
    .reply(
        "getMore",
        get_more_reply_with_token(NS, 42, vec![change(1)], batch_token(2)),
    );
    let (client, _) = event_client(&mock);
    let (mut stream, notifications) = watch(&client, None);

    stream.next().await.unwrap().unwrap();

    assert_eq!(stream.resume_token(), Some(token(batch_token(2))));
    assert_eq!(
        token_changes(&notifications),
        vec![token(batch_token(1)), token(batch_token(2))]
    );
}

#[tokio::test]
async fn partially_consumed_batch_uses_event_id() {
    let mock = MockTransport::new();
    mock.reply(
        "aggregate",
        cursor_reply_with_token(NS, 42, vec![change(1), change(2)], batch_token(1)),
    );
    let (client, _) = event_client(&mock);
    let (mut stream, _) = watch(&client, None);

    stream.next().await.unwrap().unwrap();
    assert_eq!(stream.resume_token(), Some(event_token(1)));

    stream.next().await.unwrap().unwrap();
    assert_eq!(stream.resume_token(), Some(token(batch_token(1))));
}

#[tokio::test]
async fn resume_token_only_moves_forward() {
    let mock = MockTransport::new();
    mock.reply(
        "aggregate",
        cursor_reply_with_token(NS, 42, vec![change(1), change(2)], batch_token(1)),
    )
    .reply(
        "getMore",
        get_more_reply_with_token(NS, 42, vec![change(3)], batch_token(2)),
    )
    .reply(
        "getMore",
        get_more_reply_with_token(NS, 42, vec![], batch_token(3)),
    );
    let (client, _) = event_client(&mock);
    let (mut stream, notifications) = watch(&client, None);

    let mut observed = Vec::new();
    for _ in 0..4 {
        stream.try_next().await.unwrap();
        observed.push(stream.resume_token().unwrap());
    }

    let expected = vec![
        event_token(1),
        token(batch_token(1)),
        token(batch_token(2)),
        token(batch_token(3)),
    ];
    assert_eq!(observed, expected);
    assert_eq!(token_changes(&notifications), expected);
}

#[tokio::test]
async fn resumes_after_network_error() {
    let mock = MockTransport::new();
    mock.reply("aggregate", cursor_reply(NS, 42, vec![change(1)]))
        .fail("getMore", network_error())
        .reply("aggregate", cursor_reply(NS, 43, vec![change(2)]));
    let (client, _) = event_client(&mock);
    let (mut stream, notifications) = watch(&client, None);

    assert_eq!(stream.next().await.unwrap().unwrap().id, event_token(1));
    assert_eq!(stream.next().await.unwrap().unwrap().id, event_token(2));

    let notifications = notifications.all();
    assert!(!notifications
        .iter()
        .any(|n| matches!(n, ChangeStreamNotification::Error(_))));
    assert!(notifications
        .iter()
        .any(|n| matches!(n, ChangeStreamNotification::Resumed { .. })));

    let aggregates = mock.sent_named("aggregate");
    assert_eq!(aggregates.len(), 2);
    let stage = change_stream_stage(&aggregates[1].body);
    assert_eq!(
        stage.get("resumeAfter"),
        Some(&Bson::Document(doc! { "_data": "event1" }))
    );
    assert!(!stage.contains_key("startAfter"));

    // The cursor that failed with a network error is not killed.
    assert_eq!(mock.count("killCursors"), 0);
}

#[tokio::test]
async fn resumes_on_labeled_server_error() {
    let mock = MockTransport::new();
    mock.reply("aggregate", cursor_reply(NS, 42, vec![change(1)]))
        .reply("getMore", command_error(91, &[RESUMABLE_CHANGE_STREAM_ERROR]))
        .reply("aggregate", cursor_reply(NS, 43, vec![change(2)]));
    let (client, _) = event_client(&mock);
    let (mut stream, _) = watch(&client, None);

    stream.next().await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap().id, event_token(2));

    // The server may still hold the interrupted cursor.
    let kills = mock.sent_named("killCursors");
    assert_eq!(kills.len(), 1);
    assert_eq!(
        kills[0].body.get_array("cursors").unwrap(),
        &vec![Bson::Int64(42)]
    );
}

#[tokio::test]
async fn legacy_servers_resume_on_error_code() {
    let mock = MockTransport::with_description(
        StreamDescription::builder().max_wire_version(8).build(),
    );
    mock.reply("aggregate", cursor_reply(NS, 42, vec![change(1)]))
        .reply("getMore", command_error(189, &[]))
        .reply("aggregate", cursor_reply(NS, 43, vec![change(2)]));
    let (client, _) = event_client(&mock);
    let (mut stream, _) = watch(&client, None);

    stream.next().await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap().id, event_token(2));
    assert_eq!(mock.count("aggregate"), 2);
}

#[tokio::test]
async fn non_resumable_error_closes_stream() {
    let mock = MockTransport::new();
    mock.reply("aggregate", cursor_reply(NS, 42, vec![change(1)]))
        .reply("getMore", command_error(280, &[]));
    let (client, _) = event_client(&mock);
    let (mut stream, notifications) = watch(&client, None);

    stream.next().await.unwrap();
    let error = stream.next().await.unwrap_err();
    assert_eq!(error.code(), Some(280));
    assert!(!stream.is_alive());
    assert_eq!(stream.next().await.unwrap(), None);

    let notifications = notifications.all();
    let tail: Vec<_> = notifications.iter().rev().take(2).collect();
    assert!(matches!(tail[0], ChangeStreamNotification::Closed));
    assert!(matches!(tail[1], ChangeStreamNotification::Error(_)));
    assert_eq!(mock.count("aggregate"), 1);
}

#[tokio::test]
async fn failed_initial_aggregate_is_not_resumed() {
    let mock = MockTransport::new();
    mock.fail("aggregate", network_error());
    let (client, _) = event_client(&mock);
    let (mut stream, _) = watch(&client, None);

    let error = stream.next().await.unwrap_err();
    assert!(error.is_network_error());
    assert_eq!(mock.count("aggregate"), 1);
    assert!(!stream.is_alive());
}

#[tokio::test]
async fn failed_resume_is_retried_on_next_call() {
    let mock = MockTransport::new();
    mock.reply("aggregate", cursor_reply(NS, 42, vec![change(1)]))
        .fail("getMore", network_error())
        .fail("aggregate", network_error())
        .reply("aggregate", cursor_reply(NS, 44, vec![change(2)]));
    let (client, _) = event_client(&mock);
    let (mut stream, _) = watch(&client, None);

    stream.next().await.unwrap();
    assert!(stream.next().await.unwrap_err().is_network_error());
    assert!(stream.is_alive());

    assert_eq!(stream.next().await.unwrap().unwrap().id, event_token(2));
    assert_eq!(mock.count("aggregate"), 3);
}

#[tokio::test]
async fn missing_resume_token_is_fatal() {
    let mock = MockTransport::new();
    mock.reply(
        "aggregate",
        cursor_reply(NS, 42, vec![doc! { "operationType": "insert" }]),
    );
    let (client, _) = event_client(&mock);
    let (mut stream, _) = watch(&client, None);

    let error = stream.next().await.unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::MissingResumeToken));
    assert!(!stream.is_alive());
    assert_eq!(mock.count("killCursors"), 1);
}

#[tokio::test]
async fn close_is_idempotent() {
    let mock = MockTransport::new();
    mock.reply("aggregate", cursor_reply(NS, 42, vec![change(1), change(2)]));
    let (client, _) = event_client(&mock);
    let (mut stream, notifications) = watch(&client, None);

    stream.next().await.unwrap();
    stream.close().await;
    stream.close().await;

    assert_eq!(mock.count("killCursors"), 1);
    let closed = notifications
        .all()
        .into_iter()
        .filter(|n| matches!(n, ChangeStreamNotification::Closed))
        .count();
    assert_eq!(closed, 1);
    assert_eq!(stream.next().await.unwrap(), None);
}

#[tokio::test]
async fn start_after_is_kept_until_an_event_is_returned() {
    let mock = MockTransport::new();
    mock.reply("aggregate", cursor_reply(NS, 42, vec![]))
        .fail("getMore", network_error())
        .reply("aggregate", cursor_reply(NS, 43, vec![change(1)]))
        .fail("getMore", network_error())
        .reply("aggregate", cursor_reply(NS, 44, vec![change(2)]));
    let (client, _) = event_client(&mock);

    let start = doc! { "_data": "start" };
    let options = ChangeStreamOptions::builder()
        .start_after(token(start.clone()))
        .build();
    let (mut stream, _) = watch(&client, Some(options));

    assert_eq!(stream.next().await.unwrap().unwrap().id, event_token(1));
    assert_eq!(stream.next().await.unwrap().unwrap().id, event_token(2));

    let aggregates = mock.sent_named("aggregate");
    let first = change_stream_stage(&aggregates[0].body);
    assert_eq!(first.get_document("startAfter").unwrap(), &start);

    let second = change_stream_stage(&aggregates[1].body);
    assert_eq!(second.get_document("startAfter").unwrap(), &start);
    assert!(!second.contains_key("resumeAfter"));

    let third = change_stream_stage(&aggregates[2].body);
    assert_eq!(
        third.get_document("resumeAfter").unwrap(),
        &doc! { "_data": "event1" }
    );
    assert!(!third.contains_key("startAfter"));
}

#[tokio::test]
async fn resume_without_token_uses_initial_operation_time() {
    let operation_time = Timestamp {
        time: 100,
        increment: 2,
    };
    let mut initial = cursor_reply(NS, 42, vec![]);
    initial.insert("operationTime", operation_time);

    let mock = MockTransport::new();
    mock.reply("aggregate", initial)
        .fail("getMore", network_error())
        .reply("aggregate", cursor_reply(NS, 43, vec![change(1)]));
    let (client, _) = event_client(&mock);
    let (mut stream, _) = watch(&client, None);

    stream.next().await.unwrap();

    let aggregates = mock.sent_named("aggregate");
    let stage = change_stream_stage(&aggregates[1].body);
    assert_eq!(
        stage.get("startAtOperationTime"),
        Some(&Bson::Timestamp(operation_time))
    );
}

#[tokio::test]
async fn resume_reuses_explicit_session() {
    let mock = MockTransport::new();
    mock.reply("aggregate", cursor_reply(NS, 42, vec![change(1)]))
        .fail("getMore", network_error())
        .reply("aggregate", cursor_reply(NS, 43, vec![change(2)]));
    let (client, _) = event_client(&mock);
    let session = client.start_session(None).unwrap();

    let mut stream = client
        .database("db")
        .collection::<Document>("coll")
        .watch_with_session(None, None, &session);
    stream.next().await.unwrap();
    stream.next().await.unwrap();

    for aggregate in mock.sent_named("aggregate") {
        assert_eq!(aggregate.body.get_document("lsid").unwrap(), session.id());
    }
}

#[tokio::test]
async fn exhausted_cursor_closes_stream() {
    let mock = MockTransport::new();
    mock.reply("aggregate", cursor_reply(NS, 42, vec![change(1)]))
        .reply("getMore", get_more_reply(NS, 0, vec![]));
    let (client, _) = event_client(&mock);
    let (mut stream, notifications) = watch(&client, None);

    stream.next().await.unwrap();
    assert_eq!(stream.next().await.unwrap(), None);
    assert!(!stream.is_alive());
    assert!(notifications
        .all()
        .iter()
        .any(|n| matches!(n, ChangeStreamNotification::Closed)));
    assert_eq!(mock.count("killCursors"), 0);
}

#[tokio::test]
async fn client_watch_targets_admin() {
    let mock = MockTransport::new();
    mock.reply("aggregate", cursor_reply("admin.$cmd.aggregate", 0, vec![]));
    let (client, _) = event_client(&mock);

    let mut stream = client.watch(None, None);
    assert_eq!(stream.next().await.unwrap(), None);

    let aggregate = &mock.sent_named("aggregate")[0];
    assert_eq!(aggregate.db, "admin");
    assert_eq!(aggregate.body.get_i32("aggregate").unwrap(), 1);
    assert!(change_stream_stage(&aggregate.body)
        .get_bool("allChangesForCluster")
        .unwrap());
}
