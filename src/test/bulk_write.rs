use pretty_assertions::assert_eq;

use crate::{
    bson::{doc, Bson, Document},
    error::{BulkWriteFailure, Error, ErrorKind},
    options::{BulkWriteOptions, WriteConcern},
    test::util::{event_client, MockTransport},
    transport::StreamDescription,
    Collection,
    WriteModel,
};

fn coll(client: &crate::Client) -> Collection<Document> {
    client.database("db").collection("coll")
}

fn bulk_failure(error: &Error) -> &BulkWriteFailure {
    match *error.kind {
        ErrorKind::BulkWrite(ref failure) => failure,
        ref other => panic!("expected bulk write failure, got {:?}", other),
    }
}

fn write_error(index: i32) -> Document {
    doc! { "index": index, "code": 11000, "errmsg": "E11000 duplicate key error" }
}

fn unordered() -> BulkWriteOptions {
    BulkWriteOptions::builder().ordered(false).build()
}

#[tokio::test]
async fn unordered_errors_keep_original_indices() {
    let mock = MockTransport::new();
    mock.reply(
        "insert",
        doc! { "ok": 1, "n": 2, "writeErrors": [write_error(1), write_error(3)] },
    );
    let (client, _) = event_client(&mock);

    let models = (0..4)
        .map(|i| WriteModel::insert_one(doc! { "_id": i % 2 }))
        .collect::<Vec<_>>();
    let error = coll(&client).bulk_write(models, unordered()).await.unwrap_err();

    let failure = bulk_failure(&error);
    let indices: Vec<usize> = failure.write_errors.iter().map(|e| e.index).collect();
    assert_eq!(indices, vec![1, 3]);

    let partial = failure.partial_result.as_ref().unwrap();
    assert_eq!(partial.inserted_count, 2);
    let mut inserted: Vec<usize> = partial.inserted_ids.keys().copied().collect();
    inserted.sort_unstable();
    assert_eq!(inserted, vec![0, 2]);
}

#[tokio::test]
async fn unordered_errors_are_sorted_across_batches() {
    let mock = MockTransport::new();
    // Inserts are sent before updates, so the error for model 3 arrives first.
    mock.reply(
        "insert",
        doc! { "ok": 1, "n": 2, "writeErrors": [write_error(2)] },
    )
    .reply(
        "update",
        doc! {
            "ok": 1,
            "n": 0,
            "nModified": 0,
            "writeErrors": [{ "index": 0, "code": 66, "errmsg": "immutable field" }],
        },
    );
    let (client, _) = event_client(&mock);

    let models = vec![
        WriteModel::insert_one(doc! { "_id": 0 }),
        WriteModel::update_one(doc! { "_id": 0 }, doc! { "$set": { "_id": 5 } }),
        WriteModel::insert_one(doc! { "_id": 2 }),
        WriteModel::insert_one(doc! { "_id": 0 }),
    ];
    let error = coll(&client).bulk_write(models, unordered()).await.unwrap_err();

    assert_eq!(mock.sent_names(), vec!["insert", "update"]);
    let inserted = mock.sent_named("insert")[0]
        .body
        .get_array("documents")
        .unwrap()
        .len();
    assert_eq!(inserted, 3);

    let failure = bulk_failure(&error);
    let errors: Vec<(usize, i32)> = failure
        .write_errors
        .iter()
        .map(|e| (e.index, e.code))
        .collect();
    assert_eq!(errors, vec![(1, 66), (3, 11000)]);
}

#[tokio::test]
async fn ordered_write_stops_at_first_error() {
    let mock = MockTransport::new();
    mock.reply(
        "insert",
        doc! { "ok": 1, "n": 1, "writeErrors": [write_error(1)] },
    );
    let (client, _) = event_client(&mock);

    let models = vec![
        WriteModel::insert_one(doc! { "_id": 1 }),
        WriteModel::insert_one(doc! { "_id": 1 }),
        WriteModel::insert_one(doc! { "_id": 2 }),
        WriteModel::delete_one(doc! { "_id": 1 }),
    ];
    let error = coll(&client).bulk_write(models, None).await.unwrap_err();

    assert_eq!(mock.sent_names(), vec!["insert"]);
    assert!(mock.sent()[0].body.get_bool("ordered").unwrap());

    let failure = bulk_failure(&error);
    assert_eq!(failure.write_errors.len(), 1);
    assert_eq!(failure.write_errors[0].index, 1);

    let partial = failure.partial_result.as_ref().unwrap();
    assert_eq!(partial.inserted_count, 1);
    assert_eq!(
        partial.inserted_ids.keys().copied().collect::<Vec<_>>(),
        vec![0]
    );
}

#[tokio::test]
async fn mixed_models_report_counts() {
    let mock = MockTransport::new();
    mock.reply("insert", doc! { "ok": 1, "n": 1 })
        .reply(
            "update",
            doc! {
                "ok": 1,
                "n": 3,
                "nModified": 1,
                "upserted": [{ "index": 1, "_id": "new" }],
            },
        )
        .reply("delete", doc! { "ok": 1, "n": 4 });
    let (client, _) = event_client(&mock);

    let models = vec![
        WriteModel::insert_one(doc! { "_id": "a" }),
        WriteModel::update_many(doc! { "x": 1 }, doc! { "$inc": { "x": 1 } }),
        WriteModel::update_one(
            doc! { "_id": "new" },
            vec![doc! { "$set": { "y": 1 } }],
        ),
        WriteModel::delete_many(doc! {}),
    ];
    let result = coll(&client).bulk_write(models, None).await.unwrap();

    assert_eq!(mock.sent_names(), vec!["insert", "update", "delete"]);
    assert!(result.acknowledged);
    assert_eq!(result.inserted_count, 1);
    assert_eq!(result.matched_count, 2);
    assert_eq!(result.modified_count, 1);
    assert_eq!(result.upserted_count, 1);
    assert_eq!(result.upserted_ids[&2], Bson::String("new".to_string()));
    assert_eq!(result.deleted_count, 4);

    let updates = mock.sent_named("update")[0]
        .body
        .get_array("updates")
        .unwrap()
        .clone();
    let first = updates[0].as_document().unwrap();
    assert!(first.get_bool("multi").unwrap());
    let second = updates[1].as_document().unwrap();
    assert!(!second.get_bool("multi").unwrap());
    assert!(matches!(second.get("u"), Some(Bson::Array(_))));

    let deletes = mock.sent_named("delete")[0]
        .body
        .get_array("deletes")
        .unwrap()
        .clone();
    assert_eq!(
        deletes[0].as_document().unwrap().get_i32("limit").unwrap(),
        0
    );
}

#[tokio::test]
async fn write_concern_error_is_reported_with_partial_result() {
    let mock = MockTransport::new();
    mock.reply(
        "insert",
        doc! {
            "ok": 1,
            "n": 1,
            "writeConcernError": { "code": 64, "errmsg": "waiting for replication timed out" },
        },
    );
    let (client, _) = event_client(&mock);

    let error = coll(&client)
        .bulk_write(vec![WriteModel::insert_one(doc! { "x": 1 })], None)
        .await
        .unwrap_err();

    let failure = bulk_failure(&error);
    assert!(failure.write_errors.is_empty());
    assert_eq!(failure.write_concern_error.as_ref().unwrap().code, 64);
    assert_eq!(failure.partial_result.as_ref().unwrap().inserted_count, 1);
}

#[tokio::test]
async fn batches_respect_max_write_batch_size() {
    let mock = MockTransport::with_description(
        StreamDescription::builder().max_write_batch_size(2).build(),
    );
    mock.reply("insert", doc! { "ok": 1, "n": 2 })
        .reply("insert", doc! { "ok": 1, "n": 2 })
        .reply("insert", doc! { "ok": 1, "n": 1 });
    let (client, _) = event_client(&mock);

    let models = (0..5)
        .map(|i| WriteModel::insert_one(doc! { "_id": i }))
        .collect::<Vec<_>>();
    let result = coll(&client).bulk_write(models, None).await.unwrap();

    assert_eq!(result.inserted_count, 5);
    let sizes: Vec<usize> = mock
        .sent_named("insert")
        .iter()
        .map(|c| c.body.get_array("documents").unwrap().len())
        .collect();
    assert_eq!(sizes, vec![2, 2, 1]);
}

#[tokio::test]
async fn invalid_models_are_rejected_before_sending() {
    let mock = MockTransport::new();
    let (client, buffer) = event_client(&mock);

    let empty = coll(&client)
        .bulk_write(Vec::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(*empty.kind, ErrorKind::InvalidArgument { .. }));

    let models = vec![
        WriteModel::insert_one(doc! { "x": 1 }),
        WriteModel::update_one(doc! {}, doc! { "x": 2 }),
    ];
    let not_an_update = coll(&client).bulk_write(models, None).await.unwrap_err();
    assert!(matches!(
        *not_an_update.kind,
        ErrorKind::InvalidArgument { .. }
    ));

    let models = vec![WriteModel::replace_one(doc! {}, doc! { "$set": { "x": 2 } })];
    let not_a_replacement = coll(&client).bulk_write(models, None).await.unwrap_err();
    assert!(matches!(
        *not_a_replacement.kind,
        ErrorKind::InvalidArgument { .. }
    ));

    assert!(buffer.all().is_empty());
}

#[tokio::test]
async fn unacknowledged_bulk_write_reports_generated_ids() {
    let mock = MockTransport::new();
    let (client, _) = event_client(&mock);

    let options = BulkWriteOptions::builder()
        .write_concern(WriteConcern::unacknowledged())
        .build();
    let models = vec![
        WriteModel::insert_one(doc! { "_id": 1 }),
        WriteModel::delete_one(doc! { "_id": 1 }),
    ];
    let result = coll(&client).bulk_write(models, options).await.unwrap();

    assert!(!result.acknowledged);
    assert_eq!(result.deleted_count, 0);
    assert_eq!(result.inserted_ids[&0], Bson::Int32(1));
    assert!(mock.sent().iter().all(|c| !c.acknowledged));
    assert_eq!(mock.sent_names(), vec!["insert", "delete"]);
}
