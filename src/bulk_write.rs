//! Splitting a list of write models into `insert`, `update` and `delete` commands, and merging
//! the replies back into one result keyed by the caller's indices.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    error::{BulkWriteError, BulkWriteFailure, Error, ErrorKind, Result},
    operation::{WriteCommand, WriteCommandKind, WriteCommandResponse},
    options::{BulkWriteOptions, Hint},
    results::BulkWriteResult,
    transport::StreamDescription,
    Client,
    ClientSession,
    Namespace,
};

/// Room left in a message for the command fields surrounding the statements.
const COMMAND_OVERHEAD_SIZE: usize = 16_000;

/// Enum modeling the modifications to apply during an update.
/// For details, see the official MongoDB
/// [documentation](https://www.mongodb.com/docs/manual/reference/command/update/#update-command-behaviors)
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum UpdateModifications {
    /// A document that contains only update operator expressions.
    Document(Document),

    /// An aggregation pipeline. Only available in MongoDB 4.2+.
    Pipeline(Vec<Document>),
}

impl From<Document> for UpdateModifications {
    fn from(item: Document) -> Self {
        UpdateModifications::Document(item)
    }
}

impl From<Vec<Document>> for UpdateModifications {
    fn from(item: Vec<Document>) -> Self {
        UpdateModifications::Pipeline(item)
    }
}

/// A single write passed to [`Collection::bulk_write`](crate::Collection::bulk_write).
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum WriteModel {
    /// Inserts a document. An `_id` is generated if the document does not carry one.
    InsertOne {
        /// The document to insert.
        document: Document,
    },

    /// Updates at most one document matching `filter`.
    UpdateOne {
        /// Selects the document to update.
        filter: Document,
        /// The modifications to apply. Documents must only contain update operators.
        update: UpdateModifications,
        /// Filters selecting which array elements to update.
        array_filters: Option<Vec<Document>>,
        /// The collation to use for the update.
        collation: Option<Document>,
        /// The index to use for the update.
        hint: Option<Hint>,
        /// Insert a document if none match `filter`.
        upsert: Option<bool>,
    },

    /// Updates every document matching `filter`.
    UpdateMany {
        /// Selects the documents to update.
        filter: Document,
        /// The modifications to apply. Documents must only contain update operators.
        update: UpdateModifications,
        /// Filters selecting which array elements to update.
        array_filters: Option<Vec<Document>>,
        /// The collation to use for the update.
        collation: Option<Document>,
        /// The index to use for the update.
        hint: Option<Hint>,
        /// Insert a document if none match `filter`.
        upsert: Option<bool>,
    },

    /// Replaces at most one document matching `filter`.
    ReplaceOne {
        /// Selects the document to replace.
        filter: Document,
        /// The new document. Must not contain update operators.
        replacement: Document,
        /// The collation to use for the replacement.
        collation: Option<Document>,
        /// The index to use for the replacement.
        hint: Option<Hint>,
        /// Insert `replacement` if no document matches `filter`.
        upsert: Option<bool>,
    },

    /// Deletes at most one document matching `filter`.
    DeleteOne {
        /// Selects the document to delete.
        filter: Document,
        /// The collation to use for the delete.
        collation: Option<Document>,
        /// The index to use for the delete.
        hint: Option<Hint>,
    },

    /// Deletes every document matching `filter`.
    DeleteMany {
        /// Selects the documents to delete.
        filter: Document,
        /// The collation to use for the delete.
        collation: Option<Document>,
        /// The index to use for the delete.
        hint: Option<Hint>,
    },
}

impl WriteModel {
    /// Inserts `document`.
    pub fn insert_one(document: Document) -> Self {
        Self::InsertOne { document }
    }

    /// Updates the first document matching `filter` with `update`.
    pub fn update_one(filter: Document, update: impl Into<UpdateModifications>) -> Self {
        Self::UpdateOne {
            filter,
            update: update.into(),
            array_filters: None,
            collation: None,
            hint: None,
            upsert: None,
        }
    }

    /// Updates every document matching `filter` with `update`.
    pub fn update_many(filter: Document, update: impl Into<UpdateModifications>) -> Self {
        Self::UpdateMany {
            filter,
            update: update.into(),
            array_filters: None,
            collation: None,
            hint: None,
            upsert: None,
        }
    }

    /// Replaces the first document matching `filter` with `replacement`.
    pub fn replace_one(filter: Document, replacement: Document) -> Self {
        Self::ReplaceOne {
            filter,
            replacement,
            collation: None,
            hint: None,
            upsert: None,
        }
    }

    /// Deletes the first document matching `filter`.
    pub fn delete_one(filter: Document) -> Self {
        Self::DeleteOne {
            filter,
            collation: None,
            hint: None,
        }
    }

    /// Deletes every document matching `filter`.
    pub fn delete_many(filter: Document) -> Self {
        Self::DeleteMany {
            filter,
            collation: None,
            hint: None,
        }
    }

    fn kind(&self) -> WriteCommandKind {
        match self {
            Self::InsertOne { .. } => WriteCommandKind::Insert,
            Self::UpdateOne { .. } | Self::UpdateMany { .. } | Self::ReplaceOne { .. } => {
                WriteCommandKind::Update
            }
            Self::DeleteOne { .. } | Self::DeleteMany { .. } => WriteCommandKind::Delete,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::UpdateOne {
                update: UpdateModifications::Document(update),
                ..
            }
            | Self::UpdateMany {
                update: UpdateModifications::Document(update),
                ..
            } => bson_util::update_document_check(update),
            Self::ReplaceOne { replacement, .. } => {
                bson_util::replacement_document_check(replacement)
            }
            _ => Ok(()),
        }
    }

    /// Converts this model into the statement sent to the server, along with the `_id` of the
    /// document it inserts, if any.
    fn into_statement(self) -> Result<(Document, Option<Bson>)> {
        let statement = match self {
            Self::InsertOne { mut document } => {
                let id = bson_util::get_or_prepend_id_field(&mut document);
                return Ok((document, Some(id)));
            }
            Self::UpdateOne {
                filter,
                update,
                array_filters,
                collation,
                hint,
                upsert,
            } => update_statement(filter, update, array_filters, collation, hint, upsert, false)?,
            Self::UpdateMany {
                filter,
                update,
                array_filters,
                collation,
                hint,
                upsert,
            } => update_statement(filter, update, array_filters, collation, hint, upsert, true)?,
            Self::ReplaceOne {
                filter,
                replacement,
                collation,
                hint,
                upsert,
            } => update_statement(
                filter,
                UpdateModifications::Document(replacement),
                None,
                collation,
                hint,
                upsert,
                false,
            )?,
            Self::DeleteOne {
                filter,
                collation,
                hint,
            } => delete_statement(filter, collation, hint, 1)?,
            Self::DeleteMany {
                filter,
                collation,
                hint,
            } => delete_statement(filter, collation, hint, 0)?,
        };
        Ok((statement, None))
    }
}

fn update_statement(
    filter: Document,
    update: UpdateModifications,
    array_filters: Option<Vec<Document>>,
    collation: Option<Document>,
    hint: Option<Hint>,
    upsert: Option<bool>,
    multi: bool,
) -> Result<Document> {
    let mut statement = doc! {
        "q": filter,
        "u": crate::bson::to_bson(&update)?,
        "multi": multi,
    };
    if let Some(upsert) = upsert {
        statement.insert("upsert", upsert);
    }
    if let Some(array_filters) = array_filters {
        statement.insert("arrayFilters", bson_util::to_bson_array(&array_filters));
    }
    if let Some(collation) = collation {
        statement.insert("collation", collation);
    }
    if let Some(hint) = hint {
        statement.insert("hint", crate::bson::to_bson(&hint)?);
    }
    Ok(statement)
}

fn delete_statement(
    filter: Document,
    collation: Option<Document>,
    hint: Option<Hint>,
    limit: i32,
) -> Result<Document> {
    let mut statement = doc! {
        "q": filter,
        "limit": limit,
    };
    if let Some(collation) = collation {
        statement.insert("collation", collation);
    }
    if let Some(hint) = hint {
        statement.insert("hint", crate::bson::to_bson(&hint)?);
    }
    Ok(statement)
}

/// The statements sent in one write command, and the caller's index for each of them.
#[derive(Debug)]
struct WriteBatch {
    kind: WriteCommandKind,
    statements: Vec<Document>,
    indices: Vec<usize>,
    size_bytes: usize,
}

impl WriteBatch {
    fn new(kind: WriteCommandKind) -> Self {
        Self {
            kind,
            statements: Vec::new(),
            indices: Vec::new(),
            size_bytes: 0,
        }
    }
}

/// Validates every model and groups them into write commands. Ordered writes keep runs of
/// consecutive models of the same kind together; unordered writes are grouped by kind. Groups
/// are split further to respect the server's batch count and message size limits.
fn plan_batches(
    models: Vec<WriteModel>,
    ordered: bool,
    description: &StreamDescription,
) -> Result<(Vec<WriteBatch>, HashMap<usize, Bson>)> {
    if models.is_empty() {
        return Err(Error::invalid_argument("no write models provided"));
    }
    for model in &models {
        model.validate()?;
    }

    let max_count = usize::try_from(description.max_write_batch_size)
        .unwrap_or(usize::MAX)
        .max(1);
    let max_bytes = usize::try_from(description.max_message_size_bytes)
        .unwrap_or(0)
        .saturating_sub(COMMAND_OVERHEAD_SIZE);

    let mut statements = Vec::with_capacity(models.len());
    let mut inserted_ids = HashMap::new();
    for (index, model) in models.into_iter().enumerate() {
        let kind = model.kind();
        let (statement, inserted_id) = model.into_statement()?;
        if let Some(id) = inserted_id {
            inserted_ids.insert(index, id);
        }
        statements.push((index, kind, statement));
    }
    if !ordered {
        // A stable sort keeps the caller's order within each kind.
        statements.sort_by_key(|(_, kind, _)| *kind);
    }

    let mut batches: Vec<WriteBatch> = Vec::new();
    for (index, kind, statement) in statements {
        let size = crate::bson::to_vec(&statement)?.len();
        let fits = batches.last().map_or(false, |batch| {
            batch.kind == kind
                && batch.statements.len() < max_count
                && batch.size_bytes + size <= max_bytes
        });
        if !fits {
            batches.push(WriteBatch::new(kind));
        }
        if let Some(batch) = batches.last_mut() {
            batch.statements.push(statement);
            batch.indices.push(index);
            batch.size_bytes += size;
        }
    }

    Ok((batches, inserted_ids))
}

/// Accumulates the outcome of each write command.
#[derive(Debug, Default)]
struct BulkWriteOutcome {
    result: BulkWriteResult,
    write_errors: Vec<BulkWriteError>,
    failure: Option<BulkWriteFailure>,
    labels: HashSet<String>,
}

impl BulkWriteOutcome {
    fn merge(
        &mut self,
        batch: &WriteBatch,
        response: WriteCommandResponse,
        inserted_ids: &HashMap<usize, Bson>,
        ordered: bool,
    ) -> Result<()> {
        let original_index = |position: usize| {
            batch.indices.get(position).copied().ok_or_else(|| {
                Error::invalid_response(format!(
                    "write reply referenced statement {} of a batch of {}",
                    position,
                    batch.indices.len()
                ))
            })
        };

        let failed: HashSet<usize> = response.write_errors.iter().map(|e| e.index).collect();
        let first_failure = failed.iter().min().copied();

        match batch.kind {
            WriteCommandKind::Insert => {
                self.result.inserted_count += response.n;
                for (position, index) in batch.indices.iter().enumerate() {
                    let skipped = failed.contains(&position)
                        || (ordered && first_failure.map_or(false, |first| position > first));
                    if skipped {
                        continue;
                    }
                    if let Some(id) = inserted_ids.get(index) {
                        self.result.inserted_ids.insert(*index, id.clone());
                    }
                }
            }
            WriteCommandKind::Update => {
                let upserted = response.upserted.len() as u64;
                self.result.matched_count += response.n.saturating_sub(upserted);
                self.result.modified_count += response.n_modified;
                self.result.upserted_count += upserted;
                for upserted in response.upserted {
                    self.result
                        .upserted_ids
                        .insert(original_index(upserted.index)?, upserted.id);
                }
            }
            WriteCommandKind::Delete => {
                self.result.deleted_count += response.n;
            }
        }

        for error in response.write_errors {
            self.write_errors.push(BulkWriteError {
                index: original_index(error.index)?,
                ..error
            });
        }
        if let Some(write_concern_error) = response.write_concern_error {
            self.failure
                .get_or_insert_with(Default::default)
                .write_concern_error = Some(write_concern_error);
        }
        self.labels.extend(response.labels);
        Ok(())
    }

    fn finish(mut self) -> Result<BulkWriteResult> {
        if self.write_errors.is_empty() && self.failure.is_none() {
            return Ok(self.result);
        }
        self.write_errors.sort_by_key(|e| e.index);
        let mut failure = self.failure.take().unwrap_or_default();
        failure.write_errors = self.write_errors;
        failure.partial_result = Some(self.result);
        Err(Error::new(ErrorKind::BulkWrite(failure), Some(self.labels)))
    }
}

/// Executes `models` against `ns`. Invalid models are rejected before anything is sent.
pub(crate) async fn execute_bulk_write(
    client: &Client,
    ns: &Namespace,
    models: Vec<WriteModel>,
    options: BulkWriteOptions,
    session: Option<&ClientSession>,
) -> Result<BulkWriteResult> {
    if client.is_shutdown() {
        return Err(ErrorKind::Shutdown.into());
    }
    let ordered = options.ordered.unwrap_or(true);
    let acknowledged = options
        .write_concern
        .as_ref()
        .map_or(true, |wc| wc.is_acknowledged());
    if let Some(ref write_concern) = options.write_concern {
        write_concern.validate()?;
    }

    let (batches, inserted_ids) = plan_batches(models, ordered, &client.stream_description())?;

    let mut outcome = BulkWriteOutcome::default();
    outcome.result.acknowledged = acknowledged;

    for batch in batches {
        let mut op = WriteCommand::new(
            ns.clone(),
            batch.kind,
            batch.statements.clone(),
            ordered,
            options.write_concern.clone(),
            options.bypass_document_validation,
            options.comment.clone(),
        );
        let response = client.execute_operation(&mut op, session).await?;
        if !acknowledged {
            continue;
        }

        let stop = ordered && !response.write_errors.is_empty();
        outcome.merge(&batch, response, &inserted_ids, ordered)?;
        if stop {
            break;
        }
    }

    if !acknowledged {
        outcome.result.inserted_ids = inserted_ids;
    }
    outcome.finish()
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{plan_batches, WriteModel};
    use crate::{bson::doc, error::ErrorKind, operation::WriteCommandKind, StreamDescription};

    fn kinds_and_indices(
        models: Vec<WriteModel>,
        ordered: bool,
        description: &StreamDescription,
    ) -> Vec<(WriteCommandKind, Vec<usize>)> {
        let (batches, _) = plan_batches(models, ordered, description).unwrap();
        batches
            .into_iter()
            .map(|batch| (batch.kind, batch.indices))
            .collect()
    }

    fn mixed_models() -> Vec<WriteModel> {
        vec![
            WriteModel::insert_one(doc! { "x": 1 }),
            WriteModel::update_one(doc! { "x": 1 }, doc! { "$set": { "y": 1 } }),
            WriteModel::insert_one(doc! { "x": 2 }),
            WriteModel::delete_one(doc! { "x": 2 }),
            WriteModel::insert_one(doc! { "x": 3 }),
        ]
    }

    #[test]
    fn ordered_batches_follow_runs() {
        let batches = kinds_and_indices(mixed_models(), true, &StreamDescription::default());
        assert_eq!(
            batches,
            vec![
                (WriteCommandKind::Insert, vec![0]),
                (WriteCommandKind::Update, vec![1]),
                (WriteCommandKind::Insert, vec![2]),
                (WriteCommandKind::Delete, vec![3]),
                (WriteCommandKind::Insert, vec![4]),
            ]
        );
    }

    #[test]
    fn unordered_batches_group_by_kind() {
        let batches = kinds_and_indices(mixed_models(), false, &StreamDescription::default());
        assert_eq!(
            batches,
            vec![
                (WriteCommandKind::Insert, vec![0, 2, 4]),
                (WriteCommandKind::Update, vec![1]),
                (WriteCommandKind::Delete, vec![3]),
            ]
        );
    }

    #[test]
    fn batches_respect_max_write_batch_size() {
        let description = StreamDescription::builder().max_write_batch_size(2).build();
        let models = (0..5)
            .map(|i| WriteModel::insert_one(doc! { "x": i }))
            .collect();
        let batches = kinds_and_indices(models, true, &description);
        assert_eq!(
            batches,
            vec![
                (WriteCommandKind::Insert, vec![0, 1]),
                (WriteCommandKind::Insert, vec![2, 3]),
                (WriteCommandKind::Insert, vec![4]),
            ]
        );
    }

    #[test]
    fn inserts_get_generated_ids() {
        let models = vec![
            WriteModel::insert_one(doc! { "_id": 7, "x": 1 }),
            WriteModel::insert_one(doc! { "x": 2 }),
        ];
        let (batches, ids) = plan_batches(models, true, &StreamDescription::default()).unwrap();
        assert_eq!(ids.get(&0), Some(&crate::bson::Bson::Int32(7)));
        let generated = ids.get(&1).unwrap();
        assert!(matches!(generated, crate::bson::Bson::ObjectId(_)));
        assert_eq!(batches[0].statements[1].keys().next().unwrap(), "_id");
        assert_eq!(batches[0].statements[1].get("_id"), Some(generated));
    }

    #[test]
    fn invalid_models_are_rejected() {
        let description = StreamDescription::default();
        let cases = vec![
            vec![],
            vec![WriteModel::update_one(doc! {}, doc! { "x": 1 })],
            vec![WriteModel::replace_one(doc! {}, doc! { "$set": { "x": 1 } })],
        ];
        for models in cases {
            let error = plan_batches(models, true, &description).unwrap_err();
            assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));
        }
    }

    #[test]
    fn update_statement_shape() {
        let (batches, _) = plan_batches(
            vec![
                WriteModel::update_many(doc! { "a": 1 }, vec![doc! { "$set": { "b": 2 } }]),
                WriteModel::delete_one(doc! { "a": 1 }),
            ],
            true,
            &StreamDescription::default(),
        )
        .unwrap();
        assert_eq!(
            batches[0].statements[0],
            doc! { "q": { "a": 1 }, "u": [{ "$set": { "b": 2 } }], "multi": true }
        );
        assert_eq!(batches[1].statements[0], doc! { "q": { "a": 1 }, "limit": 1 });
    }
}
