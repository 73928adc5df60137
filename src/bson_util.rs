use std::time::Duration;

use serde::Serializer;

use crate::{
    bson::{oid::ObjectId, Bson, Document},
    error::{Error, Result},
};

/// Coerce numeric types into an `i64` if it would be lossless to do so. If this Bson is not numeric
/// or the conversion would be lossy (e.g. 1.5 -> 1), this returns `None`.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn get_int(val: &Bson) -> Option<i64> {
    match *val {
        Bson::Int32(i) => Some(i64::from(i)),
        Bson::Int64(i) => Some(i),
        Bson::Double(f) if (f - (f as i64 as f64)).abs() <= f64::EPSILON => Some(f as i64),
        _ => None,
    }
}

pub(crate) fn to_bson_array(docs: &[Document]) -> Bson {
    Bson::Array(docs.iter().map(|doc| Bson::Document(doc.clone())).collect())
}

pub(crate) fn first_key(document: &Document) -> Option<&str> {
    document.keys().next().map(String::as_str)
}

pub(crate) fn replacement_document_check(replacement: &Document) -> Result<()> {
    match first_key(replacement) {
        Some(s) if s.starts_with('$') => Err(Error::invalid_argument(
            "replace document must have first key not starting with '$'",
        )),
        _ => Ok(()),
    }
}

pub(crate) fn update_document_check(update: &Document) -> Result<()> {
    match first_key(update) {
        Some(s) if s.starts_with('$') => Ok(()),
        _ => Err(Error::invalid_argument(
            "update document must have first key starting with '$'",
        )),
    }
}

/// Returns the `_id` of the given document, generating and prepending an `ObjectId` if the
/// document doesn't have one.
pub(crate) fn get_or_prepend_id_field(doc: &mut Document) -> Bson {
    if let Some(id) = doc.get("_id") {
        return id.clone();
    }
    let id = Bson::ObjectId(ObjectId::new());
    let mut with_id = Document::new();
    with_id.insert("_id", id.clone());
    with_id.extend(std::mem::take(doc));
    *doc = with_id;
    id
}

pub(crate) fn duration_to_millis_bson(duration: Duration) -> Bson {
    match i32::try_from(duration.as_millis()) {
        Ok(millis) => Bson::Int32(millis),
        Err(_) => Bson::Int64(duration.as_millis().try_into().unwrap_or(i64::MAX)),
    }
}

pub(crate) fn serialize_duration_option_as_int_millis<S: Serializer>(
    val: &Option<Duration>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match val {
        Some(duration) if duration.as_millis() > i32::MAX as u128 => {
            serializer.serialize_i64(duration.as_millis().try_into().unwrap_or(i64::MAX))
        }
        Some(duration) => serializer.serialize_i32(duration.as_millis() as i32),
        None => serializer.serialize_none(),
    }
}
