use crate::bson::{oid::ObjectId, Bson, Document};

pub(crate) mod command;

pub(crate) const COMMAND_TRACING_EVENT_TARGET: &str = "mongodb::command";
pub(crate) const CHANGE_STREAM_TRACING_EVENT_TARGET: &str = "mongodb::change_stream";
pub(crate) const SESSION_TRACING_EVENT_TARGET: &str = "mongodb::session";
pub(crate) const CURSOR_TRACING_EVENT_TARGET: &str = "mongodb::cursor";

pub(crate) const DEFAULT_MAX_DOCUMENT_LENGTH_BYTES: usize = 1000;

pub(crate) trait TracingRepresentation {
    type Representation;

    fn tracing_representation(&self) -> Self::Representation;
}

impl TracingRepresentation for ObjectId {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.to_hex()
    }
}

impl TracingRepresentation for Document {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        Bson::Document(self.clone())
            .into_relaxed_extjson()
            .to_string()
    }
}

impl TracingRepresentation for crate::error::Error {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.to_string()
    }
}

pub(crate) fn serialize_command_or_reply(doc: &Document, max_length_bytes: usize) -> String {
    let mut ext_json = doc.tracing_representation();
    truncate_on_char_boundary(&mut ext_json, max_length_bytes);
    ext_json
}

/// Truncates `s` to at most `new_len` bytes plus a trailing "...", backing up to the nearest
/// char boundary.
pub(crate) fn truncate_on_char_boundary(s: &mut String, new_len: usize) {
    let original_len = s.len();
    if original_len <= new_len {
        return;
    }
    let mut truncate_index = new_len;
    while !s.is_char_boundary(truncate_index) {
        truncate_index -= 1;
    }
    s.truncate(truncate_index);
    s.push_str("...");
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{serialize_command_or_reply, truncate_on_char_boundary};
    use crate::bson::doc;

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut s = String::from("aé");
        truncate_on_char_boundary(&mut s, 2);
        assert_eq!(s, "a...");

        let mut short = String::from("abc");
        truncate_on_char_boundary(&mut short, 10);
        assert_eq!(short, "abc");
    }

    #[test]
    fn long_documents_are_truncated() {
        let serialized = serialize_command_or_reply(&doc! { "insert": "x".repeat(50) }, 10);
        assert_eq!(serialized.len(), 13);
        assert!(serialized.ends_with("..."));
    }
}
