use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{Arc, Mutex},
};

use futures_core::future::BoxFuture;

use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    error::{Error, Result},
    transport::{StreamDescription, Transport},
};

/// A command the mock received, along with how it was sent.
#[derive(Clone, Debug)]
pub(crate) struct SentCommand {
    pub(crate) db: String,
    pub(crate) name: String,
    pub(crate) body: Document,
    pub(crate) acknowledged: bool,
}

/// A scripted [`Transport`]. Replies are queued per command name and handed out in order; every
/// command is recorded so tests can assert on exactly what went over the wire.
///
/// `killCursors` and `endSessions` succeed with `{ ok: 1 }` when nothing is queued for them. Any
/// other command without a queued reply fails.
#[derive(Clone, Debug)]
pub(crate) struct MockTransport {
    inner: Arc<MockInner>,
}

#[derive(Debug)]
struct MockInner {
    description: StreamDescription,
    replies: Mutex<HashMap<String, VecDeque<Result<Document>>>>,
    sent: Mutex<Vec<SentCommand>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::with_description(StreamDescription::default())
    }

    pub(crate) fn with_description(description: StreamDescription) -> Self {
        Self {
            inner: Arc::new(MockInner {
                description,
                replies: Default::default(),
                sent: Default::default(),
            }),
        }
    }

    /// Queues `reply` as the response to the next `name` command.
    pub(crate) fn reply(&self, name: &str, reply: Document) -> &Self {
        self.push(name, Ok(reply))
    }

    /// Makes the next `name` command fail at the transport level with `error`.
    pub(crate) fn fail(&self, name: &str, error: Error) -> &Self {
        self.push(name, Err(error))
    }

    fn push(&self, name: &str, reply: Result<Document>) -> &Self {
        self.inner
            .replies
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub(crate) fn sent(&self) -> Vec<SentCommand> {
        self.inner.sent.lock().unwrap().clone()
    }

    pub(crate) fn sent_named(&self, name: &str) -> Vec<SentCommand> {
        self.sent().into_iter().filter(|c| c.name == name).collect()
    }

    pub(crate) fn sent_names(&self) -> Vec<String> {
        self.sent().into_iter().map(|c| c.name).collect()
    }

    pub(crate) fn count(&self, name: &str) -> usize {
        self.sent_named(name).len()
    }

    fn record(&self, db: &str, command: Document, acknowledged: bool) -> String {
        let name = bson_util::first_key(&command)
            .unwrap_or_default()
            .to_string();
        self.inner.sent.lock().unwrap().push(SentCommand {
            db: db.to_string(),
            name: name.clone(),
            body: command,
            acknowledged,
        });
        name
    }

    fn next_reply(&self, name: &str) -> Result<Document> {
        let queued = self
            .inner
            .replies
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(reply) => reply,
            None if name == "killCursors" || name == "endSessions" => Ok(doc! { "ok": 1 }),
            None => Err(Error::invalid_argument(format!("no reply queued for {}", name))),
        }
    }
}

impl Transport for MockTransport {
    fn description(&self) -> StreamDescription {
        self.inner.description.clone()
    }

    fn send_command<'a>(
        &'a self,
        db: &'a str,
        command: Document,
    ) -> BoxFuture<'a, Result<Document>> {
        let name = self.record(db, command, true);
        let reply = self.next_reply(&name);
        Box::pin(async move { reply })
    }

    fn send_unacknowledged<'a>(
        &'a self,
        db: &'a str,
        command: Document,
    ) -> BoxFuture<'a, Result<()>> {
        self.record(db, command, false);
        Box::pin(async move { Ok(()) })
    }
}

/// The reply to a cursor-opening command.
pub(crate) fn cursor_reply(ns: &str, id: i64, first_batch: Vec<Document>) -> Document {
    doc! {
        "ok": 1,
        "cursor": { "id": id, "ns": ns, "firstBatch": first_batch },
    }
}

/// The reply to an `aggregate` on a change stream, carrying a `postBatchResumeToken`.
pub(crate) fn cursor_reply_with_token(
    ns: &str,
    id: i64,
    first_batch: Vec<Document>,
    token: Document,
) -> Document {
    doc! {
        "ok": 1,
        "cursor": {
            "id": id,
            "ns": ns,
            "firstBatch": first_batch,
            "postBatchResumeToken": token,
        },
    }
}

pub(crate) fn get_more_reply(ns: &str, id: i64, next_batch: Vec<Document>) -> Document {
    doc! {
        "ok": 1,
        "cursor": { "id": id, "ns": ns, "nextBatch": next_batch },
    }
}

pub(crate) fn get_more_reply_with_token(
    ns: &str,
    id: i64,
    next_batch: Vec<Document>,
    token: Document,
) -> Document {
    doc! {
        "ok": 1,
        "cursor": {
            "id": id,
            "ns": ns,
            "nextBatch": next_batch,
            "postBatchResumeToken": token,
        },
    }
}

/// An `ok: 0` reply with the given code and error labels.
pub(crate) fn command_error(code: i32, labels: &[&str]) -> Document {
    let labels: Vec<Bson> = labels.iter().map(|l| Bson::String(l.to_string())).collect();
    doc! {
        "ok": 0,
        "code": code,
        "codeName": "MockedError",
        "errmsg": format!("mocked error {}", code),
        "errorLabels": labels,
    }
}

pub(crate) fn network_error() -> Error {
    Error::network(io::Error::new(
        io::ErrorKind::ConnectionReset,
        "connection reset by peer",
    ))
}
