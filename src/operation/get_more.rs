use std::{collections::VecDeque, time::Duration};

use serde::Deserialize;

use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    change_stream::event::ResumeToken,
    cursor::CursorInformation,
    error::Result,
    operation::{batch_size_bson, OperationWithDefaults},
    results::GetMoreResult,
    transport::{
        command::{Command, RawCommandResponse},
        StreamDescription,
    },
    Namespace,
};

#[derive(Debug)]
pub(crate) struct GetMore {
    ns: Namespace,
    cursor_id: i64,
    batch_size: Option<u32>,
    max_time: Option<Duration>,
    comment: Option<Bson>,
}

impl GetMore {
    /// `batch_size` is the number of documents to request in this round trip; it already
    /// accounts for any client-side limit.
    pub(crate) fn new(info: &CursorInformation, batch_size: Option<u32>) -> Self {
        Self {
            ns: info.ns.clone(),
            cursor_id: info.id,
            batch_size,
            max_time: info.max_time,
            comment: info.comment.clone(),
        }
    }
}

impl OperationWithDefaults for GetMore {
    type O = GetMoreResult;
    const NAME: &'static str = "getMore";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.cursor_id,
            "collection": self.ns.coll.clone(),
        };

        if let Some(batch_size) = self.batch_size {
            if batch_size != 0 {
                body.insert("batchSize", batch_size_bson(batch_size)?);
            }
        }

        if let Some(max_time) = self.max_time {
            body.insert("maxTimeMS", bson_util::duration_to_millis_bson(max_time));
        }

        if let Some(ref comment) = self.comment {
            body.insert("comment", comment.clone());
        }

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        let response: GetMoreResponseBody = response.body()?;

        Ok(GetMoreResult {
            batch: response.cursor.next_batch,
            exhausted: response.cursor.id == 0,
            post_batch_resume_token: ResumeToken::from_document(
                response.cursor.post_batch_resume_token,
            ),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GetMoreResponseBody {
    cursor: NextBatchBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextBatchBody {
    id: i64,
    #[serde(default)]
    next_batch: VecDeque<Document>,
    post_batch_resume_token: Option<Document>,
}
