use std::sync::Arc;

use crate::{
    Result,
    common::verbose,
    postgres::{
        BackendMessage, ProtocolError,
        backend::{FieldDescription, TransactionStatus},
    },
    row::{QueryResult, Row},
};

/// Accumulate the backend responses of one query into a [`QueryResult`].
///
/// Does not perform any io, every received message is passed to [`ResultDecoder::feed`]
/// until it returns the `ReadyForQuery` status.
#[derive(Debug)]
pub struct ResultDecoder {
    fields: Option<Arc<[FieldDescription]>>,
    result: QueryResult,
    verbose: bool,
}

impl ResultDecoder {
    pub fn new(verbose: bool) -> Self {
        Self {
            fields: None,
            result: QueryResult::default(),
            verbose,
        }
    }

    /// Process one message.
    ///
    /// Returns the transaction status once `ReadyForQuery` is received,
    /// the query is complete and [`ResultDecoder::finish`] should be called.
    pub fn feed(&mut self, message: BackendMessage) -> Result<Option<TransactionStatus>> {
        match message {
            BackendMessage::RowDescription(rd) => {
                self.result.fields = rd.fields.clone();
                self.fields = Some(rd.fields.into());
            }
            BackendMessage::DataRow(dr) => {
                let Some(fields) = &self.fields else {
                    return Err(ProtocolError::unexpected_phase(b'D', "query before RowDescription").into());
                };
                self.result.rows.push(Row::decode(fields.clone(), dr)?);
                self.result.row_count += 1;
            }
            BackendMessage::CommandComplete(cc) => {
                self.result.command = cc.command().to_owned();
                self.result.rows_affected += cc.rows_affected();
                // next statement of a multi statement query describes its own rows
                self.fields = None;
            }
            BackendMessage::EmptyQueryResponse(_) => {
                self.result.command.clear();
            }
            BackendMessage::ReadyForQuery(rfq) => return Ok(Some(rfq.status)),
            BackendMessage::ErrorResponse(err) => return Err(err.into()),
            other => {
                verbose!(
                    self.verbose,
                    "ignore `{}` in query",
                    BackendMessage::message_name(other.msgtype())
                );
            }
        }
        Ok(None)
    }

    /// Returns the accumulated result.
    pub fn finish(self) -> QueryResult {
        self.result
    }
}
