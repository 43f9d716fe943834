//! Query execution.
//!
//! - [`simple_query`], one `Query` message, no parameters
//! - [`extended_query`], unnamed statement and portal, parameters bound in text format
//!
//! Both return once `ReadyForQuery` is received, which means the connection is ready
//! for the next query, even when the query failed.
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-EXT-QUERY>
use crate::{
    Result,
    encode::Encode,
    postgres::{
        BackendMessage,
        backend::TransactionStatus,
        frontend::{self, Bind, Describe, Execute, Parse, Query},
    },
    row::QueryResult,
    transport::PgTransport,
};

mod decoder;

pub use decoder::ResultDecoder;

/// Run sql with the simple query protocol.
///
/// The sql string may contain multiple statements, rows of every statement are collected.
pub async fn simple_query<IO: PgTransport>(
    io: &mut IO,
    sql: &str,
    verbose: bool,
) -> Result<(QueryResult, TransactionStatus)> {
    io.send(Query { sql })?;
    io.flush().await?;
    collect(io, verbose).await
}

/// Run sql with the extended query protocol.
///
/// `Parse`, `Describe`, `Bind`, `Execute` and `Sync` are written into one buffer and
/// flushed together. If any of them fails to encode, none of them is sent.
pub async fn extended_query<IO: PgTransport>(
    io: &mut IO,
    sql: &str,
    params: &[&(dyn Encode + Sync)],
    verbose: bool,
) -> Result<(QueryResult, TransactionStatus)> {
    let mark = io.buffered();
    if let Err(err) = write_extended(io, sql, params) {
        io.truncate(mark);
        return Err(err);
    }
    io.flush().await?;

    collect(io, verbose).await
}

fn write_extended<IO: PgTransport>(
    io: &mut IO,
    sql: &str,
    params: &[&(dyn Encode + Sync)],
) -> Result<()> {
    io.send(Parse {
        prepare_name: "",
        sql,
        oids: &[],
    })?;
    io.send(Describe {
        kind: b'S',
        name: "",
    })?;
    io.send(Bind {
        portal_name: "",
        stmt_name: "",
        param_formats: &[],
        params: params.iter().map(|param| param.encode()),
        result_formats: &[],
    })?;
    io.send(Execute {
        portal_name: "",
        max_row: 0,
    })?;
    io.send(frontend::Sync)
}

async fn collect<IO: PgTransport>(
    io: &mut IO,
    verbose: bool,
) -> Result<(QueryResult, TransactionStatus)> {
    let mut decoder = ResultDecoder::new(verbose);
    loop {
        let message = io.recv::<BackendMessage>().await?;
        match decoder.feed(message) {
            Ok(Some(status)) => return Ok((decoder.finish(), status)),
            Ok(None) => {}
            Err(err) => {
                // remaining responses of this query are discarded before the next one
                io.ready_request();
                return Err(err);
            }
        }
    }
}
