use std::collections::HashMap;

use crate::{
    Result,
    auth,
    common::{ByteStr, verbose},
    postgres::{
        BackendMessage,
        backend::{BackendKeyData, TransactionStatus},
        frontend,
    },
    transport::PgTransport,
};

/// A config for postgres startup phase.
///
/// <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>
#[derive(Debug, Clone, Copy)]
pub struct StartupConfig<'a> {
    /// The database user name to connect as.
    pub user: &'a str,
    /// The database to connect to. Defaults to the user name.
    pub database: Option<&'a str>,
    pub password: Option<&'a str>,
    pub application_name: Option<&'a str>,
    pub verbose: bool,
}

/// Startup phase successful response.
#[derive(Debug, Default)]
pub struct StartupResponse {
    pub backend_key_data: Option<BackendKeyData>,
    pub parameters: HashMap<ByteStr, ByteStr>,
    pub transaction_status: Option<TransactionStatus>,
}

/// Perform a startup message, authenticate, and wait until the backend is ready for query.
///
/// <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>
pub async fn startup<IO: PgTransport>(io: &mut IO, config: StartupConfig<'_>) -> Result<StartupResponse> {
    // To begin a session, a frontend opens a connection to the server and sends a startup message.
    io.send_startup(frontend::Startup {
        user: config.user,
        database: config.database,
        application_name: config.application_name,
    })?;
    io.flush().await?;

    // The server then sends an appropriate authentication request message,
    // to which the frontend must reply with an appropriate authentication response message.
    auth::authenticate(io, config.user, config.password).await?;

    // After having received AuthenticationOk, the frontend must wait for further messages from the server.
    // In the normal case the backend will send some ParameterStatus messages, BackendKeyData,
    // and finally ReadyForQuery.
    let mut response = StartupResponse::default();

    loop {
        match io.recv::<BackendMessage>().await? {
            BackendMessage::ReadyForQuery(rfq) => {
                response.transaction_status = Some(rfq.status);
                break;
            }
            BackendMessage::BackendKeyData(key_data) => response.backend_key_data = Some(key_data),
            BackendMessage::ParameterStatus(param) => {
                verbose!(config.verbose, "parameter {} = {}", param.name, param.value);
                response.parameters.insert(param.name, param.value);
            }
            BackendMessage::NegotiateProtocolVersion(npv) => {
                tracing::debug!(
                    minor = npv.minor,
                    unrecognized = npv.len,
                    "backend does not support requested protocol version",
                );
            }
            other => {
                // advisory message, never fails the startup
                verbose!(
                    config.verbose,
                    "ignore `{}` in startup phase",
                    BackendMessage::message_name(other.msgtype())
                );
            }
        }
    }

    Ok(response)
}
