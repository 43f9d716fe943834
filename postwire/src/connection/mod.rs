//! Postgres connection.
use std::collections::HashMap;
use tracing::Instrument;

use crate::{
    Result,
    common::{ByteStr, span},
    encode::Encode,
    net::{self, RawStream, Socket},
    postgres::{
        backend::{BackendKeyData, TransactionStatus},
        frontend::Terminate,
    },
    query,
    row::QueryResult,
    stream::PgStream,
    transport::PgTransport,
};

mod config;
mod startup;

pub use config::{Config, ParseError};
pub use startup::{StartupConfig, StartupResponse, startup};

/// Connect to postgres with the given config.
pub async fn connect(config: &Config) -> Result<Connection> {
    Connection::connect(config).await
}

/// A single postgres connection.
///
/// Every operation takes `&mut self`, the protocol is half-duplex, so only one
/// exchange can be in flight at a time.
#[derive(Debug)]
pub struct Connection {
    stream: PgStream,
    config: Config,
    parameters: HashMap<ByteStr, ByteStr>,
    backend_key_data: Option<BackendKeyData>,
    transaction_status: TransactionStatus,
}

impl Connection {
    /// Open a tcp connection, negotiate TLS if configured, and authenticate.
    pub async fn connect(config: &Config) -> Result<Connection> {
        let span = span!(config.verbose, "connect", host = %config.host, port = config.port);
        async {
            let socket = Socket::connect_tcp(&config.host, config.port).await?;
            Self::connect_socket(config, socket).await
        }
        .instrument(span)
        .await
    }

    /// Connect using [`Config::from_env`].
    pub async fn connect_env() -> Result<Connection> {
        Self::connect(&Config::from_env()).await
    }

    /// Connect over an already open stream.
    ///
    /// TLS is negotiated over `stream` when [`Config::secure`] is set.
    pub async fn connect_with<S: RawStream + 'static>(config: &Config, stream: S) -> Result<Connection> {
        Self::connect_socket(config, Socket::new(stream)).await
    }

    /// Connect over an already open [`Socket`].
    pub async fn connect_socket(config: &Config, socket: Socket) -> Result<Connection> {
        let socket = match config.secure {
            true => net::negotiate(socket, config.tls_config()).await?,
            false => socket,
        };

        let mut stream = PgStream::new(socket, config.verbose);

        let response = startup(&mut stream, StartupConfig {
            user: &config.user,
            database: config.dbname.as_deref(),
            password: config.password.as_deref(),
            application_name: config.application_name.as_deref(),
            verbose: config.verbose,
        })
        .await?;

        Ok(Self {
            stream,
            config: config.clone(),
            parameters: response.parameters,
            backend_key_data: response.backend_key_data,
            transaction_status: response.transaction_status.unwrap_or(TransactionStatus::Idle),
        })
    }

    /// Run a query.
    ///
    /// Without parameters the simple query protocol is used, otherwise the extended one.
    ///
    /// ```no_run
    /// # async fn app(conn: &mut postwire::Connection) -> postwire::Result<()> {
    /// let result = conn.query("SELECT $1::int + 1 AS n", &[&41]).await?;
    /// assert_eq!(result.rows[0]["n"], "42");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn query(&mut self, sql: &str, params: &[&(dyn Encode + Sync)]) -> Result<QueryResult> {
        match params.is_empty() {
            true => self.simple_query(sql).await,
            false => self.extended_query(sql, params).await,
        }
    }

    /// Run a query with the simple query protocol.
    ///
    /// The sql may contain multiple statements.
    pub async fn simple_query(&mut self, sql: &str) -> Result<QueryResult> {
        let span = span!(self.config.verbose, "simple_query");
        let (result, status) = query::simple_query(&mut self.stream, sql, self.config.verbose)
            .instrument(span)
            .await?;
        self.transaction_status = status;
        Ok(result)
    }

    /// Run a query with the extended query protocol, using the unnamed statement and portal.
    pub async fn extended_query(
        &mut self,
        sql: &str,
        params: &[&(dyn Encode + Sync)],
    ) -> Result<QueryResult> {
        let span = span!(self.config.verbose, "extended_query", params = params.len());
        let (result, status) = query::extended_query(&mut self.stream, sql, params, self.config.verbose)
            .instrument(span)
            .await?;
        self.transaction_status = status;
        Ok(result)
    }

    /// Returns a run-time parameter reported by the backend, e.g. `server_version`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(ByteStr::as_str)
    }

    /// Returns every run-time parameter reported during startup.
    pub fn parameters(&self) -> &HashMap<ByteStr, ByteStr> {
        &self.parameters
    }

    /// Returns the cancellation key of this session.
    pub fn backend_key_data(&self) -> Option<BackendKeyData> {
        self.backend_key_data
    }

    /// Returns the transaction status reported by the last `ReadyForQuery`.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns `true` if the connection is encrypted.
    pub fn is_tls(&self) -> bool {
        self.stream.socket().is_tls()
    }

    /// Send `Terminate` and close the stream.
    pub async fn close(mut self) -> Result<()> {
        self.stream.send(Terminate)?;
        self.stream.flush().await?;
        self.stream.shutdown().await
    }
}
