//! End to end exchanges against a scripted backend.
use base64::prelude::{BASE64_STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use postwire::{
    Config, Connection, Encode, ErrorKind,
    postgres::{ProtocolError, backend::TransactionStatus},
};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, duplex};

/// Backend side of the stream.
struct Backend<S> {
    io: S,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Backend<S> {
    /// Returns the startup message body, after the protocol version.
    async fn read_startup(&mut self) -> Vec<u8> {
        let len = self.io.read_i32().await.unwrap();
        let version = self.io.read_u32().await.unwrap();
        assert_eq!(version, 196608);
        let mut body = vec![0; len as usize - 8];
        self.io.read_exact(&mut body).await.unwrap();
        body
    }

    async fn read_message(&mut self) -> (u8, Vec<u8>) {
        let tag = self.io.read_u8().await.unwrap();
        let len = self.io.read_i32().await.unwrap();
        assert!(len >= 4, "invalid length {len}");
        let mut body = vec![0; len as usize - 4];
        self.io.read_exact(&mut body).await.unwrap();
        (tag, body)
    }

    async fn expect(&mut self, tag: u8) -> Vec<u8> {
        let (found, body) = self.read_message().await;
        assert_eq!(found as char, tag as char);
        body
    }

    async fn send(&mut self, tag: u8, body: &[u8]) {
        let mut msg = vec![tag];
        msg.extend_from_slice(&(body.len() as i32 + 4).to_be_bytes());
        msg.extend_from_slice(body);
        self.io.write_all(&msg).await.unwrap();
    }

    async fn auth(&mut self, code: u32, data: &[u8]) {
        let mut body = code.to_be_bytes().to_vec();
        body.extend_from_slice(data);
        self.send(b'R', &body).await;
    }

    /// `AuthenticationOk` followed by the usual startup messages.
    async fn ready(&mut self) {
        self.auth(0, b"").await;
        self.send(b'S', b"server_version\x0016.2\0").await;
        self.send(b'S', b"client_encoding\0UTF8\0").await;
        self.send(b'K', &[0, 0, 0, 42, 0, 0, 0, 7]).await;
        self.send(b'Z', b"I").await;
    }

    async fn row_description(&mut self, names: &[&str]) {
        let mut body = (names.len() as u16).to_be_bytes().to_vec();
        for name in names {
            body.extend_from_slice(name.as_bytes());
            body.push(0);
            body.extend_from_slice(&0u32.to_be_bytes());
            body.extend_from_slice(&0i16.to_be_bytes());
            body.extend_from_slice(&25u32.to_be_bytes());
            body.extend_from_slice(&(-1i16).to_be_bytes());
            body.extend_from_slice(&(-1i32).to_be_bytes());
            body.extend_from_slice(&0u16.to_be_bytes());
        }
        self.send(b'T', &body).await;
    }

    async fn data_row(&mut self, columns: &[Option<&str>]) {
        let mut body = (columns.len() as u16).to_be_bytes().to_vec();
        for col in columns {
            match col {
                Some(v) => {
                    body.extend_from_slice(&(v.len() as i32).to_be_bytes());
                    body.extend_from_slice(v.as_bytes());
                }
                None => body.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        self.send(b'D', &body).await;
    }
}

fn config() -> Config {
    Config::new().user("postgres").password("password")
}

/// Connect a client over a duplex stream while `script` plays the backend.
async fn connect<F, Fut>(config: Config, script: F) -> (postwire::Result<Connection>, Backend<DuplexStream>)
where
    F: FnOnce(Backend<DuplexStream>) -> Fut,
    Fut: Future<Output = Backend<DuplexStream>> + Send + 'static,
{
    let (client, server) = duplex(4096);
    let backend = tokio::spawn(script(Backend { io: server }));
    let conn = Connection::connect_with(&config, client).await;
    (conn, backend.await.unwrap())
}

async fn trust(mut backend: Backend<DuplexStream>) -> Backend<DuplexStream> {
    backend.read_startup().await;
    backend.ready().await;
    backend
}

fn split_nul(body: &[u8]) -> (&[u8], &[u8]) {
    let nul = body.iter().position(|&b| b == 0).unwrap();
    (&body[..nul], &body[nul + 1..])
}

#[tokio::test]
async fn startup_without_password() {
    let (conn, _backend) = connect(config().application_name("tests"), |mut backend| async move {
        let startup = backend.read_startup().await;
        let startup = String::from_utf8(startup).unwrap();
        assert!(startup.contains("user\0postgres\0"));
        assert!(startup.contains("client_encoding\0UTF8\0"));
        assert!(startup.contains("application_name\0tests\0"));
        assert!(!startup.contains("database\0"));
        assert!(startup.ends_with("\0\0"));
        backend.ready().await;
        backend
    })
    .await;

    let conn = conn.unwrap();
    assert_eq!(conn.parameter("server_version"), Some("16.2"));
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    assert_eq!(conn.backend_key_data().unwrap().process_id, 42);
    assert!(!conn.is_tls());
}

#[tokio::test]
async fn error_instead_of_authentication() {
    let (conn, _backend) = connect(config(), |mut backend| async move {
        backend.read_startup().await;
        backend
            .send(b'E', b"SFATAL\0VFATAL\0C28P01\0Mpassword authentication failed\0\0")
            .await;
        backend
    })
    .await;

    let err = conn.unwrap_err();
    let db = err.as_database().unwrap();
    assert_eq!(db.code(), "28P01");
    assert_eq!(db.severity(), "FATAL");
    assert_eq!(db.message(), "password authentication failed");
}

#[tokio::test]
async fn cleartext_password() {
    let (conn, _backend) = connect(config(), |mut backend| async move {
        backend.read_startup().await;
        backend.auth(3, b"").await;
        assert_eq!(backend.expect(b'p').await, b"password\0");
        backend.ready().await;
        backend
    })
    .await;
    conn.unwrap();
}

#[tokio::test]
async fn md5_password() {
    let (conn, _backend) = connect(config(), |mut backend| async move {
        backend.read_startup().await;
        backend.auth(5, &[1, 2, 3, 4]).await;
        assert_eq!(backend.expect(b'p').await, b"md598511ceaec347a656f032c7f2a16ef17\0");
        backend.ready().await;
        backend
    })
    .await;
    conn.unwrap();
}

#[tokio::test]
async fn password_required() {
    let (conn, mut backend) = connect(Config::new(), |mut backend| async move {
        backend.read_startup().await;
        backend.auth(3, b"").await;
        backend
    })
    .await;

    let err = conn.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Auth(_)));

    // nothing sent after the failure, the stream is closed
    let mut rest = vec![];
    backend.io.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

fn hmac(key: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
    mac.update(msg);
    mac.finalize().into_bytes().to_vec()
}

fn salted_password(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut u = hmac(password, &[salt, &1u32.to_be_bytes()].concat());
    let mut hi = u.clone();
    for _ in 1..iterations {
        u = hmac(password, &u);
        hi.iter_mut().zip(&u).for_each(|(a, b)| *a ^= b);
    }
    hi
}

/// Backend side of `SCRAM-SHA-256`, `server_nonce` is appended to the client nonce
/// unless `prefixed` is false.
async fn scram_backend(mut backend: Backend<DuplexStream>, prefixed: bool) -> Backend<DuplexStream> {
    const SALT: &[u8] = b"0123456789abcdef";

    backend.read_startup().await;
    backend.auth(10, b"SCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0").await;

    let body = backend.expect(b'p').await;
    let (mechanism, rest) = split_nul(&body);
    assert_eq!(mechanism, b"SCRAM-SHA-256");
    let len = i32::from_be_bytes(rest[..4].try_into().unwrap());
    let client_first = std::str::from_utf8(&rest[4..]).unwrap().to_owned();
    assert_eq!(len as usize, client_first.len());

    let bare = client_first.strip_prefix("n,,").unwrap();
    let client_nonce = bare.strip_prefix("n=postgres,r=").unwrap();
    assert_eq!(BASE64_STANDARD.decode(client_nonce).unwrap().len(), 16);

    let nonce = match prefixed {
        true => format!("{client_nonce}3rfcNHYJY1ZVvWVs7j"),
        false => "3rfcNHYJY1ZVvWVs7j".to_owned(),
    };
    let server_first = format!("r={nonce},s={},i=4096", BASE64_STANDARD.encode(SALT));
    backend.auth(11, server_first.as_bytes()).await;

    if !prefixed {
        return backend;
    }

    let client_final = String::from_utf8(backend.expect(b'p').await).unwrap();
    let (without_proof, proof) = client_final.split_once(",p=").unwrap();
    assert_eq!(without_proof, format!("c=biws,r={nonce}"));

    let salted = salted_password(b"password", SALT, 4096);
    let auth_message = format!("{bare},{server_first},{without_proof}");
    let client_key = hmac(&salted, b"Client Key");
    let stored_key = Sha256::digest(&client_key);
    let signature = hmac(&stored_key, auth_message.as_bytes());
    let expected: Vec<u8> = client_key.iter().zip(&signature).map(|(a, b)| a ^ b).collect();
    assert_eq!(BASE64_STANDARD.decode(proof).unwrap(), expected);

    let server_key = hmac(&salted, b"Server Key");
    let server_signature = hmac(&server_key, auth_message.as_bytes());
    let server_final = format!("v={}", BASE64_STANDARD.encode(server_signature));
    backend.auth(12, server_final.as_bytes()).await;

    backend.ready().await;
    backend
}

#[tokio::test]
async fn scram_sha_256() {
    let (conn, _backend) = connect(config(), |backend| scram_backend(backend, true)).await;
    conn.unwrap();
}

#[tokio::test]
async fn scram_nonce_mismatch() {
    let (conn, mut backend) =
        connect(config(), |backend| scram_backend(backend, false)).await;

    let err = conn.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Auth(postwire::auth::AuthError::NonceMismatch)));

    let mut rest = vec![];
    backend.io.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty(), "client-final sent after nonce mismatch");
}

#[tokio::test]
async fn tls_declined() {
    let (conn, _backend) = connect(config().secure(true), |mut backend| async move {
        let mut request = [0u8; 8];
        backend.io.read_exact(&mut request).await.unwrap();
        assert_eq!(request, [0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f]);
        backend.io.write_all(b"N").await.unwrap();
        backend
    })
    .await;

    let err = conn.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Tls(postwire::net::TlsError::Declined)));
}

#[tokio::test]
async fn simple_query() {
    let (conn, mut backend) = connect(config(), trust).await;
    let mut conn = conn.unwrap();

    let server = tokio::spawn(async move {
        assert_eq!(backend.expect(b'Q').await, b"SELECT name, note FROM users\0");
        backend.row_description(&["name", "note"]).await;
        backend.send(b'N', b"SNOTICE\0C00000\0Mjust saying\0\0").await;
        backend.data_row(&[Some("postgres"), None]).await;
        backend.send(b'C', b"SELECT 1\0").await;
        backend.send(b'Z', b"I").await;
        backend
    });

    let result = conn.query("SELECT name, note FROM users", &[]).await.unwrap();
    server.await.unwrap();

    assert_eq!(result.command, "SELECT");
    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows_affected, 1);
    assert_eq!(result.rows[0]["name"], "postgres");
    assert!(result.rows[0]["note"].is_null());
    assert_eq!(result.fields.len(), 2);
}

#[tokio::test]
async fn extended_query_layout() {
    let (conn, mut backend) = connect(config(), trust).await;
    let mut conn = conn.unwrap();

    let server = tokio::spawn(async move {
        assert_eq!(backend.expect(b'P').await, b"\0SELECT $1::int + 1 AS n\0\0\0");
        assert_eq!(backend.expect(b'D').await, b"S\0");

        let bind = backend.expect(b'B').await;
        // unnamed portal and statement, no parameter format codes
        assert_eq!(&bind[..4], b"\0\0\0\0");
        assert_eq!(u16::from_be_bytes([bind[4], bind[5]]), 1);
        let len = i32::from_be_bytes(bind[6..10].try_into().unwrap());
        assert!(len >= 0);
        assert_eq!(&bind[10..10 + len as usize], b"41");
        // no result format codes
        assert_eq!(&bind[10 + len as usize..], b"\0\0");

        assert_eq!(backend.expect(b'E').await, b"\0\0\0\0\0");
        assert_eq!(backend.expect(b'S').await, b"");

        backend.send(b'1', b"").await;
        backend.send(b't', &[0, 1, 0, 0, 0, 23]).await;
        backend.row_description(&["n"]).await;
        backend.send(b'2', b"").await;
        backend.data_row(&[Some("42")]).await;
        backend.send(b'C', b"SELECT 1\0").await;
        backend.send(b'Z', b"I").await;
        backend
    });

    let result = conn.query("SELECT $1::int + 1 AS n", &[&41]).await.unwrap();
    server.await.unwrap();

    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0].try_get::<_, i64>("n").unwrap(), 42);
}

#[tokio::test]
async fn extended_query_null_parameter() {
    let (conn, mut backend) = connect(config(), trust).await;
    let mut conn = conn.unwrap();

    let server = tokio::spawn(async move {
        backend.expect(b'P').await;
        backend.expect(b'D').await;
        let bind = backend.expect(b'B').await;
        assert_eq!(&bind[4..], b"\0\x02\xff\xff\xff\xff\0\0\0\x02hi\0\0");
        backend.expect(b'E').await;
        backend.expect(b'S').await;
        backend.send(b'1', b"").await;
        backend.send(b'n', b"").await;
        backend.send(b'2', b"").await;
        backend.send(b'C', b"INSERT 0 1\0").await;
        backend.send(b'Z', b"T").await;
        backend
    });

    let result = conn
        .query("INSERT INTO t VALUES ($1, $2)", &[&None::<i32>, &"hi"])
        .await
        .unwrap();
    server.await.unwrap();

    assert_eq!(result.command, "INSERT");
    assert_eq!(result.rows_affected, 1);
    assert!(result.rows.is_empty());
    assert_eq!(conn.transaction_status(), TransactionStatus::Transaction);
}

#[tokio::test]
async fn query_error_keeps_connection_usable() {
    let (conn, mut backend) = connect(config(), trust).await;
    let mut conn = conn.unwrap();

    let server = tokio::spawn(async move {
        backend.expect(b'Q').await;
        backend.send(b'E', b"SERROR\0C42601\0Msyntax error at or near \"SELEC\"\0P1\0\0").await;
        backend.send(b'Z', b"I").await;

        backend.expect(b'Q').await;
        backend.row_description(&["one"]).await;
        backend.data_row(&[Some("1")]).await;
        backend.send(b'C', b"SELECT 1\0").await;
        backend.send(b'Z', b"I").await;
        backend
    });

    let err = conn.query("SELEC 1", &[]).await.unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(err.as_database().unwrap().fields.position(), Some(1));

    let result = conn.query("SELECT 1 AS one", &[]).await.unwrap();
    assert_eq!(result.rows[0]["one"], "1");
    server.await.unwrap();
}

#[tokio::test]
async fn encode_failure_sends_nothing() {
    let (conn, mut backend) = connect(config(), trust).await;
    let mut conn = conn.unwrap();

    // parameter count does not fit in the `Bind` u16 count
    let params = vec![&1i32 as &(dyn Encode + Sync); 70_000];
    let err = conn.query("SELECT 1", &params).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Protocol(ProtocolError::Overflow { len: 70_000 })));

    let server = tokio::spawn(async move {
        // `Parse` and `Describe` of the failed query never reach the wire
        assert_eq!(backend.expect(b'Q').await, b"SELECT 2\0");
        backend.row_description(&["two"]).await;
        backend.data_row(&[Some("2")]).await;
        backend.send(b'C', b"SELECT 1\0").await;
        backend.send(b'Z', b"I").await;
        backend
    });

    let result = conn.simple_query("SELECT 2").await.unwrap();
    assert_eq!(result.rows[0]["two"], "2");
    assert_eq!(result.fields.len(), 1);
    server.await.unwrap();
}

#[tokio::test]
async fn column_count_mismatch() {
    let (conn, mut backend) = connect(config(), trust).await;
    let mut conn = conn.unwrap();

    let server = tokio::spawn(async move {
        backend.expect(b'Q').await;
        backend.row_description(&["a", "b"]).await;
        backend.data_row(&[Some("1")]).await;
        backend.send(b'C', b"SELECT 1\0").await;
        backend.send(b'Z', b"I").await;

        backend.expect(b'Q').await;
        backend.send(b'I', b"").await;
        backend.send(b'Z', b"I").await;
        backend
    });

    let err = conn.query("SELECT 1 AS a, 2 AS b", &[]).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Decode(_)));

    // the rest of the failed result is discarded
    let result = conn.query("", &[]).await.unwrap();
    assert_eq!(result.command, "");
    server.await.unwrap();
}

#[tokio::test]
async fn close_sends_terminate() {
    let (conn, mut backend) = connect(config(), trust).await;
    conn.unwrap().close().await.unwrap();

    let (tag, body) = backend.read_message().await;
    assert_eq!(tag, b'X');
    assert!(body.is_empty());

    let mut rest = vec![];
    backend.io.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn connect_over_tcp() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut backend = Backend { io: socket };
        backend.read_startup().await;
        backend.ready().await;
        assert_eq!(backend.expect(b'X').await, b"");
    });

    let config = config().host("127.0.0.1").port(port);
    let conn = postwire::connect(&config).await.unwrap();
    assert_eq!(conn.parameter("client_encoding"), Some("UTF8"));
    conn.close().await.unwrap();

    server.await.unwrap();
}
