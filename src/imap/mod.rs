use std::time::Duration;

use async_native_tls::TlsConnector;
use async_std::net::TcpStream;
use futures::StreamExt;
use tracing::{info, warn};

pub type ImapSession = async_imap::Session<async_native_tls::TlsStream<TcpStream>>;

const IMAPS_PORT: u16 = 993;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const OP_TIMEOUT: Duration = Duration::from_secs(30);

async fn bounded<T, E, F>(op: &str, fut: F) -> Result<T, String>
where
    E: std::fmt::Display,
    F: std::future::Future<Output = Result<T, E>>,
{
    match async_std::future::timeout(OP_TIMEOUT, fut).await {
        Ok(result) => result.map_err(|e| format!("{} failed: {}", op, e)),
        Err(_) => Err(format!("{} timed out after {:?}", op, OP_TIMEOUT)),
    }
}

// ── Connection creation ─────────────────────────────────────────────────────

/// Open a TLS IMAP session and authenticate with LOGIN. Every network step
/// runs under a bounded timeout so a hung server cannot stall an
/// all-accounts run.
pub async fn connect(host: &str, user: &str, password: &str) -> Result<ImapSession, String> {
    let addr = format!("{}:{}", host, IMAPS_PORT);

    info!("[imap] connecting to {} as {}", addr, user);

    // Resolve to IPv4 only — avoids IPv6 hangs with some providers
    use async_std::net::ToSocketAddrs;
    let addrs: Vec<std::net::SocketAddr> = addr
        .to_socket_addrs()
        .await
        .map_err(|e| format!("DNS resolve failed for {}: {}", addr, e))?
        .filter(|a| a.is_ipv4())
        .collect();

    if addrs.is_empty() {
        return Err(format!("No IPv4 address found for {}", host));
    }

    let tcp = async_std::io::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addrs[..]))
        .await
        .map_err(|e| format!("TCP connect to {} failed: {}", addr, e))?;

    let tls = TlsConnector::new();
    let tls_stream = async_std::future::timeout(OP_TIMEOUT, tls.connect(host, tcp))
        .await
        .map_err(|_| format!("TLS handshake with {} timed out", host))?
        .map_err(|e| format!("TLS handshake with {} failed: {}", host, e))?;

    let mut client = async_imap::Client::new(tls_stream);

    // Consume the server greeting (e.g. "* OK ready") before LOGIN
    let _greeting = async_std::future::timeout(OP_TIMEOUT, client.read_response())
        .await
        .map_err(|_| format!("Greeting from {} timed out", addr))?
        .map_err(|e| format!("Failed to read server greeting: {}", e))?;

    let session = match async_std::future::timeout(OP_TIMEOUT, client.login(user, password)).await
    {
        Ok(Ok(session)) => session,
        Ok(Err((e, _))) => return Err(format!("Login failed for {}: {}", user, e)),
        Err(_) => return Err(format!("Login timed out for {}", user)),
    };

    info!("[imap] session established for {}", user);
    Ok(session)
}

// ── Mailbox operations ──────────────────────────────────────────────────────

/// Select INBOX and return every UID in ascending order.
pub async fn inbox_uids(session: &mut ImapSession) -> Result<Vec<u32>, String> {
    bounded("SELECT INBOX", session.select("INBOX")).await?;

    let uids = bounded("UID SEARCH ALL", session.uid_search("ALL")).await?;

    let mut result: Vec<u32> = uids.into_iter().collect();
    result.sort();
    Ok(result)
}

/// Fetch one message's full raw source by UID.
pub async fn fetch_raw(session: &mut ImapSession, uid: u32) -> Result<Option<Vec<u8>>, String> {
    let fetch_stream = bounded(
        "UID FETCH",
        session.uid_fetch(uid.to_string(), "(UID BODY.PEEK[])"),
    )
    .await?;

    let fetches = match async_std::future::timeout(
        OP_TIMEOUT,
        fetch_stream.collect::<Vec<_>>(),
    )
    .await
    {
        Ok(fetches) => fetches,
        Err(_) => return Err(format!("UID FETCH {} response timed out", uid)),
    };

    let fetch = fetches.into_iter().filter_map(|r| r.ok()).next();
    Ok(fetch.and_then(|f| f.body().map(|b| b.to_vec())))
}

/// Best-effort LOGOUT. The messages are already stored by the time this
/// runs, so failures only get logged.
pub async fn logout(mut session: ImapSession) {
    match async_std::future::timeout(OP_TIMEOUT, session.logout()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("[imap] logout failed: {}", e),
        Err(_) => warn!("[imap] logout timed out"),
    }
}
