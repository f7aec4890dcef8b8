//! TCP transport: one request/response exchange per connection.
//!
//! Frames are a big-endian `u32` length followed by a bincode payload.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::acceptor::Acceptor;
use crate::error::PaxosError;
use crate::storage::RecordStore;
use crate::transport::AcceptorClient;
use crate::types::{AcceptReply, BallotNumber, PrepareReply, Value};

/// Upper bound on a single frame.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Prepare {
        key: String,
        ballot: BallotNumber,
    },
    Accept {
        key: String,
        ballot: BallotNumber,
        value: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Prepare(PrepareReply),
    Accept(AcceptReply),
    /// The acceptor could not serve the request, e.g. a storage failure.
    Failed(String),
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), PaxosError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = bincode::serde::encode_to_vec(message, bincode::config::standard())?;
    let len = u32::try_from(bytes.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| PaxosError::Codec(format!("frame of {} bytes too large", bytes.len())))?;
    writer.write_u32(len).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean end of stream before the length prefix.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, PaxosError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(PaxosError::Codec(format!("frame of {} bytes too large", len)));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    let (message, _) = bincode::serde::decode_from_slice(&buf, bincode::config::standard())?;
    Ok(Some(message))
}

/// Pause after a failed `accept`, e.g. when the process is out of file
/// descriptors, before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Serve `acceptor` on `listener`. Runs until the task is dropped.
pub async fn serve<S>(listener: TcpListener, acceptor: Arc<Acceptor<S>>)
where
    S: RecordStore + 'static,
{
    info!(
        acceptor = %acceptor.name(),
        addr = ?listener.local_addr().ok(),
        "acceptor listening"
    );
    accept_loop(|| listener.accept(), acceptor).await
}

async fn accept_loop<S, F, Fut>(mut accept: F, acceptor: Arc<Acceptor<S>>)
where
    S: RecordStore + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<(TcpStream, SocketAddr)>>,
{
    loop {
        let (stream, peer) = match accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(acceptor = %acceptor.name(), error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };
        let acceptor = Arc::clone(&acceptor);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &acceptor).await {
                warn!(%peer, error = %e, "connection closed with error");
            }
        });
    }
}

async fn handle_connection<S: RecordStore>(
    mut stream: TcpStream,
    acceptor: &Acceptor<S>,
) -> Result<(), PaxosError> {
    stream.set_nodelay(true).ok();
    while let Some(request) = read_frame::<_, Request>(&mut stream).await? {
        let response = dispatch(acceptor, request).await;
        write_frame(&mut stream, &response).await?;
    }
    Ok(())
}

async fn dispatch<S: RecordStore>(acceptor: &Acceptor<S>, request: Request) -> Response {
    debug!(acceptor = %acceptor.name(), ?request, "request");
    match request {
        Request::Prepare { key, ballot } => match acceptor.prepare(&key, ballot).await {
            Ok(reply) => Response::Prepare(reply),
            Err(e) => Response::Failed(e.to_string()),
        },
        Request::Accept { key, ballot, value } => {
            match acceptor.accept(&key, ballot, value).await {
                Ok(reply) => Response::Accept(reply),
                Err(e) => Response::Failed(e.to_string()),
            }
        }
    }
}

/// Client for an acceptor served by [`serve`]. Opens a connection per call.
#[derive(Debug, Clone)]
pub struct TcpClient {
    addr: String,
}

impl TcpClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    async fn call(&self, request: Request) -> Result<Response, PaxosError> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| PaxosError::unreachable(&self.addr, e))?;
        stream.set_nodelay(true).ok();

        write_frame(&mut stream, &request)
            .await
            .map_err(|e| PaxosError::unreachable(&self.addr, e))?;
        match read_frame::<_, Response>(&mut stream).await {
            Ok(Some(Response::Failed(reason))) => Err(PaxosError::unreachable(&self.addr, reason)),
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(PaxosError::unreachable(&self.addr, "connection closed")),
            Err(e) => Err(PaxosError::unreachable(&self.addr, e)),
        }
    }

    fn unexpected(&self, response: Response) -> PaxosError {
        PaxosError::Codec(format!("unexpected response from {}: {:?}", self.addr, response))
    }
}

impl AcceptorClient for TcpClient {
    fn name(&self) -> &str {
        &self.addr
    }

    async fn prepare(&self, key: &str, ballot: BallotNumber) -> Result<PrepareReply, PaxosError> {
        let request = Request::Prepare {
            key: key.to_owned(),
            ballot,
        };
        match self.call(request).await? {
            Response::Prepare(reply) => Ok(reply),
            other => Err(self.unexpected(other)),
        }
    }

    async fn accept(
        &self,
        key: &str,
        ballot: BallotNumber,
        value: Value,
    ) -> Result<AcceptReply, PaxosError> {
        let request = Request::Accept {
            key: key.to_owned(),
            ballot,
            value,
        };
        match self.call(request).await? {
            Response::Accept(reply) => Ok(reply),
            other => Err(self.unexpected(other)),
        }
    }
}
