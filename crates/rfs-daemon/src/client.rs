//! rfs client - issues WRITE, GET and RM requests to a host

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use rfs_core::{
    parse_size, recv_line, size_line, ClientConfig, Command, Permission, Response, MAX_LINE_LEN,
    TRANSFER_UNIT,
};

/// Result of a download
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GetOutcome {
    /// Size announced by the server
    pub expected: u64,
    /// Bytes actually written to the local file
    pub received: u64,
}

impl GetOutcome {
    pub fn is_complete(&self) -> bool {
        self.received == self.expected
    }
}

/// rfs client
#[derive(Clone, Debug)]
pub struct RfsClient {
    server: SocketAddr,
}

impl RfsClient {
    pub fn new(server: SocketAddr) -> Self {
        Self { server }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.server)
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    async fn connect(&self) -> Result<BufReader<TcpStream>, ClientError> {
        let stream = TcpStream::connect(self.server)
            .await
            .map_err(|source| ClientError::Connect {
                addr: self.server,
                source,
            })?;
        debug!("Connected to {}", self.server);
        Ok(BufReader::new(stream))
    }

    /// Upload `local` to `remote` with the given permission.
    ///
    /// Returns the server's status line. A server that closes without
    /// answering (e.g. because the file is empty) yields
    /// [`ClientError::NoResponse`].
    pub async fn write(
        &self,
        local: &Path,
        remote: &str,
        permission: Permission,
    ) -> Result<Response, ClientError> {
        let mut file = File::open(local)
            .await
            .map_err(|source| ClientError::LocalFile {
                path: local.to_path_buf(),
                source,
            })?;
        let size = file.metadata().await?.len();

        let mut stream = self.connect().await?;

        let command = Command::Write {
            path: remote.as_bytes().to_vec(),
            permission,
        };
        stream.write_all(&command.to_line()).await?;
        stream.write_all(size_line(size).as_bytes()).await?;

        let mut buffer = [0u8; TRANSFER_UNIT];
        let mut remaining = size;
        while remaining > 0 {
            let want = remaining.min(TRANSFER_UNIT as u64) as usize;
            let n = file.read(&mut buffer[..want]).await?;
            if n == 0 {
                warn!("{:?} ended {} bytes early", local, remaining);
                break;
            }
            if let Err(e) = stream.write_all(&buffer[..n]).await {
                warn!("Sending data to server failed: {}", e);
                break;
            }
            remaining -= n as u64;
        }
        stream.flush().await?;

        read_status(&mut stream).await
    }

    /// Download `remote` into `local`.
    ///
    /// The local file is only created once the server has announced a valid
    /// size. A connection that drops mid-transfer leaves a partial file and
    /// an outcome with `received < expected`.
    pub async fn get(&self, remote: &str, local: &Path) -> Result<GetOutcome, ClientError> {
        let mut stream = self.connect().await?;

        let command = Command::Get {
            path: remote.as_bytes().to_vec(),
        };
        stream.write_all(&command.to_line()).await?;
        stream.flush().await?;

        let line = recv_line(&mut stream, MAX_LINE_LEN).await;
        if line.is_empty() {
            return Err(ClientError::NoResponse);
        }
        if let Some(Response::Error(reason)) = Response::parse(&line) {
            return Err(ClientError::Server(reason));
        }
        let expected = parse_size(&line).map_err(|_| {
            ClientError::InvalidSize(String::from_utf8_lossy(&line).trim().to_string())
        })?;

        let mut file = File::create(local)
            .await
            .map_err(|source| ClientError::LocalFile {
                path: local.to_path_buf(),
                source,
            })?;

        let mut buffer = [0u8; TRANSFER_UNIT];
        let mut remaining = expected;
        while remaining > 0 {
            let want = remaining.min(TRANSFER_UNIT as u64) as usize;
            let n = match stream.read(&mut buffer[..want]).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!("Cut off while receiving {}: {}", remote, e);
                    break;
                }
            };
            file.write_all(&buffer[..n]).await?;
            remaining -= n as u64;
        }
        file.flush().await?;

        Ok(GetOutcome {
            expected,
            received: expected - remaining,
        })
    }

    /// Delete `remote` on the server.
    pub async fn remove(&self, remote: &str) -> Result<Response, ClientError> {
        let mut stream = self.connect().await?;

        let command = Command::Remove {
            path: remote.as_bytes().to_vec(),
        };
        stream.write_all(&command.to_line()).await?;
        stream.flush().await?;

        read_status(&mut stream).await
    }
}

async fn read_status(stream: &mut BufReader<TcpStream>) -> Result<Response, ClientError> {
    let line = recv_line(stream, MAX_LINE_LEN).await;
    if line.is_empty() {
        return Err(ClientError::NoResponse);
    }
    Response::parse(&line)
        .ok_or_else(|| ClientError::UnexpectedResponse(String::from_utf8_lossy(&line).into_owned()))
}

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("couldn't connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("local file {path:?}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("server gave no response")]
    NoResponse,

    #[error("unexpected response: {0:?}")]
    UnexpectedResponse(String),

    #[error("server error{}", .0.as_deref().map(|r| format!(": {}", r)).unwrap_or_default())]
    Server(Option<String>),

    #[error("invalid size from server: {0:?}")]
    InvalidSize(String),
}
