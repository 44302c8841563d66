//! rfs host - serves the storage root to remote clients
//!
//! Each accepted connection carries exactly one request. The handler reads
//! the command line, runs the matching WRITE/GET/RM operation under the
//! file's lock and closes the connection.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use rfs_core::{
    parse_size, recv_line, size_line, Command, LockScope, Obfuscator, PathResolver, Permission,
    PermissionStore, ProtocolError, Response, ServerConfig, MAX_LINE_LEN, MAX_SIZE_LINE_LEN,
    TRANSFER_UNIT,
};

use crate::lock_manager::LockManager;
use crate::spawner::{spawner_for, ConnectionSpawner};

/// Host configuration
#[derive(Clone, Debug)]
pub struct HostConfig {
    pub bind_addr: SocketAddr,
    pub root: PathBuf,
    pub lock_scope: LockScope,
    pub max_connections: Option<usize>,
    pub confine_paths: bool,
    pub obfuscation_key: u8,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for HostConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            bind_addr: config.bind_addr(),
            root: config.root.clone(),
            lock_scope: config.lock_scope,
            max_connections: config.max_connections,
            confine_paths: config.confine_paths,
            obfuscation_key: config.obfuscation_key,
        }
    }
}

/// Executes requests against the storage root
pub struct StorageEngine {
    resolver: PathResolver,
    permissions: PermissionStore,
    locks: LockManager,
    obfuscator: Obfuscator,
}

impl StorageEngine {
    pub fn new(config: &HostConfig) -> Self {
        let resolver = if config.confine_paths {
            PathResolver::confined(&config.root)
        } else {
            PathResolver::new(&config.root)
        };

        Self {
            resolver,
            permissions: PermissionStore::new(),
            locks: LockManager::new(config.lock_scope),
            obfuscator: Obfuscator::new(config.obfuscation_key),
        }
    }

    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// WRITE: read the size line, then store the payload.
    ///
    /// A rejected WRITE drains the announced payload before the error is
    /// answered, so the peer sees the reply instead of a reset.
    async fn write<S>(
        &self,
        stream: &mut S,
        path: &[u8],
        permission: Permission,
    ) -> Result<(), HostError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let shown = String::from_utf8_lossy(path);
        let line = recv_line(stream, MAX_SIZE_LINE_LEN).await;
        if line.is_empty() {
            warn!("No size line from client for WRITE {}", shown);
            return Err(ProtocolError::MissingSize.into());
        }
        let size = parse_size(&line).map_err(|e| {
            warn!("Invalid file size from client for WRITE {}: {}", shown, e);
            e
        })?;

        let target = match self.resolver.resolve(path) {
            Ok(target) => target,
            Err(e) => {
                discard(stream, size).await;
                return Err(e.into());
            }
        };

        self.resolver.ensure_parent_dirs(&target).await;

        let guard = self.locks.acquire(&target).await;

        if self.permissions.read(&target).await.is_read_only() {
            drop(guard);
            info!("Refused WRITE to read-only {:?}", target);
            discard(stream, size).await;
            return Err(ProtocolError::ReadOnly.into());
        }

        let mut file = File::create(&target).await.map_err(|e| {
            error!("Can't open {:?} for writing: {}", target, e);
            e
        })?;

        let received = self.receive_body(stream, &mut file, size).await?;
        if received < size {
            warn!(
                "Client stopped sending {:?} after {} of {} bytes",
                target, received, size
            );
        }

        // Recorded even after a short body
        if let Err(e) = self.permissions.write(&target, permission).await {
            warn!("Failed to record permission for {:?}: {}", target, e);
        }

        drop(guard);
        info!("Stored {:?} ({} bytes, {})", target, received, permission);
        reply(stream, &Response::Ok).await?;
        Ok(())
    }

    /// Copy up to `size` payload bytes from the peer into `file`.
    ///
    /// Returns the number of bytes stored. A closed or failing peer ends the
    /// copy early; a local write failure is returned as an error.
    async fn receive_body<S>(&self, stream: &mut S, file: &mut File, size: u64) -> io::Result<u64>
    where
        S: AsyncRead + Unpin,
    {
        let mut buffer = [0u8; TRANSFER_UNIT];
        let mut remaining = size;

        while remaining > 0 {
            let want = remaining.min(TRANSFER_UNIT as u64) as usize;
            let n = match stream.read(&mut buffer[..want]).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!("Payload read failed: {}", e);
                    break;
                }
            };

            self.obfuscator.apply(&mut buffer[..n]);
            file.write_all(&buffer[..n]).await?;
            remaining -= n as u64;
        }

        file.flush().await?;
        Ok(size - remaining)
    }

    /// GET: send the size line followed by the de-obfuscated content.
    async fn get<S>(&self, stream: &mut S, path: &[u8]) -> Result<(), HostError>
    where
        S: AsyncWrite + Unpin,
    {
        let target = self.resolver.resolve(path)?;

        let guard = self.locks.acquire(&target).await;

        let (file, len) = match open_regular(&target).await {
            Some(opened) => opened,
            None => {
                drop(guard);
                debug!("GET for missing {:?}", target);
                reply(stream, &Response::bare_error()).await?;
                return Ok(());
            }
        };

        stream.write_all(size_line(len).as_bytes()).await?;
        let sent = self.send_body(stream, file, len).await;
        drop(guard);

        if sent < len {
            warn!("Sent only {} of {} bytes of {:?}", sent, len, target);
        } else {
            debug!("Served {:?} ({} bytes)", target, len);
        }
        Ok(())
    }

    /// Stream `len` bytes of `file` to the peer, one transfer unit at a time.
    async fn send_body<S>(&self, stream: &mut S, mut file: File, len: u64) -> u64
    where
        S: AsyncWrite + Unpin,
    {
        let mut buffer = [0u8; TRANSFER_UNIT];
        let mut remaining = len;

        while remaining > 0 {
            let want = remaining.min(TRANSFER_UNIT as u64) as usize;
            let n = match file.read(&mut buffer[..want]).await {
                Ok(0) => {
                    warn!("File ended {} bytes early", remaining);
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    error!("Read error while serving file: {}", e);
                    break;
                }
            };

            self.obfuscator.apply(&mut buffer[..n]);
            if let Err(e) = stream.write_all(&buffer[..n]).await {
                debug!("Client went away during GET: {}", e);
                break;
            }
            remaining -= n as u64;
        }

        len - remaining
    }

    /// RM: delete the file and its permission record.
    async fn remove<S>(&self, stream: &mut S, path: &[u8]) -> Result<(), HostError>
    where
        S: AsyncWrite + Unpin,
    {
        let target = self.resolver.resolve(path)?;

        let guard = self.locks.acquire(&target).await;

        if self.permissions.read(&target).await.is_read_only() {
            drop(guard);
            info!("Refused RM of read-only {:?}", target);
            reply(stream, &Response::bare_error()).await?;
            return Ok(());
        }

        let response = match remove_entry(&target).await {
            Ok(()) => {
                // A missing sidecar is the common case
                let _ = self.permissions.remove(&target).await;
                info!("Removed {:?}", target);
                Response::Ok
            }
            Err(e) => {
                debug!("RM of {:?} failed: {}", target, e);
                Response::bare_error()
            }
        };

        drop(guard);
        reply(stream, &response).await?;
        Ok(())
    }
}

/// Serve one request on `stream`, then close it.
pub async fn handle_connection<S>(stream: S, engine: &StorageEngine) -> Result<(), HostError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let result = dispatch(&mut stream, engine).await;
    let _ = stream.shutdown().await;
    result
}

/// Run one request. Protocol errors are answered with `ERROR: <reason>`
/// unless they leave the stream in an unknown state.
async fn dispatch<S>(stream: &mut S, engine: &StorageEngine) -> Result<(), HostError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = recv_line(stream, MAX_LINE_LEN).await;
    if line.is_empty() {
        return Ok(());
    }

    let result = match Command::parse(&line) {
        Ok(command) => {
            debug!("Request: {}", command);
            match command {
                Command::Write { path, permission } => {
                    engine.write(stream, &path, permission).await
                }
                Command::Get { path } => engine.get(stream, &path).await,
                Command::Remove { path } => engine.remove(stream, &path).await,
            }
        }
        Err(e) => Err(e.into()),
    };

    if let Err(HostError::Protocol(e)) = &result {
        if e.is_answerable() {
            reply(stream, &Response::from(e)).await?;
        }
    }
    result
}

async fn reply<S>(stream: &mut S, response: &Response) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(response.to_line().as_bytes()).await?;
    stream.flush().await
}

/// Swallow the unread part of a rejected WRITE body so the peer sees an
/// orderly close instead of a reset.
async fn discard<S>(stream: &mut S, size: u64)
where
    S: AsyncRead + Unpin,
{
    let mut body = stream.take(size);
    if let Err(e) = tokio::io::copy(&mut body, &mut tokio::io::sink()).await {
        debug!("Discarding rejected payload stopped early: {}", e);
    }
}

/// Open `path` if it is a regular file, returning it with its length.
async fn open_regular(path: &Path) -> Option<(File, u64)> {
    let file = File::open(path).await.ok()?;
    let meta = file.metadata().await.ok()?;
    if !meta.is_file() {
        return None;
    }
    Some((file, meta.len()))
}

/// Remove a file, or an empty directory.
async fn remove_entry(path: &Path) -> io::Result<()> {
    let meta = tokio::fs::symlink_metadata(path).await?;
    if meta.is_dir() {
        tokio::fs::remove_dir(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

/// rfs host server
pub struct RfsHost {
    listener: TcpListener,
    engine: Arc<StorageEngine>,
    spawner: Arc<dyn ConnectionSpawner>,
}

impl RfsHost {
    /// Bind the listening socket
    pub async fn bind(config: HostConfig) -> Result<Self, HostError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| HostError::Bind {
                addr: config.bind_addr,
                source,
            })?;

        Ok(Self {
            listener,
            engine: Arc::new(StorageEngine::new(&config)),
            spawner: spawner_for(config.max_connections),
        })
    }

    /// Replace the connection spawner
    pub fn with_spawner(mut self, spawner: Arc<dyn ConnectionSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, HostError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    /// Accept connections forever, one handler task per connection
    pub async fn serve(self) -> Result<(), HostError> {
        info!(
            "rfs host listening on {} serving {:?} (locks: {:?}, spawner: {})",
            self.local_addr()?,
            self.engine.root(),
            self.engine.locks().scope(),
            self.spawner.name()
        );

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            };

            let engine = self.engine.clone();
            self.spawner
                .spawn(
                    async move {
                        debug!("New connection from {}", peer);
                        if let Err(e) = handle_connection(stream, &engine).await {
                            debug!("Connection error from {}: {}", peer, e);
                        }
                    }
                    .boxed(),
                )
                .await;
        }
    }
}

/// Host errors
#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::net::TcpStream;

    async fn start_host(root: &Path, scope: LockScope) -> SocketAddr {
        let config = HostConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            root: root.to_path_buf(),
            lock_scope: scope,
            ..HostConfig::default()
        };
        let host = RfsHost::bind(config).await.unwrap();
        let addr = host.local_addr().unwrap();
        tokio::spawn(host.serve());
        addr
    }

    /// Send raw bytes, half-close, and collect everything the server says.
    ///
    /// A reset after the reply (server closed with our bytes unread) just
    /// ends the collection.
    async fn exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        stream.shutdown().await.unwrap();

        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
            }
        }
        out
    }

    fn write_request(path: &str, perm: &str, payload: &[u8]) -> Vec<u8> {
        let mut req = format!("WRITE {} {}\n{}\n", path, perm, payload.len()).into_bytes();
        req.extend_from_slice(payload);
        req
    }

    fn get_body(reply: &[u8]) -> (u64, &[u8]) {
        let newline = reply.iter().position(|b| *b == b'\n').unwrap();
        let size = parse_size(&reply[..newline]).unwrap();
        (size, &reply[newline + 1..])
    }

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.bind_addr.port(), 2024);
        assert_eq!(config.root, PathBuf::from("server_root"));
        assert_eq!(config.max_connections, None);
    }

    #[tokio::test]
    async fn test_write_then_get_round_trip() {
        let temp = TempDir::new().unwrap();
        let addr = start_host(temp.path(), LockScope::PerPath).await;

        for size in [1usize, 1023, 1024, 1025, 10_000] {
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let path = format!("sizes/{}.bin", size);

            let reply = exchange(addr, &write_request(&path, "W", &payload)).await;
            assert_eq!(reply, b"OK\n");

            let reply = exchange(addr, format!("GET {}\n", path).as_bytes()).await;
            let (declared, body) = get_body(&reply);
            assert_eq!(declared, size as u64);
            assert_eq!(body, &payload[..]);
        }
    }

    #[tokio::test]
    async fn test_stored_bytes_are_obfuscated() {
        let temp = TempDir::new().unwrap();
        let addr = start_host(temp.path(), LockScope::PerPath).await;

        let reply = exchange(addr, &write_request("plain.txt", "W", b"hello")).await;
        assert_eq!(reply, b"OK\n");

        let on_disk = std::fs::read(temp.path().join("plain.txt")).unwrap();
        let expected: Vec<u8> = b"hello".iter().map(|b| b ^ 0xAA).collect();
        assert_eq!(on_disk, expected);
        assert_eq!(std::fs::read(temp.path().join("plain.txt.meta")).unwrap(), b"W");
    }

    #[tokio::test]
    async fn test_get_missing_file() {
        let temp = TempDir::new().unwrap();
        let addr = start_host(temp.path(), LockScope::PerPath).await;

        let reply = exchange(addr, b"GET nothing/here.txt\n").await;
        assert_eq!(reply, b"ERROR\n");
    }

    #[tokio::test]
    async fn test_get_directory_is_error() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("folder")).unwrap();
        let addr = start_host(temp.path(), LockScope::PerPath).await;

        let reply = exchange(addr, b"GET folder\n").await;
        assert_eq!(reply, b"ERROR\n");
    }

    #[tokio::test]
    async fn test_read_only_blocks_write_and_rm() {
        let temp = TempDir::new().unwrap();
        let addr = start_host(temp.path(), LockScope::PerPath).await;

        let reply = exchange(addr, &write_request("locked.txt", "R", b"original")).await;
        assert_eq!(reply, b"OK\n");

        let reply = exchange(addr, &write_request("locked.txt", "W", b"replacement")).await;
        assert_eq!(reply, b"ERROR: File is read-only\n");

        let reply = exchange(addr, b"RM locked.txt\n").await;
        assert_eq!(reply, b"ERROR\n");

        let reply = exchange(addr, b"GET locked.txt\n").await;
        assert_eq!(get_body(&reply), (8, &b"original"[..]));
        assert_eq!(std::fs::read(temp.path().join("locked.txt.meta")).unwrap(), b"R");
    }

    #[tokio::test]
    async fn test_permission_overwrite() {
        let temp = TempDir::new().unwrap();
        let addr = start_host(temp.path(), LockScope::PerPath).await;

        assert_eq!(exchange(addr, &write_request("doc", "W", b"first")).await, b"OK\n");
        assert_eq!(exchange(addr, &write_request("doc", "R", b"second")).await, b"OK\n");

        let reply = exchange(addr, b"GET doc\n").await;
        assert_eq!(get_body(&reply), (6, &b"second"[..]));

        let reply = exchange(addr, &write_request("doc", "W", b"third")).await;
        assert_eq!(reply, b"ERROR: File is read-only\n");
    }

    #[tokio::test]
    async fn test_rm_removes_file_and_sidecar() {
        let temp = TempDir::new().unwrap();
        let addr = start_host(temp.path(), LockScope::PerPath).await;

        assert_eq!(exchange(addr, &write_request("a/b.txt", "W", b"data")).await, b"OK\n");
        assert!(temp.path().join("a/b.txt.meta").exists());

        assert_eq!(exchange(addr, b"RM a/b.txt\n").await, b"OK\n");
        assert!(!temp.path().join("a/b.txt").exists());
        assert!(!temp.path().join("a/b.txt.meta").exists());

        assert_eq!(exchange(addr, b"GET a/b.txt\n").await, b"ERROR\n");
        assert_eq!(exchange(addr, &write_request("a/b.txt", "W", b"again")).await, b"OK\n");
    }

    #[tokio::test]
    async fn test_rm_missing_file() {
        let temp = TempDir::new().unwrap();
        let addr = start_host(temp.path(), LockScope::PerPath).await;

        assert_eq!(exchange(addr, b"RM ghost.txt\n").await, b"ERROR\n");
    }

    #[tokio::test]
    async fn test_short_transfer_keeps_received_bytes() {
        let temp = TempDir::new().unwrap();
        let addr = start_host(temp.path(), LockScope::PerPath).await;

        // Declares 10 bytes, sends 3, then closes its side
        let reply = exchange(addr, b"WRITE short.bin R\n10\nabc").await;
        assert_eq!(reply, b"OK\n");

        let on_disk = std::fs::read(temp.path().join("short.bin")).unwrap();
        assert_eq!(on_disk.len(), 3);
        assert_eq!(std::fs::read(temp.path().join("short.bin.meta")).unwrap(), b"R");

        let reply = exchange(addr, b"GET short.bin\n").await;
        assert_eq!(get_body(&reply), (3, &b"abc"[..]));

        assert_eq!(exchange(addr, b"RM short.bin\n").await, b"ERROR\n");
        assert!(temp.path().join("short.bin").exists());
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let temp = TempDir::new().unwrap();
        let addr = start_host(temp.path(), LockScope::PerPath).await;

        assert_eq!(
            exchange(addr, b"GET\n").await,
            b"ERROR: Missing command or path\n"
        );
        assert_eq!(
            exchange(addr, b"\n").await,
            b"ERROR: Missing command or path\n"
        );
        assert_eq!(
            exchange(addr, b"LIST dir\n").await,
            b"ERROR: Unrecognized command\n"
        );
        assert_eq!(
            exchange(addr, b"write a.txt\n1\nx").await,
            b"ERROR: Unrecognized command\n"
        );
        assert!(exchange(addr, b"").await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_size_closes_without_touching_disk() {
        let temp = TempDir::new().unwrap();
        let addr = start_host(temp.path(), LockScope::PerPath).await;

        assert!(exchange(addr, b"WRITE new/dir/f.txt W\n0\n").await.is_empty());
        assert!(exchange(addr, b"WRITE new/dir/f.txt W\n-4\nabcd").await.is_empty());
        assert!(exchange(addr, b"WRITE new/dir/f.txt W\nlots\n").await.is_empty());
        assert!(exchange(addr, b"WRITE new/dir/f.txt W\n").await.is_empty());
        assert!(!temp.path().join("new").exists());
    }

    #[tokio::test]
    async fn test_confined_paths() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        let config = HostConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            root: root.clone(),
            confine_paths: true,
            ..HostConfig::default()
        };
        let host = RfsHost::bind(config).await.unwrap();
        let addr = host.local_addr().unwrap();
        tokio::spawn(host.serve());

        let reply = exchange(addr, &write_request("../escape.txt", "W", b"x")).await;
        assert!(reply.starts_with(b"ERROR: path rejected"));
        assert!(!temp.path().join("escape.txt").exists());

        assert_eq!(exchange(addr, &write_request("ok.txt", "W", b"x")).await, b"OK\n");
        assert!(root.join("ok.txt").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_never_interleave() {
        for scope in [LockScope::PerPath, LockScope::Global] {
            let temp = TempDir::new().unwrap();
            let addr = start_host(temp.path(), scope).await;

            let mut tasks = Vec::new();
            for i in 0..8u8 {
                tasks.push(tokio::spawn(async move {
                    let payload = vec![b'a' + i; 50_000];
                    let path = format!("c/{}.bin", i % 2);
                    let reply = exchange(addr, &write_request(&path, "W", &payload)).await;
                    assert_eq!(reply, b"OK\n");
                }));
            }
            for task in tasks {
                task.await.unwrap();
            }

            for name in ["c/0.bin", "c/1.bin"] {
                let reply = exchange(addr, format!("GET {}\n", name).as_bytes()).await;
                let (declared, body) = get_body(&reply);
                assert_eq!(declared, 50_000);
                assert!(body.iter().all(|b| *b == body[0]), "mixed payload in {}", name);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_aliased_paths_share_a_lock() {
        let temp = TempDir::new().unwrap();
        let addr = start_host(temp.path(), LockScope::PerPath).await;

        // First writer announces 2048 bytes and stalls after half of them
        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"WRITE f W\n2048\n").await.unwrap();
        first.write_all(&[b'a'; 1024]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = tokio::spawn(async move {
            exchange(addr, &write_request("d/../f", "W", &[b'b'; 2048])).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!second.is_finished(), "aliased WRITE ran while f was locked");

        first.write_all(&[b'a'; 1024]).await.unwrap();
        first.shutdown().await.unwrap();
        let mut reply = Vec::new();
        first.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"OK\n");
        assert_eq!(second.await.unwrap(), b"OK\n");

        let reply = exchange(addr, b"GET f\n").await;
        let (declared, body) = get_body(&reply);
        assert_eq!(declared, 2048);
        assert!(body.iter().all(|b| *b == b'b'), "mixed payload in f");
    }

    #[tokio::test]
    async fn test_sidecar_write_waits_for_data_file() {
        let temp = TempDir::new().unwrap();
        let addr = start_host(temp.path(), LockScope::PerPath).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"WRITE g W\n4\nab").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second =
            tokio::spawn(async move { exchange(addr, &write_request("g.meta", "W", b"R")).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!second.is_finished(), "sidecar WRITE ran while g was locked");

        first.write_all(b"cd").await.unwrap();
        first.shutdown().await.unwrap();
        let mut reply = Vec::new();
        first.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"OK\n");
        assert_eq!(second.await.unwrap(), b"OK\n");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_non_utf8_paths_are_distinct_files() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = TempDir::new().unwrap();
        let addr = start_host(temp.path(), LockScope::PerPath).await;

        assert_eq!(exchange(addr, b"WRITE n\xff R\n1\nx").await, b"OK\n");
        assert_eq!(exchange(addr, b"WRITE n\xfe W\n1\ny").await, b"OK\n");

        let ff = temp.path().join(OsStr::from_bytes(b"n\xff"));
        let fe = temp.path().join(OsStr::from_bytes(b"n\xfe"));
        assert_eq!(std::fs::read(&ff).unwrap(), [b'x' ^ 0xAA]);
        assert_eq!(std::fs::read(&fe).unwrap(), [b'y' ^ 0xAA]);
        assert_eq!(std::fs::read(ff.with_extension("meta")).unwrap(), b"R");
        assert_eq!(std::fs::read(fe.with_extension("meta")).unwrap(), b"W");

        assert_eq!(get_body(&exchange(addr, b"GET n\xfe\n").await), (1, &b"y"[..]));
    }

    #[tokio::test]
    async fn test_handle_connection_over_duplex() {
        let temp = TempDir::new().unwrap();
        let config = HostConfig {
            root: temp.path().to_path_buf(),
            ..HostConfig::default()
        };
        let engine = StorageEngine::new(&config);

        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(b"WRITE mem.txt W\n4\nabcd").await.unwrap();
        handle_connection(server, &engine).await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"OK\n");
        assert_eq!(engine.locks().tracked_paths(), 0);
    }
}
