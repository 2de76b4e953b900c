// xtrabackup-assistant/src/transfer/sftp.rs
use ssh2::{ErrorCode, Session, Sftp};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{Connector, RemoteEntry, RemoteSession, TransferClient};
use crate::config::SftpConfig;
use crate::errors::Result;
use crate::utils::echo::Echo;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Per blocking libssh2 call.
const SESSION_TIMEOUT_MS: u32 = 60_000;

// libssh2 codes
const FX_NO_SUCH_FILE: i32 = 2;
const FX_PERMISSION_DENIED: i32 = 3;
const FX_NO_SUCH_PATH: i32 = 10;
const ERROR_TIMEOUT: i32 = -9;
const ERROR_AUTHENTICATION_FAILED: i32 = -18;

/// Maps libssh2 failures onto `io::ErrorKind`s the client reacts to.
/// Transport-level session errors count as a lost connection.
fn to_io(err: ssh2::Error) -> io::Error {
    let kind = match err.code() {
        ErrorCode::SFTP(FX_NO_SUCH_FILE) | ErrorCode::SFTP(FX_NO_SUCH_PATH) => io::ErrorKind::NotFound,
        ErrorCode::SFTP(FX_PERMISSION_DENIED) => io::ErrorKind::PermissionDenied,
        ErrorCode::SFTP(_) => io::ErrorKind::Other,
        ErrorCode::Session(ERROR_TIMEOUT) => io::ErrorKind::TimedOut,
        ErrorCode::Session(ERROR_AUTHENTICATION_FAILED) => io::ErrorKind::PermissionDenied,
        ErrorCode::Session(_) => io::ErrorKind::ConnectionAborted,
    };
    io::Error::new(kind, err.message().to_string())
}

/// Errors raised by `ssh2::File` mid-transfer only surface as `Other`.
fn transport_io(err: io::Error) -> io::Error {
    if err.kind() == io::ErrorKind::Other {
        io::Error::new(io::ErrorKind::ConnectionAborted, err.to_string())
    } else {
        err
    }
}

pub struct SftpConnector {
    host: String,
    port: u16,
    user: String,
    password: String,
}

impl SftpConnector {
    pub fn from_config(config: &SftpConfig) -> Self {
        SftpConnector {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            password: config.password.clone(),
        }
    }
}

impl Connector for SftpConnector {
    fn connect(&self) -> io::Result<Box<dyn RemoteSession>> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {}", self.host)))?;
        let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;

        let mut session = Session::new().map_err(to_io)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(SESSION_TIMEOUT_MS);
        session.handshake().map_err(to_io)?;
        session.userauth_password(&self.user, &self.password).map_err(to_io)?;
        if !session.authenticated() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "authentication failed"));
        }

        let sftp = session.sftp().map_err(to_io)?;
        Ok(Box::new(SftpSession {
            session,
            sftp: Some(sftp),
        }))
    }

    fn describe(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

struct SftpSession {
    session: Session,
    sftp: Option<Sftp>,
}

impl SftpSession {
    fn sftp(&self) -> io::Result<&Sftp> {
        self.sftp
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "sftp channel is closed"))
    }
}

impl RemoteSession for SftpSession {
    fn read_dir(&mut self, path: &Path) -> io::Result<Vec<RemoteEntry>> {
        let entries = self.sftp()?.readdir(path).map_err(to_io)?;
        Ok(entries
            .into_iter()
            .map(|(path, stat)| RemoteEntry {
                is_dir: stat.is_dir(),
                size: stat.size.unwrap_or(0),
                path,
            })
            .collect())
    }

    fn stat(&mut self, path: &Path) -> io::Result<RemoteEntry> {
        let stat = self.sftp()?.stat(path).map_err(to_io)?;
        Ok(RemoteEntry {
            path: path.to_path_buf(),
            size: stat.size.unwrap_or(0),
            is_dir: stat.is_dir(),
        })
    }

    fn mkdir(&mut self, path: &Path, mode: i32) -> io::Result<()> {
        self.sftp()?.mkdir(path, mode).map_err(to_io)
    }

    fn create(&mut self, path: &Path) -> io::Result<Box<dyn Write + '_>> {
        let file = self.sftp()?.create(path).map_err(to_io)?;
        Ok(Box::new(SftpFile(file)))
    }

    fn open(&mut self, path: &Path) -> io::Result<Box<dyn Read + '_>> {
        let file = self.sftp()?.open(path).map_err(to_io)?;
        Ok(Box::new(SftpFile(file)))
    }

    fn remove_file(&mut self, path: &Path) -> io::Result<()> {
        self.sftp()?.unlink(path).map_err(to_io)
    }

    fn remove_dir(&mut self, path: &Path) -> io::Result<()> {
        self.sftp()?.rmdir(path).map_err(to_io)
    }

    fn close(&mut self) {
        self.sftp.take();
        let _ = self.session.disconnect(None, "closing", None);
    }
}

struct SftpFile(ssh2::File);

impl Read for SftpFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).map_err(transport_io)
    }
}

impl Write for SftpFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf).map_err(transport_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush().map_err(transport_io)
    }
}

impl TransferClient {
    /// Connects to the configured SFTP storage.
    pub fn sftp(config: &SftpConfig, echo: Echo, cancel: CancellationToken) -> Result<Self> {
        TransferClient::connect(Box::new(SftpConnector::from_config(config)), echo, cancel)
    }
}
