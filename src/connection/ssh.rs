//! SSH transport built on `russh`, with SFTP for file transfer.
//!
//! Used for hosts of a Cloudera Manager cluster. Authentication tries the
//! SSH agent, then the configured identity file, then the default keys in
//! `~/.ssh`, then a password.

use async_trait::async_trait;
use russh::client::{Handle, Handler};
use russh::keys::key::PublicKey;
use russh::keys::load_secret_key;
use russh::ChannelMsg;
use russh_keys::agent::client::AgentClient;
use russh_sftp::client::SftpSession;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use super::{
    shell_quote, CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions,
    TransferOptions,
};
use crate::config::SshSettings;

/// Wrapper so `russh::Error` can be the handler's error type.
#[derive(Debug)]
pub struct SshHandlerError(pub russh::Error);

impl From<russh::Error> for SshHandlerError {
    fn from(err: russh::Error) -> Self {
        SshHandlerError(err)
    }
}

impl std::fmt::Display for SshHandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "russh error: {}", self.0)
    }
}

impl std::error::Error for SshHandlerError {}

impl From<russh::Error> for ConnectionError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::Disconnect | russh::Error::SendError => ConnectionError::ConnectionClosed,
            other => ConnectionError::SshError(other.to_string()),
        }
    }
}

impl From<russh_sftp::client::error::Error> for ConnectionError {
    fn from(e: russh_sftp::client::error::Error) -> Self {
        ConnectionError::TransferFailed(format!("SFTP error: {}", e))
    }
}

/// Verifies server keys against `~/.ssh/known_hosts`.
struct ClientHandler {
    host: String,
    port: u16,
    accept_unknown: bool,
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = SshHandlerError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match russh::keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => {
                debug!(host = %self.host, "Host key verified against known_hosts");
                Ok(true)
            }
            Ok(false) if self.accept_unknown => {
                warn!(host = %self.host, "Host not in known_hosts, accepting");
                Ok(true)
            }
            Ok(false) => {
                warn!(host = %self.host, "Host not in known_hosts, rejecting");
                Ok(false)
            }
            Err(e) => {
                warn!(host = %self.host, error = %e, "Host key verification failed");
                Ok(false)
            }
        }
    }
}

/// An authenticated SSH session to one host.
pub struct SshConnection {
    identifier: String,
    handle: Arc<RwLock<Option<Handle<ClientHandler>>>>,
    connected: Arc<AtomicBool>,
}

impl std::fmt::Debug for SshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnection")
            .field("identifier", &self.identifier)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}

impl SshConnection {
    /// Open and authenticate a session.
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        settings: &SshSettings,
    ) -> ConnectionResult<Self> {
        let timeout = settings.connect_timeout;
        debug!(host = %host, port, user = %user, "Connecting via SSH");

        let mut config = russh::client::Config::default();
        config.inactivity_timeout = Some(settings.inactivity_timeout);
        let config = Arc::new(config);

        let addr = format!("{}:{}", host, port);
        let socket = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr))
            .await
            .map_err(|_| ConnectionError::Timeout(timeout.as_secs()))?
            .map_err(|e| {
                ConnectionError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
            })?;
        socket.set_nodelay(true).map_err(|e| {
            ConnectionError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e))
        })?;

        let handler = ClientHandler {
            host: host.to_string(),
            port,
            accept_unknown: settings.accept_unknown_hosts,
        };
        let mut session = russh::client::connect_stream(config, socket, handler)
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(format!("SSH handshake failed: {}", e)))?;

        Self::authenticate(&mut session, user, settings).await?;

        Ok(Self {
            identifier: format!("{}@{}:{}", user, host, port),
            handle: Arc::new(RwLock::new(Some(session))),
            connected: Arc::new(AtomicBool::new(true)),
        })
    }

    async fn authenticate(
        session: &mut Handle<ClientHandler>,
        user: &str,
        settings: &SshSettings,
    ) -> ConnectionResult<()> {
        if settings.use_agent && Self::try_agent_auth(session, user).await.is_ok() {
            debug!("Authenticated using SSH agent");
            return Ok(());
        }

        let mut keys: Vec<PathBuf> = settings.identity_file.iter().cloned().collect();
        keys.extend(default_identity_files());
        for key_path in keys {
            match Self::try_key_auth(session, user, &key_path, settings.passphrase.as_deref()).await
            {
                Ok(()) => {
                    debug!(key = %key_path.display(), "Authenticated using key");
                    return Ok(());
                }
                Err(e) => trace!(key = %key_path.display(), error = %e, "Key rejected"),
            }
        }

        if let Some(password) = &settings.password {
            let accepted = session
                .authenticate_password(user, password)
                .await
                .map_err(|e| {
                    ConnectionError::AuthenticationFailed(format!(
                        "Password authentication failed: {}",
                        e
                    ))
                })?;
            if accepted {
                debug!("Authenticated using password");
                return Ok(());
            }
        }

        Err(ConnectionError::AuthenticationFailed(format!(
            "All authentication methods failed for {}",
            user
        )))
    }

    async fn try_agent_auth(session: &mut Handle<ClientHandler>, user: &str) -> ConnectionResult<()> {
        let mut agent = AgentClient::connect_env().await.map_err(|e| {
            ConnectionError::AuthenticationFailed(format!("Failed to connect to SSH agent: {}", e))
        })?;
        let identities = agent.request_identities().await.map_err(|e| {
            ConnectionError::AuthenticationFailed(format!("Failed to get agent identities: {}", e))
        })?;

        for identity in identities {
            let (returned, result) = session.authenticate_future(user, identity, agent).await;
            agent = returned;
            if let Ok(true) = result {
                return Ok(());
            }
        }

        Err(ConnectionError::AuthenticationFailed(
            "No SSH agent identity was accepted".to_string(),
        ))
    }

    async fn try_key_auth(
        session: &mut Handle<ClientHandler>,
        user: &str,
        key_path: &Path,
        passphrase: Option<&str>,
    ) -> ConnectionResult<()> {
        if !key_path.exists() {
            return Err(ConnectionError::AuthenticationFailed(format!(
                "Key file not found: {}",
                key_path.display()
            )));
        }

        let key_pair = load_secret_key(key_path, passphrase).map_err(|e| {
            ConnectionError::AuthenticationFailed(format!(
                "Failed to load key {}: {}",
                key_path.display(),
                e
            ))
        })?;

        let accepted = session
            .authenticate_publickey(user, Arc::new(key_pair))
            .await
            .map_err(|e| ConnectionError::AuthenticationFailed(e.to_string()))?;

        if accepted {
            Ok(())
        } else {
            Err(ConnectionError::AuthenticationFailed(format!(
                "Key {} rejected",
                key_path.display()
            )))
        }
    }

    fn build_command(command: &str, options: &ExecuteOptions) -> String {
        let mut full = String::new();
        for (key, value) in &options.env {
            full.push_str(&format!("export {}={}; ", key, shell_quote(value)));
        }
        if let Some(cwd) = &options.cwd {
            full.push_str(&format!("cd {} && ", shell_quote(cwd)));
        }
        full.push_str(command);
        full
    }

    async fn open_sftp(&self) -> ConnectionResult<SftpSession> {
        let guard = self.handle.read().await;
        let handle = guard.as_ref().ok_or(ConnectionError::ConnectionClosed)?;

        let channel = handle.channel_open_session().await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            ConnectionError::from(e)
        })?;
        drop(guard);

        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to request SFTP subsystem: {}", e))
        })?;

        SftpSession::new(channel.into_stream()).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to create SFTP session: {}", e))
        })
    }

    async fn create_remote_dirs(sftp: &SftpSession, path: &Path) {
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            if current.as_os_str() == "/" {
                continue;
            }
            // already-existing directories report an error we do not care about
            let _ = sftp.create_dir(current.to_string_lossy().to_string()).await;
        }
    }
}

/// Private keys tried when no identity file is configured.
pub fn default_identity_files() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    ["id_ed25519", "id_ecdsa", "id_rsa"]
        .iter()
        .map(|name| home.join(".ssh").join(name))
        .filter(|p| p.exists())
        .collect()
}

#[async_trait]
impl Connection for SshConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn is_alive(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.handle.read().await.is_some()
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        let full_command = Self::build_command(command, &options);
        trace!(command = %full_command, "Executing remote command");

        let run = async {
            let guard = self.handle.read().await;
            let handle = guard.as_ref().ok_or(ConnectionError::ConnectionClosed)?;
            let mut channel = handle.channel_open_session().await.map_err(|e| {
                self.connected.store(false, Ordering::SeqCst);
                ConnectionError::from(e)
            })?;
            drop(guard);

            channel.exec(true, full_command).await.map_err(|e| {
                ConnectionError::ExecutionFailed(format!("Failed to execute command: {}", e))
            })?;

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut exit_code = None;
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                    ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                    ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                    ChannelMsg::Close => break,
                    _ => {}
                }
            }

            let exit_code = match exit_code {
                Some(code) => code as i32,
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(ConnectionError::ConnectionClosed);
                }
            };
            Ok(CommandResult::from_output(exit_code, stdout, &stderr))
        };

        match options.timeout {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), run)
                .await
                .map_err(|_| ConnectionError::Timeout(secs))?,
            None => run.await,
        }
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let content = tokio::fs::read(local_path).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "Failed to read local file {}: {}",
                local_path.display(),
                e
            ))
        })?;
        self.upload_content(&content, remote_path, options).await
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        debug!(remote = %remote_path.display(), size = content.len(), "Uploading via SFTP");

        let sftp = self.open_sftp().await?;
        if options.create_dirs {
            if let Some(parent) = remote_path.parent() {
                Self::create_remote_dirs(&sftp, parent).await;
            }
        }

        let remote = remote_path.to_string_lossy().to_string();
        let mut file = sftp.create(&remote).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to create remote file {}: {}", remote, e))
        })?;
        file.write_all(content).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to write remote file {}: {}", remote, e))
        })?;
        file.shutdown().await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to close remote file {}: {}", remote, e))
        })?;

        if let Some(mode) = options.mode {
            let attrs = russh_sftp::protocol::FileAttributes {
                permissions: Some(mode),
                ..Default::default()
            };
            sftp.set_metadata(&remote, attrs).await?;
        }
        Ok(())
    }

    async fn download_content(&self, remote_path: &Path) -> ConnectionResult<Vec<u8>> {
        let sftp = self.open_sftp().await?;
        let remote = remote_path.to_string_lossy().to_string();

        let mut file = sftp.open(&remote).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to open remote file {}: {}", remote, e))
        })?;
        let mut content = Vec::new();
        file.read_to_end(&mut content).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to read remote file {}: {}", remote, e))
        })?;
        Ok(content)
    }

    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool> {
        let sftp = self.open_sftp().await?;
        Ok(sftp
            .try_exists(path.to_string_lossy().to_string())
            .await
            .unwrap_or(false))
    }

    async fn close(&self) -> ConnectionResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        let handle = self.handle.write().await.take();
        if let Some(handle) = handle {
            debug!(identifier = %self.identifier, "Closing SSH connection");
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "hades done", "en")
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command_exports_env_and_changes_dir() {
        let options = ExecuteOptions::new()
            .with_cwd("/var/log/hadoop yarn")
            .with_env("HADOOP_USER_NAME", "yarn");
        let cmd = SshConnection::build_command("ls", &options);

        assert_eq!(
            cmd,
            "export HADOOP_USER_NAME=yarn; cd '/var/log/hadoop yarn' && ls"
        );
    }

    #[test]
    fn test_build_command_without_options_is_verbatim() {
        let cmd = SshConnection::build_command("hdfs dfsadmin -report", &ExecuteOptions::new());
        assert_eq!(cmd, "hdfs dfsadmin -report");
    }
}
