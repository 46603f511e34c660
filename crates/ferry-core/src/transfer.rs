//! Transfer handle: configuration, status, cancellation and the two entry
//! points.

use crate::cancel::CancelToken;
use crate::config::ClientConfig;
use crate::connector::{Connector, RelayConnector, WsConnector};
use crate::error::{Error, Result};
use crate::session::{self, Context};
use crate::status::{Phase, Status};
use ferry_crypto::codephrase;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What the receiver is asked to accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    /// Name the file will be saved under
    pub file_name: String,
    /// Size in bytes
    pub size: u64,
    /// Where it will be written
    pub destination: PathBuf,
    /// A file already exists at the destination
    pub exists: bool,
    /// A matching progress sidecar was found
    pub resuming: bool,
    /// Bytes already on disk from an earlier attempt
    pub already_have: u64,
}

/// Receiver's decision on an [`Offer`].
pub type AcceptFn = Arc<dyn Fn(&Offer) -> bool + Send + Sync>;

/// Outcome of a finished transfer
#[derive(Debug, Clone)]
pub struct TransferSummary {
    /// Name the file travelled under
    pub file_name: String,
    /// Source path (sender) or destination path (receiver)
    pub path: PathBuf,
    /// File size
    pub size: u64,
    /// Bytes moved over the lanes
    pub transferred: u64,
    /// Bytes the receiver already had
    pub skipped: u64,
    /// Data lanes used
    pub lanes: u32,
    /// Bytes per block
    pub block_size: u32,
    /// Duration of the bulk phase and verification
    pub elapsed: Duration,
    /// Peer address as the relay saw it
    pub peer_ip: Option<String>,
}

/// One transfer, either direction.
///
/// ```no_run
/// # async fn demo() -> ferry_core::Result<()> {
/// use ferry_core::{ClientConfig, Transfer};
///
/// let transfer = Transfer::new(ClientConfig::default());
/// let status = transfer.status();
/// let summary = transfer.send("report.pdf", "1234-alpha-bravo-charlie").await?;
/// println!("{} bytes, {}", summary.size, status.message());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Transfer {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    status: Status,
    cancel: CancelToken,
    accept: AcceptFn,
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("config", &self.config)
            .field("phase", &self.status.phase())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Transfer {
    /// Transfer through the relay named in `config`, or its WebSocket
    /// broker when `broker_url` is set, accepting every offer.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let connector: Arc<dyn Connector> = match &config.broker_url {
            Some(url) => Arc::new(WsConnector::new(url, config.timeouts.rendezvous)),
            None => Arc::new(RelayConnector::new(&config)),
        };
        Self {
            config,
            connector,
            status: Status::new(),
            cancel: CancelToken::new(),
            accept: Arc::new(|_: &Offer| true),
        }
    }

    /// Reach the peer some other way.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Decide on incoming offers.
    #[must_use]
    pub fn with_accept(mut self, accept: impl Fn(&Offer) -> bool + Send + Sync + 'static) -> Self {
        self.accept = Arc::new(accept);
        self
    }

    /// Share a cancel token, e.g. one wired to Ctrl-C.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Status handle for progress display.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status.clone()
    }

    /// Token that aborts the transfer when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send the file at `path` to whoever joins with `codephrase`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a bad configuration or codephrase, and
    /// otherwise whatever ended the transfer.
    pub async fn send(&self, path: impl AsRef<Path>, codephrase: &str) -> Result<TransferSummary> {
        let ctx = self.prepare(codephrase)?;
        let result = session::sender::send(&ctx, path.as_ref(), codephrase).await;
        self.settle(result)
    }

    /// Receive the file offered under `codephrase` into the configured
    /// output directory.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a bad configuration or codephrase, and
    /// otherwise whatever ended the transfer.
    pub async fn receive(&self, codephrase: &str) -> Result<TransferSummary> {
        let ctx = self.prepare(codephrase)?;
        let result = session::receiver::receive(&ctx, codephrase, &self.accept).await;
        self.settle(result)
    }

    fn prepare(&self, phrase: &str) -> Result<Context> {
        self.config.validate()?;
        codephrase::validate(phrase).map_err(|e| Error::Config(e.to_string()))?;
        Ok(Context {
            config: self.config.clone(),
            connector: Arc::clone(&self.connector),
            status: self.status.clone(),
            cancel: self.cancel.clone(),
        })
    }

    fn settle(&self, result: Result<TransferSummary>) -> Result<TransferSummary> {
        if let Err(e) = &result {
            if !self.status.phase().is_terminal() {
                self.status.set(Phase::Aborted, e.to_string());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_short_codephrase_rejected() {
        let transfer = Transfer::new(ClientConfig::default());
        let err = transfer.receive("abc").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(transfer.status().phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_bad_config_rejected() {
        let transfer = Transfer::new(ClientConfig {
            lanes: 0,
            ..ClientConfig::default()
        });
        assert!(matches!(
            transfer.send("whatever", "aaaa1111").await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_source_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let transfer = Transfer::new(ClientConfig::default());
        let err = transfer
            .send(dir.path().join("nope"), "aaaa1111")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Files(_)));
        assert_eq!(transfer.status().phase(), Phase::Aborted);
    }

    #[test]
    fn test_accept_callback_is_used() {
        let transfer = Transfer::new(ClientConfig::default()).with_accept(|offer| offer.size < 10);
        let offer = Offer {
            file_name: "a".into(),
            size: 20,
            destination: PathBuf::from("a"),
            exists: false,
            resuming: false,
            already_have: 0,
        };
        assert!(!(transfer.accept)(&offer));
    }
}
