//! Typed boundary to the service that verifies a confirmed capture.
//!
//! The session itself only knows [`SessionObserver`]. [`VerifierObserver`] bridges
//! a [`Verifier`] into that contract and keeps the outcome on a watch channel.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use super::errors::SubmissionError;
use super::session::{CaptureResult, SessionObserver};

/// Credential issued for a verified face. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccessToken(<{} chars>)", self.0.len())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerificationError {
    #[error("Verification rejected: {0}")]
    Rejected(String),
    #[error("Verification service unavailable: {0}")]
    Unavailable(String),
}

/// Login or registration backend that checks a JPEG of the user's face.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, image: &[u8]) -> Result<AccessToken, VerificationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerificationStatus {
    Pending,
    Verified {
        token: AccessToken,
        verification_id: String,
    },
    Failed(String),
    Cancelled,
}

/// Adapts a [`Verifier`] to the session observer contract.
pub struct VerifierObserver<V> {
    verifier: V,
    status_tx: watch::Sender<VerificationStatus>,
}

impl<V: Verifier> VerifierObserver<V> {
    pub fn new(verifier: V) -> (Self, watch::Receiver<VerificationStatus>) {
        let (status_tx, status_rx) = watch::channel(VerificationStatus::Pending);
        (
            Self {
                verifier,
                status_tx,
            },
            status_rx,
        )
    }

    pub fn status(&self) -> VerificationStatus {
        self.status_tx.borrow().clone()
    }
}

#[async_trait]
impl<V: Verifier> SessionObserver for VerifierObserver<V> {
    async fn on_capture(&self, result: CaptureResult) -> Result<(), SubmissionError> {
        match self.verifier.verify(&result.image).await {
            Ok(token) => {
                tracing::info!(target: "camera", "[VERIFY] Capture {} verified", result.verification_id);
                self.status_tx.send_replace(VerificationStatus::Verified {
                    token,
                    verification_id: result.verification_id,
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(target: "camera", "[VERIFY] Capture {} not verified: {}", result.verification_id, e);
                self.status_tx
                    .send_replace(VerificationStatus::Failed(e.to_string()));
                Err(SubmissionError::new(e.to_string()))
            }
        }
    }

    fn on_error(&self, message: &str) {
        self.status_tx
            .send_replace(VerificationStatus::Failed(message.to_string()));
    }

    fn on_cancel(&self) {
        self.status_tx.send_replace(VerificationStatus::Cancelled);
    }
}
