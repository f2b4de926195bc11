//! Federated sign-in through a callback-style identity widget.
//!
//! The widget reports its result through a callback some time after
//! `prompt()` returns. `SignInCallback` bridges that into a future: the first
//! delivery settles it, and anything arriving after settlement (including
//! after our timeout fired) is dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch, OnceCell};

use super::jwt;
use crate::error::AuthError;

/// Identity provider UI that signs a user in and calls back with an ID token.
#[async_trait]
pub trait IdentityWidget: Send + Sync {
    /// Fetch whatever the widget needs before it can prompt.
    async fn load(&self) -> Result<(), AuthError>;

    /// Start sign-in. The outcome is reported later through `callback`.
    fn prompt(&self, client_id: &str, callback: SignInCallback) -> Result<(), AuthError>;
}

type Delivery = Result<String, AuthError>;

struct CallbackInner {
    sender: Mutex<Option<oneshot::Sender<Delivery>>>,
    settled: watch::Sender<bool>,
}

/// One-shot handle the widget uses to report the sign-in result.
#[derive(Clone)]
pub struct SignInCallback {
    inner: Arc<CallbackInner>,
}

impl SignInCallback {
    pub fn channel() -> (Self, oneshot::Receiver<Delivery>) {
        let (tx, rx) = oneshot::channel();
        let (settled, _) = watch::channel(false);
        let callback = Self {
            inner: Arc::new(CallbackInner {
                sender: Mutex::new(Some(tx)),
                settled,
            }),
        };
        (callback, rx)
    }

    /// Report the widget result. Returns false if the sign-in already settled.
    pub fn deliver(&self, result: Delivery) -> bool {
        let Some(sender) = self.inner.sender.lock().take() else {
            log::warn!("Ignoring late identity widget callback; sign-in already settled");
            return false;
        };
        self.inner.settled.send_replace(true);
        sender.send(result).is_ok()
    }

    /// Settle without a result so any later delivery is ignored.
    pub fn cancel(&self) {
        if self.inner.sender.lock().take().is_some() {
            self.inner.settled.send_replace(true);
        }
    }

    pub fn is_settled(&self) -> bool {
        *self.inner.settled.borrow()
    }

    /// Resolves once the callback is settled by either side.
    pub async fn settled(&self) {
        let mut rx = self.inner.settled.subscribe();
        let _ = rx.wait_for(|settled| *settled).await;
    }
}

/// Loads a widget at most once, even under concurrent sign-ins.
///
/// A failed load leaves the cell empty so the next sign-in retries it.
pub struct WidgetLoader {
    widget: Arc<dyn IdentityWidget>,
    loaded: OnceCell<()>,
}

impl WidgetLoader {
    pub fn new(widget: Arc<dyn IdentityWidget>) -> Self {
        Self {
            widget,
            loaded: OnceCell::new(),
        }
    }

    pub async fn ensure_loaded(&self) -> Result<(), AuthError> {
        self.loaded
            .get_or_try_init(|| async { self.widget.load().await })
            .await
            .map(|_| ())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }

    pub fn widget(&self) -> &Arc<dyn IdentityWidget> {
        &self.widget
    }
}

/// Identity returned by a successful federated sign-in.
#[derive(Debug, Clone, PartialEq)]
pub struct FederatedCredential {
    pub credential: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

pub struct FederatedSignIn {
    loader: WidgetLoader,
    client_id: String,
    timeout: Duration,
}

impl FederatedSignIn {
    pub fn new(widget: Arc<dyn IdentityWidget>, client_id: &str, timeout: Duration) -> Self {
        Self {
            loader: WidgetLoader::new(widget),
            client_id: client_id.to_string(),
            timeout,
        }
    }

    pub fn loader(&self) -> &WidgetLoader {
        &self.loader
    }

    /// Run one sign-in attempt bounded by the configured timeout.
    ///
    /// The error is the reason the caller should fall back.
    pub async fn attempt(&self) -> Result<FederatedCredential, AuthError> {
        let (callback, rx) = SignInCallback::channel();

        let flow = async {
            self.loader.ensure_loaded().await?;
            self.loader
                .widget()
                .prompt(&self.client_id, callback.clone())?;
            rx.await.unwrap_or(Err(AuthError::FlowCancelled))
        };

        let credential = match tokio::time::timeout(self.timeout, flow).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Timeout(self.timeout)),
        };
        // Whatever happened, nothing after this point may settle the attempt.
        callback.cancel();

        let credential = credential?;
        let claims = jwt::decode_claims(&credential)?;
        Ok(FederatedCredential {
            credential,
            email: claims.email.filter(|e| !e.trim().is_empty()),
            name: claims.name,
        })
    }
}
