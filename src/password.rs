//! Passwords and asynchronous password providers.
//!
//! A backend that hits an encrypted archive pauses the running job and asks
//! the job's [`PasswordProvider`] for a password. Providers answer
//! asynchronously, so a UI can prompt the user without blocking the runtime.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use archivist::password::{InteractivePasswordProvider, StaticPassword};
//!
//! # async fn run() {
//! // Fixed password
//! let provider = Arc::new(StaticPassword::new("secret"));
//!
//! // Prompt-driven: the UI side receives requests and answers them
//! let (mut requests, provider) = InteractivePasswordProvider::new();
//! tokio::spawn(async move {
//!     while let Some(request) = requests.recv().await {
//!         let answer = if request.query().incorrect_try_again { None } else { Some("secret".into()) };
//!         request.respond(answer);
//!     }
//! });
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};
use zeroize::Zeroizing;

/// A password, zeroed from memory when dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct Password {
    inner: Zeroizing<String>,
}

impl Password {
    /// Creates a password.
    pub fn new<S: Into<String>>(password: S) -> Self {
        Self {
            inner: Zeroizing::new(password.into()),
        }
    }

    /// Returns the password text.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Returns `true` if the password is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Password")
            .field("inner", &"[REDACTED]")
            .finish()
    }
}

impl From<&str> for Password {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Password {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// What a backend asks for when it needs a password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordQuery {
    /// The archive being processed.
    pub archive: PathBuf,
    /// Set when a previous answer was rejected.
    pub incorrect_try_again: bool,
}

impl PasswordQuery {
    /// Creates a query for `archive`.
    pub fn new(archive: impl AsRef<Path>, incorrect_try_again: bool) -> Self {
        Self {
            archive: archive.as_ref().to_path_buf(),
            incorrect_try_again,
        }
    }
}

/// A source of passwords for encrypted archives.
///
/// Returning `None` means the user declined; the job then fails with
/// [`Error::PasswordRequired`](crate::Error::PasswordRequired) or
/// [`Error::WrongPassword`](crate::Error::WrongPassword).
pub trait PasswordProvider: Send + Sync {
    /// Asks for a password.
    fn get_password<'a>(
        &'a self,
        query: &'a PasswordQuery,
    ) -> Pin<Box<dyn Future<Output = Option<Password>> + Send + 'a>>;
}

/// A provider that always answers with the same password.
///
/// It gives up once its password has been rejected, so a wrong password does
/// not loop forever.
#[derive(Debug, Clone)]
pub struct StaticPassword {
    password: Option<Password>,
}

impl StaticPassword {
    /// Creates a provider with the given password.
    pub fn new(password: impl Into<Password>) -> Self {
        Self {
            password: Some(password.into()),
        }
    }

    /// Creates a provider that never supplies a password.
    pub fn none() -> Self {
        Self { password: None }
    }
}

impl PasswordProvider for StaticPassword {
    fn get_password<'a>(
        &'a self,
        query: &'a PasswordQuery,
    ) -> Pin<Box<dyn Future<Output = Option<Password>> + Send + 'a>> {
        let password = if query.incorrect_try_again {
            None
        } else {
            self.password.clone()
        };
        Box::pin(async move { password })
    }
}

/// One pending question from a running job.
pub struct PasswordRequest {
    query: PasswordQuery,
    responder: oneshot::Sender<Option<Password>>,
}

impl PasswordRequest {
    /// Returns what is being asked.
    pub fn query(&self) -> &PasswordQuery {
        &self.query
    }

    /// Answers the request. `None` cancels.
    pub fn respond(self, password: Option<Password>) {
        // The job may have been killed meanwhile.
        let _ = self.responder.send(password);
    }
}

impl fmt::Debug for PasswordRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordRequest")
            .field("query", &self.query)
            .finish()
    }
}

/// A provider that forwards every query to the UI over a channel.
///
/// The job stays suspended until the request is answered or dropped; a
/// dropped request counts as a cancel.
pub struct InteractivePasswordProvider {
    sender: mpsc::UnboundedSender<PasswordRequest>,
}

impl InteractivePasswordProvider {
    /// Creates a provider and the receiving end for the UI.
    pub fn new() -> (mpsc::UnboundedReceiver<PasswordRequest>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (receiver, Self { sender })
    }
}

impl PasswordProvider for InteractivePasswordProvider {
    fn get_password<'a>(
        &'a self,
        query: &'a PasswordQuery,
    ) -> Pin<Box<dyn Future<Output = Option<Password>> + Send + 'a>> {
        Box::pin(async move {
            let (responder, answer) = oneshot::channel();
            let request = PasswordRequest {
                query: query.clone(),
                responder,
            };
            if self.sender.send(request).is_err() {
                return None;
            }
            answer.await.ok().flatten()
        })
    }
}

impl fmt::Debug for InteractivePasswordProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractivePasswordProvider").finish()
    }
}

/// A provider backed by a closure.
pub struct CallbackPasswordProvider<F>
where
    F: Fn(&PasswordQuery) -> Option<Password> + Send + Sync,
{
    callback: F,
}

impl<F> CallbackPasswordProvider<F>
where
    F: Fn(&PasswordQuery) -> Option<Password> + Send + Sync,
{
    /// Creates a provider that calls `callback` for every query.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> PasswordProvider for CallbackPasswordProvider<F>
where
    F: Fn(&PasswordQuery) -> Option<Password> + Send + Sync,
{
    fn get_password<'a>(
        &'a self,
        query: &'a PasswordQuery,
    ) -> Pin<Box<dyn Future<Output = Option<Password>> + Send + 'a>> {
        let password = (self.callback)(query);
        Box::pin(async move { password })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_password() {
        let pw = Password::new("hunter2");
        let debug = format!("{pw:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
    }

    #[tokio::test]
    async fn test_static_password_gives_up_after_rejection() {
        let provider = StaticPassword::new("1234");
        let first = provider
            .get_password(&PasswordQuery::new("a.rar", false))
            .await;
        assert_eq!(first.unwrap().as_str(), "1234");
        let retry = provider
            .get_password(&PasswordQuery::new("a.rar", true))
            .await;
        assert!(retry.is_none());
        assert!(
            StaticPassword::none()
                .get_password(&PasswordQuery::new("a.rar", false))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_interactive_provider_round_trip() {
        let (mut requests, provider) = InteractivePasswordProvider::new();
        tokio::spawn(async move {
            let request = requests.recv().await.unwrap();
            assert_eq!(request.query().archive, PathBuf::from("x.7z"));
            request.respond(Some("from-ui".into()));
        });
        let answer = provider
            .get_password(&PasswordQuery::new("x.7z", false))
            .await;
        assert_eq!(answer.unwrap().as_str(), "from-ui");
    }

    #[tokio::test]
    async fn test_interactive_provider_dropped_request_cancels() {
        let (mut requests, provider) = InteractivePasswordProvider::new();
        tokio::spawn(async move {
            let request = requests.recv().await.unwrap();
            drop(request);
        });
        let answer = provider
            .get_password(&PasswordQuery::new("x.7z", false))
            .await;
        assert!(answer.is_none());
    }

    #[tokio::test]
    async fn test_callback_provider() {
        let provider = CallbackPasswordProvider::new(|q: &PasswordQuery| {
            (!q.incorrect_try_again).then(|| Password::new("cb"))
        });
        let answer = provider
            .get_password(&PasswordQuery::new("a.zip", false))
            .await;
        assert_eq!(answer.unwrap().as_str(), "cb");
    }
}
