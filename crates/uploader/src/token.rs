//! Token acquisition with optional sharing across tasks.
//!
//! [`TokenProvider`] wraps the user's [`TokenSource`]. With sharing on, one
//! token is fetched lazily and reused until it is invalidated, and concurrent
//! callers wait on the same in-flight fetch instead of starting their own.
//! With sharing off, every `acquire` is an independent fetch.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use crate::error::TokenError;

/// Opaque credential attached to chunk requests.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(Arc<str>);

impl Token {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// Future returned by [`TokenSource::fetch`].
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<Token, TokenError>> + Send + 'a>>;

/// Where tokens come from.
///
/// Implemented by the application; keeps credential acquisition decoupled
/// from the transport and easy to mock.
pub trait TokenSource: Send + Sync {
    fn fetch(&self) -> TokenFuture<'_>;
}

/// [`TokenSource`] backed by an async closure.
pub struct FnTokenSource<F>(F);

impl<F, Fut> TokenSource for FnTokenSource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Token, TokenError>> + Send + 'static,
{
    fn fetch(&self) -> TokenFuture<'_> {
        Box::pin((self.0)())
    }
}

/// Wraps an async closure as a token source.
pub fn token_fn<F, Fut>(f: F) -> FnTokenSource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Token, TokenError>> + Send + 'static,
{
    FnTokenSource(f)
}

/// Wraps a synchronous closure as a token source.
pub fn sync_token_fn<F>(
    f: F,
) -> FnTokenSource<impl Fn() -> std::future::Ready<Result<Token, TokenError>> + Send + Sync>
where
    F: Fn() -> Result<Token, TokenError> + Send + Sync,
{
    FnTokenSource(move || std::future::ready(f()))
}

/// A fixed token, never refreshed.
pub struct StaticToken(pub Token);

impl TokenSource for StaticToken {
    fn fetch(&self) -> TokenFuture<'_> {
        let token = self.0.clone();
        Box::pin(async move { Ok(token) })
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Token, TokenError>>>;

enum Slot {
    Empty,
    Ready(Token),
    Fetching { generation: u64, fetch: SharedFetch },
}

/// A single-flight token slot.
///
/// The lock is only held to inspect or swap the slot, never across a fetch,
/// so invalidation never waits on an in-flight fetch.
struct TokenSlot {
    inner: Mutex<SlotState>,
}

struct SlotState {
    slot: Slot,
    generation: u64,
}

impl TokenSlot {
    fn new() -> Self {
        Self {
            inner: Mutex::new(SlotState {
                slot: Slot::Empty,
                generation: 0,
            }),
        }
    }

    /// Returns the cached token, joins the in-flight fetch, or starts one
    /// with `start`. A failed fetch leaves the slot empty.
    async fn get_or_fetch(
        &self,
        start: impl FnOnce() -> BoxFuture<'static, Result<Token, TokenError>>,
    ) -> Result<Token, TokenError> {
        let (generation, fetch) = {
            let mut guard = self.inner.lock().unwrap();
            let state = &mut *guard;
            match &state.slot {
                Slot::Ready(token) => return Ok(token.clone()),
                Slot::Fetching { generation, fetch } => (*generation, fetch.clone()),
                Slot::Empty => {
                    state.generation += 1;
                    let generation = state.generation;
                    let fetch = start().shared();
                    state.slot = Slot::Fetching {
                        generation,
                        fetch: fetch.clone(),
                    };
                    (generation, fetch)
                }
            }
        };

        let result = fetch.await;

        let mut guard = self.inner.lock().unwrap();
        let state = &mut *guard;
        if let Slot::Fetching { generation: g, .. } = &state.slot
            && *g == generation
        {
            state.slot = match &result {
                Ok(token) => Slot::Ready(token.clone()),
                Err(_) => Slot::Empty,
            };
        }
        result
    }

    /// Empties the slot if it still holds `token`.
    fn invalidate(&self, token: &Token) -> bool {
        let mut state = self.inner.lock().unwrap();
        if matches!(&state.slot, Slot::Ready(cached) if cached == token) {
            state.slot = Slot::Empty;
            return true;
        }
        false
    }
}

/// Owns token lifetime and the sharing policy.
pub struct TokenProvider {
    source: Arc<dyn TokenSource>,
    share: bool,
    slot: TokenSlot,
    fetches: AtomicU64,
}

impl TokenProvider {
    pub fn new(source: Arc<dyn TokenSource>, share: bool) -> Self {
        Self {
            source,
            share,
            slot: TokenSlot::new(),
            fetches: AtomicU64::new(0),
        }
    }

    /// Number of times the underlying source has been invoked.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Returns a token, fetching one if needed.
    ///
    /// Failures are not retried here and are not cached: the next call after
    /// a failed fetch starts a new one.
    pub async fn acquire(&self) -> Result<Token, TokenError> {
        if !self.share {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            return self.source.fetch().await;
        }

        self.slot
            .get_or_fetch(|| {
                let source = Arc::clone(&self.source);
                let fetch = self.fetches.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(fetch, "fetching shared token");
                async move { source.fetch().await }.boxed()
            })
            .await
    }

    /// Drops the cached token if it is still `token`.
    ///
    /// A token that has already been replaced by a newer fetch is left alone,
    /// so a late authorization failure cannot evict a fresh credential.
    pub fn invalidate(&self, token: &Token) {
        if self.share && self.slot.invalidate(token) {
            debug!("invalidating shared token");
        }
    }
}

/// The token a single task is currently using.
///
/// Chunks of one task share it and join a single re-acquisition after an
/// authorization failure.
pub(crate) struct TaskToken {
    provider: Option<Arc<TokenProvider>>,
    slot: TokenSlot,
}

impl TaskToken {
    pub(crate) fn new(provider: Option<Arc<TokenProvider>>) -> Self {
        Self {
            provider,
            slot: TokenSlot::new(),
        }
    }

    /// Returns the task's token, acquiring one if it has none.
    ///
    /// `Ok(None)` means no token source is configured.
    pub(crate) async fn get(&self) -> Result<Option<Token>, TokenError> {
        let Some(provider) = &self.provider else {
            return Ok(None);
        };
        let token = self
            .slot
            .get_or_fetch(|| {
                let provider = Arc::clone(provider);
                async move { provider.acquire().await }.boxed()
            })
            .await?;
        Ok(Some(token))
    }

    /// Forgets `token` here and in the provider.
    pub(crate) fn invalidate(&self, token: &Token) {
        let Some(provider) = &self.provider else {
            return;
        };
        self.slot.invalidate(token);
        provider.invalidate(token);
    }
}
