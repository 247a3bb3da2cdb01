//! Clinic search controller.
//!
//! Typing schedules a search once the query has been quiet for the debounce delay;
//! `search_now` skips the wait. Every dispatched request takes the next sequence
//! number and only the response carrying the latest number is applied, so a slow
//! answer to an older query never replaces a newer one.

use crate::api::PortalApi;
use crate::debounce::Debouncer;
use crate::models::{ClinicQuery, ClinicResult};
use crate::scope::ViewScope;
use crate::PortalError;
use medst_types::NonEmptyText;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct SearchState {
    query: String,
    location: Option<NonEmptyText>,
    results: Vec<ClinicResult>,
    error: Option<String>,
}

struct SearchInner<A> {
    api: Arc<A>,
    state: Mutex<SearchState>,
    issued: AtomicU64,
    scope: ViewScope,
}

impl<A: PortalApi> SearchInner<A> {
    fn lock(&self) -> MutexGuard<'_, SearchState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Makes every response still in flight stale.
    fn invalidate(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn run_search(&self, query: String) {
        let Ok(name) = NonEmptyText::new(&query) else {
            return;
        };
        let location = self.lock().location.clone();
        let seq = self.invalidate();

        tracing::debug!("clinic search #{} for {:?}", seq, name.as_str());
        let query = ClinicQuery { name, location };
        let outcome = self.scope.run(self.api.search_clinics(&query)).await;

        if self.issued.load(Ordering::SeqCst) != seq {
            tracing::warn!(
                "dropping stale clinic search #{} for {:?}",
                seq,
                query.name.as_str()
            );
            return;
        }

        let mut state = self.lock();
        match outcome {
            Ok(response) => {
                tracing::debug!("clinic search #{} returned {} results", seq, response.results.len());
                state.results = response.results;
                state.error = None;
            }
            Err(PortalError::Cancelled) => {}
            Err(e) => {
                tracing::warn!("clinic search #{} failed: {}", seq, e);
                state.error = Some(e.user_message());
            }
        }
    }
}

pub struct ClinicSearchController<A> {
    inner: Arc<SearchInner<A>>,
    debouncer: Debouncer<String>,
}

impl<A: PortalApi + 'static> ClinicSearchController<A> {
    pub fn new(api: Arc<A>, debounce: Duration) -> Self {
        let inner = Arc::new(SearchInner {
            api,
            state: Mutex::new(SearchState::default()),
            issued: AtomicU64::new(0),
            scope: ViewScope::new(),
        });

        let fire = Arc::clone(&inner);
        let debouncer = Debouncer::new(debounce, move |query: String| {
            let inner = Arc::clone(&fire);
            async move { inner.run_search(query).await }
        });

        Self { inner, debouncer }
    }

    /// Records a change of the query text.
    ///
    /// A non-empty query schedules a search after the debounce delay. An empty one
    /// clears the results straight away and ignores anything still in flight.
    ///
    /// Must be called from within a tokio runtime.
    pub fn set_query(&self, query: &str) {
        let trimmed = query.trim();
        self.inner.lock().query = trimmed.to_owned();

        if trimmed.is_empty() {
            self.clear();
            return;
        }
        self.debouncer.schedule(trimmed.to_owned());
    }

    /// Sets the optional location filter. Does not trigger a search by itself.
    pub fn set_location(&self, location: &str) {
        self.inner.lock().location = NonEmptyText::new(location).ok();
    }

    /// Searches for the current query right away, dropping any pending debounced
    /// search.
    pub async fn search_now(&self) {
        self.debouncer.cancel_pending();
        let query = self.inner.lock().query.clone();
        if query.is_empty() {
            self.clear();
            return;
        }
        self.inner.run_search(query).await;
    }

    fn clear(&self) {
        self.debouncer.cancel_pending();
        self.inner.invalidate();
        let mut state = self.inner.lock();
        state.results.clear();
        state.error = None;
    }
}

impl<A> ClinicSearchController<A> {
    pub fn query(&self) -> String {
        self.state().query.clone()
    }

    pub fn location(&self) -> Option<String> {
        self.state().location.as_ref().map(|l| l.to_string())
    }

    pub fn results(&self) -> Vec<ClinicResult> {
        self.state().results.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    /// Returns the result at `index` in the current list, for opening the request
    /// dialog.
    pub fn select(&self, index: usize) -> Option<ClinicResult> {
        self.state().results.get(index).cloned()
    }

    pub fn is_pending(&self) -> bool {
        self.debouncer.has_pending()
    }

    /// Drops the pending search and aborts any request in flight.
    pub fn teardown(&self) {
        self.debouncer.cancel_pending();
        self.inner.scope.close();
    }

    fn state(&self) -> MutexGuard<'_, SearchState> {
        self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl<A> Drop for ClinicSearchController<A> {
    fn drop(&mut self) {
        self.inner.scope.close();
    }
}
