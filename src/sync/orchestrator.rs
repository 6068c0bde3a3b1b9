//! Decides, per parent, whether to serve cache, revalidate in the background
//! or block on the network, and folds fetch results back into both tiers.
//!
//! The orchestrator is not internally synchronized. It lives on the control
//! task: fetches run as spawned tasks and report back as [`SyncEvent`]s that
//! the owner feeds into [`SyncOrchestrator::handle_event`].

use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::diff::slice_changed;
use super::event::{LoadKind, SyncEvent, ViewUpdate};
use super::filter;
use crate::cache::{CacheSource, Freshness, Lookup, MemoryCache};
use crate::catalog::{
  BatchReport, CatalogClient, CatalogRecord, FetchOutcome, PageRequest, Transport,
};

/// Paging knobs for issued fetches.
#[derive(Debug, Clone)]
pub struct SyncOptions {
  pub page_size: u64,
  pub fields: Vec<String>,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      page_size: 100,
      fields: vec!["ChildCount".to_string()],
    }
  }
}

/// Per-parent load state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPhase {
  #[default]
  Idle,
  ServingCache,
  Fetching,
  Merged,
  Failed,
}

/// What a load call did before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStart {
  /// Fresh cache served, nothing fetched
  ServedFresh,
  /// Cache served, background revalidation started
  ServedStale,
  /// Blocking fetch started
  Fetching,
  /// A fetch for this parent is already in flight
  Dropped,
  /// Every item is already loaded
  Complete,
}

#[derive(Debug, Default)]
struct ParentState {
  phase: LoadPhase,
  busy: bool,
  generation: u64,
}

/// Sync policy layer over [`MemoryCache`] and [`CatalogClient`].
pub struct SyncOrchestrator<T: Transport> {
  client: CatalogClient<T>,
  cache: MemoryCache,
  options: SyncOptions,
  parents: HashMap<String, ParentState>,
  /// Parent the view is currently showing
  target: Option<String>,
  event_tx: mpsc::UnboundedSender<SyncEvent>,
  view_tx: mpsc::UnboundedSender<ViewUpdate>,
}

impl<T: Transport> SyncOrchestrator<T> {
  /// Create an orchestrator and the receiver its fetch completions arrive on.
  pub fn new(
    client: CatalogClient<T>,
    cache: MemoryCache,
    options: SyncOptions,
    view_tx: mpsc::UnboundedSender<ViewUpdate>,
  ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let orchestrator = Self {
      client,
      cache,
      options,
      parents: HashMap::new(),
      target: None,
      event_tx,
      view_tx,
    };
    (orchestrator, event_rx)
  }

  /// Load the first page of `parent_id` and make it the view target.
  pub fn load(&mut self, parent_id: &str) -> LoadStart {
    self.target = Some(parent_id.to_string());
    let busy = self.state(parent_id).busy;

    let servable = match self.cache.lookup(parent_id) {
      Lookup::Hit {
        freshness: Freshness::Fresh,
        ..
      } => Some(Freshness::Fresh),
      Lookup::Hit {
        freshness: Freshness::Stale,
        ..
      } => Some(Freshness::Stale),
      // Past the stale ttl the listing counts as absent
      Lookup::Hit {
        freshness: Freshness::Expired,
        ..
      } => {
        debug!(parent_id, "Cache expired, treating as absent");
        None
      }
      Lookup::Miss => None,
    };

    match servable {
      Some(freshness) => {
        let source = match freshness {
          Freshness::Fresh => CacheSource::CacheFresh,
          _ => CacheSource::CacheStale,
        };
        self.notify_replaced(parent_id, source);

        if busy {
          debug!(parent_id, "Fetch already in flight; serving cache only");
          return LoadStart::Dropped;
        }
        if freshness == Freshness::Fresh {
          self.state(parent_id).phase = LoadPhase::ServingCache;
          return LoadStart::ServedFresh;
        }
        debug!(parent_id, "Serving stale cache, revalidating");
        self.spawn_fetch(parent_id, LoadKind::Refresh, 0, true);
        LoadStart::ServedStale
      }
      None => {
        if busy {
          return LoadStart::Dropped;
        }
        self.notify_loading(parent_id, true);
        self.spawn_fetch(parent_id, LoadKind::Initial, 0, false);
        LoadStart::Fetching
      }
    }
  }

  /// Fetch the page after the items already held for `parent_id`.
  ///
  /// A second call while any fetch for the parent is in flight is dropped.
  pub fn load_more(&mut self, parent_id: &str) -> LoadStart {
    if self.state(parent_id).busy {
      debug!(parent_id, "Load-more dropped: fetch already in flight");
      return LoadStart::Dropped;
    }

    let Some(entry) = self.cache.get(parent_id) else {
      debug!(parent_id, "Load-more dropped: nothing loaded yet");
      return LoadStart::Dropped;
    };
    let loaded = entry.items.len() as u64;
    if loaded >= entry.total_count {
      return LoadStart::Complete;
    }

    self.notify_loading(parent_id, true);
    self.spawn_fetch(parent_id, LoadKind::More, loaded, false);
    LoadStart::Fetching
  }

  fn spawn_fetch(&mut self, parent_id: &str, kind: LoadKind, start_position: u64, validate: bool) {
    let state = self.state(parent_id);
    state.busy = true;
    state.phase = LoadPhase::Fetching;
    let generation = state.generation;

    let request = PageRequest::new(parent_id, start_position, self.options.page_size)
      .with_fields(self.options.fields.clone())
      .with_cache_validation(validate);
    let client = self.client.clone();
    let tx = self.event_tx.clone();

    tokio::spawn(async move {
      let result = client.fetch_page(&request).await;
      let _ = tx.send(SyncEvent {
        parent_id: request.parent_id,
        kind,
        generation,
        start_position,
        result,
      });
    });
  }

  /// Fold a fetch completion into the caches and notify the view.
  pub fn handle_event(&mut self, event: SyncEvent) {
    let SyncEvent {
      parent_id,
      kind,
      generation,
      start_position,
      result,
    } = event;

    let state = self.state(&parent_id);
    if generation != state.generation {
      debug!(parent_id = %parent_id, ?kind, "Discarding response from before invalidation");
      return;
    }
    state.busy = false;
    let is_target = self.target.as_deref() == Some(parent_id.as_str());
    let blocking = kind != LoadKind::Refresh;

    if blocking && is_target {
      self.notify_loading(&parent_id, false);
    }

    let outcome = match result {
      Ok(outcome) => outcome,
      Err(error) => {
        self.state(&parent_id).phase = LoadPhase::Failed;
        if blocking && is_target {
          self.emit(ViewUpdate::LoadError {
            parent_id: parent_id.clone(),
            error,
          });
        } else {
          warn!(parent_id = %parent_id, ?kind, error = %error, "Load failed; keeping cached data");
        }
        return;
      }
    };

    match (kind, outcome) {
      (_, FetchOutcome::NotModified) => {
        self.cache.touch(&parent_id);
        if kind == LoadKind::Initial && is_target {
          self.notify_replaced(&parent_id, CacheSource::CacheFresh);
        }
      }
      (LoadKind::Initial, FetchOutcome::Fresh(page)) => {
        self.cache.replace(&parent_id, page.items, page.total_count);
        if is_target {
          self.notify_replaced(&parent_id, CacheSource::Network);
        }
      }
      (LoadKind::Refresh, FetchOutcome::Fresh(page)) => {
        let changed = match self.cache.get(&parent_id) {
          Some(cached) => slice_changed(cached, &page),
          None => true,
        };
        if changed {
          info!(parent_id = %parent_id, "Background refresh found changes");
          self.cache.reconcile(&parent_id, page.items, page.total_count);
          if is_target {
            self.notify_replaced(&parent_id, CacheSource::Network);
          }
        } else {
          debug!(parent_id = %parent_id, "Background refresh unchanged");
          self.cache.touch(&parent_id);
        }
      }
      (LoadKind::More, FetchOutcome::Fresh(page)) => {
        let Some(cached) = self.cache.get(&parent_id) else {
          warn!(parent_id = %parent_id, "Discarding page for a parent no longer cached");
          return;
        };
        if cached.items.len() as u64 != start_position {
          warn!(
            parent_id = %parent_id,
            expected = start_position,
            actual = cached.items.len(),
            "Discarding page that no longer lines up"
          );
          return;
        }
        let previous_total = cached.total_count;
        let appended = self.cache.append(&parent_id, page.items, page.total_count);
        let appended = filter::visible(&appended);
        if is_target {
          self.emit(ViewUpdate::ItemsAppended {
            parent_id: parent_id.clone(),
            items: appended,
            total_count: page.total_count,
          });
          if previous_total != page.total_count {
            self.emit(ViewUpdate::TotalCountChanged {
              parent_id: parent_id.clone(),
              total_count: page.total_count,
            });
          }
        }
      }
    }
    self.state(&parent_id).phase = LoadPhase::Merged;
  }

  /// Forget everything cached for `parent_id`.
  ///
  /// Responses to fetches issued before this call are discarded.
  pub fn invalidate(&mut self, parent_id: &str) {
    self.cache.invalidate(parent_id);
    let state = self.state(parent_id);
    state.generation += 1;
    state.busy = false;
    state.phase = LoadPhase::Idle;
    info!(parent_id, "Invalidated cached listing");
  }

  /// Drop both cache tiers and every stored validator.
  pub fn reset(&mut self) {
    self.cache.clear();
    self.client.validators().clear();
    for state in self.parents.values_mut() {
      state.generation += 1;
      state.busy = false;
      state.phase = LoadPhase::Idle;
    }
    info!("Reset all cached listings");
  }

  /// Warm the caches for several parents, one after another.
  ///
  /// Parents with a fetch in flight or fresh data are skipped.
  pub async fn prefetch(&mut self, parent_ids: &[String]) -> BatchReport {
    let mut requests = Vec::new();
    for parent_id in parent_ids {
      if self.state(parent_id).busy {
        continue;
      }
      if let Lookup::Hit {
        freshness: Freshness::Fresh,
        ..
      } = self.cache.lookup(parent_id)
      {
        continue;
      }
      requests.push(
        PageRequest::new(parent_id.as_str(), 0, self.options.page_size)
          .with_fields(self.options.fields.clone()),
      );
    }

    let report = self.client.fetch_many(requests).await;
    for (request, result) in &report.outcomes {
      if let Ok(FetchOutcome::Fresh(page)) = result {
        self
          .cache
          .replace(&request.parent_id, page.items.clone(), page.total_count);
        self.state(&request.parent_id).phase = LoadPhase::Merged;
      }
    }
    info!(
      succeeded = report.succeeded(),
      failed = report.failed(),
      "Prefetch finished"
    );
    report
  }

  pub fn phase(&self, parent_id: &str) -> LoadPhase {
    self
      .parents
      .get(parent_id)
      .map(|s| s.phase)
      .unwrap_or_default()
  }

  pub fn is_busy(&self, parent_id: &str) -> bool {
    self.parents.get(parent_id).is_some_and(|s| s.busy)
  }

  /// Whether any parent has a fetch outstanding.
  pub fn has_pending(&self) -> bool {
    self.parents.values().any(|s| s.busy)
  }

  /// View-facing items for `parent_id` from the memory tier.
  pub fn visible(&self, parent_id: &str) -> Vec<CatalogRecord> {
    self
      .cache
      .get(parent_id)
      .map(|entry| filter::visible(&entry.items))
      .unwrap_or_default()
  }

  pub fn cache(&self) -> &MemoryCache {
    &self.cache
  }

  fn state(&mut self, parent_id: &str) -> &mut ParentState {
    self.parents.entry(parent_id.to_string()).or_default()
  }

  fn notify_loading(&self, parent_id: &str, loading: bool) {
    self.emit(ViewUpdate::Loading {
      parent_id: parent_id.to_string(),
      loading,
    });
  }

  fn notify_replaced(&self, parent_id: &str, source: CacheSource) {
    let (items, total_count) = match self.cache.get(parent_id) {
      Some(entry) => (filter::visible(&entry.items), entry.total_count),
      None => (Vec::new(), 0),
    };
    self.emit(ViewUpdate::ItemsReplaced {
      parent_id: parent_id.to_string(),
      items,
      total_count,
      source,
    });
  }

  fn emit(&self, update: ViewUpdate) {
    // The view may already be gone during shutdown
    let _ = self.view_tx.send(update);
  }
}
