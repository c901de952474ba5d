use crate::collection::{Collection, CollectionUpdate, IndexPath, LiveCollection};
use crate::core::{Entity, RefreshError};
use crate::refresh::{RefreshOutcome, RefreshStatus, Refresher};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

type ViewModelFactory<VM> = Arc<dyn Fn(&Entity) -> VM + Send + Sync>;

/// Binds a live collection and its refresher into something a list screen
/// can render: counts, titles and a view model per row.
pub struct ListController<VM> {
    collection: Arc<LiveCollection>,
    refresher: Option<Refresher>,
    factory: ViewModelFactory<VM>,
}

impl<VM> ListController<VM> {
    pub fn prepare<F>(collection: Arc<LiveCollection>, refresher: Option<Refresher>, factory: F) -> Self
    where
        F: Fn(&Entity) -> VM + Send + Sync + 'static,
    {
        Self {
            collection,
            refresher,
            factory: Arc::new(factory),
        }
    }

    pub fn collection(&self) -> &Arc<LiveCollection> {
        &self.collection
    }

    pub fn refresher(&self) -> Option<&Refresher> {
        self.refresher.as_ref()
    }

    pub fn number_of_sections(&self) -> usize {
        self.collection.number_of_sections()
    }

    pub fn number_of_items_in_section(&self, section: usize) -> usize {
        self.collection.number_of_items_in_section(section)
    }

    pub fn title_for_section(&self, section: usize) -> Option<String> {
        self.collection.title_for_section(section)
    }

    pub fn entity(&self, path: IndexPath) -> Option<Entity> {
        self.collection.get(path)
    }

    pub fn view_model(&self, path: IndexPath) -> Option<VM> {
        self.collection.get(path).map(|entity| (self.factory)(&entity))
    }

    /// View models for every row, grouped by section.
    pub fn view_models(&self) -> Vec<Vec<VM>> {
        self.collection
            .snapshot()
            .sections()
            .iter()
            .map(|section| section.rows().iter().map(|entity| (self.factory)(entity)).collect())
            .collect()
    }

    pub fn updates(&self) -> mpsc::UnboundedReceiver<Arc<Vec<CollectionUpdate>>> {
        self.collection.subscribe()
    }

    /// Refreshes through the refresher, if there is one.
    pub async fn refresh(&self, force: bool) -> Result<RefreshOutcome, RefreshError> {
        match &self.refresher {
            Some(refresher) => refresher.refresh(force).await,
            None => Ok(RefreshOutcome::Skipped),
        }
    }

    /// Refresh as done when the screen comes into view: only if stale.
    pub async fn refresh_if_stale(&self) -> Result<RefreshOutcome, RefreshError> {
        self.refresh(false).await
    }

    pub fn refresh_status(&self) -> Option<watch::Receiver<RefreshStatus>> {
        self.refresher.as_ref().map(Refresher::watch)
    }
}
