use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::dispatcher::Dispatcher;

use super::Hub;

type HubRegistry = Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

static HUBS: OnceLock<HubRegistry> = OnceLock::new();

impl<M: Clone + Send + 'static> Hub<M> {
    /// The process-wide hub for message type `M`, bound to
    /// [`Dispatcher::global`].
    ///
    /// Created on first use; every later call returns the same hub.
    pub fn global() -> Arc<Self> {
        let mut hubs = HUBS
            .get_or_init(HubRegistry::default)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = hubs.entry(TypeId::of::<M>()).or_insert_with(|| {
            let hub: Arc<dyn Any + Send + Sync> = Arc::new(Self::new(Arc::clone(Dispatcher::global())));
            hub
        });
        match Arc::clone(entry).downcast::<Self>() {
            Ok(hub) => hub,
            Err(_) => unreachable!("hub registry entries are keyed by message type"),
        }
    }
}
