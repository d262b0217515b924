//! Identity-keyed side table from reducers to their stores

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::cursor::Reducer;
use crate::error::EngineError;
use crate::lock;
use crate::store::Store;
use crate::Action;

/// Type-erased view of a registered store.
trait RegisteredStore: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn name(&self) -> &str;
    fn disconnect(&self);
}

impl<S, A> RegisteredStore for Store<S, A>
where
    S: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
    A: Action,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn name(&self) -> &str {
        Store::name(self)
    }

    fn disconnect(&self) {
        Store::disconnect(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RegistryKey {
    reducer: usize,
    store: TypeId,
}

impl RegistryKey {
    fn of<S: 'static, A: Action>(reducer: Reducer<S, A>) -> Self {
        Self {
            reducer: reducer as usize,
            store: TypeId::of::<Store<S, A>>(),
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    stores: Mutex<HashMap<RegistryKey, Box<dyn RegisteredStore>>>,
}

impl Registry {
    /// Return the store registered for `reducer`, creating it with `create`
    /// on first use.
    ///
    /// The registry lock is held while `create` runs, so concurrent first
    /// registrations of one reducer create exactly one store.
    pub(crate) fn get_or_try_insert<S, A>(
        &self,
        reducer: Reducer<S, A>,
        create: impl FnOnce(usize) -> Result<Store<S, A>, EngineError>,
    ) -> Result<Store<S, A>, EngineError>
    where
        S: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
        A: Action,
    {
        let key = RegistryKey::of(reducer);
        let mut stores = lock(&self.stores);
        if let Some(store) = stores
            .get(&key)
            .and_then(|store| store.as_any().downcast_ref::<Store<S, A>>())
        {
            return Ok(store.clone());
        }

        let store = create(stores.len())?;
        stores.insert(key, Box::new(store.clone()));
        Ok(store)
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.stores).len()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.stores)
            .values()
            .map(|store| store.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Disconnect every store. Stores stay registered.
    pub(crate) fn disconnect_all(&self) {
        let stores = lock(&self.stores);
        for store in stores.values() {
            store.disconnect();
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("stores", &self.names())
            .finish()
    }
}
