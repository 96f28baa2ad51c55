use std::collections::HashMap;

use crate::frame::StreamId;
use crate::proto::streams::stream::Stream;

/// The arena of stream records, keyed by stream id.
#[derive(Debug, Default)]
pub(crate) struct Store {
    map: HashMap<StreamId, Stream>,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }

    pub fn insert(&mut self, stream: Stream) {
        let id = stream.id;
        let evicted = self.map.insert(id, stream);
        debug_assert!(evicted.is_none(), "stream {:?} already in store", id);
    }

    pub fn get(&self, id: StreamId) -> Option<&Stream> {
        self.map.get(&id)
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.map.get_mut(&id)
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.map.contains_key(&id)
    }

    pub fn remove(&mut self, id: StreamId) -> Option<Stream> {
        self.map.remove(&id)
    }

    pub fn ids(&self) -> Vec<StreamId> {
        self.map.keys().copied().collect()
    }

    pub fn for_each<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Stream),
    {
        for stream in self.map.values_mut() {
            f(stream);
        }
    }
}
