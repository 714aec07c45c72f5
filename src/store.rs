use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error as ThisError;

/// The Store holds every key-value pair of the server. It is the only state shared between
/// connections: handles are cheap to clone (reference counted) and every access goes through
/// [`InnerStore::lock`], so concurrent commands are serialized and never observe a partial write.
#[derive(Clone)]
pub struct Store {
    inner: Arc<InnerStore>,
}

impl Store {
    pub fn new() -> Store {
        let state = State {
            keys: HashMap::new(),
        };

        let inner = Arc::new(InnerStore {
            state: Mutex::new(state),
        });

        Self { inner }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Store {
    type Target = InnerStore;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

pub struct InnerStore {
    state: Mutex<State>,
}

impl InnerStore {
    pub fn lock(&self) -> InnerStoreLocked<'_> {
        // Operations below never leave the map half updated, so the state behind a poisoned lock
        // is still consistent.
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        InnerStoreLocked { state }
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum StoreError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
}

type Key = Bytes;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
}

pub struct State {
    keys: HashMap<Key, Value>,
}

pub struct InnerStoreLocked<'a> {
    state: MutexGuard<'a, State>,
}

impl<'a> InnerStoreLocked<'a> {
    /// Stores `data` under `key`, replacing whatever value the key held.
    pub fn set(&mut self, key: Key, data: Bytes) {
        self.state.keys.insert(key, Value::String(data));
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        match self.state.keys.get(key) {
            Some(Value::String(data)) => Ok(Some(data.clone())),
            Some(Value::List(_)) => Err(StoreError::WrongType),
            None => Ok(None),
        }
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Value> {
        self.state.keys.remove(key)
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.state.keys.contains_key(key)
    }

    pub fn size(&self) -> usize {
        self.state.keys.len()
    }

    pub fn push_front(&mut self, key: Key, values: Vec<Bytes>) -> Result<usize, StoreError> {
        let list = self.list_entry(key)?;
        for value in values {
            list.push_front(value);
        }
        Ok(list.len())
    }

    pub fn push_back(&mut self, key: Key, values: Vec<Bytes>) -> Result<usize, StoreError> {
        let list = self.list_entry(key)?;
        list.extend(values);
        Ok(list.len())
    }

    pub fn pop_front(&mut self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        self.pop_with(key, VecDeque::pop_front)
    }

    pub fn pop_back(&mut self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        self.pop_with(key, VecDeque::pop_back)
    }

    pub fn list_len(&self, key: &[u8]) -> Result<usize, StoreError> {
        match self.state.keys.get(key) {
            Some(Value::List(list)) => Ok(list.len()),
            Some(Value::String(_)) => Err(StoreError::WrongType),
            None => Ok(0),
        }
    }

    /// Returns the element at `index`. Negative indices count from the tail, `-1` being the last
    /// element.
    pub fn list_index(&self, key: &[u8], index: i64) -> Result<Option<Bytes>, StoreError> {
        let list = match self.state.keys.get(key) {
            Some(Value::List(list)) => list,
            Some(Value::String(_)) => return Err(StoreError::WrongType),
            None => return Ok(None),
        };

        let len = list.len() as i64;
        let index = if index < 0 { len + index } else { index };
        if !(0..len).contains(&index) {
            return Ok(None);
        }

        Ok(list.get(index as usize).cloned())
    }

    fn list_entry(&mut self, key: Key) -> Result<&mut VecDeque<Bytes>, StoreError> {
        match self
            .state
            .keys
            .entry(key)
            .or_insert_with(|| Value::List(VecDeque::new()))
        {
            Value::List(list) => Ok(list),
            Value::String(_) => Err(StoreError::WrongType),
        }
    }

    fn pop_with(
        &mut self,
        key: &[u8],
        pop: fn(&mut VecDeque<Bytes>) -> Option<Bytes>,
    ) -> Result<Option<Bytes>, StoreError> {
        let list = match self.state.keys.get_mut(key) {
            Some(Value::List(list)) => list,
            Some(Value::String(_)) => return Err(StoreError::WrongType),
            None => return Ok(None),
        };

        let value = pop(list);

        // Empty lists are never kept around.
        if list.is_empty() {
            self.state.keys.remove(key);
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(store: &Store, key: &str) -> Vec<Bytes> {
        let store = store.lock();
        let len = store.list_len(key.as_bytes()).unwrap() as i64;
        (0..len)
            .map(|i| store.list_index(key.as_bytes(), i).unwrap().unwrap())
            .collect()
    }

    #[test]
    fn set_overwrites() {
        let store = Store::new();

        {
            let mut store = store.lock();
            store.set(Bytes::from("B"), Bytes::from("crayoli"));
            store.set(Bytes::from("B"), Bytes::from("crayola"));
        }

        assert_eq!(store.lock().get(b"B"), Ok(Some(Bytes::from("crayola"))));
        assert_eq!(store.lock().size(), 1);
    }

    #[test]
    fn get_missing_key() {
        let store = Store::new();

        assert_eq!(store.lock().get(b"missing"), Ok(None));
    }

    #[test]
    fn clones_share_state() {
        let store = Store::new();
        let other = store.clone();

        store.lock().set(Bytes::from("key"), Bytes::from("value"));

        assert!(other.lock().exists(b"key"));
    }

    #[test]
    fn push_and_pop() {
        let store = Store::new();

        {
            let mut store = store.lock();
            let len = store
                .push_back(Bytes::from("l"), vec![Bytes::from("b"), Bytes::from("c")])
                .unwrap();
            assert_eq!(len, 2);

            let len = store
                .push_front(Bytes::from("l"), vec![Bytes::from("a"), Bytes::from("z")])
                .unwrap();
            assert_eq!(len, 4);
        }

        assert_eq!(
            list(&store, "l"),
            vec![
                Bytes::from("z"),
                Bytes::from("a"),
                Bytes::from("b"),
                Bytes::from("c")
            ]
        );

        let mut locked = store.lock();
        assert_eq!(locked.pop_front(b"l"), Ok(Some(Bytes::from("z"))));
        assert_eq!(locked.pop_back(b"l"), Ok(Some(Bytes::from("c"))));
        assert_eq!(locked.list_len(b"l"), Ok(2));
    }

    #[test]
    fn popping_last_element_removes_key() {
        let store = Store::new();
        let mut store = store.lock();

        store
            .push_back(Bytes::from("l"), vec![Bytes::from("only")])
            .unwrap();

        assert_eq!(store.pop_back(b"l"), Ok(Some(Bytes::from("only"))));
        assert!(!store.exists(b"l"));
        assert_eq!(store.pop_back(b"l"), Ok(None));
    }

    #[test]
    fn list_index_bounds() {
        let store = Store::new();
        let mut store = store.lock();

        store
            .push_back(
                Bytes::from("l"),
                vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")],
            )
            .unwrap();

        assert_eq!(store.list_index(b"l", 0), Ok(Some(Bytes::from("a"))));
        assert_eq!(store.list_index(b"l", -1), Ok(Some(Bytes::from("c"))));
        assert_eq!(store.list_index(b"l", -3), Ok(Some(Bytes::from("a"))));
        assert_eq!(store.list_index(b"l", 3), Ok(None));
        assert_eq!(store.list_index(b"l", -4), Ok(None));
        assert_eq!(store.list_index(b"missing", 0), Ok(None));
    }

    #[test]
    fn wrong_type() {
        let store = Store::new();
        let mut store = store.lock();

        store.set(Bytes::from("s"), Bytes::from("v"));
        store
            .push_back(Bytes::from("l"), vec![Bytes::from("v")])
            .unwrap();

        assert_eq!(
            store.push_back(Bytes::from("s"), vec![Bytes::from("x")]),
            Err(StoreError::WrongType)
        );
        assert_eq!(store.pop_front(b"s"), Err(StoreError::WrongType));
        assert_eq!(store.list_len(b"s"), Err(StoreError::WrongType));
        assert_eq!(store.get(b"l"), Err(StoreError::WrongType));

        // SET replaces values of any type.
        store.set(Bytes::from("l"), Bytes::from("now a string"));
        assert_eq!(store.get(b"l"), Ok(Some(Bytes::from("now a string"))));
    }

    #[test]
    fn concurrent_writers() {
        let store = Store::new();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = Bytes::from(format!("key-{t}-{i}"));
                        let value = Bytes::from(format!("value-{t}-{i}"));
                        store.lock().set(key, value);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let store = store.lock();
        assert_eq!(store.size(), 800);
        assert_eq!(
            store.get(b"key-3-42"),
            Ok(Some(Bytes::from("value-3-42")))
        );
    }
}
