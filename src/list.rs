//! Keyed list reconciliation.
//!
//! [`KeyedList`] maps an ordered collection onto fragments, rendering each key
//! once and reusing the cached fragment for as long as the key stays in the
//! collection:
//!
//! 1. Every item's key is looked up in the cache; hits are reused as-is,
//!    misses are rendered and cached.
//! 2. After a successful pass, keys that were not seen are evicted, so a key
//!    that leaves and later returns is rendered again.
//! 3. If the new fragment sequence is element-wise identical to the previous
//!    one, the previous `Arc<[F]>` is returned, which lets a render bridge skip
//!    its commit.

use std::hash::Hash;
use std::sync::Arc;

use crate::error::Result;
use crate::hash::{FastHashMap, FastHashSet};
use crate::identity::{Identity, same_sequence};
use crate::runtime::Runtime;
use crate::value::Value;

/// Cache of rendered fragments keyed by item identity.
pub struct KeyedList<K, F> {
    cache: FastHashMap<K, F>,
    last: Option<Arc<[F]>>,
}

impl<K, F> Default for KeyedList<K, F> {
    fn default() -> Self {
        Self {
            cache: FastHashMap::default(),
            last: None,
        }
    }
}

impl<K, F> std::fmt::Debug for KeyedList<K, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedList")
            .field("cached", &self.cache.len())
            .field("last_len", &self.last.as_ref().map(|last| last.len()))
            .finish()
    }
}

impl<K, F> KeyedList<K, F>
where
    K: Hash + Eq + Clone,
    F: Clone + Identity,
{
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the fragments for `items`, in order.
    ///
    /// `render_item` is called only for keys that are not cached. An error
    /// from it aborts the pass and is returned; nothing is evicted and the
    /// previous output stays current.
    ///
    /// Two items with the same key are a usage error: a warning is logged and
    /// the later item reuses the earlier item's fragment.
    pub fn reconcile<I, KF, RF>(
        &mut self,
        items: &[I],
        mut key_of: KF,
        mut render_item: RF,
    ) -> Result<Arc<[F]>>
    where
        KF: FnMut(&I) -> K,
        RF: FnMut(&I) -> Result<F>,
    {
        let mut seen = FastHashSet::with_capacity_and_hasher(items.len(), Default::default());
        let mut output = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            let key = key_of(item);
            if !seen.insert(key.clone()) {
                cov_mark::hit!(duplicate_key_reused);
                tracing::warn!(index, "duplicate key in keyed list; reusing the earlier fragment");
            }

            let fragment = match self.cache.get(&key) {
                Some(cached) => cached.clone(),
                None => {
                    let fragment = render_item(item)?;
                    self.cache.insert(key, fragment.clone());
                    fragment
                }
            };
            output.push(fragment);
        }

        let evicted = self.cache.len() - seen.len();
        if evicted > 0 {
            self.cache.retain(|key, _| seen.contains(key));
            tracing::trace!(evicted, "evicted departed list keys");
        }

        if let Some(last) = &self.last {
            if same_sequence(last, &output) {
                cov_mark::hit!(list_output_reused);
                return Ok(last.clone());
            }
        }

        let output: Arc<[F]> = output.into();
        self.last = Some(output.clone());
        Ok(output)
    }

    /// Number of cached fragments.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Whether `key` has a cached fragment.
    pub fn contains_key(&self, key: &K) -> bool {
        self.cache.contains_key(key)
    }

    /// Output of the last successful pass.
    pub fn last_output(&self) -> Option<&Arc<[F]>> {
        self.last.as_ref()
    }

    /// Drop every cached fragment and the previous output.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.last = None;
    }
}

/// Render job that reconciles a reactive collection.
///
/// The returned closure is meant to be run by a tracked effect, typically a
/// [`RenderBridge`](crate::RenderBridge). Calling it while nothing is tracking
/// still works, but replacing the collection will not trigger anything, so a
/// warning is logged when `source` is reactive.
///
/// Each pass clones the collection out of `source` before rendering, so no
/// lock on the list cell is held while `render_item` runs. A render function
/// that writes to the list cell does not deadlock; the write counts as the
/// surrounding effect writing its own dependency.
///
/// ```ignore
/// let rows = keyed_list(
///     &rt,
///     Value::from(todos.clone()),
///     |todo: &Todo| todo.id,
///     |todo| Ok(Arc::new(Row::new(todo))),
/// );
/// let bridge = RenderBridge::new(&rt, EffectOptions::new(), rows, commit)?;
/// ```
pub fn keyed_list<I, K, F, KF, RF>(
    runtime: &Runtime,
    source: Value<Vec<I>>,
    mut key_of: KF,
    mut render_item: RF,
) -> impl FnMut() -> Result<Arc<[F]>> + Send + 'static
where
    I: Clone + Send + Sync + 'static,
    K: Hash + Eq + Clone + Send + 'static,
    F: Clone + Identity + Send + Sync + 'static,
    KF: FnMut(&I) -> K + Send + 'static,
    RF: FnMut(&I) -> Result<F> + Send + 'static,
{
    let runtime = runtime.downgrade();
    let mut list = KeyedList::new();
    move || {
        let tracking = runtime.upgrade().is_some_and(|rt| rt.is_tracking());
        if !tracking && source.is_reactive() {
            cov_mark::hit!(untracked_list_read);
            tracing::warn!("keyed list read outside a tracked effect; changes to it will not re-render");
        }
        let items = source.get();
        list.reconcile(&items, &mut key_of, &mut render_item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug)]
    struct Todo {
        id: u32,
        label: &'static str,
    }

    fn todo(id: u32, label: &'static str) -> Todo {
        Todo { id, label }
    }

    type Fragment = Arc<String>;

    struct Harness {
        list: KeyedList<u32, Fragment>,
        renders: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                list: KeyedList::new(),
                renders: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn pass(&mut self, items: &[Todo]) -> Arc<[Fragment]> {
            let renders = self.renders.clone();
            self.list
                .reconcile(
                    items,
                    |t| t.id,
                    |t| {
                        renders.fetch_add(1, Ordering::Relaxed);
                        Ok(Arc::new(format!("<li>{}</li>", t.label)))
                    },
                )
                .unwrap()
        }

        fn renders(&self) -> usize {
            self.renders.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn reorder_reuses_fragments() {
        let mut h = Harness::new();
        let first = h.pass(&[todo(1, "a"), todo(2, "b"), todo(3, "c")]);
        assert_eq!(h.renders(), 3);

        // Fresh item values, same ids.
        let second = h.pass(&[todo(3, "c"), todo(1, "a"), todo(2, "b")]);
        assert_eq!(h.renders(), 3);
        assert!(Arc::ptr_eq(&second[0], &first[2]));
        assert!(Arc::ptr_eq(&second[1], &first[0]));
        assert!(Arc::ptr_eq(&second[2], &first[1]));
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn departed_keys_are_evicted_and_rerendered_on_return() {
        let mut h = Harness::new();
        let first = h.pass(&[todo(1, "a"), todo(2, "b"), todo(3, "c")]);
        h.pass(&[todo(1, "a"), todo(3, "c")]);
        assert!(!h.list.contains_key(&2));
        assert_eq!(h.list.len(), 2);

        let third = h.pass(&[todo(1, "a"), todo(2, "b"), todo(3, "c")]);
        assert_eq!(h.renders(), 4);
        assert!(!Arc::ptr_eq(&third[1], &first[1]));
        assert_eq!(third[1], first[1]);
    }

    #[test]
    fn unchanged_list_returns_the_same_output() {
        let mut h = Harness::new();
        let items = [todo(1, "a"), todo(2, "b")];
        let first = h.pass(&items);

        cov_mark::check!(list_output_reused);
        let second = h.pass(&items);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(h.renders(), 2);
    }

    #[test]
    fn in_place_replacement_with_equal_length_is_a_new_output() {
        let mut h = Harness::new();
        let first = h.pass(&[todo(1, "a"), todo(2, "b")]);
        let second = h.pass(&[todo(1, "a"), todo(9, "z")]);

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second[1].as_str(), "<li>z</li>");
    }

    #[test]
    fn empty_list_clears_the_cache() {
        let mut h = Harness::new();
        h.pass(&[todo(1, "a")]);
        let out = h.pass(&[]);
        assert!(out.is_empty());
        assert!(h.list.is_empty());

        let again = h.pass(&[]);
        assert!(Arc::ptr_eq(&out, &again));
    }

    #[test]
    fn duplicate_keys_reuse_the_first_fragment() {
        let mut h = Harness::new();
        cov_mark::check!(duplicate_key_reused);
        let out = h.pass(&[todo(1, "first"), todo(1, "second")]);

        assert_eq!(h.renders(), 1);
        assert!(Arc::ptr_eq(&out[0], &out[1]));
        assert_eq!(out[0].as_str(), "<li>first</li>");
    }

    #[test]
    fn failed_pass_propagates_and_keeps_previous_state() {
        let mut list: KeyedList<u32, Fragment> = KeyedList::new();
        let render = |t: &Todo| -> Result<Fragment> {
            if t.label.is_empty() {
                return Err(Error::job(format!("todo {} has no label", t.id)));
            }
            Ok(Arc::new(t.label.to_owned()))
        };

        let first = list.reconcile(&[todo(1, "a"), todo(2, "b")], |t| t.id, render).unwrap();
        let err = list
            .reconcile(&[todo(3, "c"), todo(4, "")], |t| t.id, render)
            .unwrap_err();
        assert_eq!(err.to_string(), "render job failed: todo 4 has no label");

        assert!(list.contains_key(&1));
        assert!(list.contains_key(&2));
        assert!(Arc::ptr_eq(list.last_output().unwrap(), &first));

        list.clear();
        assert!(list.is_empty());
        assert!(list.last_output().is_none());
    }

    #[test]
    fn keyed_list_job_tracks_its_source() {
        let rt = Runtime::new();
        let todos = rt.cell(vec![todo(1, "a"), todo(2, "b")]);
        let renders = Arc::new(AtomicUsize::new(0));
        let mut job = keyed_list(&rt, Value::from(todos.clone()), |t: &Todo| t.id, {
            let renders = renders.clone();
            move |t: &Todo| {
                renders.fetch_add(1, Ordering::Relaxed);
                Ok(Arc::new(t.label.to_owned()))
            }
        });

        {
            cov_mark::check!(untracked_list_read);
            assert_eq!(job().unwrap().len(), 2);
        }

        let outputs = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let _effect = rt.effect({
            let outputs = outputs.clone();
            move || outputs.lock().push(job().unwrap())
        });
        assert_eq!(todos.subscriber_count(), 1);

        todos.update(|list| list.push(todo(3, "c")));
        rt.flush();
        let outputs = outputs.lock();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[1].len(), 3);
        assert_eq!(renders.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn render_item_may_write_the_list_it_renders() {
        let rt = Runtime::new();
        let todos = rt.cell(vec![todo(1, "a"), todo(2, "grow")]);
        let mut job = keyed_list(&rt, Value::from(todos.clone()), |t: &Todo| t.id, {
            let todos = todos.clone();
            move |t: &Todo| {
                if t.label == "grow" {
                    todos.update(|list| list.push(todo(3, "c")));
                }
                Ok(Arc::new(t.label.to_owned()))
            }
        });

        let outputs = Arc::new(parking_lot::Mutex::new(Vec::new()));
        cov_mark::check!(self_trigger_ignored);
        let _effect = rt.effect({
            let outputs = outputs.clone();
            move || outputs.lock().push(job().unwrap())
        });

        assert_eq!(outputs.lock()[0].len(), 2);
        assert_eq!(todos.with_untracked(Vec::len), 3);
        assert_eq!(rt.flush(), 0);
    }

    proptest! {
        /// After any sequence of passes the cache holds exactly the current
        /// keys, fragments follow the current order, and a key that survives
        /// a pass keeps its fragment.
        #[test]
        fn prop_cache_tracks_current_keys(passes in prop::collection::vec(
            prop::collection::vec(0u8..16, 0..12),
            1..8,
        )) {
            let mut list: KeyedList<u8, Arc<u8>> = KeyedList::new();
            let mut previous: FastHashMap<u8, Arc<u8>> = FastHashMap::default();

            for keys in passes {
                let mut rendered = 0usize;
                let out = list
                    .reconcile(&keys, |k| *k, |k| {
                        rendered += 1;
                        Ok(Arc::new(*k))
                    })
                    .unwrap();

                let distinct: FastHashSet<u8> = keys.iter().copied().collect();
                prop_assert_eq!(list.len(), distinct.len());
                prop_assert!(distinct.iter().all(|k| list.contains_key(k)));
                prop_assert_eq!(out.len(), keys.len());

                let mut current: FastHashMap<u8, Arc<u8>> = FastHashMap::default();
                for (key, fragment) in keys.iter().zip(out.iter()) {
                    prop_assert_eq!(**fragment, *key);
                    if let Some(old) = previous.get(key) {
                        prop_assert!(Arc::ptr_eq(old, fragment));
                    }
                    current.insert(*key, fragment.clone());
                }

                let new_keys = distinct.iter().filter(|k| !previous.contains_key(*k)).count();
                prop_assert_eq!(rendered, new_keys);
                previous = current;
            }
        }
    }
}
