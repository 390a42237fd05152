//! Reference equality for render outputs.
//!
//! The render bridge skips a commit when the new output is the *same* value as
//! the previous one, and the list reconciler hands back its previous output
//! when every fragment is the same. "Same" is [`Identity::is_same`]: pointer
//! identity for shared handles, plain equality for small value types where
//! pointer identity means nothing.

use std::sync::Arc;

/// Cheap "is this the same value" check.
///
/// Implement this for fragment types returned by render jobs. Shared handles
/// should compare pointers, never contents.
pub trait Identity {
    /// Whether `self` and `other` are the same value.
    fn is_same(&self, other: &Self) -> bool;
}

impl<T: ?Sized> Identity for Arc<T> {
    #[inline]
    fn is_same(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: Identity> Identity for Option<T> {
    fn is_same(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.is_same(b),
            (None, None) => true,
            _ => false,
        }
    }
}

macro_rules! identity_by_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Identity for $ty {
                #[inline]
                fn is_same(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

identity_by_value!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    String,
    &'static str,
);

/// Element-wise identity of two fragment sequences of equal length.
pub(crate) fn same_sequence<F: Identity>(a: &[F], b: &[F]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_same(y))
}
