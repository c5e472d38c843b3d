use serde::{Deserialize, Serialize};

/// Total reported when counting was not requested.
pub const UNKNOWN_TOTAL: i64 = -1;

/// One page of results plus the size of the full filtered set.
///
/// `estimated_total` is `-1` when the count was skipped. When a collection
/// criterion was evaluated in memory the count may include parents that the
/// in-memory pass rejected, hence "estimated".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartialResultList<T> {
    items: Vec<T>,
    offset: u64,
    estimated_total: i64,
}

impl<T> PartialResultList<T> {
    #[must_use]
    pub fn new(items: Vec<T>, offset: u64, total: Option<u64>) -> Self {
        Self {
            items,
            offset,
            estimated_total: total
                .and_then(|t| i64::try_from(t).ok())
                .unwrap_or(UNKNOWN_TOTAL),
        }
    }

    #[must_use]
    pub fn empty(offset: u64) -> Self {
        Self::new(Vec::new(), offset, None)
    }

    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    #[must_use]
    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn estimated_total(&self) -> i64 {
        self.estimated_total
    }

    #[must_use]
    pub fn total(&self) -> Option<u64> {
        u64::try_from(self.estimated_total).ok()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether rows exist past this page. `None` without a count.
    #[must_use]
    pub fn has_more(&self) -> Option<bool> {
        let total = self.total()?;
        let seen = u64::try_from(self.items.len()).unwrap_or(u64::MAX);
        Some(self.offset.saturating_add(seen) < total)
    }

    #[must_use]
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PartialResultList<U> {
        PartialResultList {
            items: self.items.into_iter().map(f).collect(),
            offset: self.offset,
            estimated_total: self.estimated_total,
        }
    }

    /// # Errors
    /// Returns the first error produced by `f`.
    pub fn try_map<U, E>(
        self,
        f: impl FnMut(T) -> Result<U, E>,
    ) -> Result<PartialResultList<U>, E> {
        Ok(PartialResultList {
            items: self.items.into_iter().map(f).collect::<Result<_, _>>()?,
            offset: self.offset,
            estimated_total: self.estimated_total,
        })
    }
}

impl<T> IntoIterator for PartialResultList<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a PartialResultList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
