use bytes::Bytes;
use std::collections::HashSet;

/// An unordered collection of unique byte-string members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Set(HashSet<Bytes>);

impl Set {
    pub fn new() -> Self {
        Set(HashSet::new())
    }

    /// Adds `members`, returning the count of members that were not already
    /// present (not the count of members requested).
    pub fn add<I: IntoIterator<Item = Bytes>>(&mut self, members: I) -> usize {
        members.into_iter().filter(|m| self.0.insert(m.clone())).count()
    }

    /// Removes `members`, returning the count actually removed.
    pub fn remove(&mut self, members: &[Bytes]) -> usize {
        members.iter().filter(|m| self.0.remove(m.as_ref())).count()
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.0.contains(member)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.0.iter()
    }
}
