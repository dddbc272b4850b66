//! Priority frontier.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::entry::SourceId;

/// The earliest not yet emitted timestamp known for a source.
///
/// Nodes are ordered by `head` first and by `source` on equal timestamps, so the lower source
/// wins a tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrontierNode {
    pub head: DateTime<Utc>,
    pub source: SourceId,
}

impl FrontierNode {
    pub fn new(head: DateTime<Utc>, source: SourceId) -> Self {
        FrontierNode { head, source }
    }
}

/// Min-priority frontier over source head timestamps.
/// A source with no known head is absent from the frontier.
#[derive(Debug, Default)]
pub struct Frontier {
    // binary heap is max-heap by default so we reverse it to convert it to min-heap
    nodes: BinaryHeap<Reverse<FrontierNode>>,
}

impl Frontier {
    pub fn with_capacity(capacity: usize) -> Self {
        Frontier {
            nodes: BinaryHeap::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, node: FrontierNode) {
        self.nodes.push(Reverse(node));
    }

    /// Removes the minimum node. `None` means no more known heads.
    pub fn remove_min(&mut self) -> Option<FrontierNode> {
        self.nodes.pop().map(|node| node.0)
    }

    pub fn peek_min(&self) -> Option<FrontierNode> {
        self.nodes.peek().map(|node| node.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod test {
    use chrono::{TimeZone, Utc};

    use super::{Frontier, FrontierNode};
    use crate::entry::SourceId;

    fn node(secs: i64, source: usize) -> FrontierNode {
        FrontierNode::new(Utc.timestamp_opt(secs, 0).unwrap(), SourceId(source))
    }

    #[test]
    fn test_frontier_order() {
        let mut frontier = Frontier::with_capacity(4);
        frontier.insert(node(5, 0));
        frontier.insert(node(1, 1));
        frontier.insert(node(3, 2));
        frontier.insert(node(1, 3));

        assert_eq!(frontier.len(), 4);
        assert_eq!(frontier.peek_min(), Some(node(1, 1)));

        let order = Vec::from_iter(std::iter::from_fn(|| frontier.remove_min()));
        assert_eq!(order, vec![node(1, 1), node(1, 3), node(3, 2), node(5, 0)]);
    }

    #[test]
    fn test_frontier_tie_break_ignores_insertion_order() {
        let mut frontier = Frontier::default();
        frontier.insert(node(7, 2));
        frontier.insert(node(7, 0));
        frontier.insert(node(7, 1));

        assert_eq!(frontier.remove_min(), Some(node(7, 0)));
        assert_eq!(frontier.remove_min(), Some(node(7, 1)));
        assert_eq!(frontier.remove_min(), Some(node(7, 2)));
    }

    #[test]
    fn test_empty_frontier() {
        let mut frontier = Frontier::default();

        assert!(frontier.is_empty());
        assert_eq!(frontier.peek_min(), None);
        assert_eq!(frontier.remove_min(), None);
    }
}
