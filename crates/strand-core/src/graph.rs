use std::cmp::Ordering;

/// A generic ordered tree keyed by path-segment sequences.
///
/// Nodes live in an index arena with explicit parent/child index lists,
/// so traversal order is explicit and deterministic. Intermediate nodes
/// created on the way to an inserted path carry no value until something
/// is inserted at their own path.
#[derive(Debug, Clone)]
pub struct Graph<K, V> {
    nodes: Vec<Node<K, V>>,
}

#[derive(Debug, Clone)]
struct Node<K, V> {
    /// None only for the root.
    key: Option<K>,
    value: Option<V>,
    parent: Option<usize>,
    children: Vec<usize>,
}

impl<K, V> Graph<K, V> {
    /// Creates an empty graph containing only the (valueless) root.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                key: None,
                value: None,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// Index of the root node.
    pub fn root(&self) -> usize {
        0
    }

    /// Child indices of the node at `index`, in stable per-level order.
    pub fn children_of(&self, index: usize) -> &[usize] {
        &self.nodes[index].children
    }

    /// Value stored at the node at `index`, if any.
    pub fn value_of(&self, index: usize) -> Option<&V> {
        self.nodes[index].value.as_ref()
    }

    /// Number of valued nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Preorder node indices, parents before children.
    fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![0];
        while let Some(idx) = stack.pop() {
            order.push(idx);
            for &child in self.nodes[idx].children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }
}

impl<K, V> Graph<K, V>
where
    K: Clone + PartialEq,
{
    fn child_with_key(&self, index: usize, key: &K) -> Option<usize> {
        self.nodes[index]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].key.as_ref() == Some(key))
    }

    fn node_at(&self, path: &[K]) -> Option<usize> {
        let mut current = 0;
        for key in path {
            current = self.child_with_key(current, key)?;
        }
        Some(current)
    }

    /// Inserts `value` at `path`, creating intermediate nodes as needed.
    ///
    /// Idempotent for the same path: re-inserting replaces the value
    /// without disturbing node order.
    pub fn insert(&mut self, path: &[K], value: V) {
        let mut current = 0;
        for key in path {
            current = match self.child_with_key(current, key) {
                Some(child) => child,
                None => {
                    let index = self.nodes.len();
                    self.nodes.push(Node {
                        key: Some(key.clone()),
                        value: None,
                        parent: Some(current),
                        children: Vec::new(),
                    });
                    self.nodes[current].children.push(index);
                    index
                }
            };
        }
        self.nodes[current].value = Some(value);
    }

    /// Looks up the value at `path`.
    pub fn get(&self, path: &[K]) -> Option<&V> {
        self.node_at(path)
            .and_then(|idx| self.nodes[idx].value.as_ref())
    }

    /// Looks up the value at `path` mutably.
    pub fn get_mut(&mut self, path: &[K]) -> Option<&mut V> {
        let idx = self.node_at(path)?;
        self.nodes[idx].value.as_mut()
    }

    /// The full path of the node at `index`.
    pub fn path_of(&self, index: usize) -> Vec<K> {
        let mut segments = Vec::new();
        let mut current = Some(index);
        while let Some(idx) = current {
            if let Some(key) = &self.nodes[idx].key {
                segments.push(key.clone());
            }
            current = self.nodes[idx].parent;
        }
        segments.reverse();
        segments
    }

    /// Depth-first preorder traversal yielding `(path, value)` pairs for
    /// every valued node, children visited in their stable per-level order.
    pub fn traverse(&self) -> Vec<(Vec<K>, &V)> {
        let mut out = Vec::new();
        let mut stack: Vec<(usize, Vec<K>)> = vec![(0, Vec::new())];
        while let Some((idx, path)) = stack.pop() {
            if let Some(value) = &self.nodes[idx].value {
                out.push((path.clone(), value));
            }
            for &child in self.nodes[idx].children.iter().rev() {
                if let Some(key) = &self.nodes[child].key {
                    let mut child_path = path.clone();
                    child_path.push(key.clone());
                    stack.push((child, child_path));
                }
            }
        }
        out
    }

    /// Applies `f` to every stored value, in preorder.
    pub fn for_each_value_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut V),
    {
        for idx in self.preorder() {
            if let Some(value) = self.nodes[idx].value.as_mut() {
                f(value);
            }
        }
    }

    /// Recursively re-orders every node's children by comparing their
    /// values with `cmp`. Valueless intermediates keep their position
    /// (the sort is stable).
    pub fn sort_children_by<F>(&mut self, mut cmp: F)
    where
        F: FnMut(&V, &V) -> Ordering,
    {
        for idx in 0..self.nodes.len() {
            let mut children = self.nodes[idx].children.clone();
            children.sort_by(|&a, &b| {
                match (&self.nodes[a].value, &self.nodes[b].value) {
                    (Some(x), Some(y)) => cmp(x, y),
                    _ => Ordering::Equal,
                }
            });
            self.nodes[idx].children = children;
        }
    }

    /// Top-down propagation: for every valued node (parents first), calls
    /// `f(parent_value, child_value)` where the parent value has already
    /// been combined with its own ancestors. Nodes whose parent carries no
    /// value receive `None`.
    pub fn propagate_down<F>(&mut self, mut f: F)
    where
        V: Clone,
        F: FnMut(Option<&V>, &mut V),
    {
        for idx in self.preorder() {
            let parent_value = self.nodes[idx]
                .parent
                .and_then(|p| self.nodes[p].value.clone());
            if let Some(value) = self.nodes[idx].value.as_mut() {
                f(parent_value.as_ref(), value);
            }
        }
    }
}

impl<K, V> Default for Graph<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
