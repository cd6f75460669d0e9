/// Known peer addresses in the order they were learned. Membership is the
/// only state kept per peer.
#[derive(Debug, Clone, Default)]
pub struct Nodes {
    inner: Vec<String>,
}

impl Nodes {
    pub fn new() -> Nodes {
        Nodes { inner: vec![] }
    }

    /// Returns false when the address was already known.
    pub fn add_node(&mut self, addr: &str) -> bool {
        if self.node_is_known(addr) {
            return false;
        }
        self.inner.push(addr.to_string());
        true
    }

    pub fn evict_node(&mut self, addr: &str) -> bool {
        match self.inner.iter().position(|x| x.eq(addr)) {
            Some(idx) => {
                self.inner.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn node_is_known(&self, addr: &str) -> bool {
        self.inner.iter().any(|x| x.eq(addr))
    }

    pub fn first(&self) -> Option<&str> {
        self.inner.first().map(String::as_str)
    }

    pub fn get_nodes(&self) -> &[String] {
        self.inner.as_slice()
    }

    /// Known peers other than the given addresses.
    pub fn get_nodes_except(&self, excluded: &[&str]) -> Vec<String> {
        self.inner
            .iter()
            .filter(|addr| !excluded.contains(&addr.as_str()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_dedupes() {
        let mut nodes = Nodes::new();
        assert!(nodes.add_node("127.0.0.1:2001"));
        assert!(!nodes.add_node("127.0.0.1:2001"));
        assert!(nodes.add_node("127.0.0.1:3000"));
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes.first(), Some("127.0.0.1:2001"));
    }

    #[test]
    fn test_evict() {
        let mut nodes = Nodes::new();
        nodes.add_node("a");
        nodes.add_node("b");

        assert!(nodes.evict_node("a"));
        assert!(!nodes.evict_node("a"));
        assert!(!nodes.node_is_known("a"));
        assert_eq!(nodes.get_nodes(), &["b".to_string()]);
    }

    #[test]
    fn test_get_nodes_except() {
        let mut nodes = Nodes::new();
        for addr in ["a", "b", "c"] {
            nodes.add_node(addr);
        }
        assert_eq!(nodes.get_nodes_except(&["a", "c"]), vec!["b".to_string()]);
    }
}
