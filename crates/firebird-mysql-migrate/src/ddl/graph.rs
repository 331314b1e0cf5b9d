//! Foreign key dependency graph.
//!
//! Edges point from a referencing table to the table it references. Cycles
//! are found as strongly connected components; ordering is Kahn's algorithm
//! over the component graph, so every table follows the tables it references
//! except along edges inside a cycle. Ties break by table name, which keeps
//! DDL output stable between runs.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, VecDeque};

use crate::core::schema::TableSpec;

/// Dependency graph over a fixed set of tables.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Table names, sorted.
    names: Vec<String>,
    index: HashMap<String, usize>,
    /// `parents[i]`: tables that table `i` references.
    parents: Vec<Vec<usize>>,
    /// `children[i]`: tables that reference table `i`.
    children: Vec<Vec<usize>>,
    /// Strongly connected component of each table.
    component: Vec<usize>,
    /// Component sizes.
    component_size: Vec<usize>,
    /// Creation order.
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Build the graph. Self-references and references to tables outside
    /// `tables` add no edge.
    pub fn build(tables: &[TableSpec]) -> Self {
        let mut names: Vec<String> = tables.iter().map(|t| t.name.clone()).collect();
        names.sort();
        names.dedup();
        let index: HashMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();

        let n = names.len();
        let mut parent_sets: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for table in tables {
            let Some(&child) = index.get(&table.name) else {
                continue;
            };
            for referenced in table.referenced_tables() {
                if let Some(&parent) = index.get(referenced) {
                    parent_sets[child].insert(parent);
                }
            }
        }

        let parents: Vec<Vec<usize>> = parent_sets
            .iter()
            .map(|s| s.iter().copied().collect())
            .collect();
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (child, ps) in parents.iter().enumerate() {
            for &p in ps {
                children[p].push(child);
            }
        }

        let (component, members) = strongly_connected(&parents, &children);
        let component_size = members.iter().map(Vec::len).collect();
        let order = condensation_order(&parents, &component, &members);

        Self {
            names,
            index,
            parents,
            children,
            component,
            component_size,
            order,
        }
    }

    /// Tables in creation order.
    pub fn order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.names[i].as_str()).collect()
    }

    /// Whether the reference from `table` to `referenced` lies on a cycle.
    pub fn is_cyclic_edge(&self, table: &str, referenced: &str) -> bool {
        match (self.index.get(table), self.index.get(referenced)) {
            (Some(&a), Some(&b)) => a != b && self.component[a] == self.component[b],
            _ => false,
        }
    }

    /// Tables that belong to a foreign key cycle, sorted.
    pub fn cyclic_tables(&self) -> Vec<&str> {
        (0..self.names.len())
            .filter(|&i| self.component_size[self.component[i]] > 1)
            .map(|i| self.names[i].as_str())
            .collect()
    }

    /// Tables that must finish before `table` starts: referenced tables
    /// outside its cycle.
    pub fn prerequisites(&self, table: &str) -> Vec<&str> {
        let Some(&i) = self.index.get(table) else {
            return Vec::new();
        };
        self.parents[i]
            .iter()
            .filter(|&&p| self.component[p] != self.component[i])
            .map(|&p| self.names[p].as_str())
            .collect()
    }

    /// Every table that references `table`, directly or transitively.
    pub fn dependents_of(&self, table: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let Some(&start) = self.index.get(table) else {
            return found;
        };

        let mut seen = vec![false; self.names.len()];
        seen[start] = true;
        let mut queue = VecDeque::from([start]);
        while let Some(u) = queue.pop_front() {
            for &c in &self.children[u] {
                if !seen[c] {
                    seen[c] = true;
                    found.insert(self.names[c].clone());
                    queue.push_back(c);
                }
            }
        }
        found
    }
}

/// Kosaraju's algorithm, iterative. Returns the component of each node and
/// the members of each component (sorted).
fn strongly_connected(forward: &[Vec<usize>], reverse: &[Vec<usize>]) -> (Vec<usize>, Vec<Vec<usize>>) {
    let n = forward.len();

    let mut visited = vec![false; n];
    let mut finish = Vec::with_capacity(n);
    for start in 0..n {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let mut stack = vec![(start, 0usize)];
        loop {
            let Some(top) = stack.last_mut() else { break };
            let u = top.0;
            if top.1 < forward[u].len() {
                let v = forward[u][top.1];
                top.1 += 1;
                if !visited[v] {
                    visited[v] = true;
                    stack.push((v, 0));
                }
            } else {
                finish.push(u);
                stack.pop();
            }
        }
    }

    let unassigned = usize::MAX;
    let mut component = vec![unassigned; n];
    let mut members: Vec<Vec<usize>> = Vec::new();
    for &root in finish.iter().rev() {
        if component[root] != unassigned {
            continue;
        }
        let id = members.len();
        let mut group = vec![root];
        component[root] = id;
        let mut stack = vec![root];
        while let Some(u) = stack.pop() {
            for &v in &reverse[u] {
                if component[v] == unassigned {
                    component[v] = id;
                    group.push(v);
                    stack.push(v);
                }
            }
        }
        group.sort_unstable();
        members.push(group);
    }

    (component, members)
}

/// Kahn's algorithm over the component graph; ready components are taken
/// by their smallest table name.
fn condensation_order(parents: &[Vec<usize>], component: &[usize], members: &[Vec<usize>]) -> Vec<usize> {
    let mut edges: BTreeSet<(usize, usize)> = BTreeSet::new();
    for (child, ps) in parents.iter().enumerate() {
        for &p in ps {
            if component[child] != component[p] {
                edges.insert((component[p], component[child]));
            }
        }
    }

    let mut in_degree = vec![0usize; members.len()];
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); members.len()];
    for &(from, to) in &edges {
        in_degree[to] += 1;
        downstream[from].push(to);
    }

    let mut ready: BinaryHeap<Reverse<(usize, usize)>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(c, _)| Reverse((members[c][0], c)))
        .collect();

    let mut order = Vec::with_capacity(parents.len());
    while let Some(Reverse((_, c))) = ready.pop() {
        order.extend_from_slice(&members[c]);
        for &next in &downstream[c] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse((members[next][0], next)));
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ColumnSpec, ForeignKeySpec, ReferentialAction};
    use proptest::prelude::*;

    fn table(name: &str, refs: &[&str]) -> TableSpec {
        let mut t = TableSpec::new(name, vec![ColumnSpec::new("ID", "INTEGER")]);
        t.foreign_keys = refs
            .iter()
            .enumerate()
            .map(|(i, r)| ForeignKeySpec {
                name: format!("FK_{}_{}", name, i),
                columns: vec!["ID".into()],
                ref_table: r.to_string(),
                ref_columns: vec!["ID".into()],
                on_delete: ReferentialAction::NoAction,
                on_update: ReferentialAction::NoAction,
            })
            .collect();
        t
    }

    fn position(order: &[&str], name: &str) -> usize {
        order.iter().position(|n| *n == name).unwrap()
    }

    #[test]
    fn test_parents_before_children() {
        let tables = vec![
            table("ORDER_LINE", &["ORDERS", "PRODUCT"]),
            table("ORDERS", &["CUSTOMER"]),
            table("PRODUCT", &[]),
            table("CUSTOMER", &[]),
        ];
        let g = DependencyGraph::build(&tables);
        assert_eq!(g.order(), vec!["CUSTOMER", "ORDERS", "PRODUCT", "ORDER_LINE"]);
        assert!(g.cyclic_tables().is_empty());
        assert_eq!(g.prerequisites("ORDER_LINE"), vec!["ORDERS", "PRODUCT"]);
    }

    #[test]
    fn test_self_reference_is_not_a_cycle() {
        let g = DependencyGraph::build(&[table("EMPLOYEE", &["EMPLOYEE"])]);
        assert_eq!(g.order(), vec!["EMPLOYEE"]);
        assert!(g.cyclic_tables().is_empty());
        assert!(g.prerequisites("EMPLOYEE").is_empty());
    }

    #[test]
    fn test_reference_outside_set_is_ignored() {
        let g = DependencyGraph::build(&[table("A", &["MISSING"])]);
        assert_eq!(g.order(), vec!["A"]);
        assert!(g.prerequisites("A").is_empty());
    }

    #[test]
    fn test_mutual_references_form_a_cycle() {
        let tables = vec![
            table("DEPARTMENT", &["EMPLOYEE", "COMPANY"]),
            table("EMPLOYEE", &["DEPARTMENT"]),
            table("COMPANY", &[]),
            table("PROJECT", &["EMPLOYEE"]),
        ];
        let g = DependencyGraph::build(&tables);

        assert_eq!(g.order(), vec!["COMPANY", "DEPARTMENT", "EMPLOYEE", "PROJECT"]);
        assert_eq!(g.cyclic_tables(), vec!["DEPARTMENT", "EMPLOYEE"]);
        assert!(g.is_cyclic_edge("EMPLOYEE", "DEPARTMENT"));
        assert!(!g.is_cyclic_edge("DEPARTMENT", "COMPANY"));
        assert_eq!(g.prerequisites("DEPARTMENT"), vec!["COMPANY"]);
        assert!(g.prerequisites("EMPLOYEE").is_empty());
        assert_eq!(g.prerequisites("PROJECT"), vec!["EMPLOYEE"]);
    }

    #[test]
    fn test_dependents_are_transitive() {
        let tables = vec![
            table("A", &[]),
            table("B", &["A"]),
            table("C", &["B"]),
            table("D", &[]),
        ];
        let g = DependencyGraph::build(&tables);
        let deps: Vec<String> = g.dependents_of("A").into_iter().collect();
        assert_eq!(deps, vec!["B", "C"]);
        assert!(g.dependents_of("D").is_empty());
        assert!(g.dependents_of("UNKNOWN").is_empty());
    }

    fn graph_tables(n: usize, edges: &[(usize, usize)]) -> Vec<TableSpec> {
        // Names run opposite to dependency direction so name order alone is wrong
        let name = |i: usize| format!("T{:02}", n - i);
        (0..n)
            .map(|i| {
                let refs: Vec<String> = edges
                    .iter()
                    .filter(|(c, _)| *c == i)
                    .map(|(_, p)| name(*p))
                    .collect();
                let refs: Vec<&str> = refs.iter().map(String::as_str).collect();
                table(&name(i), &refs)
            })
            .collect()
    }

    proptest! {
        #[test]
        fn prop_acyclic_graphs_respect_references(
            n in 1usize..12,
            raw_edges in prop::collection::vec((0usize..12, 0usize..12), 0..30),
        ) {
            // Only child > parent edges: guaranteed acyclic
            let edges: Vec<(usize, usize)> = raw_edges
                .into_iter()
                .map(|(a, b)| (a % n, b % n))
                .filter(|(c, p)| c > p)
                .collect();
            let tables = graph_tables(n, &edges);
            let g = DependencyGraph::build(&tables);
            let order = g.order();

            prop_assert_eq!(order.len(), n);
            prop_assert!(g.cyclic_tables().is_empty());
            for t in &tables {
                for r in t.referenced_tables() {
                    prop_assert!(position(&order, r) < position(&order, &t.name));
                }
            }
        }

        #[test]
        fn prop_cyclic_graphs_still_order_every_table(
            n in 1usize..10,
            raw_edges in prop::collection::vec((0usize..10, 0usize..10), 0..30),
        ) {
            let edges: Vec<(usize, usize)> = raw_edges
                .into_iter()
                .map(|(a, b)| (a % n, b % n))
                .collect();
            let tables = graph_tables(n, &edges);
            let g = DependencyGraph::build(&tables);
            let order = g.order();

            let unique: BTreeSet<&str> = order.iter().copied().collect();
            prop_assert_eq!(unique.len(), n);
            for t in &tables {
                for r in t.referenced_tables() {
                    if !g.is_cyclic_edge(&t.name, r) {
                        prop_assert!(position(&order, r) < position(&order, &t.name));
                    }
                }
            }
        }
    }
}
