//! Grouping of a unit's functions into independently compiled partitions.

use std::collections::HashMap;

use lazyjit_config::PartitionPolicy;
use lazyjit_core::CompilationUnit;

/// Splits the functions of `unit` into groups of indices into `unit.functions`.
///
/// Groups are sorted by their smallest member and members are ascending, so
/// the result is deterministic for a given unit.
pub fn partition(unit: &CompilationUnit, policy: PartitionPolicy) -> Vec<Vec<usize>> {
    let count = unit.functions.len();
    match policy {
        PartitionPolicy::PerFunction => (0..count).map(|i| vec![i]).collect(),
        PartitionPolicy::WholeModule if count == 0 => Vec::new(),
        PartitionPolicy::WholeModule => vec![(0..count).collect()],
        PartitionPolicy::StronglyConnected => strongly_connected(unit),
    }
}

/// Call graph components: mutually recursive functions share a partition.
fn strongly_connected(unit: &CompilationUnit) -> Vec<Vec<usize>> {
    let index_of: HashMap<&str, usize> = unit
        .functions
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name.as_str(), i))
        .collect();
    let edges: Vec<Vec<usize>> = unit
        .functions
        .iter()
        .map(|f| {
            let mut callees: Vec<usize> = f
                .body
                .referenced_functions()
                .into_iter()
                .filter_map(|name| index_of.get(name).copied())
                .collect();
            callees.sort_unstable();
            callees.dedup();
            callees
        })
        .collect();

    let mut tarjan = Tarjan::new(&edges);
    for v in 0..edges.len() {
        if tarjan.index[v].is_none() {
            tarjan.visit(v);
        }
    }

    let mut components = tarjan.components;
    for component in &mut components {
        component.sort_unstable();
    }
    components.sort_by_key(|c| c[0]);
    components
}

struct Tarjan<'a> {
    edges: &'a [Vec<usize>],
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next: usize,
    components: Vec<Vec<usize>>,
}

impl<'a> Tarjan<'a> {
    fn new(edges: &'a [Vec<usize>]) -> Self {
        let n = edges.len();
        Self {
            edges,
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next: 0,
            components: Vec::new(),
        }
    }

    fn visit(&mut self, v: usize) {
        self.index[v] = Some(self.next);
        self.lowlink[v] = self.next;
        self.next += 1;
        self.stack.push(v);
        self.on_stack[v] = true;

        let edges = self.edges;
        for &w in &edges[v] {
            match self.index[w] {
                None => {
                    self.visit(w);
                    self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                }
                Some(w_index) if self.on_stack[w] => {
                    self.lowlink[v] = self.lowlink[v].min(w_index);
                }
                Some(_) => {}
            }
        }

        if self.index[v] == Some(self.lowlink[v]) {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}
