//! Reverse Cuthill-McKee (RCM) reordering of a symmetric sparsity pattern.
//!
//! Reduces the bandwidth (and with it the Cholesky fill-in) of the projection systems.
//! Disconnected components are ordered one after another, each starting from a pseudo-peripheral vertex.

/// Compute an RCM ordering of the graph described by `adjacency`.
///
/// Returns `permutation` where `permutation[old_idx]` is the new index of vertex `old_idx`.
pub fn reverse_cuthill_mckee(adjacency: &[Vec<usize>]) -> Vec<usize> {
    let n = adjacency.len();
    let degree: Vec<usize> = adjacency.iter().map(|adj| adj.len()).collect();

    let mut order: Vec<usize> = Vec::with_capacity(n);
    let mut visited = vec![false; n];

    // roots are tried from the lowest degree vertex upwards so isolated vertices are handled trivially
    let mut candidates: Vec<usize> = (0..n).collect();
    candidates.sort_by_key(|&v| (degree[v], v));

    for start in candidates {
        if visited[start] {
            continue;
        }

        let root = find_pseudo_peripheral_root(adjacency, &degree, start);

        // Cuthill-McKee: breadth first, visiting unlabeled neighbors in order of increasing degree
        visited[root] = true;
        let mut frontier = vec![root];
        while !frontier.is_empty() {
            order.extend(frontier.iter().copied());

            let mut next = Vec::new();
            for &u in frontier.iter() {
                let mut neighbors: Vec<usize> = adjacency[u]
                    .iter()
                    .copied()
                    .filter(|&v| !visited[v])
                    .collect();
                neighbors.sort_by_key(|&v| (degree[v], v));
                neighbors.dedup();

                for v in neighbors {
                    if !visited[v] {
                        visited[v] = true;
                        next.push(v);
                    }
                }
            }
            frontier = next;
        }
    }

    // reverse the labels
    let mut permutation = vec![0; n];
    for (label, vertex) in order.into_iter().rev().enumerate() {
        permutation[vertex] = label;
    }
    permutation
}

/// Find a pseudo-peripheral vertex in the component containing `start` (George-Liu level structure iteration)
fn find_pseudo_peripheral_root(adjacency: &[Vec<usize>], degree: &[usize], start: usize) -> usize {
    let mut root = start;
    let mut last_depth = 0;

    loop {
        let levels = level_structure(adjacency, root);
        let depth = levels.len();

        // From the last level, pick the vertex of minimum degree
        let candidate = levels
            .last()
            .and_then(|last| last.iter().copied().min_by_key(|&v| (degree[v], v)))
            .unwrap_or(root);

        if depth <= last_depth {
            break;
        }
        last_depth = depth;
        root = candidate;
    }

    root
}

fn level_structure(adjacency: &[Vec<usize>], root: usize) -> Vec<Vec<usize>> {
    let mut visited = vec![false; adjacency.len()];
    visited[root] = true;

    let mut levels = vec![vec![root]];
    loop {
        let mut next = Vec::new();
        if let Some(last) = levels.last() {
            for &u in last {
                for &v in adjacency[u].iter() {
                    if !visited[v] {
                        visited[v] = true;
                        next.push(v);
                    }
                }
            }
        }
        if next.is_empty() {
            break;
        }
        levels.push(next);
    }
    levels
}

/// Maximum distance from the diagonal of any entry under a permutation
pub fn bandwidth(adjacency: &[Vec<usize>], permutation: &[usize]) -> usize {
    adjacency
        .iter()
        .enumerate()
        .flat_map(|(u, adj)| adj.iter().map(move |&v| (u, v)))
        .map(|(u, v)| permutation[u].abs_diff(permutation[v]))
        .max()
        .unwrap_or(0)
}
