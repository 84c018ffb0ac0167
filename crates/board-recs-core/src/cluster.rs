use std::collections::{HashMap, VecDeque};

use rayon::prelude::*;

use crate::text::{cosine_similarity, TermVector};

/// Kept similarity edge between two document indices, `lhs < rhs`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityEdge {
    pub lhs: usize,
    pub rhs: usize,
    pub score: f64,
}

/// One connected component of two or more documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Document indices in traversal order.
    pub members: Vec<usize>,
    pub score: f64,
}

/// Groups documents whose pairwise similarity reaches `threshold`.
#[derive(Debug, Clone, Copy)]
pub struct RelationClusterer {
    threshold: f64,
}

impl RelationClusterer {
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// All pairs `(i, j)` with `i < j` at or above the threshold, ordered by `i` then `j`.
    #[must_use]
    pub fn edges(&self, vectors: &[TermVector]) -> Vec<SimilarityEdge> {
        let count = vectors.len();
        (0..count)
            .into_par_iter()
            .flat_map_iter(|lhs| {
                ((lhs + 1)..count).filter_map(move |rhs| {
                    let score = cosine_similarity(&vectors[lhs], &vectors[rhs]);
                    (score >= self.threshold).then_some(SimilarityEdge { lhs, rhs, score })
                })
            })
            .collect()
    }

    /// Connected components of size two or more, in discovery order.
    #[must_use]
    pub fn cluster(&self, vectors: &[TermVector]) -> Vec<Cluster> {
        let edges = self.edges(vectors);
        let count = vectors.len();

        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut edge_scores: HashMap<(usize, usize), f64> = HashMap::with_capacity(edges.len());
        for edge in &edges {
            adjacency[edge.lhs].push(edge.rhs);
            adjacency[edge.rhs].push(edge.lhs);
            edge_scores.insert((edge.lhs, edge.rhs), edge.score);
        }

        let mut visited = vec![false; count];
        let mut clusters = Vec::new();
        for start in 0..count {
            if visited[start] {
                continue;
            }

            let members = traverse(start, &adjacency, &mut visited);
            if members.len() < 2 {
                continue;
            }

            let score = average_direct_similarity(&members, &edge_scores);
            clusters.push(Cluster { members, score });
        }

        tracing::debug!(
            documents = count,
            edges = edges.len(),
            clusters = clusters.len(),
            threshold = self.threshold,
            "relation clustering finished"
        );
        clusters
    }
}

fn traverse(start: usize, adjacency: &[Vec<usize>], visited: &mut [bool]) -> Vec<usize> {
    let mut queue = VecDeque::from([start]);
    let mut members = Vec::new();
    visited[start] = true;

    while let Some(current) = queue.pop_front() {
        members.push(current);
        for &neighbour in &adjacency[current] {
            if !visited[neighbour] {
                visited[neighbour] = true;
                queue.push_back(neighbour);
            }
        }
    }

    members
}

/// Mean over member pairs joined by a direct edge; transitive-only pairs are ignored.
#[allow(clippy::cast_precision_loss)]
fn average_direct_similarity(members: &[usize], edge_scores: &HashMap<(usize, usize), f64>) -> f64 {
    let mut total = 0.0;
    let mut pairs = 0_usize;
    for (position, &lhs) in members.iter().enumerate() {
        for &rhs in &members[position + 1..] {
            let key = (lhs.min(rhs), lhs.max(rhs));
            if let Some(score) = edge_scores.get(&key) {
                total += score;
                pairs += 1;
            }
        }
    }

    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SIMILARITY_THRESHOLD;

    fn vectors(texts: &[&str]) -> Vec<TermVector> {
        texts.iter().map(|text| TermVector::from_text(text)).collect()
    }

    fn clusterer() -> RelationClusterer {
        RelationClusterer::new(DEFAULT_SIMILARITY_THRESHOLD)
    }

    #[test]
    fn identical_titles_share_a_cluster() {
        let docs = vectors(&[
            "Fix urgent login bug asap",
            "Write quarterly newsletter",
            "Fix urgent login bug asap",
        ]);
        let clusters = clusterer().cluster(&docs);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, vec![0, 2]);
        assert!((clusters[0].score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unrelated_documents_form_no_cluster() {
        let docs = vectors(&["Plan holiday party", "Rotate database credentials", ""]);
        assert!(clusterer().cluster(&docs).is_empty());
    }

    #[test]
    fn empty_input_has_no_edges_or_clusters() {
        assert!(clusterer().edges(&[]).is_empty());
        assert!(clusterer().cluster(&[]).is_empty());
    }

    #[test]
    fn edges_respect_threshold_inclusively() {
        // One shared term out of four on each side: 1 / 4 = 0.25.
        let docs = vectors(&["alpha bravo charlie delta", "alpha echo foxtrot golf"]);
        let edges = clusterer().edges(&docs);
        assert_eq!(edges.len(), 1);
        assert_eq!((edges[0].lhs, edges[0].rhs), (0, 1));
        assert!((edges[0].score - 0.25).abs() < 1e-12);

        let strict = RelationClusterer::new(0.3);
        assert!(strict.edges(&docs).is_empty());
    }

    #[test]
    fn unequal_norms_meeting_threshold_keep_their_edge() {
        // 1 / sqrt(2 * 8) is exactly 0.25.
        let docs = vectors(&["alpha bravo", "alpha charlie delta echo foxtrot golf hotel india"]);
        let clusters = clusterer().cluster(&docs);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, vec![0, 1]);
    }

    #[test]
    fn chain_components_average_only_direct_edges() {
        // 0-1 and 1-2 are linked, 0-2 share nothing.
        let docs = vectors(&["alpha bravo", "bravo charlie", "charlie delta"]);
        let clusters = clusterer().cluster(&docs);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members, vec![0, 1, 2]);
        assert!((clusters[0].score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn components_are_reported_in_discovery_order() {
        let docs = vectors(&[
            "release checklist draft",
            "invoice vendor payment",
            "release checklist final",
            "invoice vendor reminder",
        ]);
        let clusters = clusterer().cluster(&docs);
        let members = clusters.iter().map(|cluster| cluster.members.clone()).collect::<Vec<_>>();
        assert_eq!(members, vec![vec![0, 2], vec![1, 3]]);
    }

    #[test]
    fn traversal_follows_breadth_first_order() {
        let adjacency = vec![vec![2, 1], vec![0, 3], vec![0], vec![1]];
        let mut visited = vec![false; 4];
        assert_eq!(traverse(0, &adjacency, &mut visited), vec![0, 2, 1, 3]);
        assert!(visited.iter().all(|seen| *seen));
    }
}
