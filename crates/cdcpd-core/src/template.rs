//! Reference template
//!
//! The template is the undeformed skeleton of the tracked object: an ordered
//! array of vertex positions plus an edge list over vertex indices. Each edge
//! stores its rest length, measured once from the construction layout:
//!
//! dₑ = ‖v_b − v_a‖,  e = (a, b)
//!
//! Rest lengths are the inextensibility bounds used by the optimizer and
//! never change after construction. Neighbor lookups go through an
//! index-based adjacency list, so the graph owns no pointers.

use std::collections::{BTreeSet, VecDeque};

use nalgebra::{DMatrix, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::TrackingError;

/// Minimum length accepted for an edge measured from a layout [m]
const MIN_EDGE_LENGTH: f64 = 1e-9;

/// Template construction parameters for a straight chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Number of vertices N (N ≥ 2)
    pub num_vertices: usize,
    /// Total rest length L of the chain [m]
    pub length: f64,
    /// Position of vertex 0 [m]
    pub origin: Vector3<f64>,
    /// Direction along which vertices are laid out (normalized on use)
    pub direction: Vector3<f64>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            num_vertices: 50,
            length: 1.0,
            origin: Vector3::zeros(),
            direction: Vector3::x(),
        }
    }
}

impl TemplateConfig {
    pub fn validate(&self) -> Result<(), TrackingError> {
        if self.num_vertices < 2 {
            return Err(TrackingError::config(format!(
                "template needs at least 2 vertices, got {}",
                self.num_vertices
            )));
        }
        if !(self.length.is_finite() && self.length > 0.0) {
            return Err(TrackingError::config(format!(
                "template length must be positive, got {}",
                self.length
            )));
        }
        if !self.origin.iter().all(|c| c.is_finite()) {
            return Err(TrackingError::config("template origin must be finite"));
        }
        let norm = self.direction.norm();
        if !(norm.is_finite() && norm > 1e-12) {
            return Err(TrackingError::config("template direction must be a non-zero vector"));
        }
        Ok(())
    }

    /// Build the chain described by this configuration
    pub fn build(&self) -> Result<Template, TrackingError> {
        self.validate()?;
        Template::line_from(self.origin, self.direction, self.length, self.num_vertices)
    }
}

/// Edge between two template vertices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// First vertex index
    pub a: usize,
    /// Second vertex index
    pub b: usize,
    /// Rest length fixed at construction [m]
    pub rest_length: f64,
}

impl Edge {
    /// The endpoint opposite to `v`
    pub fn other(&self, v: usize) -> usize {
        if v == self.a { self.b } else { self.a }
    }

    /// Current length of this edge in a configuration
    pub fn length_in(&self, vertices: &[Vector3<f64>]) -> f64 {
        (vertices[self.b] - vertices[self.a]).norm()
    }
}

/// Reference template: vertices, edges and adjacency
#[derive(Debug, Clone)]
pub struct Template {
    vertices: Vec<Vector3<f64>>,
    edges: Vec<Edge>,
    /// adjacency[i] = indices into `edges` touching vertex i
    adjacency: Vec<Vec<usize>>,
}

impl Template {
    /// Straight chain of `num_vertices` vertices along +x starting at the origin
    pub fn line(length: f64, num_vertices: usize) -> Result<Self, TrackingError> {
        Self::line_from(Vector3::zeros(), Vector3::x(), length, num_vertices)
    }

    /// Straight chain spaced L/(N-1) apart from `origin` along `direction`
    pub fn line_from(
        origin: Vector3<f64>,
        direction: Vector3<f64>,
        length: f64,
        num_vertices: usize,
    ) -> Result<Self, TrackingError> {
        if num_vertices < 2 {
            return Err(TrackingError::config(format!(
                "template needs at least 2 vertices, got {}",
                num_vertices
            )));
        }
        if !(length.is_finite() && length > 0.0) {
            return Err(TrackingError::config(format!(
                "template length must be positive, got {}",
                length
            )));
        }
        let norm = direction.norm();
        if !(norm.is_finite() && norm > 1e-12) {
            return Err(TrackingError::config("template direction must be a non-zero vector"));
        }
        let axis = direction / norm;
        let spacing = length / (num_vertices - 1) as f64;

        let vertices: Vec<Vector3<f64>> = (0..num_vertices)
            .map(|i| origin + axis * (spacing * i as f64))
            .collect();
        let pairs: Vec<(usize, usize)> = (0..num_vertices - 1).map(|i| (i, i + 1)).collect();

        Self::from_parts(vertices, &pairs)
    }

    /// General template from a vertex layout and an edge list
    ///
    /// Rest lengths are measured from `vertices`. Every vertex must be
    /// touched by at least one edge.
    pub fn from_parts(
        vertices: Vec<Vector3<f64>>,
        pairs: &[(usize, usize)],
    ) -> Result<Self, TrackingError> {
        let n = vertices.len();
        if n < 2 {
            return Err(TrackingError::config(format!(
                "template needs at least 2 vertices, got {}",
                n
            )));
        }
        if vertices.iter().any(|v| !v.iter().all(|c| c.is_finite())) {
            return Err(TrackingError::config("template vertices must be finite"));
        }

        let mut seen = BTreeSet::new();
        let mut edges = Vec::with_capacity(pairs.len());
        let mut adjacency = vec![Vec::new(); n];

        for &(a, b) in pairs {
            if a >= n || b >= n {
                return Err(TrackingError::config(format!(
                    "edge ({}, {}) references a vertex outside 0..{}",
                    a, b, n
                )));
            }
            if a == b {
                return Err(TrackingError::config(format!("edge ({}, {}) is a self-loop", a, b)));
            }
            if !seen.insert((a.min(b), a.max(b))) {
                return Err(TrackingError::config(format!("duplicate edge ({}, {})", a, b)));
            }
            let rest_length = (vertices[b] - vertices[a]).norm();
            if rest_length < MIN_EDGE_LENGTH {
                return Err(TrackingError::config(format!(
                    "edge ({}, {}) has zero rest length",
                    a, b
                )));
            }

            adjacency[a].push(edges.len());
            adjacency[b].push(edges.len());
            edges.push(Edge { a, b, rest_length });
        }

        if let Some(isolated) = adjacency.iter().position(|adj| adj.is_empty()) {
            return Err(TrackingError::config(format!("vertex {} has no edges", isolated)));
        }

        Ok(Self {
            vertices,
            edges,
            adjacency,
        })
    }

    /// Number of vertices
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Rest configuration (the layout the template was built from)
    pub fn rest_positions(&self) -> &[Vector3<f64>] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Sum of all edge rest lengths
    pub fn total_rest_length(&self) -> f64 {
        self.edges.iter().map(|e| e.rest_length).sum()
    }

    /// Indices of vertices adjacent to `v`
    pub fn neighbors(&self, v: usize) -> impl Iterator<Item = usize> + '_ {
        self.adjacency[v].iter().map(move |&e| self.edges[e].other(v))
    }

    /// Indices into [`Template::edges`] touching `v`
    pub fn incident_edges(&self, v: usize) -> &[usize] {
        &self.adjacency[v]
    }

    pub fn degree(&self, v: usize) -> usize {
        self.adjacency[v].len()
    }

    /// Graph Laplacian L = D - A over the edge structure
    ///
    /// For displacements U (M×3), tr(Uᵀ L U) = Σₑ ‖u_a − u_b‖², the
    /// motion-coherence penalty between adjacent vertices.
    pub fn laplacian(&self) -> DMatrix<f64> {
        let m = self.num_vertices();
        let mut l = DMatrix::zeros(m, m);
        for e in &self.edges {
            l[(e.a, e.a)] += 1.0;
            l[(e.b, e.b)] += 1.0;
            l[(e.a, e.b)] -= 1.0;
            l[(e.b, e.a)] -= 1.0;
        }
        l
    }

    /// Breadth-first hop distance of every vertex from a seed set
    ///
    /// Components that contain no seed are rooted at their lowest index.
    pub fn hop_distances(&self, seeds: &[usize]) -> Vec<usize> {
        let n = self.num_vertices();
        let mut dist = vec![usize::MAX; n];
        let mut queue = VecDeque::new();

        for &s in seeds {
            if s < n && dist[s] != 0 {
                dist[s] = 0;
                queue.push_back(s);
            }
        }
        self.bfs(&mut dist, &mut queue);

        // Unseeded components
        for root in 0..n {
            if dist[root] == usize::MAX {
                dist[root] = 0;
                queue.push_back(root);
                self.bfs(&mut dist, &mut queue);
            }
        }
        dist
    }

    fn bfs(&self, dist: &mut [usize], queue: &mut VecDeque<usize>) {
        while let Some(v) = queue.pop_front() {
            for u in self.neighbors(v) {
                if dist[u] == usize::MAX {
                    dist[u] = dist[v] + 1;
                    queue.push_back(u);
                }
            }
        }
    }

    /// Largest amount by which any edge exceeds `rest_length + epsilon`
    ///
    /// Returns 0 when every edge is within bounds and infinity when any
    /// edge length is not finite.
    pub fn max_violation(&self, vertices: &[Vector3<f64>], epsilon: f64) -> f64 {
        self.edges
            .iter()
            .map(|e| {
                let length = e.length_in(vertices);
                if length.is_finite() {
                    length - (e.rest_length + epsilon)
                } else {
                    f64::INFINITY
                }
            })
            .fold(0.0, f64::max)
    }
}
