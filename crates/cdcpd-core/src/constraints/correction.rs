//! Local-correction fallback
//!
//! Used when the constrained solve fails. Anchors are snapped into place,
//! then every violated edge is repaired by sliding its endpoint farther
//! from the anchors along the edge until the edge has exactly its rest
//! length. Edges are visited outward from the anchor set (or from vertex 0
//! when nothing is anchored), so for a chain each repair only moves
//! vertices whose incident edges have not been visited yet.

use nalgebra::Vector3;

use super::Anchor;
use crate::template::Template;

/// Outcome of a local correction
#[derive(Debug, Clone)]
pub struct CorrectionReport {
    pub vertices: Vec<Vector3<f64>>,
    /// Number of edges that were repaired
    pub corrected_edges: usize,
    /// Largest remaining excess over rest + ε [m]
    pub residual_violation: f64,
}

/// Edge visiting order for [`local_correction`]
///
/// Edges are sorted by the hop distance of their nearer endpoint from the
/// anchored vertices, ties broken by edge index. For an unanchored chain
/// this is plain increasing index order.
pub fn correction_order(template: &Template, anchors: &[usize]) -> Vec<usize> {
    let hops = template.hop_distances(anchors);
    let mut order: Vec<usize> = (0..template.edges().len()).collect();
    order.sort_by_key(|&k| {
        let e = &template.edges()[k];
        (hops[e.a].min(hops[e.b]), k)
    });
    order
}

/// Repair `candidate` edge by edge
///
/// `order` is the output of [`correction_order`] for the same template and
/// anchors.
pub fn local_correction(
    template: &Template,
    candidate: &[Vector3<f64>],
    anchors: &[Anchor],
    epsilon: f64,
    order: &[usize],
) -> CorrectionReport {
    // Non-finite vertices restart from the rest pose
    let mut x: Vec<Vector3<f64>> = candidate
        .iter()
        .zip(template.rest_positions())
        .map(|(c, rest)| if c.iter().all(|v| v.is_finite()) { *c } else { *rest })
        .collect();
    let mut anchored = vec![false; x.len()];
    for anchor in anchors {
        x[anchor.index] = anchor.position;
        anchored[anchor.index] = true;
    }

    let anchor_indices: Vec<usize> = anchors.iter().map(|a| a.index).collect();
    let hops = template.hop_distances(&anchor_indices);

    let mut corrected_edges = 0;
    for &k in order {
        let edge = &template.edges()[k];
        let length = edge.length_in(&x);
        if length <= edge.rest_length + epsilon {
            continue;
        }

        let (near, far) = match (anchored[edge.a], anchored[edge.b]) {
            (true, true) => continue,
            (true, false) => (edge.a, edge.b),
            (false, true) => (edge.b, edge.a),
            (false, false) => {
                if (hops[edge.a], edge.a) > (hops[edge.b], edge.b) {
                    (edge.b, edge.a)
                } else {
                    (edge.a, edge.b)
                }
            }
        };

        let direction = edge_direction(&x[near], &x[far], length);
        x[far] = x[near] + direction * edge.rest_length;
        corrected_edges += 1;
    }

    let residual_violation = template.max_violation(&x, epsilon);
    CorrectionReport {
        vertices: x,
        corrected_edges,
        residual_violation,
    }
}

/// Unit vector from `near` to `far`
///
/// `length` is their distance, which overflows for far-apart finite points;
/// the difference is then formed on rescaled coordinates.
fn edge_direction(near: &Vector3<f64>, far: &Vector3<f64>, length: f64) -> Vector3<f64> {
    if length.is_finite() {
        return (far - near) / length;
    }
    let scale = near.amax().max(far.amax());
    let d = far / scale - near / scale;
    let norm = d.norm();
    if norm.is_finite() && norm > 0.0 {
        d / norm
    } else {
        Vector3::x()
    }
}
