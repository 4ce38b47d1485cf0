//! Isosurface extraction
//!
//! Marching cubes over a scalar snapshot. Vertices are placed in world
//! coordinates and shared between triangles through a cache keyed by grid
//! edge, so the mesh is indexed rather than a triangle soup. Normals come
//! from the central-difference gradient of the field and point down the
//! gradient, out of the region above the threshold. Marching can be limited
//! to a range of cells while gradients still see the whole grid, which is how
//! decomposed pieces get border normals that match their neighbours.

use std::collections::HashMap;
use std::ops::Range;

use isotile_io::VolumeSample;
use marching_cubes::tables::{EDGE_TABLE, TRI_TABLE};
use ndarray::ArrayView3;

use crate::error::ExtractionError;
use crate::mesh::Mesh;

/// Corner offsets (i, j, k) in table order
const CUBE_CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

const CUBE_EDGE_CORNERS: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 0),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Extract the surface where a scalar snapshot crosses `threshold`
///
/// A field with no crossing, or a grid thinner than two samples on any
/// axis, yields an empty mesh.
pub fn extract_scalar(sample: &VolumeSample, threshold: f64) -> Result<Mesh, ExtractionError> {
    let cells = sample.dims.map(|n| 0..n.saturating_sub(1));
    extract_cells(sample, &cells, threshold)
}

/// Extract the surface inside `cells` only
///
/// Cell `(i, j, k)` spans grid points `i..=i + 1` and so on; ranges are
/// clipped to the grid.
pub fn extract_cells(
    sample: &VolumeSample,
    cells: &[Range<usize>; 3],
    threshold: f64,
) -> Result<Mesh, ExtractionError> {
    if sample.datalen() != 1 {
        return Err(ExtractionError::NotScalar {
            veclen: sample.veclen,
        });
    }
    if !threshold.is_finite() {
        return Err(ExtractionError::InvalidThreshold { value: threshold });
    }

    let [nx, ny, nz] = sample.dims;
    if nx < 2 || ny < 2 || nz < 2 {
        return Ok(Mesh::new());
    }
    let field = ArrayView3::from_shape((nz, ny, nx), sample.samples.as_slice())?;

    let mut extractor = Extractor {
        field,
        origin: sample.origin,
        pitch: sample.pitch,
        threshold,
        cache: HashMap::new(),
        mesh: Mesh::new(),
    };

    let clip = |a: usize, n: usize| cells[a].start..cells[a].end.min(n - 1);
    for k in clip(2, nz) {
        for j in clip(1, ny) {
            for i in clip(0, nx) {
                extractor.march_cell(i, j, k);
            }
        }
    }

    tracing::trace!(
        "Extracted {} vertices, {} triangles at {}",
        extractor.mesh.vertex_count(),
        extractor.mesh.triangle_count(),
        threshold
    );
    Ok(extractor.mesh)
}

struct Extractor<'a> {
    field: ArrayView3<'a, f64>,
    origin: [f64; 3],
    pitch: [f64; 3],
    threshold: f64,
    /// (flat index of the lower grid point, axis) -> vertex index
    cache: HashMap<(usize, usize), u32>,
    mesh: Mesh,
}

impl Extractor<'_> {
    fn value(&self, p: [usize; 3]) -> f64 {
        self.field[[p[2], p[1], p[0]]]
    }

    fn march_cell(&mut self, i: usize, j: usize, k: usize) {
        let corners = CUBE_CORNERS.map(|o| [i + o[0], j + o[1], k + o[2]]);
        let values = corners.map(|p| self.value(p));

        let mut cube_index = 0usize;
        for (corner, value) in values.iter().enumerate() {
            if *value < self.threshold {
                cube_index |= 1 << corner;
            }
        }
        let edge_mask = EDGE_TABLE[cube_index] as i32;
        if edge_mask == 0 {
            return;
        }

        let mut edge_vertices = [0u32; 12];
        for edge in 0..12usize {
            if (edge_mask & (1 << edge)) == 0 {
                continue;
            }
            let (ca, cb) = CUBE_EDGE_CORNERS[edge];
            edge_vertices[edge] = self.edge_vertex(corners[ca], corners[cb], values[ca], values[cb]);
        }

        let tri_row = TRI_TABLE[cube_index];
        let mut tri_offset = 0usize;
        while tri_offset + 2 < tri_row.len() && tri_row[tri_offset] != -1 {
            let e0 = tri_row[tri_offset] as usize;
            let e1 = tri_row[tri_offset + 1] as usize;
            let e2 = tri_row[tri_offset + 2] as usize;
            self.mesh
                .triangles
                .push([edge_vertices[e0], edge_vertices[e1], edge_vertices[e2]]);
            tri_offset += 3;
        }
    }

    /// Vertex on the grid edge between `a` and `b`, created on first use
    fn edge_vertex(&mut self, a: [usize; 3], b: [usize; 3], va: f64, vb: f64) -> u32 {
        let (lo, hi, v_lo, v_hi) = if a <= b { (a, b, va, vb) } else { (b, a, vb, va) };
        let axis = (0..3).find(|&ax| lo[ax] != hi[ax]).unwrap_or(0);
        let (_, ny, nx) = self.field.dim();
        let key = ((lo[2] * ny + lo[1]) * nx + lo[0], axis);
        if let Some(&index) = self.cache.get(&key) {
            return index;
        }

        let t = interpolate_factor(v_lo - self.threshold, v_hi - self.threshold);
        let mut position = [0f32; 3];
        let g_lo = self.gradient(lo);
        let g_hi = self.gradient(hi);
        let mut normal = [0f64; 3];
        for ax in 0..3 {
            let x_lo = self.origin[ax] + self.pitch[ax] * lo[ax] as f64;
            let x_hi = self.origin[ax] + self.pitch[ax] * hi[ax] as f64;
            position[ax] = (x_lo + (x_hi - x_lo) * t) as f32;
            normal[ax] = -(g_lo[ax] + (g_hi[ax] - g_lo[ax]) * t);
        }

        let index = self.mesh.positions.len() as u32;
        self.mesh.positions.push(position);
        self.mesh.normals.push(normalize(normal));
        self.cache.insert(key, index);
        index
    }

    /// Central-difference gradient in world units, one-sided at the border
    fn gradient(&self, p: [usize; 3]) -> [f64; 3] {
        let (nz, ny, nx) = self.field.dim();
        let n = [nx, ny, nz];
        let mut g = [0.0; 3];
        for ax in 0..3 {
            let mut lo = p;
            let mut hi = p;
            if p[ax] > 0 {
                lo[ax] -= 1;
            }
            if p[ax] + 1 < n[ax] {
                hi[ax] += 1;
            }
            let span = (hi[ax] - lo[ax]) as f64 * self.pitch[ax];
            if span > 0.0 {
                g[ax] = (self.value(hi) - self.value(lo)) / span;
            }
        }
        g
    }
}

fn interpolate_factor(v0: f64, v1: f64) -> f64 {
    let denominator = v0 - v1;
    if denominator.abs() <= 1e-12 {
        0.5
    } else {
        (v0 / denominator).clamp(0.0, 1.0)
    }
}

fn normalize(v: [f64; 3]) -> [f32; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len <= f64::EPSILON {
        return [0.0, 0.0, 1.0];
    }
    [(v[0] / len) as f32, (v[1] / len) as f32, (v[2] / len) as f32]
}

/// Reduce a vector snapshot to the per-point Euclidean norm
pub fn vector_magnitude(sample: &VolumeSample) -> VolumeSample {
    let datalen = sample.datalen();
    let samples = sample
        .samples
        .chunks_exact(datalen)
        .map(|v| v.iter().map(|c| c * c).sum::<f64>().sqrt())
        .collect();

    let mut reduced = VolumeSample {
        dims: sample.dims,
        origin: sample.origin,
        pitch: sample.pitch,
        veclen: 1,
        precision: sample.precision,
        step: sample.step,
        time: sample.time,
        samples,
        min: Vec::new(),
        max: Vec::new(),
    };
    reduced.recompute_min_max();
    reduced
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field<F: Fn(f64, f64, f64) -> f64>(dims: [usize; 3], pitch: f64, f: F) -> VolumeSample {
        let mut data = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    data.push(f(i as f64 * pitch, j as f64 * pitch, k as f64 * pitch));
                }
            }
        }
        VolumeSample::from_samples(dims, [0.0; 3], [pitch; 3], 1, data).unwrap()
    }

    #[test]
    fn test_all_zero_field_is_empty() {
        let sample = field([4, 4, 4], 1.0, |_, _, _| 0.0);
        let mesh = extract_scalar(&sample, 1.0).unwrap();
        assert!(mesh.is_empty());
        assert_eq!(mesh.vertex_count(), 0);
    }

    #[test]
    fn test_thin_grid_is_empty() {
        let sample = field([1, 4, 4], 1.0, |_, y, _| y);
        assert!(extract_scalar(&sample, 1.5).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_vector_data() {
        let sample = VolumeSample::from_samples([2, 2, 2], [0.0; 3], [1.0; 3], 3, vec![0.0; 24])
            .unwrap();
        assert!(matches!(
            extract_scalar(&sample, 0.5),
            Err(ExtractionError::NotScalar { veclen: 3 })
        ));
    }

    #[test]
    fn test_rejects_nan_threshold() {
        let sample = field([2, 2, 2], 1.0, |x, _, _| x);
        assert!(matches!(
            extract_scalar(&sample, f64::NAN),
            Err(ExtractionError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_plane_in_world_coordinates() {
        let sample = field([3, 3, 3], 0.5, |x, _, _| x);
        let mesh = extract_scalar(&sample, 0.75).unwrap();
        assert!(!mesh.is_empty());
        for p in &mesh.positions {
            assert!((p[0] - 0.75).abs() < 1e-6);
        }
        for n in &mesh.normals {
            assert!((n[0] + 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_vertices_are_shared() {
        let sample = field([3, 3, 3], 1.0, |x, _, _| x);
        let mesh = extract_scalar(&sample, 0.5).unwrap();
        // The plane x = 0.5 crosses 9 y-z grid lines
        assert_eq!(mesh.vertex_count(), 9);
        assert_eq!(mesh.triangle_count(), 8);
    }

    #[test]
    fn test_sphere_normals_point_outward() {
        let c = 3.0;
        let sample = field([7, 7, 7], 1.0, |x, y, z| {
            -((x - c).powi(2) + (y - c).powi(2) + (z - c).powi(2)).sqrt()
        });
        let mesh = extract_scalar(&sample, -2.0).unwrap();
        assert!(!mesh.is_empty());
        for (p, n) in mesh.positions.iter().zip(&mesh.normals) {
            let radial = [p[0] - 3.0, p[1] - 3.0, p[2] - 3.0];
            let dot = radial[0] * n[0] + radial[1] * n[1] + radial[2] * n[2];
            assert!(dot > 0.0);
            let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
            assert!((len - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_cell_range_limits_marching() {
        let sample = field([5, 3, 3], 1.0, |x, _, _| x);
        let mesh = extract_cells(&sample, &[0..2, 0..2, 0..2], 2.5).unwrap();
        assert!(mesh.is_empty());

        let mesh = extract_cells(&sample, &[2..9, 0..2, 0..2], 2.5).unwrap();
        assert_eq!(mesh, extract_scalar(&sample, 2.5).unwrap());
    }

    #[test]
    fn test_border_gradient_uses_cells_outside_range() {
        let sample = field([5, 3, 3], 1.0, |x, _, _| x * x);
        // The crossing lies in cell 1 on x; its upper corner's gradient
        // reaches grid plane 3, outside the range
        let inner = extract_cells(&sample, &[1..2, 0..2, 0..2], 3.9).unwrap();
        let whole = extract_scalar(&sample, 3.9).unwrap();
        assert!(!inner.is_empty());
        assert_eq!(inner.normals[0], whole.normals[0]);
        assert!((inner.normals[0][0] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_vector_magnitude_uniform() {
        let data = [3.0, 4.0, 0.0].repeat(8);
        let sample = VolumeSample::from_samples([2, 2, 2], [0.0; 3], [1.0; 3], 3, data)
            .unwrap()
            .with_step(4, 0.5);
        let scalar = vector_magnitude(&sample);
        assert_eq!(scalar.veclen, 1);
        assert!(scalar.samples.iter().all(|&v| v == 5.0));
        assert_eq!(scalar.min, vec![5.0]);
        assert_eq!(scalar.max, vec![5.0]);
        assert_eq!(scalar.step, 4);
    }
}
