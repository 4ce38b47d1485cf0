//! Edge-sharing spatial decomposition
//!
//! Splits a grid into sub-grids that overlap by exactly one sample layer at
//! every internal boundary, so surfaces extracted independently from
//! neighbouring pieces meet without cracks.

use std::ops::Range;

use isotile_io::VolumeSample;
use serde::{Deserialize, Serialize};

use crate::error::DecompositionError;

/// Layout of one axis split into `divisor` overlapping pieces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisSplit {
    /// Samples along the axis
    pub len: usize,
    /// Number of pieces
    pub divisor: usize,
    /// Size of every piece but the last
    pub base: usize,
    /// Size of the last piece
    pub last: usize,
}

impl AxisSplit {
    /// First sample index of piece `n`
    pub fn start(&self, n: usize) -> usize {
        n * (self.base - 1)
    }

    /// Sample count of piece `n`
    pub fn size(&self, n: usize) -> usize {
        if n + 1 == self.divisor {
            self.last
        } else {
            self.base
        }
    }

    /// `(start, size)` of every piece in order
    pub fn pieces(&self) -> Vec<(usize, usize)> {
        (0..self.divisor).map(|n| (self.start(n), self.size(n))).collect()
    }
}

/// Split `len` samples on `axis` into `divisor` pieces sharing one sample at
/// each boundary
pub fn split_axis(axis: usize, len: usize, divisor: usize) -> Result<AxisSplit, DecompositionError> {
    if divisor == 0 {
        return Err(DecompositionError::ZeroDivisor { axis });
    }

    let base = (len / divisor + usize::from(divisor != 1)) as i64;
    let last = len as i64 - (base - 1) * (divisor as i64 - 1);
    if base < 2 || last < 2 {
        return Err(DecompositionError::Degenerate {
            axis,
            len,
            divisor,
            base,
            last,
        });
    }

    Ok(AxisSplit {
        len,
        divisor,
        base: base as usize,
        last: last as usize,
    })
}

/// Per-axis layout for a grid of `dims` split by `divisors`
pub fn layout(dims: [usize; 3], divisors: [usize; 3]) -> Result<[AxisSplit; 3], DecompositionError> {
    Ok([
        split_axis(0, dims[0], divisors[0])?,
        split_axis(1, dims[1], divisors[1])?,
        split_axis(2, dims[2], divisors[2])?,
    ])
}

/// Sub-grid handed to extraction
///
/// `grid` holds the piece plus one layer of each existing neighbour, and
/// `cells` the range of cells, in `grid` indices, the piece owns. Gradients
/// at the piece border are then taken across the boundary, so neighbouring
/// tiles agree on the normals of the vertices they share.
#[derive(Debug, Clone, PartialEq)]
pub struct Piece {
    pub grid: VolumeSample,
    pub cells: [Range<usize>; 3],
}

impl Piece {
    /// Piece owning every cell of `grid`
    pub fn whole(grid: VolumeSample) -> Self {
        let cells = grid.dims.map(|n| 0..n.saturating_sub(1));
        Self { grid, cells }
    }

    /// World-space `[min_corner, max_corner]` of the owned cells
    pub fn bounds(&self) -> [[f64; 3]; 2] {
        let mut bounds = [[0.0; 3]; 2];
        for a in 0..3 {
            let at = |n: usize| self.grid.origin[a] + self.grid.pitch[a] * n as f64;
            bounds[0][a] = at(self.cells[a].start);
            bounds[1][a] = at(self.cells[a].end);
        }
        bounds
    }
}

impl From<VolumeSample> for Piece {
    fn from(grid: VolumeSample) -> Self {
        Piece::whole(grid)
    }
}

/// Split a snapshot into overlapping sub-grids
///
/// Pieces are emitted with x varying fastest, then y, then z. Vector
/// length, precision, step, time and value range are copied from the parent.
pub fn decompose(
    sample: &VolumeSample,
    divisors: [usize; 3],
) -> Result<Vec<VolumeSample>, DecompositionError> {
    let splits = layout(sample.dims, divisors)?;
    let pieces: Vec<VolumeSample> = piece_blocks(&splits)
        .into_iter()
        .map(|(start, size)| sub_grid(sample, start, size))
        .collect();

    tracing::debug!(
        "Decomposed {:?} by {:?} into {} pieces",
        sample.dims,
        divisors,
        pieces.len()
    );
    Ok(pieces)
}

/// Split a snapshot like [`decompose`], widening every piece by one ghost
/// layer towards each neighbour
pub fn decompose_with_ghosts(
    sample: &VolumeSample,
    divisors: [usize; 3],
) -> Result<Vec<Piece>, DecompositionError> {
    let splits = layout(sample.dims, divisors)?;
    let pieces: Vec<Piece> = piece_blocks(&splits)
        .into_iter()
        .map(|(start, size)| {
            let lo = start.map(|s| s.saturating_sub(1));
            let mut hi = [0; 3];
            for a in 0..3 {
                hi[a] = (start[a] + size[a] + 1).min(sample.dims[a]);
            }
            let grid = sub_grid(sample, lo, [hi[0] - lo[0], hi[1] - lo[1], hi[2] - lo[2]]);
            let cells = [0, 1, 2].map(|a| {
                let first = start[a] - lo[a];
                first..first + size[a] - 1
            });
            Piece { grid, cells }
        })
        .collect();

    tracing::debug!(
        "Decomposed {:?} by {:?} into {} ghosted pieces",
        sample.dims,
        divisors,
        pieces.len()
    );
    Ok(pieces)
}

/// `(start, size)` of every piece, x fastest
fn piece_blocks(splits: &[AxisSplit; 3]) -> Vec<([usize; 3], [usize; 3])> {
    let [sx, sy, sz] = splits;
    let mut blocks = Vec::with_capacity(sx.divisor * sy.divisor * sz.divisor);
    for (k0, nz) in sz.pieces() {
        for (j0, ny) in sy.pieces() {
            for (i0, nx) in sx.pieces() {
                blocks.push(([i0, j0, k0], [nx, ny, nz]));
            }
        }
    }
    blocks
}

/// Copy of the block of `size` samples starting at `start`
fn sub_grid(sample: &VolumeSample, start: [usize; 3], size: [usize; 3]) -> VolumeSample {
    let [i0, j0, k0] = start;
    let [nx, ny, nz] = size;
    let datalen = sample.datalen();

    let mut samples = Vec::with_capacity(nx * ny * nz * datalen);
    for k in k0..k0 + nz {
        for j in j0..j0 + ny {
            let row = sample.point_index(i0, j, k);
            samples.extend_from_slice(&sample.samples[row..row + nx * datalen]);
        }
    }

    let mut origin = sample.origin;
    for a in 0..3 {
        origin[a] += sample.pitch[a] * start[a] as f64;
    }

    VolumeSample {
        dims: size,
        origin,
        pitch: sample.pitch,
        veclen: sample.veclen,
        precision: sample.precision,
        step: sample.step,
        time: sample.time,
        samples,
        min: sample.min.clone(),
        max: sample.max.clone(),
    }
}
