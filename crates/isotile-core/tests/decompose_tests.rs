//! Decomposition integration tests
//!
//! Enhanced with property-based testing

mod common;

use common::fixtures::{scalar_field, stitch};
use isotile_core::decompose::{decompose, decompose_with_ghosts, layout};
use isotile_core::isotile_io::VolumeSample;
use isotile_core::DecompositionError;
use proptest::prelude::*;
use rstest::rstest;

#[test]
fn test_two_way_split_round_trip() {
    let sample = scalar_field([5, 5, 5], |i, j, k| (i * 100 + j * 10 + k) as f64);
    let pieces = decompose(&sample, [2, 1, 1]).unwrap();
    assert_eq!(pieces.len(), 2);
    assert!(pieces.iter().all(|p| p.dims == [3, 5, 5]));

    let grid = layout(sample.dims, [2, 1, 1]).unwrap();
    assert_eq!(stitch(&pieces, &grid, 1), sample.samples);
}

#[test]
fn test_identity_split_is_the_input() {
    let sample = scalar_field([4, 3, 2], |i, j, k| (i + 2 * j + 3 * k) as f64);
    assert_eq!(decompose(&sample, [1, 1, 1]).unwrap(), vec![sample]);
}

#[rstest]
#[case([3, 4, 4], [3, 1, 1])]
#[case([4, 2, 4], [1, 2, 1])]
#[case([4, 4, 5], [1, 1, 5])]
fn test_degenerate_combinations_rejected(#[case] dims: [usize; 3], #[case] divisors: [usize; 3]) {
    let sample = scalar_field(dims, |_, _, _| 0.0);
    assert!(matches!(
        decompose(&sample, divisors),
        Err(DecompositionError::Degenerate { .. })
    ));
}

#[test]
fn test_neighbour_origins_on_shared_layer() {
    let mut sample = scalar_field([7, 5, 6], |i, _, _| i as f64);
    sample.origin = [-1.0, 0.5, 2.0];
    sample.pitch = [0.25, 0.5, 2.0];
    let pieces = decompose(&sample, [3, 2, 2]).unwrap();
    let grid = layout(sample.dims, [3, 2, 2]).unwrap();

    for (n, piece) in pieces.iter().enumerate() {
        let idx = [n % 3, (n / 3) % 2, n / 6];
        for a in 0..3 {
            let expected = sample.origin[a] + sample.pitch[a] * grid[a].start(idx[a]) as f64;
            assert!((piece.origin[a] - expected).abs() < 1e-12);
        }
    }
}

fn vector_sample(dims: [usize; 3]) -> VolumeSample {
    let n = dims[0] * dims[1] * dims[2] * 3;
    let data = (0..n).map(|v| v as f64 * 0.5).collect();
    VolumeSample::from_samples(dims, [0.0; 3], [1.0; 3], 3, data).unwrap()
}

#[test]
fn test_vector_round_trip() {
    let sample = vector_sample([6, 5, 4]);
    let pieces = decompose(&sample, [2, 2, 1]).unwrap();
    let grid = layout(sample.dims, [2, 2, 1]).unwrap();
    assert_eq!(stitch(&pieces, &grid, 3), sample.samples);
}

proptest! {
    #[test]
    fn test_round_trip_reproduces_grid(
        nx in 2usize..12, ny in 2usize..12, nz in 2usize..12,
        dx in 1usize..4, dy in 1usize..4, dz in 1usize..4,
    ) {
        let sample = scalar_field([nx, ny, nz], |i, j, k| (i + 13 * j + 171 * k) as f64);
        match decompose(&sample, [dx, dy, dz]) {
            Ok(pieces) => {
                prop_assert_eq!(pieces.len(), dx * dy * dz);
                prop_assert!(pieces.iter().all(|p| p.dims.iter().all(|&d| d >= 2)));
                let grid = layout(sample.dims, [dx, dy, dz]).unwrap();
                prop_assert_eq!(stitch(&pieces, &grid, 1), sample.samples);
            }
            Err(e) => {
                let is_degenerate = matches!(e, DecompositionError::Degenerate { .. });
                prop_assert!(is_degenerate, "unexpected error: {}", e);
            }
        }
    }

    #[test]
    fn test_ghosted_pieces_own_every_cell_once(
        nx in 2usize..10, ny in 2usize..10, nz in 2usize..10,
        dx in 1usize..4, dy in 1usize..4, dz in 1usize..4,
    ) {
        let sample = scalar_field([nx, ny, nz], |i, j, k| (i + 7 * j + 49 * k) as f64);
        if let Ok(pieces) = decompose_with_ghosts(&sample, [dx, dy, dz]) {
            let mut owners = vec![0u32; (nx - 1) * (ny - 1) * (nz - 1)];
            for piece in &pieces {
                let first = piece.grid.origin.map(|o| o as usize);
                for k in piece.cells[2].clone() {
                    for j in piece.cells[1].clone() {
                        for i in piece.cells[0].clone() {
                            let (gi, gj, gk) = (first[0] + i, first[1] + j, first[2] + k);
                            owners[(gk * (ny - 1) + gj) * (nx - 1) + gi] += 1;
                            prop_assert_eq!(
                                piece.grid.value(i, j, k, 0),
                                sample.value(gi, gj, gk, 0)
                            );
                        }
                    }
                }
            }
            prop_assert!(owners.iter().all(|&n| n == 1));
        }
    }
}
