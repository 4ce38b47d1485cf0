//! Visualization session management
//!
//! A session turns (step, threshold) requests into packaged tile sets. It
//! keeps the decomposition of the last step it served, so changing only the
//! threshold skips the buffer lookup and the split. Callers serialize
//! requests; the session itself is not shared.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::assembler::{AssembledTileSet, TileAssembler};
use crate::buffer::TemporalBuffer;
use crate::decompose::{decompose_with_ghosts, Piece};
use crate::error::{ExtractionError, IsotileError, IsotileResult};

/// Where the session is in serving a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Resolving { step: i64 },
    Decomposing { index: usize },
    Extracting { index: usize },
    Ready { step: i64, index: usize },
}

/// Outcome of one visualize request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visualization {
    /// Requested step
    pub step: i64,
    /// Buffer index the step resolved to
    pub index: usize,
    /// Whether the cached decomposition was reused
    pub cache_hit: bool,
    pub tiles: AssembledTileSet,
}

struct CachedPieces {
    step: i64,
    index: usize,
    dataset_id: String,
    pieces: Arc<Vec<Piece>>,
}

/// Step-keyed isosurface session
pub struct VisualizationSession {
    divisors: [usize; 3],
    assembler: TileAssembler,
    state: SessionState,
    cache: Option<CachedPieces>,
    decompositions: usize,
}

impl VisualizationSession {
    pub fn new(divisors: [usize; 3], assembler: TileAssembler) -> Self {
        Self {
            divisors,
            assembler,
            state: SessionState::Idle,
            cache: None,
            decompositions: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn divisors(&self) -> [usize; 3] {
        self.divisors
    }

    pub fn assembler(&self) -> &TileAssembler {
        &self.assembler
    }

    /// Number of decompositions run so far
    pub fn decomposition_count(&self) -> usize {
        self.decompositions
    }

    /// Step whose decomposition is cached
    pub fn cached_step(&self) -> Option<i64> {
        self.cache.as_ref().map(|c| c.step)
    }

    /// Drop the cached decomposition
    pub fn invalidate(&mut self) {
        self.cache = None;
        self.state = SessionState::Idle;
    }

    /// Build the isosurface tile set of `step` at `threshold`
    pub fn visualize(
        &mut self,
        buffer: &TemporalBuffer,
        step: i64,
        threshold: f64,
    ) -> IsotileResult<Visualization> {
        self.state = SessionState::Resolving { step };
        match self.run(buffer, step, threshold) {
            Ok(visualization) => {
                self.state = SessionState::Ready {
                    step,
                    index: visualization.index,
                };
                Ok(visualization)
            }
            Err(e) => {
                tracing::warn!("Visualize step {} at {} failed: {}", step, threshold, e);
                self.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    fn run(
        &mut self,
        buffer: &TemporalBuffer,
        step: i64,
        threshold: f64,
    ) -> IsotileResult<Visualization> {
        if !threshold.is_finite() {
            return Err(ExtractionError::InvalidThreshold { value: threshold }.into());
        }
        let dataset_id = buffer
            .id()
            .ok_or_else(|| IsotileError::no_data("no series has been ingested"))?;

        let cached = self
            .cache
            .as_ref()
            .filter(|c| c.step == step && c.dataset_id == dataset_id)
            .map(|c| (c.index, Arc::clone(&c.pieces)));
        let cache_hit = cached.is_some();

        let (index, pieces) = match cached {
            Some(hit) => {
                tracing::debug!("Reusing decomposition of step {}", step);
                hit
            }
            None => {
                self.cache = None;
                let index = buffer.step_to_index(step).ok_or_else(|| {
                    IsotileError::no_data(format!("step {} precedes the series", step))
                })?;

                self.state = SessionState::Decomposing { index };
                let sample = buffer.sample_at(index)?;
                let pieces = Arc::new(decompose_with_ghosts(&sample, self.divisors)?);
                self.decompositions += 1;
                self.cache = Some(CachedPieces {
                    step,
                    index,
                    dataset_id: dataset_id.to_string(),
                    pieces: Arc::clone(&pieces),
                });
                (index, pieces)
            }
        };

        self.state = SessionState::Extracting { index };
        let tiles = self.assembler.build_tile_set(&pieces, threshold)?;
        Ok(Visualization {
            step,
            index,
            cache_hit,
            tiles,
        })
    }
}
