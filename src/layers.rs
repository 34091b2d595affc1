//! Layer filtering
//!
//! Activation columns are the flat concatenation of every layer of every
//! direction, direction-major: `[f1 f2 .. fL][b1 b2 .. bL]`, each slice
//! `layer_width` wide. A filter such as `"f1,b1,f2,b2"` keeps only the
//! named slices.

use std::collections::BTreeSet;
use std::fmt;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ProbeError, Result};
use crate::representations::AlignedSplit;

/// Shape of the upstream model's concatenated activations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerLayout {
    /// Neurons per layer and direction
    pub layer_width: usize,
    /// Layers per direction
    pub num_layers: usize,
    /// 1 for unidirectional models, 2 for bidirectional
    pub num_directions: usize,
}

impl Default for LayerLayout {
    fn default() -> Self {
        Self {
            layer_width: 500,
            num_layers: 2,
            num_directions: 2,
        }
    }
}

/// One layer of one direction, 1-based layer number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LayerSlice {
    /// 0 = forward, 1 = backward
    pub direction: usize,
    pub layer: usize,
}

impl LayerSlice {
    const PREFIXES: [char; 2] = ['f', 'b'];

    fn parse(item: &str) -> Result<Self> {
        let mut chars = item.chars();
        let prefix = chars.next();
        let direction = prefix
            .and_then(|c| Self::PREFIXES.iter().position(|&p| p == c))
            .ok_or_else(|| ProbeError::config(format!("bad layer {item:?}: expected f<n> or b<n>")))?;
        let layer = chars
            .as_str()
            .parse::<usize>()
            .map_err(|_| ProbeError::config(format!("bad layer number in {item:?}")))?;
        Ok(Self { direction, layer })
    }

    /// Column range of this slice
    pub fn columns(&self, layout: &LayerLayout) -> std::ops::Range<usize> {
        let start =
            (self.direction * layout.num_layers + (self.layer - 1)) * layout.layer_width;
        start..start + layout.layer_width
    }
}

impl fmt::Display for LayerSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIXES[self.direction], self.layer)
    }
}

/// Column selection over activation matrices
#[derive(Debug, Clone)]
pub struct LayerFilter {
    slices: Vec<LayerSlice>,
    columns: Vec<usize>,
    n_neurons: usize,
}

impl LayerFilter {
    /// Parse a comma-separated filter for activations `n_neurons` wide
    pub fn parse(spec: &str, layout: &LayerLayout, n_neurons: usize) -> Result<Self> {
        if layout.layer_width == 0 || layout.num_layers == 0 {
            return Err(ProbeError::config("layer width and layer count must be positive"));
        }

        let slices: BTreeSet<LayerSlice> = spec
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(LayerSlice::parse)
            .collect::<Result<_>>()?;
        if slices.is_empty() {
            return Err(ProbeError::config(format!("empty layer filter {spec:?}")));
        }

        let mut columns = Vec::with_capacity(slices.len() * layout.layer_width);
        for slice in &slices {
            if slice.direction >= layout.num_directions {
                return Err(ProbeError::config(format!(
                    "layer {slice} needs a bidirectional model"
                )));
            }
            if slice.layer == 0 || slice.layer > layout.num_layers {
                return Err(ProbeError::config(format!(
                    "layer {slice} out of range 1..={}",
                    layout.num_layers
                )));
            }
            let range = slice.columns(layout);
            if range.end > n_neurons {
                return Err(ProbeError::config(format!(
                    "layer {slice} spans neurons {}..{} but activations have {n_neurons}",
                    range.start, range.end
                )));
            }
            info!(
                "Including neurons from {slice} (#{} to #{})",
                range.start, range.end
            );
            columns.extend(range);
        }

        Ok(Self {
            slices: slices.into_iter().collect(),
            columns,
            n_neurons,
        })
    }

    /// Selected slices in column order
    pub fn slices(&self) -> &[LayerSlice] {
        &self.slices
    }

    /// Width after filtering
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Keep only the selected columns of one matrix
    pub fn apply(&self, activations: &Array2<f32>) -> Result<Array2<f32>> {
        if activations.ncols() != self.n_neurons {
            return Err(ProbeError::mismatch(format!(
                "layer filter built for {} neurons, got {}",
                self.n_neurons,
                activations.ncols()
            )));
        }
        Ok(activations.select(Axis(1), &self.columns))
    }

    /// Filter every representation matrix of a split
    pub fn apply_split(&self, mut split: AlignedSplit) -> Result<AlignedSplit> {
        split.activations = split
            .activations
            .iter()
            .map(|a| self.apply(a))
            .collect::<Result<_>>()?;
        Ok(split)
    }
}
