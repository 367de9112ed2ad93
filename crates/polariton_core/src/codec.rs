//! Flat-vector layout of a cavity's dynamical state.
//!
//! The vector is `[Re φ₀, Im φ₀, …, Re φ_{P-1}, Im φ_{P-1}, x₀, v₀, …, x_{Ph-1}, v_{Ph-1},
//! n₀, …, n_{R-1}]` where reservoirs appear in the order of their owning polaritons. The
//! ordering comes only from arena insertion order.

use crate::error::{CavityError, Result};
use crate::modes::{ModeGraph, PolaritonId};
use num_complex::Complex64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    polaritons: usize,
    phonons: usize,
    reservoir_owners: Vec<PolaritonId>,
    reservoir_slots: Vec<Option<usize>>,
}

impl StateLayout {
    pub fn new(graph: &ModeGraph) -> Self {
        let mut reservoir_owners = Vec::new();
        let reservoir_slots = graph
            .polaritons()
            .iter()
            .enumerate()
            .map(|(i, p)| {
                p.has_reservoir().then(|| {
                    reservoir_owners.push(PolaritonId(i));
                    reservoir_owners.len() - 1
                })
            })
            .collect();

        Self {
            polaritons: graph.polaritons().len(),
            phonons: graph.phonons().len(),
            reservoir_owners,
            reservoir_slots,
        }
    }

    /// `2·P + 2·Ph + R`.
    pub fn dimension(&self) -> usize {
        2 * self.polaritons + 2 * self.phonons + self.reservoir_owners.len()
    }

    pub fn polariton_count(&self) -> usize {
        self.polaritons
    }

    pub fn phonon_count(&self) -> usize {
        self.phonons
    }

    pub fn reservoir_count(&self) -> usize {
        self.reservoir_owners.len()
    }

    /// Polaritons carrying a reservoir, in packing order.
    pub fn reservoir_owners(&self) -> &[PolaritonId] {
        &self.reservoir_owners
    }

    /// Position of polariton `i`'s reservoir within the reservoir block.
    pub fn reservoir_slot(&self, polariton: usize) -> Option<usize> {
        self.reservoir_slots.get(polariton).copied().flatten()
    }

    pub fn polariton_offset(&self, i: usize) -> usize {
        2 * i
    }

    pub fn phonon_offset(&self, j: usize) -> usize {
        2 * self.polaritons + 2 * j
    }

    pub fn reservoir_offset(&self, k: usize) -> usize {
        2 * self.polaritons + 2 * self.phonons + k
    }

    fn ensure_len(&self, found: usize) -> Result<()> {
        let expected = self.dimension();
        if found != expected {
            return Err(CavityError::DimensionMismatch { expected, found });
        }
        Ok(())
    }

    /// Writes the graph's node values into `out`.
    pub fn pack(&self, graph: &ModeGraph, out: &mut [f64]) -> Result<()> {
        self.ensure_len(out.len())?;

        for (i, p) in graph.polaritons().iter().enumerate() {
            let o = self.polariton_offset(i);
            out[o] = p.value().re;
            out[o + 1] = p.value().im;
        }
        for (j, ph) in graph.phonons().iter().enumerate() {
            let o = self.phonon_offset(j);
            out[o] = ph.position();
            out[o + 1] = ph.velocity();
        }
        for (k, owner) in self.reservoir_owners.iter().enumerate() {
            if let Some(r) = graph.polaritons[owner.0].reservoir() {
                out[self.reservoir_offset(k)] = r.value();
            }
        }
        Ok(())
    }

    /// Writes `state` back into the graph's nodes; inverse of [`StateLayout::pack`].
    pub fn unpack(&self, state: &[f64], graph: &mut ModeGraph) -> Result<()> {
        self.ensure_len(state.len())?;

        for (i, p) in graph.polaritons.iter_mut().enumerate() {
            let o = self.polariton_offset(i);
            p.set_value(Complex64::new(state[o], state[o + 1]));
        }
        for (j, ph) in graph.phonons.iter_mut().enumerate() {
            let o = self.phonon_offset(j);
            ph.set_position(state[o]);
            ph.set_velocity(state[o + 1]);
        }
        for (k, owner) in self.reservoir_owners.iter().enumerate() {
            if let Some(r) = graph.polaritons[owner.0].reservoir_mut() {
                r.set_value(state[self.reservoir_offset(k)]);
            }
        }
        Ok(())
    }

    /// Unpacks `state` into detached node values without touching any graph.
    pub fn decode(&self, state: &[f64], out: &mut GraphState) {
        out.polaritons.clear();
        out.polaritons.extend(
            (0..self.polaritons)
                .map(|i| self.polariton_offset(i))
                .map(|o| Complex64::new(state[o], state[o + 1])),
        );
        out.phonons.clear();
        out.phonons.extend(
            (0..self.phonons)
                .map(|j| self.phonon_offset(j))
                .map(|o| (state[o], state[o + 1])),
        );
        out.reservoirs.clear();
        out.reservoirs
            .extend((0..self.reservoir_count()).map(|k| state[self.reservoir_offset(k)]));
    }
}

/// Node values decoded from one flat vector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphState {
    pub polaritons: Vec<Complex64>,
    /// `(position, velocity)` per phonon.
    pub phonons: Vec<(f64, f64)>,
    pub reservoirs: Vec<f64>,
}

impl GraphState {
    pub fn with_layout(layout: &StateLayout) -> Self {
        Self {
            polaritons: Vec::with_capacity(layout.polariton_count()),
            phonons: Vec::with_capacity(layout.phonon_count()),
            reservoirs: Vec::with_capacity(layout.reservoir_count()),
        }
    }
}
