//! Arena-of-cells binning of a species' particles.

use pic_resampling_core::{CellBinsView, CellId};

/// Dense counting-sort bins mapping each cell to a range of store indices.
#[derive(Debug, Default)]
pub(crate) struct CellBins {
    offsets: Vec<u32>,
    indices: Vec<u32>,
}

impl CellBins {
    /// Regroups the live particles by cell, keeping store order within each cell.
    pub(crate) fn rebuild(&mut self, cells: &[CellId], alive: &[bool], cell_count: u32) {
        let cell_count = cell_count as usize;
        self.offsets.clear();
        self.offsets.resize(cell_count + 1, 0);

        for (cell, _) in cells.iter().zip(alive).filter(|(_, alive)| **alive) {
            let slot = (cell.get() as usize).min(cell_count - 1);
            self.offsets[slot + 1] += 1;
        }
        for slot in 0..cell_count {
            self.offsets[slot + 1] += self.offsets[slot];
        }

        self.indices.clear();
        self.indices.resize(self.offsets[cell_count] as usize, 0);
        let mut cursor: Vec<u32> = self.offsets[..cell_count].to_vec();
        for (index, (cell, _)) in cells
            .iter()
            .zip(alive)
            .enumerate()
            .filter(|(_, (_, alive))| **alive)
        {
            let slot = (cell.get() as usize).min(cell_count - 1);
            self.indices[cursor[slot] as usize] = index as u32;
            cursor[slot] += 1;
        }
    }

    /// Read-only view over the bins.
    pub(crate) fn view(&self) -> CellBinsView<'_> {
        CellBinsView::new(&self.offsets, &self.indices)
    }
}
