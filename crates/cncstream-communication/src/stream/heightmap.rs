//! Height map probing
//!
//! A probing job visits a rectangular grid in zig-zag order: even rows
//! left to right, odd rows right to left. Each acknowledged probe command
//! yields one height which lands in the cell the probe visited.

use serde::Serialize;

/// Grid of probed heights in millimetres
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeightMapGrid {
    rows: usize,
    columns: usize,
    values: Vec<Option<f64>>,
}

impl HeightMapGrid {
    /// Empty grid
    pub fn new(rows: usize, columns: usize) -> Self {
        Self {
            rows,
            columns,
            values: vec![None; rows * columns],
        }
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Height at a cell
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.index(row, col).and_then(|i| self.values[i])
    }

    /// Store a height; out of range cells are ignored
    pub fn set(&mut self, row: usize, col: usize, z: f64) -> bool {
        match self.index(row, col) {
            Some(i) => {
                self.values[i] = Some(z);
                true
            }
            None => false,
        }
    }

    /// Cell visited by the `probe`-th probe of a zig-zag pass
    pub fn zigzag_cell(&self, probe: usize) -> Option<(usize, usize)> {
        if self.columns == 0 {
            return None;
        }
        let row = probe / self.columns;
        let mut col = probe - row * self.columns;
        if row % 2 == 1 {
            col = self.columns - 1 - col;
        }
        (row < self.rows).then_some((row, col))
    }

    /// True when every cell holds a height
    pub fn is_complete(&self) -> bool {
        self.values.iter().all(Option::is_some)
    }

    /// Forget all heights
    pub fn clear(&mut self) {
        self.values.iter_mut().for_each(|v| *v = None);
    }

    fn index(&self, row: usize, col: usize) -> Option<usize> {
        (row < self.rows && col < self.columns).then(|| row * self.columns + col)
    }
}

/// Area covered by the probing grid, in work coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeArea {
    /// Minimum X
    pub left: f64,
    /// Minimum Y
    pub top: f64,
    /// Extent along X
    pub width: f64,
    /// Extent along Y
    pub height: f64,
}

/// Vertical probing parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeCycle {
    /// Safe travel height
    pub z_top: f64,
    /// Lowest probe target
    pub z_bottom: f64,
    /// Probing feed rate
    pub feed: f64,
}

/// Program probing every grid point in zig-zag order
///
/// The first probe at the work origin is the reference all later heights
/// are measured against.
pub fn probe_program(grid: &HeightMapGrid, area: &ProbeArea, cycle: &ProbeCycle) -> Vec<String> {
    let step = |extent: f64, points: usize| {
        if points > 1 {
            extent / (points - 1) as f64
        } else {
            0.0
        }
    };
    let step_x = step(area.width, grid.columns());
    let step_y = step(area.height, grid.rows());

    let mut program = vec![
        format!("G21G90F{}G0Z{}", cycle.feed, cycle.z_top),
        "G0X0Y0".to_string(),
        format!("G38.2Z{}", cycle.z_bottom),
        format!("G0Z{}", cycle.z_top),
    ];

    for row in 0..grid.rows() {
        let y = area.top + step_y * row as f64;
        for j in 0..grid.columns() {
            let col = if row % 2 == 1 { grid.columns() - 1 - j } else { j };
            let x = area.left + step_x * col as f64;
            program.push(format!("G0X{:.3}Y{:.3}", x, y));
            program.push(format!("G38.2Z{}", cycle.z_bottom));
            program.push(format!("G0Z{}", cycle.z_top));
        }
    }
    program
}

/// Probing progress over a grid
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HeightMapProbe {
    grid: HeightMapGrid,
    // -1 while the reference probe is outstanding
    probe_index: i64,
    first_z: Option<f64>,
}

impl HeightMapProbe {
    pub(crate) fn new(grid: HeightMapGrid) -> Self {
        Self {
            grid,
            probe_index: -1,
            first_z: None,
        }
    }

    pub(crate) fn grid(&self) -> &HeightMapGrid {
        &self.grid
    }

    pub(crate) fn restart(&mut self) {
        self.probe_index = -1;
        self.first_z = None;
    }

    /// Record one sample; returns the cell written and its height
    ///
    /// Relative samples start with the reference probe. Absolute samples
    /// have no reference and fill the grid from the first probe.
    pub(crate) fn record(&mut self, z: Option<f64>, relative: bool) -> Option<(usize, usize, f64)> {
        if relative && self.probe_index < 0 {
            self.first_z = z;
            self.probe_index = 0;
            return None;
        }
        self.probe_index = self.probe_index.max(0);

        let probe = self.probe_index as usize;
        self.probe_index += 1;

        let value = if relative {
            z.zip(self.first_z).map(|(z, first)| z - first)
        } else {
            z
        }?;

        let Some((row, col)) = self.grid.zigzag_cell(probe) else {
            tracing::debug!(
                "Probe {} falls outside the {}x{} grid",
                probe,
                self.grid.rows(),
                self.grid.columns()
            );
            return None;
        };
        self.grid.set(row, col, value);
        Some((row, col, value))
    }
}
