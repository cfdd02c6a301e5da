//! Grid geometry. Everything here is a pure function of the window size and
//! the source count, so it is simply recomputed on every tick.

/// Pixel rectangle inside the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Near-square grid: `(columns, rows)` with `columns = ceil(sqrt(n))`.
pub fn grid_dimensions(n: usize) -> (u32, u32) {
    if n == 0 {
        return (0, 0);
    }
    let mut columns = (n as f64).sqrt().ceil() as usize;
    // guard against float rounding on perfect squares
    while columns * columns < n {
        columns += 1;
    }
    while columns > 1 && (columns - 1) * (columns - 1) >= n {
        columns -= 1;
    }
    let rows = n.div_ceil(columns);
    (columns as u32, rows as u32)
}

pub fn tile_rect(index: usize, width: u32, height: u32, columns: u32, rows: u32) -> TileRect {
    let tile_w = width / columns.max(1);
    let tile_h = height / rows.max(1);
    let columns = columns.max(1) as usize;
    TileRect {
        x: (index % columns) as u32 * tile_w,
        y: (index / columns) as u32 * tile_h,
        width: tile_w,
        height: tile_h,
    }
}

/// Index of the grid cell under `(px, py)`. The result is `>= n` for empty
/// cells of the last row and for the leftover strips right of the last column
/// or below the last row; callers must range-check it.
pub fn hit_test(px: u32, py: u32, width: u32, height: u32, n: usize) -> usize {
    let (columns, rows) = grid_dimensions(n);
    let tile_w = (width / columns.max(1)).max(1);
    let tile_h = (height / rows.max(1)).max(1);
    let col = px / tile_w;
    let row = py / tile_h;
    if col >= columns || row >= rows {
        return n;
    }
    row as usize * columns as usize + col as usize
}

/// Tiles to draw this tick: every source in grid position, or only the
/// maximized one covering the whole window.
pub fn visible_tiles(
    n: usize,
    width: u32,
    height: u32,
    maximized: Option<usize>,
) -> Vec<(usize, TileRect)> {
    match maximized {
        Some(i) if i < n => vec![(
            i,
            TileRect {
                x: 0,
                y: 0,
                width,
                height,
            },
        )],
        _ => {
            let (columns, rows) = grid_dimensions(n);
            (0..n)
                .map(|i| (i, tile_rect(i, width, height, columns, rows)))
                .collect()
        }
    }
}
