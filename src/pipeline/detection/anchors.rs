use crate::shapes::point::PixelPoint;

pub const ANCHOR_COUNT: usize = 896;

// (stride, anchors per cell) for the short range model. The three stride 16
// layers share a grid, so their anchors are merged per cell.
const LAYERS: [(u32, u32); 2] = [(8, 2), (16, 6)];

/// Anchor centers in normalized input space. Short range BlazeFace uses fixed
/// size anchors, so only the centers matter.
pub fn gen_anchors(input_size: u32) -> Vec<PixelPoint> {
    let mut anchors = Vec::with_capacity(ANCHOR_COUNT);

    for (stride, per_cell) in LAYERS {
        let cells = input_size.div_ceil(stride);
        for y in 0..cells {
            for x in 0..cells {
                let center = PixelPoint {
                    x: (x as f64 + 0.5) / cells as f64,
                    y: (y as f64 + 0.5) / cells as f64,
                };
                for _ in 0..per_cell {
                    anchors.push(center);
                }
            }
        }
    }

    anchors
}
