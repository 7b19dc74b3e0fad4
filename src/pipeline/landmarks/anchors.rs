use std::sync::LazyLock;

/// SSD anchor layout of the 192x192 palm detector: one 24x24 grid at stride 8 with
/// two anchors per cell, then three stride-16 layers sharing a 12x12 grid.
const INPUT_SIZE: usize = 192;
const STRIDES: [usize; 4] = [8, 16, 16, 16];
const ANCHORS_PER_LAYER: usize = 2;

pub const NUM_ANCHORS: usize = 2016;

/// Normalized `[cx, cy]` anchor centers in model output order.
pub static ANCHORS: LazyLock<Vec<[f32; 2]>> = LazyLock::new(generate_anchors);

fn generate_anchors() -> Vec<[f32; 2]> {
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);
    let mut layer = 0;
    while layer < STRIDES.len() {
        // Consecutive layers with the same stride share one grid.
        let stride = STRIDES[layer];
        let mut per_cell = 0;
        while layer < STRIDES.len() && STRIDES[layer] == stride {
            per_cell += ANCHORS_PER_LAYER;
            layer += 1;
        }

        let grid = INPUT_SIZE.div_ceil(stride);
        for y in 0..grid {
            for x in 0..grid {
                let center = [
                    (x as f32 + 0.5) / grid as f32,
                    (y as f32 + 0.5) / grid as f32,
                ];
                anchors.extend(std::iter::repeat_n(center, per_cell));
            }
        }
    }
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_count_matches_model_output() {
        assert_eq!(ANCHORS.len(), NUM_ANCHORS);
    }

    #[test]
    fn anchors_walk_grids_row_major() {
        assert_eq!(ANCHORS[0], [0.5 / 24.0, 0.5 / 24.0]);
        assert_eq!(ANCHORS[1], ANCHORS[0]);
        assert_eq!(ANCHORS[2], [1.5 / 24.0, 0.5 / 24.0]);
        // First stride-16 anchor follows the 24x24x2 block.
        assert_eq!(ANCHORS[1152], [0.5 / 12.0, 0.5 / 12.0]);
        assert_eq!(ANCHORS[1157], ANCHORS[1152]);
        assert_eq!(ANCHORS[1158], [1.5 / 12.0, 0.5 / 12.0]);
        assert_eq!(ANCHORS[NUM_ANCHORS - 1], [11.5 / 12.0, 11.5 / 12.0]);
    }
}
