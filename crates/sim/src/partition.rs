use terrarium_common::{Region, VoxelCoord};

/// Cut a `width x height x depth` world into boxes of edge `box_size`.
///
/// Boxes are emitted Z outermost, then Y, then X. Boxes on the far edges are
/// clipped to the world, so every voxel lands in exactly one box and no box
/// reaches outside.
pub fn partition_into_boxes(width: i32, height: i32, depth: i32, box_size: i32) -> Vec<Region> {
    assert!(box_size > 0, "box_size must be positive");
    let mut boxes = Vec::new();
    if width <= 0 || height <= 0 || depth <= 0 {
        return boxes;
    }
    for z0 in (0..depth).step_by(box_size as usize) {
        for y0 in (0..height).step_by(box_size as usize) {
            for x0 in (0..width).step_by(box_size as usize) {
                boxes.push(Region::new(
                    VoxelCoord::new(x0, y0, z0),
                    VoxelCoord::new(
                        x0.saturating_add(box_size - 1).min(width - 1),
                        y0.saturating_add(box_size - 1).min(height - 1),
                        z0.saturating_add(box_size - 1).min(depth - 1),
                    ),
                ));
            }
        }
    }
    boxes
}

/// Number of boxes [`partition_into_boxes`] produces.
pub fn box_count(width: i32, height: i32, depth: i32, box_size: i32) -> usize {
    if width <= 0 || height <= 0 || depth <= 0 || box_size <= 0 {
        return 0;
    }
    let per_axis = |d: i32| ((d - 1) / box_size + 1) as usize;
    per_axis(width) * per_axis(height) * per_axis(depth)
}
