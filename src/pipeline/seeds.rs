//! Seed point planning for region-growing segmentation.
//!
//! Seeds form a cross around the image centre plus a regular grid over the
//! central half of the image. The pattern depends only on the image
//! dimensions, so repeated runs on the same slice are seeded identically.

/// A seed coordinate in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeedPoint {
    pub x: u32,
    pub y: u32,
}

impl SeedPoint {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Ordered seed coordinates. Duplicates are allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSet {
    points: Vec<SeedPoint>,
}

impl SeedSet {
    pub fn points(&self) -> &[SeedPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SeedPoint> {
        self.points.iter()
    }

    fn push(&mut self, x: u32, y: u32) {
        self.points.push(SeedPoint::new(x, y));
    }
}

/// Plan seeds for an image of the given size.
///
/// Callers reject images below the dimension floor before planning, so the
/// offsets below never underflow for any accepted image. `saturating_sub`
/// still guards degenerate sizes.
pub fn plan(width: u32, height: u32) -> SeedSet {
    let mut seeds = SeedSet::default();

    let center_x = width / 2;
    let center_y = height / 2;
    let offset_x = width / 8;
    let offset_y = height / 8;

    // Cross around the centre
    seeds.push(center_x, center_y);
    seeds.push(center_x + offset_x, center_y);
    seeds.push(center_x.saturating_sub(offset_x), center_y);
    seeds.push(center_x, center_y + offset_y);
    seeds.push(center_x, center_y.saturating_sub(offset_y));

    // Grid over the central half
    let step_x = width / 10;
    let step_y = height / 10;
    if step_x == 0 || step_y == 0 {
        return seeds;
    }

    let x_end = three_quarters(width);
    let y_end = three_quarters(height);
    for x in (width / 4..x_end).step_by(step_x as usize) {
        for y in (height / 4..y_end).step_by(step_y as usize) {
            seeds.push(x, y);
        }
    }

    seeds
}

fn three_quarters(n: u32) -> u32 {
    // Never exceeds n, so the narrowing is lossless
    (u64::from(n) * 3 / 4) as u32
}
