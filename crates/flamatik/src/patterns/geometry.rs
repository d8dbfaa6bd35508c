//! Sculpture geometry
//!
//! The sculpture is a rhombic triacontahedron with one nozzle per face.
//! Tables are indexed by logical nozzle. Faces 0-4 form the lower star,
//! 5-9 the lower halo, 10-19 the horizontal equator, 20-24 the upper halo,
//! 25-29 the upper star.

/// Faces on the sculpture; geometric patterns need at least this many nozzles
pub const FACES: usize = 30;

/// Outward direction of each face
pub const NOZZLE_VECTORS: [[f64; 3]; FACES] = [
    [-0.0, 0.76942086, 1.2449492],
    [-0.7317627, 0.23776406, 1.2449491],
    [-0.45225424, -0.62247455, 1.2449491],
    [0.45225424, -0.6224746, 1.2449491],
    [0.7317627, 0.23776406, 1.2449491],
    [-0.73176277, 1.007185, 0.769421],
    [-1.184017, -0.3847105, 0.76942086],
    [-0.0, -1.2449492, 0.76942086],
    [1.1840171, -0.3847105, 0.76942086],
    [0.7317627, 1.007185, 0.7694209],
    [-0.45225424, 1.3918955, -0.0],
    [-1.184017, 0.8602387, -0.0],
    [-1.4635255, 0.0, -0.0],
    [-1.184017, -0.8602387, -0.0],
    [-0.45225424, -1.3918955, -0.0],
    [0.45225424, -1.3918954, -0.0],
    [1.184017, -0.86023873, -0.0],
    [1.4635255, 0.0, -0.0],
    [1.184017, 0.86023873, -0.0],
    [0.45225424, 1.3918954, -0.0],
    [-0.0, 1.2449492, -0.76942086],
    [-1.184017, 0.38471046, -0.76942086],
    [-0.73176277, -1.007185, -0.769421],
    [0.7317627, -1.007185, -0.7694209],
    [1.184017, 0.38471046, -0.76942086],
    [-0.45225424, 0.62247455, -1.2449491],
    [-0.73176277, -0.23776406, -1.2449491],
    [-0.0, -0.76942086, -1.2449492],
    [0.73176277, -0.23776412, -1.2449492],
    [0.45225424, 0.6224746, -1.2449491],
];

/// Face pointing the other way
pub const OPPOSITE: [usize; FACES] = [
    27, 28, 29, 25, 26, // lower star
    23, 24, 20, 21, 22, // lower halo
    15, 16, 17, 18, 19, 10, 11, 12, 13, 14, // horizontal equator
    7, 8, 9, 5, 6, // upper halo
    3, 4, 0, 1, 2, // upper star
];

/// Faces sharing an edge
pub const NEIGHBORS: [[usize; 4]; FACES] = [
    [4, 1, 9, 5],
    [0, 2, 5, 6],
    [1, 3, 6, 7],
    [2, 4, 7, 8],
    [3, 0, 8, 9],
    [0, 10, 1, 11],
    [1, 12, 2, 13],
    [2, 14, 3, 15],
    [3, 16, 4, 17],
    [4, 18, 0, 19],
    [19, 5, 20, 11],
    [5, 12, 10, 21],
    [11, 6, 21, 13],
    [6, 14, 12, 22],
    [13, 7, 22, 15],
    [7, 16, 14, 23],
    [15, 8, 23, 17],
    [8, 18, 16, 24],
    [17, 9, 24, 19],
    [9, 10, 18, 20],
    [19, 29, 10, 25],
    [11, 25, 12, 26],
    [13, 26, 14, 27],
    [15, 27, 16, 28],
    [17, 28, 18, 29],
    [20, 21, 29, 26],
    [21, 22, 25, 27],
    [22, 23, 26, 28],
    [23, 24, 27, 29],
    [24, 20, 28, 25],
];

/// Rings of ten faces that split the sculpture into hemispheres, in
/// walking order. The first is horizontal.
pub const EQUATORS: [[usize; 10]; 6] = [
    [10, 11, 12, 13, 14, 15, 16, 17, 18, 19],
    [3, 8, 17, 24, 29, 25, 21, 12, 6, 2],
    [4, 9, 19, 20, 25, 26, 22, 14, 7, 3],
    [0, 5, 11, 21, 26, 27, 23, 16, 8, 4],
    [1, 6, 13, 22, 27, 28, 24, 18, 9, 0],
    [2, 7, 15, 23, 28, 29, 20, 10, 5, 1],
];

/// Sets of five faces meeting at a point
pub const STARS: [[usize; 5]; 12] = [
    [0, 1, 2, 3, 4],
    [0, 5, 10, 19, 9],
    [1, 6, 12, 11, 5],
    [2, 7, 14, 13, 6],
    [3, 8, 16, 15, 7],
    [4, 9, 18, 17, 8],
    [20, 25, 21, 11, 10],
    [26, 21, 12, 13, 22],
    [27, 22, 14, 15, 23],
    [28, 23, 16, 17, 24],
    [29, 24, 18, 19, 20],
    [25, 26, 27, 28, 29],
];

/// Sets of three faces meeting at a point
pub const TRIPLES: [[usize; 3]; 20] = [
    [0, 1, 5],
    [1, 2, 6],
    [2, 3, 7],
    [3, 4, 8],
    [4, 0, 9],
    [5, 10, 11],
    [6, 12, 13],
    [7, 14, 15],
    [8, 16, 17],
    [9, 18, 19],
    [20, 19, 10],
    [21, 11, 12],
    [22, 13, 14],
    [23, 15, 16],
    [24, 17, 18],
    [20, 25, 29],
    [21, 26, 25],
    [22, 27, 26],
    [23, 28, 27],
    [24, 29, 28],
];

/// The five faces bordering each star, in `STARS` order
pub const HALOS: [[usize; 5]; 12] = [
    [5, 6, 7, 8, 9],
    [4, 1, 11, 20, 18],
    [0, 2, 13, 21, 10],
    [1, 3, 15, 22, 12],
    [2, 4, 17, 23, 14],
    [3, 0, 19, 24, 16],
    [29, 26, 12, 5, 19],
    [25, 27, 14, 6, 11],
    [26, 28, 16, 7, 13],
    [27, 29, 18, 8, 15],
    [28, 25, 10, 9, 17],
    [20, 21, 22, 23, 24],
];

/// Faces at right angles to each face
pub const ORTHOGONALS: [[usize; 4]; FACES] = [
    [7, 12, 17, 20],
    [8, 14, 19, 21],
    [9, 16, 11, 22],
    [5, 18, 13, 23],
    [6, 10, 15, 24],
    [3, 13, 18, 25],
    [4, 15, 10, 26],
    [0, 17, 12, 27],
    [1, 19, 14, 28],
    [2, 11, 16, 29],
    [4, 6, 24, 26],
    [2, 9, 22, 29],
    [0, 7, 20, 27],
    [3, 5, 23, 25],
    [1, 8, 21, 28],
    [4, 6, 24, 26],
    [2, 9, 22, 29],
    [0, 7, 20, 27],
    [3, 5, 23, 25],
    [1, 8, 21, 28],
    [0, 17, 12, 27],
    [1, 19, 14, 28],
    [2, 11, 16, 29],
    [3, 13, 18, 25],
    [4, 15, 10, 26],
    [5, 18, 13, 23],
    [6, 10, 15, 24],
    [7, 12, 17, 20],
    [8, 14, 19, 21],
    [9, 16, 11, 22],
];

/// Horizontal bands from bottom to top
pub const RINGS: [&[usize]; 5] = [
    &STARS[0],
    &[5, 6, 7, 8, 9],
    &EQUATORS[0],
    &[20, 21, 22, 23, 24],
    &STARS[11],
];

pub fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Candidate face whose direction best matches `direction`.
/// Ties go to the earliest candidate.
pub fn closest_nozzle(direction: [f64; 3], candidates: &[usize]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for &n in candidates {
        let Some(v) = NOZZLE_VECTORS.get(n) else {
            continue;
        };
        let d = dot(direction, *v);
        if best.map_or(true, |(_, b)| d > b) {
            best = Some((n, d));
        }
    }
    best.map(|(n, _)| n)
}

/// Every face, for `closest_nozzle`
pub fn all_faces() -> Vec<usize> {
    (0..FACES).collect()
}
