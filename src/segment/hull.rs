// Incremental 3D convex hull, the volume counterpart of a 2D quickhull:
// seed a tetrahedron from extreme points, then fold every remaining point
// into the hull through its horizon edges.

const EPS: f64 = 1e-9;

pub struct Hull3 {
    /// Hull volume; 0 for degenerate (coplanar or worse) point sets.
    pub volume: f64,
    /// Hull vertices, or the input points when the set is degenerate.
    pub vertices: Vec<[f64; 3]>,
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm2(a: [f64; 3]) -> f64 {
    dot(a, a)
}

// Signed distance factor of `p` above the plane of face (a, b, c); positive
// means visible from outside.
fn side(a: [f64; 3], b: [f64; 3], c: [f64; 3], p: [f64; 3]) -> f64 {
    dot(cross(sub(b, a), sub(c, a)), sub(p, a))
}

// Pick four affinely independent seed points, or None if the set is
// degenerate (all collinear/coplanar: zero hull volume, infinite solidity).
fn seed_tetrahedron(points: &[[f64; 3]]) -> Option<[usize; 4]> {
    let i0 = 0;
    let i1 = (0..points.len()).max_by(|&a, &b| {
        norm2(sub(points[a], points[i0]))
            .partial_cmp(&norm2(sub(points[b], points[i0])))
            .unwrap()
    })?;
    if norm2(sub(points[i1], points[i0])) < EPS {
        return None;
    }

    let i2 = (0..points.len()).max_by(|&a, &b| {
        let da = norm2(cross(sub(points[i1], points[i0]), sub(points[a], points[i0])));
        let db = norm2(cross(sub(points[i1], points[i0]), sub(points[b], points[i0])));
        da.partial_cmp(&db).unwrap()
    })?;
    if norm2(cross(sub(points[i1], points[i0]), sub(points[i2], points[i0]))) < EPS {
        return None;
    }

    let i3 = (0..points.len()).max_by(|&a, &b| {
        let da = side(points[i0], points[i1], points[i2], points[a]).abs();
        let db = side(points[i0], points[i1], points[i2], points[b]).abs();
        da.partial_cmp(&db).unwrap()
    })?;
    if side(points[i0], points[i1], points[i2], points[i3]).abs() < EPS {
        return None;
    }

    Some([i0, i1, i2, i3])
}

/// Convex hull of a 3D point set, returning its volume and vertex list.
pub fn convex_hull_3d(points: &[[f64; 3]]) -> Hull3 {
    let Some([i0, i1, i2, i3]) = seed_tetrahedron(points) else {
        return Hull3 {
            volume: 0.0,
            vertices: points.to_vec(),
        };
    };

    // outward-wound starting faces
    let mut faces: Vec<[usize; 3]> = if side(points[i0], points[i1], points[i2], points[i3]) < 0.0 {
        vec![[i0, i1, i2], [i0, i3, i1], [i1, i3, i2], [i2, i3, i0]]
    } else {
        vec![[i0, i2, i1], [i0, i1, i3], [i1, i2, i3], [i2, i0, i3]]
    };

    for (p, &point) in points.iter().enumerate() {
        if p == i0 || p == i1 || p == i2 || p == i3 {
            continue;
        }

        let visible: Vec<usize> = (0..faces.len())
            .filter(|&f| {
                let [a, b, c] = faces[f];
                side(points[a], points[b], points[c], point) > EPS
            })
            .collect();
        if visible.is_empty() {
            continue;
        }

        // horizon edges appear in exactly one visible face, directed as in
        // that face; the cone from p over them replaces the visible cap
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for &f in &visible {
            let [a, b, c] = faces[f];
            for edge in [(a, b), (b, c), (c, a)] {
                if let Some(i) = edges.iter().position(|&(u, v)| (v, u) == edge) {
                    edges.swap_remove(i);
                } else {
                    edges.push(edge);
                }
            }
        }

        let mut keep = 0;
        for f in 0..faces.len() {
            if !visible.contains(&f) {
                faces[keep] = faces[f];
                keep += 1;
            }
        }
        faces.truncate(keep);
        for (u, v) in edges {
            faces.push([u, v, p]);
        }
    }

    let mut volume = 0.0;
    for &[a, b, c] in &faces {
        volume += dot(points[a], cross(points[b], points[c]));
    }
    volume /= 6.0;

    let mut vertex_ids: Vec<usize> = faces.iter().flatten().copied().collect();
    vertex_ids.sort_unstable();
    vertex_ids.dedup();
    let vertices = vertex_ids.into_iter().map(|i| points[i]).collect();

    Hull3 { volume, vertices }
}
