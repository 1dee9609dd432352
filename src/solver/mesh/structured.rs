use super::structs::{BoundaryType, Mesh};

/// Bundles the four boundary sides for structured mesh generators.
#[derive(Clone, Copy, Debug)]
pub struct BoundarySides {
    pub left: BoundaryType,
    pub right: BoundaryType,
    pub bottom: BoundaryType,
    pub top: BoundaryType,
}

impl BoundarySides {
    pub fn wall() -> Self {
        Self {
            left: BoundaryType::Wall,
            right: BoundaryType::Wall,
            bottom: BoundaryType::Wall,
            top: BoundaryType::Wall,
        }
    }

    /// Inlet on the left, outlet on the right, walls top and bottom.
    pub fn channel() -> Self {
        Self {
            left: BoundaryType::Inlet,
            right: BoundaryType::Outlet,
            bottom: BoundaryType::Wall,
            top: BoundaryType::Wall,
        }
    }
}

/// Uniform `nx` x `ny` quad mesh over `[0, length] x [0, height]`.
///
/// Cells are numbered row-major (`j * nx + i`). Internal face normals point
/// from owner to neighbour, boundary normals point out of the domain.
pub fn generate_structured_rect_mesh(
    nx: usize,
    ny: usize,
    length: f64,
    height: f64,
    boundaries: BoundarySides,
) -> Mesh {
    assert!(nx > 0, "nx must be > 0");
    assert!(ny > 0, "ny must be > 0");
    assert!(length > 0.0, "length must be > 0");
    assert!(height > 0.0, "height must be > 0");

    let dx = length / nx as f64;
    let dy = height / ny as f64;

    let mut mesh = Mesh::new();

    let vid = |i: usize, j: usize| -> usize { j * (nx + 1) + i };
    let cell_id = |i: usize, j: usize| -> usize { j * nx + i };

    for j in 0..=ny {
        for i in 0..=nx {
            mesh.vx.push(i as f64 * dx);
            mesh.vy.push(j as f64 * dy);
        }
    }

    fn push_face(
        mesh: &mut Mesh,
        v: (usize, usize),
        owner: usize,
        neighbor: Option<usize>,
        bc: Option<BoundaryType>,
        normal: (f64, f64),
    ) -> usize {
        let idx = mesh.face_v1.len();
        mesh.face_v1.push(v.0);
        mesh.face_v2.push(v.1);
        mesh.face_owner.push(owner);
        mesh.face_neighbor.push(neighbor);
        mesh.face_boundary.push(bc);
        mesh.face_nx.push(normal.0);
        mesh.face_ny.push(normal.1);
        idx
    }

    // Vertical edges, indexed (i, j) with i in 0..=nx, j in 0..ny
    let mut vert_face = vec![usize::MAX; (nx + 1) * ny];
    for j in 0..ny {
        for i in 0..=nx {
            let (owner, neighbor, bc, n_x) = if i == 0 {
                (cell_id(0, j), None, Some(boundaries.left), -1.0)
            } else if i == nx {
                (cell_id(nx - 1, j), None, Some(boundaries.right), 1.0)
            } else {
                (cell_id(i - 1, j), Some(cell_id(i, j)), None, 1.0)
            };
            vert_face[j * (nx + 1) + i] = push_face(
                &mut mesh,
                (vid(i, j), vid(i, j + 1)),
                owner,
                neighbor,
                bc,
                (n_x, 0.0),
            );
        }
    }

    // Horizontal edges, indexed (i, j) with i in 0..nx, j in 0..=ny
    let mut horiz_face = vec![usize::MAX; nx * (ny + 1)];
    for j in 0..=ny {
        for i in 0..nx {
            let (owner, neighbor, bc, n_y) = if j == 0 {
                (cell_id(i, 0), None, Some(boundaries.bottom), -1.0)
            } else if j == ny {
                (cell_id(i, ny - 1), None, Some(boundaries.top), 1.0)
            } else {
                (cell_id(i, j - 1), Some(cell_id(i, j)), None, 1.0)
            };
            horiz_face[j * nx + i] = push_face(
                &mut mesh,
                (vid(i, j), vid(i + 1, j)),
                owner,
                neighbor,
                bc,
                (0.0, n_y),
            );
        }
    }

    let n_faces = mesh.face_v1.len();
    mesh.face_area = vec![0.0; n_faces];
    mesh.face_cx = vec![0.0; n_faces];
    mesh.face_cy = vec![0.0; n_faces];

    let num_cells = nx * ny;
    mesh.cell_cx = vec![0.0; num_cells];
    mesh.cell_cy = vec![0.0; num_cells];
    mesh.cell_vol = vec![0.0; num_cells];
    mesh.cell_faces = Vec::with_capacity(num_cells * 4);
    mesh.cell_vertices = Vec::with_capacity(num_cells * 4);
    mesh.cell_face_offsets = Vec::with_capacity(num_cells + 1);
    mesh.cell_vertex_offsets = Vec::with_capacity(num_cells + 1);
    mesh.cell_face_offsets.push(0);
    mesh.cell_vertex_offsets.push(0);

    for j in 0..ny {
        for i in 0..nx {
            mesh.cell_faces.extend([
                vert_face[j * (nx + 1) + i],
                vert_face[j * (nx + 1) + i + 1],
                horiz_face[j * nx + i],
                horiz_face[(j + 1) * nx + i],
            ]);
            mesh.cell_face_offsets.push(mesh.cell_faces.len());

            mesh.cell_vertices
                .extend([vid(i, j), vid(i + 1, j), vid(i + 1, j + 1), vid(i, j + 1)]);
            mesh.cell_vertex_offsets.push(mesh.cell_vertices.len());
        }
    }

    mesh.recalculate_geometry();
    mesh
}
