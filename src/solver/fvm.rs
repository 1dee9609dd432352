use crate::error::{PodError, PodResult};
use crate::solver::field::{TensorField, VectorField};
use crate::solver::mesh::{BoundaryType, Mesh};
use wide::f64x4;

/// Volume-weighted inner product over a fixed set of cells.
pub trait InnerProduct {
    fn n_cells(&self) -> usize;

    fn inner_product(&self, a: &VectorField, b: &VectorField) -> f64;
}

/// Differential operators evaluated on the discretisation behind an
/// [`InnerProduct`]. Calls are blocking and infallible; shape violations are
/// fatal.
pub trait FieldOperators: InnerProduct {
    /// `T_ij = d_i u_j`
    fn gradient(&self, u: &VectorField) -> TensorField;

    fn laplacian(&self, u: &VectorField) -> VectorField;
}

/// Weights-only inner product, for callers that never need derivatives.
#[derive(Clone, Debug)]
pub struct CellVolumes {
    weights: Vec<f64>,
}

impl CellVolumes {
    pub fn new(weights: Vec<f64>) -> Self {
        Self { weights }
    }
}

impl InnerProduct for CellVolumes {
    fn n_cells(&self) -> usize {
        self.weights.len()
    }

    fn inner_product(&self, a: &VectorField, b: &VectorField) -> f64 {
        a.weighted_dot(b, &self.weights)
    }
}

/// Finite-volume operators on a polygonal [`Mesh`].
///
/// Gradients are Green-Gauss with linearly interpolated face values. Wall
/// faces are no-slip (face value zero); inlet and outlet faces are zero
/// gradient.
pub struct FvOperators<'a> {
    mesh: &'a Mesh,
    // Owner-side interpolation weight for internal faces
    face_weight: Vec<f64>,
    // Owner-neighbour centre distance, or owner-face distance on boundaries
    face_dist: Vec<f64>,
}

impl<'a> FvOperators<'a> {
    pub fn new(mesh: &'a Mesh) -> PodResult<Self> {
        mesh.validate().map_err(PodError::InvalidMesh)?;

        let n_faces = mesh.num_faces();
        let mut face_weight = vec![0.0; n_faces];
        let mut face_dist = vec![0.0; n_faces];
        for face in 0..n_faces {
            let owner = mesh.face_owner[face];
            let f_c = mesh.face_center(face);
            let c_own = mesh.cell_center(owner);
            let d_own = (f_c - c_own).norm();

            if let Some(neigh) = mesh.face_neighbor[face] {
                let c_neigh = mesh.cell_center(neigh);
                let d_neigh = (f_c - c_neigh).norm();
                face_weight[face] = d_own / (d_own + d_neigh);
                face_dist[face] = (c_neigh - c_own).norm();
            } else {
                face_dist[face] = d_own;
            }

            if face_dist[face] < 1e-12 {
                return Err(PodError::InvalidMesh(format!(
                    "face {face} has a degenerate centre distance {}",
                    face_dist[face]
                )));
            }
        }

        for (cell, &vol) in mesh.cell_vol.iter().enumerate() {
            if vol < 1e-12 {
                log::warn!("Small cell volume for cell {}: {}", cell, vol);
            }
        }

        Ok(Self {
            mesh,
            face_weight,
            face_dist,
        })
    }

    pub fn mesh(&self) -> &Mesh {
        self.mesh
    }

    fn boundary_face_value(&self, face: usize, owner_value: f64) -> f64 {
        match self.mesh.face_boundary[face] {
            Some(BoundaryType::Wall) => 0.0,
            _ => owner_value,
        }
    }

    fn component_gradient(&self, phi: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let mesh = self.mesh;
        let n_cells = mesh.num_cells();
        let mut grad_x = vec![0.0; n_cells];
        let mut grad_y = vec![0.0; n_cells];

        for face in 0..mesh.num_faces() {
            let owner = mesh.face_owner[face];
            let neighbor = mesh.face_neighbor[face];
            let val_owner = phi[owner];

            let val_face = match neighbor {
                Some(neigh) => val_owner + self.face_weight[face] * (phi[neigh] - val_owner),
                None => self.boundary_face_value(face, val_owner),
            };

            let sx = mesh.face_nx[face] * mesh.face_area[face];
            let sy = mesh.face_ny[face] * mesh.face_area[face];

            grad_x[owner] += val_face * sx;
            grad_y[owner] += val_face * sy;
            if let Some(neigh) = neighbor {
                grad_x[neigh] -= val_face * sx;
                grad_y[neigh] -= val_face * sy;
            }
        }

        divide_by_volume(&mut grad_x, &mesh.cell_vol);
        divide_by_volume(&mut grad_y, &mesh.cell_vol);
        (grad_x, grad_y)
    }

    fn component_laplacian(&self, phi: &[f64]) -> Vec<f64> {
        let mesh = self.mesh;
        let mut lap = vec![0.0; mesh.num_cells()];

        for face in 0..mesh.num_faces() {
            let owner = mesh.face_owner[face];
            let coeff = mesh.face_area[face] / self.face_dist[face];

            match mesh.face_neighbor[face] {
                Some(neigh) => {
                    let flux = coeff * (phi[neigh] - phi[owner]);
                    lap[owner] += flux;
                    lap[neigh] -= flux;
                }
                None => {
                    // Zero-gradient faces carry no diffusive flux
                    if mesh.face_boundary[face] == Some(BoundaryType::Wall) {
                        lap[owner] += coeff * (0.0 - phi[owner]);
                    }
                }
            }
        }

        divide_by_volume(&mut lap, &mesh.cell_vol);
        lap
    }
}

impl InnerProduct for FvOperators<'_> {
    fn n_cells(&self) -> usize {
        self.mesh.num_cells()
    }

    fn inner_product(&self, a: &VectorField, b: &VectorField) -> f64 {
        a.weighted_dot(b, &self.mesh.cell_vol)
    }
}

impl FieldOperators for FvOperators<'_> {
    fn gradient(&self, u: &VectorField) -> TensorField {
        assert_eq!(u.len(), self.n_cells(), "field length mismatch");
        let (xx, yx) = self.component_gradient(&u.vx);
        let (xy, yy) = self.component_gradient(&u.vy);
        TensorField { xx, xy, yx, yy }
    }

    fn laplacian(&self, u: &VectorField) -> VectorField {
        assert_eq!(u.len(), self.n_cells(), "field length mismatch");
        VectorField {
            vx: self.component_laplacian(&u.vx),
            vy: self.component_laplacian(&u.vy),
        }
    }
}

fn divide_by_volume(values: &mut [f64], vol: &[f64]) {
    let n = values.len();
    let mut i = 0;
    while i + 4 <= n {
        let v_vol = f64x4::from(&vol[i..i + 4]);
        let v_val = f64x4::from(&values[i..i + 4]);
        let res: [f64; 4] = (v_val / v_vol).into();
        values[i..i + 4].copy_from_slice(&res);
        i += 4;
    }
    while i < n {
        values[i] /= vol[i];
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::mesh::{generate_structured_rect_mesh, BoundarySides};
    use nalgebra::Vector2;

    fn linear_field(mesh: &Mesh) -> VectorField {
        // u = (2x + 3y, -y)
        VectorField::from_fn(mesh.num_cells(), |c| {
            let (x, y) = (mesh.cell_cx[c], mesh.cell_cy[c]);
            Vector2::new(2.0 * x + 3.0 * y, -y)
        })
    }

    fn is_interior(mesh: &Mesh, cell: usize) -> bool {
        mesh.faces_of(cell)
            .iter()
            .all(|&f| mesh.face_neighbor[f].is_some())
    }

    #[test]
    fn gradient_is_exact_for_linear_field_away_from_boundaries() {
        let mesh = generate_structured_rect_mesh(8, 6, 2.0, 1.5, BoundarySides::channel());
        let ops = FvOperators::new(&mesh).unwrap();
        let grad = ops.gradient(&linear_field(&mesh));

        for c in (0..mesh.num_cells()).filter(|&c| is_interior(&mesh, c)) {
            assert!((grad.xx[c] - 2.0).abs() < 1e-10, "d_x u_x at {c}");
            assert!((grad.yx[c] - 3.0).abs() < 1e-10, "d_y u_x at {c}");
            assert!(grad.xy[c].abs() < 1e-10, "d_x u_y at {c}");
            assert!((grad.yy[c] + 1.0).abs() < 1e-10, "d_y u_y at {c}");
        }
    }

    #[test]
    fn gradient_of_uniform_field_vanishes_without_walls() {
        let sides = BoundarySides {
            left: BoundaryType::Inlet,
            right: BoundaryType::Outlet,
            bottom: BoundaryType::Outlet,
            top: BoundaryType::Outlet,
        };
        let mesh = generate_structured_rect_mesh(5, 4, 1.0, 1.0, sides);
        let ops = FvOperators::new(&mesh).unwrap();
        let u = VectorField::new(mesh.num_cells(), Vector2::new(1.5, -0.5));

        let grad = ops.gradient(&u);
        for c in 0..mesh.num_cells() {
            assert!(grad.xx[c].abs() < 1e-12);
            assert!(grad.yy[c].abs() < 1e-12);
        }
        let lap = ops.laplacian(&u);
        assert!(lap.vx.iter().chain(&lap.vy).all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn laplacian_of_quadratic_is_constant_in_interior() {
        let mesh = generate_structured_rect_mesh(10, 10, 1.0, 1.0, BoundarySides::wall());
        let ops = FvOperators::new(&mesh).unwrap();
        // u_x = x^2 + y^2 -> lap = 4
        let u = VectorField::from_fn(mesh.num_cells(), |c| {
            let (x, y) = (mesh.cell_cx[c], mesh.cell_cy[c]);
            Vector2::new(x * x + y * y, 0.0)
        });

        let lap = ops.laplacian(&u);
        for c in (0..mesh.num_cells()).filter(|&c| is_interior(&mesh, c)) {
            assert!((lap.vx[c] - 4.0).abs() < 1e-8, "lap at {c} = {}", lap.vx[c]);
        }
    }

    #[test]
    fn wall_faces_pull_values_towards_zero() {
        let mesh = generate_structured_rect_mesh(3, 3, 1.0, 1.0, BoundarySides::wall());
        let ops = FvOperators::new(&mesh).unwrap();
        let u = VectorField::new(mesh.num_cells(), Vector2::new(1.0, 0.0));

        let lap = ops.laplacian(&u);
        // Corner cell touches two walls, the centre cell none
        assert!(lap.vx[0] < 0.0);
        assert!(lap.vx[4].abs() < 1e-12);
    }

    #[test]
    fn laplacian_is_symmetric_under_inner_product() {
        let mesh = generate_structured_rect_mesh(6, 5, 1.0, 1.0, BoundarySides::wall());
        let ops = FvOperators::new(&mesh).unwrap();
        let a = VectorField::from_fn(mesh.num_cells(), |c| {
            Vector2::new((3.0 * mesh.cell_cx[c]).sin(), mesh.cell_cy[c])
        });
        let b = VectorField::from_fn(mesh.num_cells(), |c| {
            Vector2::new(mesh.cell_cx[c] * mesh.cell_cy[c], (2.0 * mesh.cell_cy[c]).cos())
        });

        let lhs = ops.inner_product(&a, &ops.laplacian(&b));
        let rhs = ops.inner_product(&ops.laplacian(&a), &b);
        assert!((lhs - rhs).abs() < 1e-10);
    }

    #[test]
    fn cell_volumes_and_mesh_inner_products_agree() {
        let mesh = generate_structured_rect_mesh(4, 4, 2.0, 1.0, BoundarySides::channel());
        let ops = FvOperators::new(&mesh).unwrap();
        let weights = CellVolumes::new(mesh.cell_vol.clone());
        let a = linear_field(&mesh);

        assert_eq!(weights.n_cells(), ops.n_cells());
        assert!((weights.inner_product(&a, &a) - ops.inner_product(&a, &a)).abs() < 1e-12);
    }

    #[test]
    fn rejects_inconsistent_mesh() {
        let mut mesh = generate_structured_rect_mesh(2, 2, 1.0, 1.0, BoundarySides::wall());
        mesh.cell_vol.pop();
        assert!(matches!(FvOperators::new(&mesh), Err(PodError::InvalidMesh(_))));
    }
}
