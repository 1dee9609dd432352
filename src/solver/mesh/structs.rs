use nalgebra::{Point2, Vector2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryType {
    Inlet,
    Outlet,
    Wall,
}

/// Structure-of-arrays 2D polygonal mesh. Cell areas double as the cell
/// volumes used for weighting.
#[derive(Default, Clone, Debug, Serialize, Deserialize)]
pub struct Mesh {
    // Vertices
    pub vx: Vec<f64>,
    pub vy: Vec<f64>,

    // Faces
    pub face_v1: Vec<usize>,
    pub face_v2: Vec<usize>,
    pub face_owner: Vec<usize>,
    pub face_neighbor: Vec<Option<usize>>,
    pub face_boundary: Vec<Option<BoundaryType>>,
    pub face_nx: Vec<f64>,
    pub face_ny: Vec<f64>,
    pub face_area: Vec<f64>,
    pub face_cx: Vec<f64>,
    pub face_cy: Vec<f64>,

    // Cells
    pub cell_cx: Vec<f64>,
    pub cell_cy: Vec<f64>,
    pub cell_vol: Vec<f64>,

    // Connectivity
    pub cell_faces: Vec<usize>,
    pub cell_face_offsets: Vec<usize>, // cell_face_offsets[i] .. cell_face_offsets[i+1]

    pub cell_vertices: Vec<usize>,
    pub cell_vertex_offsets: Vec<usize>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_cells(&self) -> usize {
        self.cell_cx.len()
    }

    pub fn num_faces(&self) -> usize {
        self.face_cx.len()
    }

    pub fn num_vertices(&self) -> usize {
        self.vx.len()
    }

    pub fn total_volume(&self) -> f64 {
        self.cell_vol.iter().sum()
    }

    pub fn cell_center(&self, cell: usize) -> Vector2<f64> {
        Vector2::new(self.cell_cx[cell], self.cell_cy[cell])
    }

    pub fn face_center(&self, face: usize) -> Vector2<f64> {
        Vector2::new(self.face_cx[face], self.face_cy[face])
    }

    /// Faces of `cell` as a slice into the CSR connectivity.
    pub fn faces_of(&self, cell: usize) -> &[usize] {
        &self.cell_faces[self.cell_face_offsets[cell]..self.cell_face_offsets[cell + 1]]
    }

    /// Checks the array lengths and connectivity indices agree with each other.
    pub fn validate(&self) -> Result<(), String> {
        let n_faces = self.face_v1.len();
        let n_cells = self.cell_cx.len();
        let face_arrays = [
            ("face_v2", self.face_v2.len()),
            ("face_owner", self.face_owner.len()),
            ("face_neighbor", self.face_neighbor.len()),
            ("face_boundary", self.face_boundary.len()),
            ("face_nx", self.face_nx.len()),
            ("face_ny", self.face_ny.len()),
            ("face_area", self.face_area.len()),
            ("face_cx", self.face_cx.len()),
            ("face_cy", self.face_cy.len()),
        ];
        for (label, len) in face_arrays {
            if len != n_faces {
                return Err(format!("{label} has {len} entries, expected {n_faces}"));
            }
        }
        for (label, len) in [("cell_cy", self.cell_cy.len()), ("cell_vol", self.cell_vol.len())] {
            if len != n_cells {
                return Err(format!("{label} has {len} entries, expected {n_cells}"));
            }
        }
        if self.cell_face_offsets.len() != n_cells + 1 {
            return Err(format!(
                "cell_face_offsets has {} entries, expected {}",
                self.cell_face_offsets.len(),
                n_cells + 1
            ));
        }
        if let Some(&f) = self.cell_faces.iter().find(|&&f| f >= n_faces) {
            return Err(format!("cell_faces references face {f} of {n_faces}"));
        }
        for (face, (&owner, neighbor)) in self
            .face_owner
            .iter()
            .zip(&self.face_neighbor)
            .enumerate()
        {
            if owner >= n_cells || neighbor.is_some_and(|n| n >= n_cells) {
                return Err(format!("face {face} references a cell outside 0..{n_cells}"));
            }
            if neighbor.is_none() && self.face_boundary[face].is_none() {
                return Err(format!("boundary face {face} has no boundary type"));
            }
        }
        Ok(())
    }

    pub fn recalculate_geometry(&mut self) {
        // 1. Faces
        let vx = &self.vx;
        let vy = &self.vy;
        let face_v1 = &self.face_v1;
        let face_v2 = &self.face_v2;

        self.face_cx
            .par_iter_mut()
            .zip(&mut self.face_cy)
            .zip(&mut self.face_area)
            .zip(&mut self.face_nx)
            .zip(&mut self.face_ny)
            .enumerate()
            .for_each(|(i, ((((cx, cy), area), nx), ny))| {
                let v0 = Point2::new(vx[face_v1[i]], vy[face_v1[i]]);
                let v1 = Point2::new(vx[face_v2[i]], vy[face_v2[i]]);

                let center = Point2::from((v0.coords + v1.coords) * 0.5);
                *cx = center.x;
                *cy = center.y;

                let edge_vec = v1 - v0;
                *area = edge_vec.norm();

                // Preserve normal orientation
                let tangent = edge_vec.normalize();
                let mut normal = Vector2::new(tangent.y, -tangent.x);
                if normal.dot(&Vector2::new(*nx, *ny)) < 0.0 {
                    normal = -normal;
                }
                *nx = normal.x;
                *ny = normal.y;
            });

        // 2. Cells
        let cell_vertex_offsets = &self.cell_vertex_offsets;
        let cell_vertices = &self.cell_vertices;

        self.cell_cx
            .par_iter_mut()
            .zip(&mut self.cell_cy)
            .zip(&mut self.cell_vol)
            .enumerate()
            .for_each(|(i, ((cx_out, cy_out), vol_out))| {
                let start = cell_vertex_offsets[i];
                let n = cell_vertex_offsets[i + 1] - start;

                let mut signed_area = 0.0;
                let mut c_x = 0.0;
                let mut c_y = 0.0;
                for k in 0..n {
                    let idx0 = cell_vertices[start + k];
                    let idx1 = cell_vertices[start + (k + 1) % n];
                    let cross = vx[idx0] * vy[idx1] - vx[idx1] * vy[idx0];
                    signed_area += cross;
                    c_x += (vx[idx0] + vx[idx1]) * cross;
                    c_y += (vy[idx0] + vy[idx1]) * cross;
                }
                signed_area *= 0.5;
                let area = signed_area.abs();

                let center = if area > 1e-12 {
                    Vector2::new(c_x / (6.0 * signed_area), c_y / (6.0 * signed_area))
                } else {
                    // Degenerate polygon, fall back to the vertex average
                    let mut avg = Vector2::zeros();
                    for k in 0..n {
                        let idx = cell_vertices[start + k];
                        avg += Vector2::new(vx[idx], vy[idx]);
                    }
                    avg / n.max(1) as f64
                };

                *cx_out = center.x;
                *cy_out = center.y;
                *vol_out = area;
            });
    }
}
