#![allow(dead_code)]
use coarse_mesh::prelude::*;
use std::sync::Arc;

/// Owner id used by the tests for their own attributes.
pub const PACKAGE: OwnerId = 7;
/// Attribute holding the tree's own global index (`u64`).
pub const KEY_GLOBAL: AttrKey = keys::NEXT_POSSIBLE;
/// Attribute holding the number of trees in the mesh (`u64`).
pub const KEY_COUNT: AttrKey = keys::NEXT_POSSIBLE + 1;

/// Corners of the unit hex, x fastest.
pub const UNIT_HEX: [f64; 24] = [
    0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, //
    0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0,
];

/// Axis-aligned box spanned by a hex's first and last corner.
#[derive(Debug)]
pub struct AxisBox;

impl Geometry for AxisBox {
    fn name(&self) -> &str {
        "axis-box"
    }
    fn dimension(&self) -> u8 {
        3
    }
    fn evaluate(&self, tree: TreeView<'_>, r: &[f64], out: &mut [f64; 3]) -> Result<(), CmeshError> {
        let v = tree.vertices;
        if v.len() < 24 || r.len() < 3 {
            return Err(CmeshError::VertexCountMismatch {
                tree: tree.global,
                expected: 8,
                got: v.len() / 3,
            });
        }
        for d in 0..3 {
            out[d] = v[d] + r[d] * (v[21 + d] - v[d]);
        }
        Ok(())
    }
}

/// Fresh `AxisBox` capability.
pub fn axis_box() -> Arc<dyn Geometry> {
    Arc::new(AxisBox)
}

/// Building-state row of `n` unit hexes, tree `g` shifted by `g` along x and
/// joined to `g + 1` through its +x face.
pub fn row_of_cubes(n: usize, with_attributes: bool) -> Cmesh {
    let mut mesh = Cmesh::new();
    mesh.register_geometry(axis_box()).unwrap();
    for g in 0..n {
        let t = mesh.add_tree(TreeClass::Hex).unwrap();
        let mut coords = UNIT_HEX;
        for v in 0..8 {
            coords[3 * v] += g as f64;
        }
        mesh.set_vertices(t, &coords).unwrap();
        if with_attributes {
            mesh.set_attribute_pod(t, PACKAGE, KEY_GLOBAL, &(g as u64)).unwrap();
            mesh.set_attribute_pod(t, PACKAGE, KEY_COUNT, &(n as u64)).unwrap();
        }
    }
    for g in 1..n {
        mesh.set_join(g - 1, 1, g, 0, 0).unwrap();
    }
    mesh
}

/// Run `f` once per rank of a fresh in-process world of `p` ranks, each on
/// its own thread; results are ordered by rank.
pub fn run_ranks<T: Send>(p: usize, f: impl Fn(&RayonComm) -> T + Sync) -> Vec<T> {
    let world = RayonComm::world(p);
    std::thread::scope(|s| {
        let f = &f;
        let handles: Vec<_> = world.iter().map(|c| s.spawn(move || f(c))).collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank panicked"))
            .collect()
    })
}

/// Replicated row of cubes committed on `comm`, then partitioned uniformly.
pub fn partitioned_row(n: usize, comm: &RayonComm) -> Cmesh {
    let mut src = row_of_cubes(n, true);
    src.commit(comm).unwrap();
    let mut part = Cmesh::derive(Arc::new(src)).unwrap();
    part.set_partition_uniform(false, Arc::new(DefaultScheme)).unwrap();
    part.commit(comm).unwrap();
    part
}

/// Check the per-tree content of a row-of-cubes mesh by global index.
pub fn assert_row_content(mesh: &Cmesh, n: usize) {
    let first = mesh.first_tree().unwrap();
    for l in 0..mesh.num_local_trees().unwrap() {
        let g = first + l as u64;
        assert_eq!(mesh.global_id(l).unwrap(), g);
        assert_eq!(mesh.tree_class(l).unwrap(), TreeClass::Hex);
        let v = mesh.tree_vertices(l).unwrap();
        assert_eq!(&v[..3], &[g as f64, 0.0, 0.0], "first vertex of tree {g}");
        assert_eq!(mesh.attribute_as::<u64>(l, PACKAGE, KEY_GLOBAL).unwrap(), g);
        assert_eq!(mesh.attribute_as::<u64>(l, PACKAGE, KEY_COUNT).unwrap(), n as u64);
    }
}
