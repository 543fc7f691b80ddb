mod util;

use coarse_mesh::prelude::*;
use std::sync::Arc;
use util::*;

#[test]
fn root_content_reaches_every_rank() {
    let n = 4;
    run_ranks(3, |comm| {
        let root = 1;
        let mut mesh = if comm.rank() == root {
            row_of_cubes(n, true)
        } else {
            let mut m = Cmesh::new();
            m.register_geometry(axis_box()).unwrap();
            m
        };
        mesh.broadcast_from(root, comm).unwrap();
        assert_eq!(mesh.num_draft_trees(), n);
        mesh.commit(comm).unwrap();

        assert_eq!(mesh.layout().unwrap(), &Layout::Replicated);
        assert_row_content(&mesh, n);
        for g in 1..n {
            assert_eq!(
                mesh.face_neighbor(g, 0).unwrap(),
                FaceNeighbor::Local {
                    tree: g - 1,
                    face: 1,
                    orientation: FaceOrientation(0)
                }
            );
        }

        // and it partitions like a mesh built everywhere
        let mut part = Cmesh::derive(Arc::new(mesh)).unwrap();
        part.set_partition(PartitionDirective::uniform()).unwrap();
        part.commit(comm).unwrap();
        assert_row_content(&part, n);
    });
}

#[test]
fn broadcast_overrides_local_content() {
    run_ranks(2, |comm| {
        let mut mesh = row_of_cubes(if comm.rank() == 0 { 3 } else { 7 }, false);
        mesh.broadcast_from(0, comm).unwrap();
        assert_eq!(mesh.num_draft_trees(), 3);
        mesh.commit(comm).unwrap();
        assert_eq!(mesh.num_trees().unwrap(), 3);
    });
}

#[test]
fn geometry_names_must_match() {
    #[derive(Debug)]
    struct Flat;
    impl Geometry for Flat {
        fn name(&self) -> &str {
            "flat"
        }
        fn dimension(&self) -> u8 {
            2
        }
        fn evaluate(&self, _: TreeView<'_>, r: &[f64], out: &mut [f64; 3]) -> Result<(), CmeshError> {
            *out = [r[0], r[1], 0.0];
            Ok(())
        }
    }

    let res = run_ranks(2, |comm| {
        let mut mesh = if comm.rank() == 0 {
            row_of_cubes(2, false)
        } else {
            let mut m = Cmesh::new();
            m.register_geometry(Arc::new(Flat)).unwrap();
            m
        };
        mesh.broadcast_from(0, comm)
    });
    assert_eq!(res[0], Ok(()));
    assert!(
        matches!(&res[1], Err(CmeshError::InconsistentReplication(msg)) if msg.contains("flat")),
        "{:?}",
        res[1]
    );
}

#[test]
fn broadcast_needs_a_building_base_mesh() {
    let mut src = row_of_cubes(1, false);
    src.commit(&NoComm).unwrap();
    assert_eq!(src.broadcast_from(0, &NoComm), Err(CmeshError::AlreadyCommitted));

    let mut d = Cmesh::derive(Arc::new(src)).unwrap();
    assert_eq!(d.broadcast_from(0, &NoComm), Err(CmeshError::DerivedTreeMutation));
}
