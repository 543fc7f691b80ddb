mod util;

use coarse_mesh::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use util::*;

#[test]
fn repartition_with_same_layout_moves_nothing() {
    run_ranks(3, |comm| {
        let first = Arc::new(partitioned_row(7, comm));
        let mut again = Cmesh::derive(first.clone()).unwrap();
        again.set_partition(PartitionDirective::uniform()).unwrap();
        again.commit(comm).unwrap();

        let stats = again.transfer_stats().unwrap();
        assert!(stats.is_local_only(), "{stats:?}");
        assert_eq!(stats.bytes_sent, 0);
        assert!(again.content_eq(&first));
        assert_eq!(again.layout().unwrap(), first.layout().unwrap());
    });
}

#[test]
fn shifted_offsets_move_trees() {
    let n = 6;
    run_ranks(2, |comm| {
        let uniform = Arc::new(partitioned_row(n, comm)); // [0, 3, 6]
        let mut shifted = Cmesh::derive(uniform).unwrap();
        shifted.set_partition_offsets(vec![0, 1, 6]).unwrap();
        shifted.commit(comm).unwrap();

        assert_row_content(&shifted, n);
        let stats = shifted.transfer_stats().unwrap();
        if comm.rank() == 0 {
            assert_eq!(shifted.num_local_trees().unwrap(), 1);
            assert_eq!((stats.trees_sent, stats.trees_received), (2, 0));
            assert_eq!(stats.trees_copied_locally, 1);
            assert!(matches!(
                shifted.face_neighbor(0, 1).unwrap(),
                FaceNeighbor::Remote { global: 1, face: 0, .. }
            ));
        } else {
            assert_eq!(shifted.first_tree().unwrap(), 1);
            assert_eq!((stats.trees_sent, stats.trees_received), (0, 2));
            assert_eq!(stats.messages_received, 1);
            // trees 1 and 2 arrived and are now linked locally to 3
            assert!(matches!(
                shifted.face_neighbor(1, 1).unwrap(),
                FaceNeighbor::Local { tree: 2, face: 0, .. }
            ));
        }
    });
}

#[test]
fn random_attributes_survive_round_trips() {
    let n = 11;
    run_ranks(3, |comm| {
        // every rank draws the same payloads
        let mut rng = SmallRng::seed_from_u64(0xC0A5E);
        let payloads: Vec<Vec<Vec<u8>>> = (0..n)
            .map(|_| {
                (0..4)
                    .map(|_| {
                        let len = rng.gen_range(0..40);
                        (0..len).map(|_| rng.r#gen::<u8>()).collect()
                    })
                    .collect()
            })
            .collect();

        let mut src = row_of_cubes(n, false);
        for (t, attrs) in payloads.iter().enumerate() {
            for (k, bytes) in attrs.iter().enumerate() {
                src.set_attribute(t, 40 + k as u32 % 2, k as u32, bytes).unwrap();
            }
        }
        src.commit(comm).unwrap();

        let mut a = Cmesh::derive(Arc::new(src)).unwrap();
        a.set_partition_offsets(vec![0, 9, 10, 11]).unwrap();
        a.commit(comm).unwrap();
        let mut b = Cmesh::derive(Arc::new(a)).unwrap();
        b.set_partition(PartitionDirective::uniform()).unwrap();
        b.commit(comm).unwrap();

        for l in 0..b.num_local_trees().unwrap() {
            let g = b.global_id(l).unwrap() as usize;
            for (k, bytes) in payloads[g].iter().enumerate() {
                assert_eq!(b.attribute(l, 40 + k as u32 % 2, k as u32).unwrap(), &bytes[..]);
            }
            assert!(matches!(
                b.attribute(l, 40, 99),
                Err(CmeshError::AttributeNotFound { .. })
            ));
        }
    });
}

#[test]
fn weighted_partition_balances_cost() {
    let n = 6;
    run_ranks(2, |comm| {
        let uniform = Arc::new(partitioned_row(n, comm)); // [0, 3, 6]
        // global costs 1 1 1 | 1 4 0
        let weights = if comm.rank() == 0 {
            vec![1.0, 1.0, 1.0]
        } else {
            vec![1.0, 4.0, 0.0]
        };
        let mut w = Cmesh::derive(uniform).unwrap();
        w.set_partition_weighted(weights).unwrap();
        w.commit(comm).unwrap();
        let table = w.partition_table().unwrap().unwrap();
        assert_eq!(table.offsets(), &[0, 4, 6]);
        assert_row_content(&w, n);
    });
}

#[test]
fn derive_without_directive_keeps_layout() {
    run_ranks(2, |comm| {
        let part = Arc::new(partitioned_row(5, comm));
        let mut copy = Cmesh::derive(part.clone()).unwrap();
        copy.commit(comm).unwrap();
        assert!(copy.content_eq(&part));
        assert!(copy.transfer_stats().unwrap().is_local_only());

        let mut src = row_of_cubes(2, true);
        src.commit(comm).unwrap();
        let mut rep = Cmesh::derive(Arc::new(src)).unwrap();
        rep.commit(comm).unwrap();
        assert_eq!(rep.layout().unwrap(), &Layout::Replicated);
        assert_eq!(rep.num_local_trees().unwrap(), 2);
    });
}

#[test]
fn bad_directives_are_usage_errors() {
    run_ranks(2, |comm| {
        let part = Arc::new(partitioned_row(4, comm));
        let mut d = Cmesh::derive(part).unwrap();
        d.set_partition_offsets(vec![0, 1, 2, 4]).unwrap();
        assert_eq!(
            d.commit(comm),
            Err(CmeshError::CommSizeMismatch {
                expected: 3,
                actual: 2
            })
        );
        assert_eq!(d.state(), &CmeshState::Building);

        d.set_partition_offsets(vec![0, 1, 3]).unwrap();
        assert!(matches!(d.commit(comm), Err(CmeshError::InvalidPartition(_))));
        assert_eq!(d.state(), &CmeshState::Building);

        d.set_partition_offsets(vec![0, 1, 4]).unwrap();
        d.commit(comm).unwrap();
        assert_eq!(d.first_tree().unwrap(), if comm.rank() == 0 { 0 } else { 1 });
    });
}

#[derive(Debug)]
struct NoTets;

impl ElementScheme for NoTets {
    fn name(&self) -> &str {
        "no-tets"
    }
    fn supports(&self, class: TreeClass) -> bool {
        class != TreeClass::Tet
    }
}

#[test]
fn unsupported_class_fails_commit_on_every_rank() {
    run_ranks(2, |comm| {
        let mut src = Cmesh::new();
        src.register_geometry(axis_box()).unwrap();
        src.add_tree(TreeClass::Hex).unwrap();
        src.add_tree(TreeClass::Tet).unwrap();
        src.commit(comm).unwrap();
        let mut d = Cmesh::derive(Arc::new(src)).unwrap();
        d.set_partition_uniform(true, Arc::new(NoTets)).unwrap();
        let res = d.commit(comm);
        assert!(matches!(
            res,
            Err(CmeshError::UnsupportedClass { tree: 1, class: TreeClass::Tet, .. })
        ));
        assert!(d.failure().is_some());
    });
}

#[test]
fn unsupported_class_from_partitioned_source_names_lowest_tree() {
    run_ranks(3, |comm| {
        let mut src = Cmesh::new();
        src.register_geometry(axis_box()).unwrap();
        for tet in [false, false, false, true, true, false] {
            src.add_tree(if tet { TreeClass::Tet } else { TreeClass::Hex }).unwrap();
        }
        src.commit(comm).unwrap();
        let mut even = Cmesh::derive(Arc::new(src)).unwrap();
        even.set_partition_uniform(false, Arc::new(DefaultScheme)).unwrap();
        even.commit(comm).unwrap();

        // rank 0 holds no tet, ranks 1 and 2 each hold one
        let mut d = Cmesh::derive(Arc::new(even)).unwrap();
        d.set_partition_uniform(true, Arc::new(NoTets)).unwrap();
        let err = d.commit(comm).unwrap_err();
        assert_eq!(
            err,
            CmeshError::UnsupportedClass {
                tree: 3,
                class: TreeClass::Tet,
                scheme: "no-tets".to_string(),
            }
        );
        assert_eq!(d.failure(), Some(&err));
    });
}
