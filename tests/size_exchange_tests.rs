use coarse_mesh::algs::communicator::{CommTag, Communicator, NoComm, RayonComm, Wait};
use coarse_mesh::algs::exchange::exchange_bytes;
use coarse_mesh::mesh_error::CmeshError;
use serial_test::serial;

#[test]
fn zero_neighbors() {
    let res = exchange_bytes(&NoComm, CommTag(0x10), &[], &[]);
    assert!(res.unwrap().is_empty());
}

#[test]
fn self_only_on_no_comm() {
    let res = exchange_bytes(&NoComm, CommTag(0x10), &[(0, vec![1, 2])], &[0]).unwrap();
    assert_eq!(res[&0], vec![1, 2]);
}

#[test]
#[serial]
fn mismatch_drain() {
    let tag = CommTag(0x12);
    let c0 = RayonComm::new(0, 3);
    let c1 = RayonComm::new(1, 3);
    let c2 = RayonComm::new(2, 3);

    // Neighbor 1 sends a malformed size (3 bytes)
    c1.isend(0, tag.as_u16(), &[1, 2, 3]).wait();
    let mut r1 = [0u8; 8];
    let h1 = c1.irecv(0, tag.as_u16(), &mut r1);

    // Neighbor 2 announces an empty payload
    c2.isend(0, tag.as_u16(), &0u64.to_le_bytes()).wait();
    let mut r2 = [0u8; 8];
    let h2 = c2.irecv(0, tag.as_u16(), &mut r2);

    let sends = vec![(1, Vec::new()), (2, Vec::new())];
    let res = exchange_bytes(&c0, tag, &sends, &[1, 2]);
    assert!(matches!(res, Err(CmeshError::CommError { neighbor: 1, .. })));

    // Our size messages to both neighbors went out
    assert_eq!(h1.wait().unwrap().len(), 8);
    assert_eq!(h2.wait().unwrap().len(), 8);
}
