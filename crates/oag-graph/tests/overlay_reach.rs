//! Reachability and distances on a policy overlay.

use oag_graph::reach::{ancestors, descendants};
use oag_graph::{
    Block, Cfg, Distance, DistanceKind, DistanceOracle, EdgeAttrs, GraphView, HubLabel, NodeId,
    Overlay, TransferKind,
};
use rustc_hash::FxHashSet;

/// 0x10 calls indirectly into 0x20; 0x30 is a function entry that reaches the
/// syscall gate 0x40 through one intermediate block.
fn program() -> Cfg {
    let mut cfg = Cfg::new();
    cfg.add_block(
        0x10,
        Block::new(8, 3).with_terminator(TransferKind::CallIndirect),
    );
    cfg.add_block(0x20, Block::new(4, 1).with_terminator(TransferKind::Ret));
    cfg.add_block(0x30, Block::new(16, 4));
    cfg.add_block(0x38, Block::new(4, 2));
    cfg.add_block(0x40, Block::new(4, 1).with_terminator(TransferKind::Syscall));
    cfg.add_edge(0x10, 0x20, EdgeAttrs::new(TransferKind::CallIndirect))
        .unwrap();
    cfg.add_edge(0x30, 0x38, EdgeAttrs::new(TransferKind::Follow))
        .unwrap();
    cfg.add_edge(0x38, 0x40, EdgeAttrs::new(TransferKind::JumpDirect))
        .unwrap();
    cfg.attach_sink().unwrap();
    cfg
}

#[test]
fn test_hub_edges_are_free() {
    let cfg = program();
    let entries: FxHashSet<u64> = [0x20, 0x30].into_iter().collect();
    let hub = NodeId::Virtual(HubLabel::Functions);
    let overlay = Overlay::new(
        &cfg,
        [
            (NodeId::Addr(0x10), hub),
            (hub, NodeId::Addr(0x20)),
            (hub, NodeId::Addr(0x30)),
        ],
    )
    .unwrap();

    let base = DistanceOracle::compute(&cfg, NodeId::Sink, DistanceKind::Block, &entries).unwrap();
    assert_eq!(base.distance(NodeId::Addr(0x10)), Distance::Infinite);
    assert_eq!(base.distance(NodeId::Addr(0x30)), Distance::Finite(2));

    let view =
        DistanceOracle::compute(&overlay, NodeId::Sink, DistanceKind::Block, &entries).unwrap();
    assert_eq!(view.distance(hub), Distance::Finite(3));
    assert_eq!(view.distance(NodeId::Addr(0x10)), Distance::Finite(3));

    let instr = DistanceOracle::compute(&overlay, NodeId::Sink, DistanceKind::Instruction, &entries)
        .unwrap();
    // hub -> 0x30 -> 0x38 -> 0x40: weights 4 + 2 + 1.
    assert_eq!(instr.distance(NodeId::Addr(0x10)), Distance::Finite(7));
}

#[test]
fn test_overlay_extends_ancestors() {
    let cfg = program();
    let before = ancestors(&cfg, NodeId::Sink);
    assert!(!before.contains(&NodeId::Addr(0x10)));

    let overlay = Overlay::new(&cfg, [(NodeId::Addr(0x10), NodeId::Addr(0x30))]).unwrap();
    let after = ancestors(&overlay, NodeId::Sink);
    assert!(after.contains(&NodeId::Addr(0x10)));
    assert!(before.is_subset(&after));

    let reach = descendants(&overlay, NodeId::Addr(0x10), None);
    assert!(reach.contains(&NodeId::Sink));
    assert_eq!(overlay.node_count(), cfg.node_count());
}
