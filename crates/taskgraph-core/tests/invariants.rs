//! Universal invariants from SPEC_FULL.md §8, exercised against the public
//! API of `taskgraph-core` directly (no orchestrator loop involved).

use taskgraph_core::{
    GraphId, NodeType, StateTransitionManager, TaskGraph, TaskId, TaskStatus, TaskType, TaskNode,
};

fn node(id: &str, layer: usize, parent: Option<&str>) -> TaskNode {
    TaskNode::new(
        TaskId::new(id),
        "goal",
        TaskType::Think,
        NodeType::Execute,
        layer,
        parent.map(TaskId::new),
    )
}

#[test]
fn ready_implies_every_predecessor_done() {
    let graph = TaskGraph::new();
    let gid = GraphId::new("g");
    graph.add_graph(gid.clone(), true).unwrap();

    let mut a = node("a", 0, None);
    a.status = TaskStatus::Running;
    graph.add_node(&gid, a).unwrap();
    graph.add_node(&gid, node("b", 0, None)).unwrap();
    graph
        .add_edge(&gid, &TaskId::new("a"), &TaskId::new("b"))
        .unwrap();

    let mgr = StateTransitionManager::new(100, 0.8);
    // b cannot become READY while a is not DONE.
    assert!(mgr
        .transition(&graph, None, &TaskId::new("b"), TaskStatus::Ready, "try")
        .is_err());

    mgr.transition(&graph, None, &TaskId::new("a"), TaskStatus::Done, "done")
        .unwrap();
    mgr.transition(&graph, None, &TaskId::new("b"), TaskStatus::Ready, "now")
        .unwrap();
    assert_eq!(graph.get_node(&TaskId::new("b")).unwrap().status, TaskStatus::Ready);
}

#[test]
fn layer_of_child_is_parent_layer_plus_one() {
    let graph = TaskGraph::new();
    let root_id = graph.init_root("do the thing").unwrap();
    let root = graph.get_node(&root_id).unwrap();
    assert_eq!(root.layer, 0);

    let sub_graph = GraphId::for_node(&root_id);
    graph.add_graph(sub_graph.clone(), false).unwrap();
    let child_id = root_id.child(0);
    graph
        .add_node(&sub_graph, node(child_id.as_str(), root.layer + 1, Some(root_id.as_str())))
        .unwrap();
    assert_eq!(graph.get_node(&child_id).unwrap().layer, root.layer + 1);
}

#[test]
fn no_node_appears_in_more_than_one_sub_graph() {
    let graph = TaskGraph::new();
    let g1 = GraphId::new("g1");
    let g2 = GraphId::new("g2");
    graph.add_graph(g1.clone(), true).unwrap();
    graph.add_graph(g2.clone(), false).unwrap();
    graph.add_node(&g1, node("a", 0, None)).unwrap();

    // adding the same task id to a second graph is rejected outright.
    let err = graph.add_node(&g2, node("a", 0, None)).unwrap_err();
    assert!(matches!(err, taskgraph_core::TaskGraphError::DuplicateTask(_, _)));
}

#[test]
fn replan_attempts_never_exceeds_configured_maximum() {
    let max_replan_attempts = 3u32;
    let mut n = node("a", 0, None);
    for _ in 0..max_replan_attempts {
        n.replan_attempts += 1;
    }
    assert!(n.replan_attempts <= max_replan_attempts);
}

#[test]
fn transitioning_twice_in_a_row_is_rejected_the_second_time() {
    let graph = TaskGraph::new();
    let gid = GraphId::new("g");
    graph.add_graph(gid.clone(), true).unwrap();
    let mut a = node("a", 0, None);
    a.status = TaskStatus::Ready;
    graph.add_node(&gid, a).unwrap();

    let mgr = StateTransitionManager::new(100, 0.8);
    mgr.transition(&graph, None, &TaskId::new("a"), TaskStatus::Running, "dispatch")
        .unwrap();
    let err = mgr
        .transition(&graph, None, &TaskId::new("a"), TaskStatus::Running, "dispatch again")
        .unwrap_err();
    assert!(matches!(err, taskgraph_core::TaskGraphError::IllegalTransition { .. }));
}
