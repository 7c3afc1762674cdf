use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use taskgraph_checkpoint::{CheckpointCollaborator, InMemoryCheckpointCollaborator, InMemoryKnowledgeStore};
use taskgraph_core::{KnowledgeRecord, KnowledgeStore, NodeType, TaskGraph, TaskNode, TaskType};

fn build_graph() -> TaskGraph {
    let graph = TaskGraph::new();
    let root_id = graph.init_root("benchmark goal").unwrap();
    let gid = taskgraph_core::GraphId::for_node(&root_id);
    graph.add_graph(gid.clone(), false).unwrap();
    for i in 0..20 {
        let node = TaskNode::new(
            root_id.child(i),
            format!("sub-task {i}"),
            TaskType::Think,
            NodeType::Execute,
            1,
            Some(root_id.clone()),
        );
        graph.add_node(&gid, node).unwrap();
    }
    graph
}

fn checkpoint_create_benchmark(c: &mut Criterion) {
    let graph = build_graph();
    let knowledge = InMemoryKnowledgeStore::new();
    for id in graph.all_node_ids() {
        knowledge.put(KnowledgeRecord::from(&graph.get_node(&id).unwrap()));
    }
    let collaborator = InMemoryCheckpointCollaborator::new();

    c.bench_function("checkpoint create", |b| {
        b.iter(|| {
            collaborator
                .create_checkpoint(black_box(&graph), black_box(&knowledge), json!({}))
                .unwrap()
        });
    });
}

fn checkpoint_load_benchmark(c: &mut Criterion) {
    let graph = build_graph();
    let knowledge = InMemoryKnowledgeStore::new();
    for id in graph.all_node_ids() {
        knowledge.put(KnowledgeRecord::from(&graph.get_node(&id).unwrap()));
    }
    let collaborator = InMemoryCheckpointCollaborator::new();
    let id = collaborator.create_checkpoint(&graph, &knowledge, json!({})).unwrap();

    c.bench_function("checkpoint load", |b| {
        b.iter(|| collaborator.load_checkpoint(black_box(&id)).unwrap());
    });
}

criterion_group!(benches, checkpoint_create_benchmark, checkpoint_load_benchmark);
criterion_main!(benches);
