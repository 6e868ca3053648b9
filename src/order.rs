//! Execution order analysis (§4.3): a cycle-tolerant topological sort over
//! static dependencies, assigning each module its `exec_order`.
//!
//! Grounded in the same enter/exit depth-first walk real bundlers use to
//! linearize a module graph, but index-based rather than mutating modules
//! through raw pointers while the walk is in flight.

use crate::error::{Warning, WarningKind};
use crate::id::ModuleId;
use crate::loader::ModuleStore;
use crate::module::ModuleOrExternal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    OnStack,
    Done,
}

struct Frame {
    idx: usize,
    deps: Vec<usize>,
    cursor: usize,
}

pub struct OrderResult {
    /// Module indices in execution order (static deps before dependents).
    pub order: Vec<usize>,
    pub warnings: Vec<Warning>,
}

pub(crate) fn static_deps(store: &ModuleStore, idx: usize) -> Vec<usize> {
    match &store.modules[idx] {
        ModuleOrExternal::External(_) => Vec::new(),
        ModuleOrExternal::Normal(m) => m
            .sources
            .iter()
            .filter_map(|source| {
                let resolved = m.resolved_ids.get(source)?;
                store.by_id.get(&resolved.id).copied()
            })
            .collect(),
    }
}

#[allow(clippy::too_many_arguments)]
fn dfs_from(
    store: &ModuleStore,
    root: usize,
    state: &mut [VisitState],
    path: &mut Vec<usize>,
    order: &mut Vec<usize>,
    warnings: &mut Vec<Warning>,
) {
    state[root] = VisitState::OnStack;
    path.push(root);
    let mut stack = vec![Frame { idx: root, deps: static_deps(store, root), cursor: 0 }];

    while let Some(frame) = stack.last_mut() {
        if frame.cursor < frame.deps.len() {
            let dep = frame.deps[frame.cursor];
            frame.cursor += 1;
            match state[dep] {
                VisitState::Unvisited => {
                    state[dep] = VisitState::OnStack;
                    path.push(dep);
                    let dep_deps = static_deps(store, dep);
                    stack.push(Frame { idx: dep, deps: dep_deps, cursor: 0 });
                }
                VisitState::OnStack => {
                    let cycle_start = path.iter().position(|&i| i == dep).expect("on-stack module is on the path");
                    // Close the loop: "ancestor down to current, forming the loop" (§4.3) names the
                    // back-edge's target twice, once as the start and once as where it closes.
                    let mut cycle: Vec<ModuleId> = path[cycle_start..].iter().map(|&i| store.modules[i].id().clone()).collect();
                    cycle.push(store.modules[dep].id().clone());
                    warnings.push(Warning::new(WarningKind::CircularDependency { cycle }));
                }
                VisitState::Done => {}
            }
        } else {
            let finished = stack.pop().expect("stack non-empty in else branch");
            state[finished.idx] = VisitState::Done;
            path.pop();
            order.push(finished.idx);
        }
    }
}

/// Walk from the entry points first (in the order they were declared), then
/// sweep any modules only reachable via a dynamic import or manual chunk
/// declaration, so every module in the store ends up ordered exactly once.
pub fn compute_execution_order(store: &mut ModuleStore, entry_indices: &[usize]) -> OrderResult {
    let n = store.modules.len();
    let mut state = vec![VisitState::Unvisited; n];
    let mut order = Vec::with_capacity(n);
    let mut warnings = Vec::new();
    let mut path = Vec::new();

    for &root in entry_indices {
        if state[root] == VisitState::Unvisited {
            dfs_from(store, root, &mut state, &mut path, &mut order, &mut warnings);
        }
    }
    for idx in store.completed.clone() {
        if state[idx] == VisitState::Unvisited {
            dfs_from(store, idx, &mut state, &mut path, &mut order, &mut warnings);
        }
    }

    for (position, &idx) in order.iter().enumerate() {
        if let Some(m) = store.modules[idx].as_normal_mut() {
            m.exec_order = position;
        }
    }

    OrderResult { order, warnings }
}
