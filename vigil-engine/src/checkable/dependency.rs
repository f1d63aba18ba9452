//! Dependency graph and reachability
//!
//! Directed `parent -> child` edges with a type and an availability
//! predicate. Reachability walks parents with a bounded recursion depth;
//! services additionally carry an implicit dependency on their host for
//! state and notification purposes.

use super::{Checkable, CheckableKind};
use crate::runtime::Runtime;
use crate::types::{DependencyType, HostState, ServiceState, StateType};
use std::collections::BTreeMap;
use std::sync::Arc;

const MAX_PARENT_DEPTH: u32 = 20;
const MAX_CHILD_DEPTH: u32 = 32;

/// A directed dependency edge between two checkables
#[derive(Debug, Clone)]
pub struct Dependency {
    pub name: String,
    /// Full name of the checkable being depended on
    pub parent: String,
    /// Full name of the dependent checkable
    pub child: String,
    pub dependency_type: DependencyType,
    /// Only enforced while inside this time period
    pub period: Option<String>,
    /// Evaluate the parent's last hard state instead of a soft state
    pub ignore_soft_states: bool,
    /// Parent states under which the parent counts as available;
    /// `None` means the parent must be in its OK-state.
    pub state_filter: Option<Vec<ServiceState>>,
}

impl Dependency {
    /// Whether the parent currently satisfies this dependency
    pub fn is_available(&self, rt: &Runtime) -> bool {
        if let Some(period) = &self.period {
            if let Some(tp) = rt.timeperiod(period) {
                // outside its period a dependency is not enforced
                if !tp.is_inside(rt.now()) {
                    return true;
                }
            }
        }

        let Some(parent) = rt.checkable(&self.parent) else {
            tracing::warn!(
                target: "vigil_engine::dependency",
                dependency = %self.name,
                parent = %self.parent,
                "dependency references unknown parent"
            );
            return false;
        };

        let (raw, state_type, last_hard) = {
            let st = parent.state.lock();
            (st.state_raw, st.state_type, st.last_hard_state_raw)
        };

        let eval = if self.ignore_soft_states && state_type == StateType::Soft {
            last_hard
        } else {
            raw
        };

        match &self.state_filter {
            None => parent.state_is_ok(eval),
            Some(states) => states.contains(&eval),
        }
    }
}

/// Forward and reverse edge sets, guarded by the checkable's dependency
/// mutex
#[derive(Debug, Default)]
pub(crate) struct DependencySets {
    /// Edges where this checkable is the child
    pub forward: Vec<Arc<Dependency>>,
    /// Edges where this checkable is the parent
    pub reverse: Vec<Arc<Dependency>>,
}

impl Checkable {
    pub(crate) fn add_forward_dependency(&self, dep: Arc<Dependency>) {
        self.deps.lock().forward.push(dep);
    }

    pub(crate) fn add_reverse_dependency(&self, dep: Arc<Dependency>) {
        self.deps.lock().reverse.push(dep);
    }

    pub(crate) fn remove_dependency(&self, name: &str) {
        let mut deps = self.deps.lock();
        deps.forward.retain(|d| d.name != name);
        deps.reverse.retain(|d| d.name != name);
    }

    /// Dependencies where this checkable is the child
    pub fn dependencies(&self) -> Vec<Arc<Dependency>> {
        self.deps.lock().forward.clone()
    }

    /// Direct parents via explicit dependencies, self-edges excluded
    pub fn parents(&self, rt: &Runtime) -> Vec<Arc<Checkable>> {
        let mut out: BTreeMap<String, Arc<Checkable>> = BTreeMap::new();

        for dep in self.deps.lock().forward.iter() {
            if dep.parent == self.name() {
                continue;
            }
            if let Some(parent) = rt.checkable(&dep.parent) {
                out.insert(dep.parent.clone(), parent);
            }
        }

        out.into_values().collect()
    }

    /// Direct children via explicit dependencies, self-edges excluded
    pub fn children(&self, rt: &Runtime) -> Vec<Arc<Checkable>> {
        let mut out: BTreeMap<String, Arc<Checkable>> = BTreeMap::new();

        for dep in self.deps.lock().reverse.iter() {
            if dep.child == self.name() {
                continue;
            }
            if let Some(child) = rt.checkable(&dep.child) {
                out.insert(dep.child.clone(), child);
            }
        }

        out.into_values().collect()
    }

    /// Transitive children, bounded depth
    pub fn all_children(&self, rt: &Runtime) -> Vec<Arc<Checkable>> {
        let mut acc: BTreeMap<String, Arc<Checkable>> = BTreeMap::new();
        self.collect_children(rt, &mut acc, 0);
        acc.into_values().collect()
    }

    fn collect_children(
        &self,
        rt: &Runtime,
        acc: &mut BTreeMap<String, Arc<Checkable>>,
        level: u32,
    ) {
        if level > MAX_CHILD_DEPTH {
            return;
        }

        for child in self.children(rt) {
            let name = child.name().to_string();
            if acc.insert(name, child.clone()).is_none() {
                child.collect_children(rt, acc, level + 1);
            }
        }
    }

    /// Whether this checkable is reachable for the given dependency type
    pub fn is_reachable(&self, rt: &Runtime, dt: DependencyType) -> bool {
        self.reachable_at_depth(rt, dt, 0)
    }

    fn reachable_at_depth(&self, rt: &Runtime, dt: DependencyType, depth: u32) -> bool {
        if depth > MAX_PARENT_DEPTH {
            tracing::warn!(
                target: "vigil_engine::dependency",
                checkable = %self.name(),
                "too many nested dependencies, treating as unreachable"
            );
            return false;
        }

        for parent in self.parents(rt) {
            if !parent.reachable_at_depth(rt, dt, depth + 1) {
                return false;
            }
        }

        // implicit dependency on the owning host; a host that is only
        // soft-Down leaves the service reachable
        if let CheckableKind::Service { host_name, .. } = self.kind() {
            if matches!(dt, DependencyType::State | DependencyType::Notification) {
                if let Some(host) = rt.checkable(host_name) {
                    let (raw, state_type) = {
                        let st = host.state.lock();
                        (st.state_raw, st.state_type)
                    };

                    if HostState::from_raw(raw) == HostState::Down
                        && state_type == StateType::Hard
                    {
                        return false;
                    }
                }
            }
        }

        for dep in self.dependencies() {
            if dep.dependency_type != dt {
                continue;
            }
            if !dep.is_available(rt) {
                return false;
            }
        }

        true
    }
}
