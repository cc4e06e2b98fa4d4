//! Per mesh group load progress and the queue of groups ready for a BLAS build

use std::collections::VecDeque;

use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, Default)]
struct GroupProgress {
    mesh_count: u32,
    loaded_meshes: u32,
}

#[derive(Debug, Default)]
struct ReadinessState {
    /// Indexed by global mesh group index
    groups: Vec<GroupProgress>,
    ready: VecDeque<u32>,
}

/// Counts completed mesh loads per group and queues groups once complete.
///
/// All state sits behind one mutex so the increment, the comparison against
/// the mesh count and the enqueue happen as one step, whichever thread
/// completes the last mesh.
#[derive(Debug, Default)]
pub struct MeshGroupReadiness {
    state: Mutex<ReadinessState>,
}

impl MeshGroupReadiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `group`. Groups are registered in index order.
    pub fn register_group(&self, group: u32, mesh_count: u32) {
        let mut state = self.state.lock();
        debug_assert_eq!(group as usize, state.groups.len(), "mesh groups registered out of order");
        let index = group as usize;
        if state.groups.len() <= index {
            state.groups.resize(index + 1, GroupProgress::default());
        }
        state.groups[index] = GroupProgress { mesh_count, loaded_meshes: 0 };
    }

    /// Count one completed mesh of `group`. Returns true if this completed the group.
    ///
    /// Completions past the mesh count are ignored, so a group is queued at most once.
    pub fn mark_mesh_loaded(&self, group: u32) -> bool {
        let mut state = self.state.lock();
        let Some(progress) = state.groups.get_mut(group as usize) else {
            log::warn!("Load completion for unknown mesh group {}", group);
            return false;
        };
        if progress.loaded_meshes >= progress.mesh_count {
            log::warn!("Extra load completion for mesh group {} ignored", group);
            return false;
        }
        progress.loaded_meshes += 1;
        if progress.loaded_meshes == progress.mesh_count {
            state.ready.push_back(group);
            return true;
        }
        false
    }

    /// Oldest group waiting for its BLAS build.
    pub fn pop_ready(&self) -> Option<u32> {
        self.state.lock().ready.pop_front()
    }

    /// Put a popped group back at the head of the queue.
    pub fn requeue_front(&self, group: u32) {
        self.state.lock().ready.push_front(group);
    }

    pub fn ready_len(&self) -> usize {
        self.state.lock().ready.len()
    }

    pub fn ready_groups(&self) -> Vec<u32> {
        self.state.lock().ready.iter().copied().collect()
    }

    pub fn loaded_meshes(&self, group: u32) -> Option<u32> {
        self.state.lock().groups.get(group as usize).map(|g| g.loaded_meshes)
    }

    pub fn mesh_count(&self, group: u32) -> Option<u32> {
        self.state.lock().groups.get(group as usize).map(|g| g.mesh_count)
    }

    pub fn is_fully_loaded(&self, group: u32) -> bool {
        self.state
            .lock()
            .groups
            .get(group as usize)
            .is_some_and(|g| g.loaded_meshes == g.mesh_count)
    }

    pub fn group_count(&self) -> usize {
        self.state.lock().groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_enqueued_when_last_mesh_arrives() {
        let readiness = MeshGroupReadiness::new();
        readiness.register_group(0, 2);
        readiness.register_group(1, 1);

        assert!(!readiness.mark_mesh_loaded(0));
        assert!(readiness.mark_mesh_loaded(1));
        assert!(readiness.mark_mesh_loaded(0));
        assert_eq!(readiness.ready_groups(), vec![1, 0]);
        assert!(readiness.is_fully_loaded(0));
    }

    #[test]
    fn test_never_exceeds_count() {
        let readiness = MeshGroupReadiness::new();
        readiness.register_group(0, 1);
        assert!(readiness.mark_mesh_loaded(0));
        assert!(!readiness.mark_mesh_loaded(0));
        assert_eq!(readiness.loaded_meshes(0), Some(1));
        assert_eq!(readiness.ready_len(), 1);
        assert!(!readiness.mark_mesh_loaded(7));
    }

    #[test]
    fn test_empty_group_never_ready() {
        let readiness = MeshGroupReadiness::new();
        readiness.register_group(0, 0);
        assert!(!readiness.mark_mesh_loaded(0));
        assert_eq!(readiness.ready_len(), 0);
    }

    #[test]
    fn test_requeue_goes_to_front() {
        let readiness = MeshGroupReadiness::new();
        for group in 0..3 {
            readiness.register_group(group, 1);
            readiness.mark_mesh_loaded(group);
        }
        let first = readiness.pop_ready().unwrap();
        readiness.requeue_front(first);
        assert_eq!(readiness.ready_groups(), vec![0, 1, 2]);
    }

    #[test]
    fn test_concurrent_completions_enqueue_once() {
        let readiness = Arc::new(MeshGroupReadiness::new());
        readiness.register_group(0, 64);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let readiness = readiness.clone();
                std::thread::spawn(move || {
                    for _ in 0..8 {
                        readiness.mark_mesh_loaded(0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(readiness.loaded_meshes(0), Some(64));
        assert_eq!(readiness.ready_groups(), vec![0]);
    }
}
