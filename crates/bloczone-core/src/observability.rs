use serde::Serialize;

use crate::batch::BatchPhase;
use crate::domain::FeatureSet;

/// Point-in-time view of one container, for logs and status output.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerCounts {
    /// Registered observer identities.
    pub observers: usize,
    /// Observer-to-key watch edges.
    pub edges: usize,
    pub middleware: usize,
    pub pending: usize,
    pub phase: BatchPhase,
    pub features: FeatureSet,
    /// `true` while the periodic flush loop is running.
    pub flush_timer: bool,
}
