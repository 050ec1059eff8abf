pub mod annotation_repo;
pub mod conflict_repo;
pub mod detection_repo;
pub mod run_repo;
pub mod source_repo;
pub mod task_repo;

pub use annotation_repo::AnnotationRepository;
pub use conflict_repo::ConflictRepository;
pub use detection_repo::{AcceptedDetection, DetectionRepository, SkyBox};
pub use run_repo::{RunRepository, RunSummary};
pub use source_repo::SourceRepository;
pub use task_repo::{TaskRepository, TaskStats};
