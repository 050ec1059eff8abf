pub mod comment;
pub mod detection;
pub mod external_conflict;
pub mod instance;
pub mod run;
pub mod source;
pub mod source_detection;
pub mod survey_component;
pub mod survey_component_run;
pub mod tag;
pub mod tag_source_detection;
pub mod task;

pub use detection::Entity as Detection;
pub use external_conflict::Entity as ExternalConflict;
pub use run::Entity as Run;
pub use source::Entity as Source;
pub use source_detection::Entity as SourceDetection;
pub use task::Entity as Task;
