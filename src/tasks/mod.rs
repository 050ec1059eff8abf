pub mod model;
pub mod service;
pub mod worker;

pub use model::{TaskError, TaskState, WorkflowJob};
pub use service::TaskService;
pub use worker::{JobRunner, WorkflowRunner};
