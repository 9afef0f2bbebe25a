pub mod memory;
pub mod workflow;

pub use memory::MemoryWorkflowRepository;
pub use workflow::WorkflowRepository;
