// MAGUS workflow model, dependency rules and step compilation
pub mod magus;

// Generic step-to-argv translation
pub mod command;

// XTree parameter model and command builder
pub mod xtree;

// Error types
pub mod error;

// Persistent job store and FIFO queue
pub mod store;

// Single-holder execution lock
pub mod lock;

// Subprocess supervision
pub mod runner;

// Completion notifications
pub mod notify;

// Worker and CLI configuration
pub mod config;

// Job submission
pub mod submit;

// Worker loop
pub mod worker;

pub use config::{ExecutionMode, WorkerConfig};
pub use store::{JobRecord, JobStore, NewJob};
pub use worker::{JobReport, RecoveryReport, Tick, Worker};
