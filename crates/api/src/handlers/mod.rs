pub mod approval;
pub mod delegation;
pub mod instance;
pub mod workflow;
