pub mod deployments;
pub mod health;
pub mod manifests;
pub mod publish;
