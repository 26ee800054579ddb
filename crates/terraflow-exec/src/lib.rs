//! Terraform process provisioner for Terraflow.

pub mod terraform;

pub use terraform::TerraformExecutor;
