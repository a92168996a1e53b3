pub mod cloud;
pub mod config;
pub mod controller;
pub mod identity;
pub mod logging;
pub mod predicate;
pub mod provision;
pub mod queue;
pub mod reconcile;
pub mod retry;
pub mod rotation;
pub mod store;
