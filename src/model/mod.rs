pub mod api;
pub mod ballot;
pub mod election;
pub mod identity;
pub mod ledger;
pub mod outcome;
pub mod pagination;
pub mod registry;
pub mod service;
pub mod session;
pub mod workflow;
