//! 后台任务

pub mod commission_worker;

pub use commission_worker::CommissionWorker;
