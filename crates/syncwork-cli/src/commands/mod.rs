pub mod backoff;
pub mod context;
pub mod dispatch;
pub mod output;
pub mod pod_name;
pub mod worker;
pub mod workload;
