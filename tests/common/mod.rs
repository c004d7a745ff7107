#![allow(dead_code)]

pub use jobgrid_test_utils::builders;
pub use jobgrid_test_utils::fake_executor;
pub use jobgrid_test_utils::{init_tracing, with_timeout};
