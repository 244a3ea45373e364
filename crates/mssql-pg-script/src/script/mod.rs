//! Script planning and emission.

pub mod copy;
pub mod ddl;
pub mod plan;
pub mod sequence;
pub mod sink;
