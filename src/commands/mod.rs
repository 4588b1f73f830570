pub mod execute;
pub mod generate;
pub mod pipeline;
pub mod status;
pub mod topics;
