pub mod gateway;

pub use gateway::{run_shell, ExecutionGateway, GatewayError, Invocation};
