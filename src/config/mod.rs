pub mod schema;

pub use schema::{
    default_config_path, AuthConfig, ClientConfig, Config, GatewayConfig, GoogleConfig,
};
