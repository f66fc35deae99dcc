//! mod `api` provides the topmost fundamental APIs for users of the core.
//! The core must be initialized before a composite breaker is built.
//! Three ways to perform initialization are supported:
//!
//!  1. `init_default()`, using default config to initialize.
//!  2. `init_with_config(config_entity: ConfigEntity)`, using a customized config entity to initialize.
//!  3. `init_with_config_file(config_path: &mut String)`, using a YAML file to initialize.

mod init;

pub use init::*;
